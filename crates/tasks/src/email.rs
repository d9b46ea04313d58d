// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::LazyLock;

use avs_data_model::{AccountValidity, UserEmail};
use avs_email::{Address, Mailbox, Mailer, RenewalEmailContext};
use opentelemetry::{Key, KeyValue, metrics::Counter};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::METER;

static EMAIL_COUNTER: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("avs.account_validity.emails")
        .with_description("How many account renewal emails were sent")
        .with_unit("{email}")
        .build()
});
const RESULT: Key = Key::from_static_str("result");

/// How the renewal email was delivered to the addresses of an account
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Addresses the email was handed over to the transport for
    pub sent: usize,

    /// Addresses for which the email could not be sent
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to send the renewal email to all {failed} addresses")]
    AllFailed { failed: usize },
}

/// Send the renewal email to every address of an account
///
/// A failure to send to one address does not prevent sending to the others.
/// An account without any address is not an error.
///
/// # Errors
///
/// Returns [`DispatchError::AllFailed`] if the email could not be sent to
/// any of the addresses.
#[tracing::instrument(
    name = "account_validity.dispatch_email",
    skip_all,
    fields(
        user.id = %validity.user_id,
        addresses = addresses.len(),
    ),
)]
pub async fn dispatch_renewal_email(
    mailer: &Mailer,
    validity: &AccountValidity,
    display_name: String,
    url: Url,
    addresses: &[UserEmail],
) -> Result<DispatchOutcome, DispatchError> {
    let context = RenewalEmailContext::new(display_name, validity, url);
    let mut outcome = DispatchOutcome::default();

    for user_email in addresses {
        let address: Address = match user_email.email.parse() {
            Ok(address) => address,
            Err(e) => {
                error!(
                    error = &e as &dyn std::error::Error,
                    user_email.id = %user_email.id,
                    "Invalid email address, not sending renewal email"
                );
                EMAIL_COUNTER.add(1, &[KeyValue::new(RESULT, "invalid_address")]);
                outcome.failed += 1;
                continue;
            }
        };

        let mailbox = Mailbox::new(None, address);

        info!("Sending renewal email to {}", mailbox);
        // We only log if the email fails to send, to try the other addresses
        match mailer.send_renewal_email(mailbox, &context).await {
            Ok(()) => {
                EMAIL_COUNTER.add(1, &[KeyValue::new(RESULT, "sent")]);
                outcome.sent += 1;
            }
            Err(e) => {
                error!(
                    error = &e as &dyn std::error::Error,
                    user_email.id = %user_email.id,
                    "Failed to send renewal email"
                );
                EMAIL_COUNTER.add(1, &[KeyValue::new(RESULT, "failed")]);
                outcome.failed += 1;
            }
        }
    }

    if outcome.sent == 0 && outcome.failed > 0 {
        return Err(DispatchError::AllFailed {
            failed: outcome.failed,
        });
    }

    Ok(outcome)
}
