// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Contexts used in templates

use avs_data_model::{AccountValidity, RenewalToken, User};
use avs_router::UrlBuilder;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use url::Url;

/// Context passed to any template
pub trait TemplateContext: Serialize {
    /// Generate sample values for this context type
    ///
    /// This is then used to check for template validity in unit tests and in
    /// the CLI (`avs-cli templates check`)
    fn sample(now: DateTime<Utc>, rng: &mut impl Rng, url_builder: &UrlBuilder) -> Vec<Self>
    where
        Self: Sized;
}

/// Context used by the `emails/renewal.{txt,html}` templates
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RenewalEmailContext {
    display_name: String,
    expiration_ts: i64,
    url: Url,
}

impl RenewalEmailContext {
    /// Constructs a context for the renewal email
    #[must_use]
    pub fn new(display_name: String, validity: &AccountValidity, url: Url) -> Self {
        Self {
            display_name,
            expiration_ts: validity.expiration_ts(),
            url,
        }
    }
}

impl TemplateContext for RenewalEmailContext {
    fn sample(now: DateTime<Utc>, rng: &mut impl Rng, url_builder: &UrlBuilder) -> Vec<Self>
    where
        Self: Sized,
    {
        User::samples(now, rng)
            .into_iter()
            .map(|user| {
                let validity = AccountValidity {
                    user_id: user.id,
                    expires_at: now + Duration::days(7),
                    email_sent: false,
                };
                let token = RenewalToken::generate(rng);
                let url = url_builder.account_validity_renew(token);
                Self::new(user.username, &validity, url)
            })
            .collect()
    }
}
