// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use chrono::{DateTime, Utc};
use rand::{Rng, RngCore, distributions::Alphanumeric};
use serde::Serialize;
use ulid::Ulid;

use crate::InvalidTransitionError;

/// Number of characters in a generated renewal token
pub const RENEWAL_TOKEN_LENGTH: usize = 32;

/// The validity state of a user account
///
/// An account goes through a cycle: it is active until it gets within the
/// look-ahead window of its expiration, at which point a renewal email is
/// sent and `email_sent` is set. Renewing the account pushes `expires_at`
/// forward and clears the flag, which starts a new cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountValidity {
    pub user_id: Ulid,
    pub expires_at: DateTime<Utc>,
    pub email_sent: bool,
}

impl AccountValidity {
    /// Whether the account is past its expiration date
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// The expiration date as milliseconds since the UNIX epoch, which is how
    /// it is exposed to the email templates
    #[must_use]
    pub fn expiration_ts(&self) -> i64 {
        self.expires_at.timestamp_millis()
    }
}

/// A renewal token, sent by email as part of the renewal link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenewalToken {
    pub token: String,
    pub user_id: Ulid,
    pub created_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl RenewalToken {
    /// Generate a random renewal token string
    pub fn generate(rng: &mut (impl RngCore + ?Sized)) -> String {
        rng.sample_iter(&Alphanumeric)
            .take(RENEWAL_TOKEN_LENGTH)
            .map(char::from)
            .collect()
    }

    /// Whether the token was already used to renew the account
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    /// Mark the token as consumed
    ///
    /// # Errors
    ///
    /// Returns an error if the token was already consumed
    pub fn consume(mut self, consumed_at: DateTime<Utc>) -> Result<Self, InvalidTransitionError> {
        if self.consumed_at.is_some() {
            return Err(InvalidTransitionError);
        }

        self.consumed_at = Some(consumed_at);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand_chacha::ChaChaRng;

    use super::*;

    #[test]
    fn generated_tokens_are_alphanumeric() {
        let mut rng = ChaChaRng::seed_from_u64(42);
        let first = RenewalToken::generate(&mut rng);
        let second = RenewalToken::generate(&mut rng);

        assert_eq!(first.len(), RENEWAL_TOKEN_LENGTH);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, second);
    }

    #[test]
    fn consume_token_once() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let token = RenewalToken {
            token: "abc".to_owned(),
            user_id: Ulid::nil(),
            created_at: now,
            consumed_at: None,
        };

        let token = token.consume(now).unwrap();
        assert!(token.is_consumed());
        assert!(token.consume(now).is_err());
    }

    #[test]
    fn expiration_ts_is_in_milliseconds() {
        let expires_at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let validity = AccountValidity {
            user_id: Ulid::nil(),
            expires_at,
            email_sent: false,
        };

        assert_eq!(validity.expiration_ts(), 1_700_000_000_123);
        assert!(!validity.is_expired(expires_at - chrono::Duration::seconds(1)));
        assert!(validity.is_expired(expires_at));
    }
}
