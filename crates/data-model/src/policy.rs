// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// The renewed expiration date does not fit in a [`DateTime`]
#[derive(Debug, Error)]
#[error("expiration date out of range")]
pub struct ExpirationOutOfRangeError;

/// Account validity configuration, as used by the scanner and the renewal
/// logic.
#[derive(Debug, Clone)]
pub struct AccountValidityPolicy {
    /// How long an account stays valid after it was renewed.
    pub period: Duration,

    /// How long before the expiration date the renewal email is sent.
    pub renew_at: Duration,

    /// How often the expiring accounts are scanned.
    pub scan_interval: std::time::Duration,

    /// Whether a renewal token is invalidated once it has been used.
    pub single_use_tokens: bool,

    /// How many accounts are loaded at once during a scan.
    pub batch_size: usize,
}

impl AccountValidityPolicy {
    /// The expiration date of an account renewed at `now`
    ///
    /// # Errors
    ///
    /// Returns an error if `now + period` is past the latest representable
    /// date
    pub fn renewed_expiration(
        &self,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ExpirationOutOfRangeError> {
        now.checked_add_signed(self.period)
            .ok_or(ExpirationOutOfRangeError)
    }

    /// The window of expiration dates which make an account eligible for a
    /// renewal email at `now`
    ///
    /// The end of the window saturates at the latest representable date.
    #[must_use]
    pub fn notification_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let until = now
            .checked_add_signed(self.renew_at)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (now, until)
    }
}

impl Default for AccountValidityPolicy {
    fn default() -> Self {
        Self {
            period: Duration::days(30),
            renew_at: Duration::days(7),
            scan_interval: std::time::Duration::from_secs(30 * 60),
            single_use_tokens: true,
            batch_size: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_renewed_expiration() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let policy = AccountValidityPolicy::default();
        assert_eq!(
            policy.renewed_expiration(now).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap()
        );
        assert_eq!(
            policy.notification_window(now),
            (now, Utc.with_ymd_and_hms(2025, 1, 8, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_huge_durations_do_not_overflow() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let huge =
            Duration::from_std(std::time::Duration::from_secs(100_000_000_000_000)).unwrap();
        let policy = AccountValidityPolicy {
            period: huge,
            renew_at: huge,
            ..AccountValidityPolicy::default()
        };

        assert!(policy.renewed_expiration(now).is_err());
        assert_eq!(
            policy.notification_window(now),
            (now, DateTime::<Utc>::MAX_UTC)
        );
    }
}
