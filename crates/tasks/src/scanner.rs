// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Periodic scan of the accounts about to expire

use avs_data_model::{AccountValidity, User};
use avs_storage::{RepositoryAccess, RepositoryError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::{
    State,
    email::{DispatchError, dispatch_renewal_email},
    token::{TokenIssuerError, issue_renewal_token},
};

/// What happened to the accounts looked at during a scan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    /// Accounts which got their renewal email
    pub notified: usize,

    /// Accounts for which something failed. They will be retried on the
    /// next scan.
    pub failed: usize,

    /// Accounts which changed while the email was being sent, usually
    /// because they were renewed in the meantime
    pub skipped: usize,
}

#[derive(Debug, thiserror::Error)]
enum NotifyAccountError {
    #[error("User {0} not found")]
    UserNotFound(Ulid),

    #[error(transparent)]
    Token(#[from] TokenIssuerError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

enum NotifyOutcome {
    Notified,
    Skipped,
}

/// Periodically sends renewal emails to the accounts about to expire
pub struct ExpiryScanner {
    state: State,
    cancellation_token: CancellationToken,
}

impl ExpiryScanner {
    pub(crate) fn new(state: State, cancellation_token: CancellationToken) -> Self {
        Self {
            state,
            cancellation_token,
        }
    }

    /// Run a scan every `scan_interval`, until the cancellation token is
    /// cancelled
    ///
    /// The first scan happens right away. A failing scan is logged and does
    /// not stop the loop.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.state.policy().scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.cancellation_token.cancelled() => {
                    info!("Shutting down the account validity scanner");
                    break;
                }

                _ = interval.tick() => {}
            }

            if let Err(e) = self.run_once().await {
                error!(
                    error = &e as &dyn std::error::Error,
                    "Failed to scan the accounts about to expire"
                );
            }
        }
    }

    /// Look for the accounts about to expire and send them a renewal email
    ///
    /// Accounts are handled one after the other. A failure on one account is
    /// logged and counted in the report, and does not prevent handling the
    /// other ones. If the cancellation token gets cancelled, the scan stops
    /// after the current account.
    ///
    /// # Errors
    ///
    /// Returns an error if the list of accounts could not be loaded
    #[tracing::instrument(
        name = "job.account_validity.scan",
        skip_all,
        fields(
            scan.since,
            scan.until,
        ),
        err,
    )]
    pub async fn run_once(&self) -> Result<ScanReport, RepositoryError> {
        let policy = self.state.policy();
        let (since, until) = policy.notification_window(self.state.clock().now());
        let span = tracing::Span::current();
        span.record("scan.since", tracing::field::display(since));
        span.record("scan.until", tracing::field::display(until));

        let mut report = ScanReport::default();
        let mut after = None;

        'batches: loop {
            let mut repo = self.state.repository().await?;
            let batch = repo
                .account_validity()
                .find_expiring_unnotified(since, until, after, policy.batch_size)
                .await?;
            repo.cancel().await?;

            let count = batch.len();
            debug!(count, "Loaded a batch of accounts about to expire");

            for validity in batch {
                if self.cancellation_token.is_cancelled() {
                    info!("Scan cancelled, stopping early");
                    break 'batches;
                }

                let user_id = validity.user_id;
                after = Some(user_id);

                match self.notify_account(validity).await {
                    Ok(NotifyOutcome::Notified) => report.notified += 1,
                    Ok(NotifyOutcome::Skipped) => report.skipped += 1,
                    Err(e) => {
                        error!(
                            error = &e as &dyn std::error::Error,
                            user.id = %user_id,
                            "Failed to notify account about its expiration"
                        );
                        report.failed += 1;
                    }
                }
            }

            if count < policy.batch_size {
                break;
            }
        }

        if report == ScanReport::default() {
            debug!("No account to notify");
        } else {
            info!(
                notified = report.notified,
                failed = report.failed,
                skipped = report.skipped,
                "Sent renewal emails"
            );
        }

        Ok(report)
    }

    #[tracing::instrument(
        name = "job.account_validity.notify",
        skip_all,
        fields(user.id = %validity.user_id),
    )]
    async fn notify_account(
        &self,
        validity: AccountValidity,
    ) -> Result<NotifyOutcome, NotifyAccountError> {
        let clock = self.state.clock();
        let mut rng = self.state.rng();

        // The token is committed before sending the email, so that the link
        // in the email is always valid
        let mut repo = self.state.repository().await?;

        let user = repo
            .user()
            .lookup(validity.user_id)
            .await?
            .ok_or(NotifyAccountError::UserNotFound(validity.user_id))?;

        let addresses = repo.user_email().all(&user).await?;

        let token =
            issue_renewal_token(&mut *repo.account_validity(), &mut rng, clock, &user).await?;

        repo.save().await?;

        let display_name = self.display_name(&user).await;
        let url = self.state.url_builder().account_validity_renew(token.token);

        let outcome =
            dispatch_renewal_email(self.state.mailer(), &validity, display_name, url, &addresses)
                .await?;
        debug!(
            sent = outcome.sent,
            failed = outcome.failed,
            "Renewal email dispatched"
        );

        let mut repo = self.state.repository().await?;
        let updated = repo
            .account_validity()
            .set_email_sent(validity, true)
            .await?;
        repo.save().await?;

        if updated.is_some() {
            Ok(NotifyOutcome::Notified)
        } else {
            warn!("Account changed while sending the renewal email, not marking it as notified");
            Ok(NotifyOutcome::Skipped)
        }
    }

    /// Get the name to greet the user with, falling back to the username
    async fn display_name(&self, user: &User) -> String {
        let display_name = match self.state.repository().await {
            Ok(mut repo) => {
                let res = repo.user().display_name(user).await;
                if let Err(e) = repo.cancel().await {
                    warn!(
                        error = &e as &dyn std::error::Error,
                        "Failed to close the repository"
                    );
                }
                res
            }
            Err(e) => Err(e),
        };

        match display_name {
            Ok(Some(display_name)) => display_name,
            Ok(None) => user.username.clone(),
            Err(e) => {
                warn!(
                    error = &e as &dyn std::error::Error,
                    "Failed to lookup the display name, using the username instead"
                );
                user.username.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use avs_data_model::AccountValidityPolicy;
    use avs_storage::{Clock, RepositoryFactory};
    use chrono::Duration;

    use super::*;
    use crate::{renew_account, test_utils::TestState};

    fn scanner(state: &TestState) -> ExpiryScanner {
        ExpiryScanner::new(state.state.clone(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_notifies_accounts_about_to_expire() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let alice = state
            .add_user(
                "alice",
                &["alice@example.com", "alice@example.org"],
                now + Duration::days(2),
            )
            .await;

        let report = scanner(&state).run_once().await.unwrap();
        assert_eq!(
            report,
            ScanReport {
                notified: 1,
                failed: 0,
                skipped: 0
            }
        );

        // One email per address
        let sent = state.transport.sent_messages();
        assert_eq!(sent.len(), 2);

        // A single token was issued, shared by both emails
        let tokens = state.factory.renewal_tokens(alice.id).await;
        assert_eq!(tokens.len(), 1);
        assert!(!tokens[0].is_consumed());

        assert!(state.validity(&alice).await.email_sent);
    }

    #[tokio::test]
    async fn test_notified_accounts_are_not_selected_again() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let alice = state
            .add_user("alice", &["alice@example.com"], now + Duration::days(2))
            .await;

        let first = scanner(&state).run_once().await.unwrap();
        assert_eq!(first.notified, 1);
        let token = state.factory.renewal_tokens(alice.id).await;

        state.clock.advance(Duration::hours(1));
        let second = scanner(&state).run_once().await.unwrap();
        assert_eq!(second, ScanReport::default());

        // No new email and no new token
        assert_eq!(state.transport.sent_messages().len(), 1);
        assert_eq!(state.factory.renewal_tokens(alice.id).await, token);
    }

    #[tokio::test]
    async fn test_only_accounts_in_the_window_are_selected() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let expired = state
            .add_user("expired", &["expired@example.com"], now - Duration::hours(1))
            .await;
        let later = state
            .add_user("later", &["later@example.com"], now + Duration::days(8))
            .await;
        let edge = state
            .add_user("edge", &["edge@example.com"], now + Duration::days(7))
            .await;

        let report = scanner(&state).run_once().await.unwrap();
        assert_eq!(report.notified, 1);

        assert!(!state.validity(&expired).await.email_sent);
        assert!(!state.validity(&later).await.email_sent);
        assert!(state.validity(&edge).await.email_sent);
    }

    #[tokio::test]
    async fn test_account_without_address() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let alice = state.add_user("alice", &[], now + Duration::days(2)).await;

        let report = scanner(&state).run_once().await.unwrap();
        assert_eq!(report.notified, 1);
        assert!(state.transport.sent_messages().is_empty());
        assert!(state.validity(&alice).await.email_sent);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let alice = state
            .add_user("alice", &["alice@example.com"], now + Duration::days(2))
            .await;
        let bob = state
            .add_user("bob", &["bob@example.com"], now + Duration::days(2))
            .await;
        let carol = state
            .add_user("carol", &["carol@example.com"], now + Duration::days(2))
            .await;

        // Storage failure for alice, mail failure for bob
        state.factory.fail_user_email_lookups(alice.id);
        state
            .transport
            .reject_recipient("bob@example.com".parse().unwrap());

        let report = scanner(&state).run_once().await.unwrap();
        assert_eq!(
            report,
            ScanReport {
                notified: 1,
                failed: 2,
                skipped: 0
            }
        );

        assert!(!state.validity(&alice).await.email_sent);
        assert!(!state.validity(&bob).await.email_sent);
        assert!(state.validity(&carol).await.email_sent);

        // The failed accounts are retried on the next scan
        let report = scanner(&state).run_once().await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.notified, 0);
    }

    #[tokio::test]
    async fn test_display_name_fallback() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let alice = state
            .add_user("alice", &["alice@example.com"], now + Duration::days(2))
            .await;
        state
            .add_user("bob", &["bob@example.com"], now + Duration::days(2))
            .await;

        let mut repo = state.factory.create().await.unwrap();
        repo.user()
            .set_display_name(&alice, Some("Alice Liddell".to_owned()))
            .await
            .unwrap();
        repo.save().await.unwrap();

        scanner(&state).run_once().await.unwrap();

        let sent: Vec<_> = state
            .transport
            .sent_messages()
            .iter()
            .map(avs_email::SentMessage::as_string)
            .collect();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().any(|m| m.contains("Hello Alice Liddell,")));
        assert!(sent.iter().any(|m| m.contains("Hello bob,")));
    }

    #[tokio::test]
    async fn test_display_name_lookup_failure() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let alice = state
            .add_user("alice", &["alice@example.com"], now + Duration::days(2))
            .await;
        state.factory.fail_display_name_lookups(true);

        let report = scanner(&state).run_once().await.unwrap();
        assert_eq!(report.notified, 1);

        let sent = state.transport.sent_messages();
        assert!(sent[0].as_string().contains("Hello alice,"));
        assert!(state.validity(&alice).await.email_sent);
    }

    #[tokio::test]
    async fn test_batches() {
        let policy = AccountValidityPolicy {
            batch_size: 2,
            ..AccountValidityPolicy::default()
        };
        let mut state = TestState::new(policy).await;
        let now = state.clock.now();
        for name in ["alice", "bob", "carol", "dave", "eve"] {
            let email = format!("{name}@example.com");
            state
                .add_user(name, &[email.as_str()], now + Duration::days(1))
                .await;
        }

        let report = scanner(&state).run_once().await.unwrap();
        assert_eq!(report.notified, 5);
        assert_eq!(state.transport.sent_messages().len(), 5);
    }

    #[tokio::test]
    async fn test_renewed_account_is_not_selected() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let alice = state
            .add_user("alice", &["alice@example.com"], now + Duration::days(2))
            .await;

        scanner(&state).run_once().await.unwrap();
        let token = state.factory.renewal_tokens(alice.id).await.remove(0);

        // Renew at T, which pushes the expiration to T + 30 days
        state.clock.advance(Duration::days(1));
        let renewed_at = state.clock.now();
        let mut repo = state.factory.create().await.unwrap();
        let expires_at = renew_account(
            &mut repo,
            &*state.clock,
            state.state.policy(),
            &token.token,
        )
        .await
        .unwrap();
        repo.save().await.unwrap();
        assert_eq!(expires_at, renewed_at + Duration::days(30));

        let validity = state.validity(&alice).await;
        assert_eq!(validity.expires_at, expires_at);
        assert!(!validity.email_sent);

        // The next scan window ends at T + 7 days, so the account is left alone
        let report = scanner(&state).run_once().await.unwrap();
        assert_eq!(report, ScanReport::default());
        assert_eq!(state.transport.sent_messages().len(), 1);

        // Until it gets close to the new expiration date again
        state.clock.advance(Duration::days(24));
        let report = scanner(&state).run_once().await.unwrap();
        assert_eq!(report.notified, 1);
        assert_eq!(state.transport.sent_messages().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_renewal_is_not_overwritten() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let alice = state
            .add_user("alice", &["alice@example.com"], now + Duration::days(2))
            .await;

        // The scan loaded the account before it got renewed
        let stale = state.validity(&alice).await;

        let mut repo = state.factory.create().await.unwrap();
        let token = issue_renewal_token(
            &mut *repo.account_validity(),
            &mut state.rng,
            &*state.clock,
            &alice,
        )
        .await
        .unwrap();
        state.clock.advance(Duration::hours(1));
        let expires_at = renew_account(
            &mut repo,
            &*state.clock,
            state.state.policy(),
            &token.token,
        )
        .await
        .unwrap();
        repo.save().await.unwrap();

        let outcome = scanner(&state).notify_account(stale).await.unwrap();
        assert!(matches!(outcome, NotifyOutcome::Skipped));

        // The email still went out, but the renewal is kept
        assert_eq!(state.transport.sent_messages().len(), 1);
        let validity = state.validity(&alice).await;
        assert!(!validity.email_sent);
        assert_eq!(validity.expires_at, expires_at);
    }

    #[tokio::test]
    async fn test_cancelled_scan_stops_early() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let alice = state
            .add_user("alice", &["alice@example.com"], now + Duration::days(2))
            .await;

        let cancellation_token = CancellationToken::new();
        cancellation_token.cancel();
        let scanner = ExpiryScanner::new(state.state.clone(), cancellation_token);

        let report = scanner.run_once().await.unwrap();
        assert_eq!(report, ScanReport::default());
        assert!(!state.validity(&alice).await.email_sent);

        // The loop returns right away too
        scanner.run().await;
    }
}
