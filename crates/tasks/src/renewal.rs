// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::LazyLock;

use avs_data_model::{AccountValidityPolicy, ExpirationOutOfRangeError};
use avs_storage::{BoxRepository, Clock, RepositoryAccess, RepositoryError};
use chrono::{DateTime, Utc};
use opentelemetry::{Key, KeyValue, metrics::Counter};
use thiserror::Error;
use tracing::info;
use ulid::Ulid;

use crate::METER;

static RENEWAL_COUNTER: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("avs.account_validity.renewals")
        .with_description("How many account renewals were attempted")
        .with_unit("{renewal}")
        .build()
});
const RESULT: Key = Key::from_static_str("result");

#[derive(Debug, Error)]
pub enum RenewalError {
    #[error("unknown renewal token")]
    UnknownToken,

    #[error("user {0} not found")]
    UserNotFound(Ulid),

    #[error(transparent)]
    ExpirationOutOfRange(#[from] ExpirationOutOfRangeError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Renew the account a renewal token was issued for
///
/// The new expiration date is `now + period`, whatever the previous one was,
/// and the account becomes eligible for a new renewal email. If the policy
/// uses single-use tokens, the token is consumed.
///
/// The changes are made in the given repository, it is up to the caller to
/// save it.
///
/// # Errors
///
/// Returns [`RenewalError::UnknownToken`] if the token does not exist or was
/// already used, or an error if the repository fails.
#[tracing::instrument(name = "account_validity.renew", skip_all, err)]
pub async fn renew_account(
    repo: &mut BoxRepository,
    clock: &dyn Clock,
    policy: &AccountValidityPolicy,
    token: &str,
) -> Result<DateTime<Utc>, RenewalError> {
    let res = renew_account_inner(repo, clock, policy, token).await;

    let result = match &res {
        Ok(_) => "success",
        Err(RenewalError::UnknownToken) => "unknown_token",
        Err(_) => "error",
    };
    RENEWAL_COUNTER.add(1, &[KeyValue::new(RESULT, result)]);

    res
}

async fn renew_account_inner(
    repo: &mut BoxRepository,
    clock: &dyn Clock,
    policy: &AccountValidityPolicy,
    token: &str,
) -> Result<DateTime<Utc>, RenewalError> {
    let renewal_token = repo
        .account_validity()
        .find_renewal_token(token)
        .await?
        .ok_or(RenewalError::UnknownToken)?;

    if policy.single_use_tokens && renewal_token.is_consumed() {
        return Err(RenewalError::UnknownToken);
    }

    let user = repo
        .user()
        .lookup(renewal_token.user_id)
        .await?
        .ok_or(RenewalError::UserNotFound(renewal_token.user_id))?;

    let expires_at = policy.renewed_expiration(clock.now())?;
    let validity = repo
        .account_validity()
        .set_expiration(&user, expires_at)
        .await?;

    if policy.single_use_tokens {
        repo.account_validity()
            .consume_renewal_token(clock, renewal_token)
            .await?;
    }

    info!(user.id = %user.id, expires_at = %validity.expires_at, "Renewed account");

    Ok(validity.expires_at)
}

#[cfg(test)]
mod tests {
    use avs_storage::RepositoryFactory;
    use chrono::Duration;

    use super::*;
    use crate::{issue_renewal_token, test_utils::TestState};

    async fn issue_token(state: &mut TestState, user: &avs_data_model::User) -> String {
        let mut repo = state.factory.create().await.unwrap();
        let token = issue_renewal_token(
            &mut *repo.account_validity(),
            &mut state.rng,
            &*state.clock,
            user,
        )
        .await
        .unwrap();
        repo.save().await.unwrap();
        token.token
    }

    async fn renew(state: &TestState, token: &str) -> Result<DateTime<Utc>, RenewalError> {
        let mut repo = state.factory.create().await.unwrap();
        let res = renew_account(&mut repo, &*state.clock, state.state.policy(), token).await;
        if res.is_ok() {
            repo.save().await.unwrap();
        } else {
            repo.cancel().await.unwrap();
        }
        res
    }

    #[tokio::test]
    async fn test_renewal() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let alice = state
            .add_user("alice", &["alice@example.com"], now + Duration::days(2))
            .await;
        let token = issue_token(&mut state, &alice).await;

        // Mark the account as notified, like the scanner does
        let mut repo = state.factory.create().await.unwrap();
        let validity = repo.account_validity().lookup(alice.id).await.unwrap().unwrap();
        repo.account_validity()
            .set_email_sent(validity, true)
            .await
            .unwrap()
            .unwrap();
        repo.save().await.unwrap();

        state.clock.advance(Duration::hours(5));
        let renewed_at = state.clock.now();

        let expires_at = renew(&state, &token).await.unwrap();

        // The new expiration is relative to the renewal, not to the old expiration
        assert_eq!(expires_at, renewed_at + Duration::days(30));

        let validity = state.validity(&alice).await;
        assert_eq!(validity.expires_at, expires_at);
        assert!(!validity.email_sent);

        let tokens = state.factory.renewal_tokens(alice.id).await;
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].consumed_at, Some(renewed_at));
    }

    #[tokio::test]
    async fn test_renewal_returns_stored_expiration() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let alice = state
            .add_user("alice", &["alice@example.com"], now + Duration::days(2))
            .await;
        let token = issue_token(&mut state, &alice).await;

        // Storage keeps microseconds
        state.clock.advance(Duration::nanoseconds(1_500));
        let expires_at = renew(&state, &token).await.unwrap();

        assert_eq!(expires_at, state.validity(&alice).await.expires_at);
        assert_eq!(expires_at.timestamp_subsec_nanos(), 1_000);
    }

    #[tokio::test]
    async fn test_expiration_out_of_range() {
        let policy = AccountValidityPolicy {
            period: Duration::MAX,
            ..AccountValidityPolicy::default()
        };
        let mut state = TestState::new(policy).await;
        let now = state.clock.now();
        let alice = state
            .add_user("alice", &["alice@example.com"], now + Duration::days(2))
            .await;
        let token = issue_token(&mut state, &alice).await;
        let before = state.validity(&alice).await;

        let res = renew(&state, &token).await;
        assert!(matches!(res, Err(RenewalError::ExpirationOutOfRange(_))));
        assert_eq!(state.validity(&alice).await, before);
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let alice = state
            .add_user("alice", &["alice@example.com"], now + Duration::days(2))
            .await;
        let token = issue_token(&mut state, &alice).await;
        let before = state.validity(&alice).await;
        let tokens_before = state.factory.renewal_tokens(alice.id).await;

        let res = renew(&state, "thisisnotavalidtoken").await;
        assert!(matches!(res, Err(RenewalError::UnknownToken)));

        // Nothing changed
        assert_eq!(state.validity(&alice).await, before);
        assert_eq!(state.factory.renewal_tokens(alice.id).await, tokens_before);

        // The real token still works
        assert!(renew(&state, &token).await.is_ok());
    }

    #[tokio::test]
    async fn test_single_use_token() {
        let mut state = TestState::new(AccountValidityPolicy::default()).await;
        let now = state.clock.now();
        let alice = state
            .add_user("alice", &["alice@example.com"], now + Duration::days(2))
            .await;
        let token = issue_token(&mut state, &alice).await;

        let first = renew(&state, &token).await.unwrap();

        state.clock.advance(Duration::days(1));
        let res = renew(&state, &token).await;
        assert!(matches!(res, Err(RenewalError::UnknownToken)));
        assert_eq!(state.validity(&alice).await.expires_at, first);
    }

    #[tokio::test]
    async fn test_reusable_token() {
        let policy = AccountValidityPolicy {
            single_use_tokens: false,
            ..AccountValidityPolicy::default()
        };
        let mut state = TestState::new(policy).await;
        let now = state.clock.now();
        let alice = state
            .add_user("alice", &["alice@example.com"], now + Duration::days(2))
            .await;
        let token = issue_token(&mut state, &alice).await;

        let first = renew(&state, &token).await.unwrap();

        state.clock.advance(Duration::days(1));
        let second = renew(&state, &token).await.unwrap();
        assert_eq!(second, first + Duration::days(1));

        let tokens = state.factory.renewal_tokens(alice.id).await;
        assert!(!tokens[0].is_consumed());
    }
}
