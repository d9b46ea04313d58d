// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`AccountValidityRepository`]

use async_trait::async_trait;
use avs_data_model::{AccountValidity, RenewalToken, User};
use avs_storage::{Clock, account_validity::AccountValidityRepository};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use ulid::Ulid;
use uuid::Uuid;

use crate::{DatabaseError, tracing::ExecuteExt};

/// An implementation of [`AccountValidityRepository`] for a PostgreSQL
/// connection
pub struct PgAccountValidityRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgAccountValidityRepository<'c> {
    /// Create a new [`PgAccountValidityRepository`] from an active PostgreSQL
    /// connection
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct AccountValidityLookup {
    user_id: Uuid,
    expires_at: DateTime<Utc>,
    email_sent: bool,
}

impl From<AccountValidityLookup> for AccountValidity {
    fn from(value: AccountValidityLookup) -> Self {
        Self {
            user_id: value.user_id.into(),
            expires_at: value.expires_at,
            email_sent: value.email_sent,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct RenewalTokenLookup {
    token: String,
    user_id: Uuid,
    created_at: DateTime<Utc>,
    consumed_at: Option<DateTime<Utc>>,
}

impl From<RenewalTokenLookup> for RenewalToken {
    fn from(value: RenewalTokenLookup) -> Self {
        Self {
            token: value.token,
            user_id: value.user_id.into(),
            created_at: value.created_at,
            consumed_at: value.consumed_at,
        }
    }
}

#[async_trait]
impl AccountValidityRepository for PgAccountValidityRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.account_validity.lookup",
        skip_all,
        fields(
            db.query.text,
            user.id = %user_id,
        ),
        err,
    )]
    async fn lookup(&mut self, user_id: Ulid) -> Result<Option<AccountValidity>, Self::Error> {
        let res = sqlx::query_as::<_, AccountValidityLookup>(
            r"
                SELECT user_id
                     , expires_at
                     , email_sent
                FROM account_validity
                WHERE user_id = $1
            ",
        )
        .bind(Uuid::from(user_id))
        .traced()
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(res.map(AccountValidity::from))
    }

    #[tracing::instrument(
        name = "db.account_validity.set_expiration",
        skip_all,
        fields(
            db.query.text,
            %user.id,
            account_validity.expires_at = %expires_at,
        ),
        err,
    )]
    async fn set_expiration(
        &mut self,
        user: &User,
        expires_at: DateTime<Utc>,
    ) -> Result<AccountValidity, Self::Error> {
        let res = sqlx::query_as::<_, AccountValidityLookup>(
            r"
                INSERT INTO account_validity (user_id, expires_at, email_sent)
                VALUES ($1, $2, FALSE)
                ON CONFLICT (user_id) DO UPDATE
                SET expires_at = EXCLUDED.expires_at
                  , email_sent = FALSE
                RETURNING user_id, expires_at, email_sent
            ",
        )
        .bind(Uuid::from(user.id))
        .bind(expires_at)
        .traced()
        .fetch_one(&mut *self.conn)
        .await?;

        Ok(res.into())
    }

    #[tracing::instrument(
        name = "db.account_validity.find_expiring_unnotified",
        skip_all,
        fields(
            db.query.text,
            account_validity.since = %since,
            account_validity.until = %until,
        ),
        err,
    )]
    async fn find_expiring_unnotified(
        &mut self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        after: Option<Ulid>,
        limit: usize,
    ) -> Result<Vec<AccountValidity>, Self::Error> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let res = sqlx::query_as::<_, AccountValidityLookup>(
            r"
                SELECT user_id
                     , expires_at
                     , email_sent
                FROM account_validity
                WHERE email_sent = FALSE
                  AND expires_at >= $1
                  AND expires_at <= $2
                  AND ($3::UUID IS NULL OR user_id > $3)
                ORDER BY user_id ASC
                LIMIT $4
            ",
        )
        .bind(since)
        .bind(until)
        .bind(after.map(Uuid::from))
        .bind(limit)
        .traced()
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(res.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(
        name = "db.account_validity.set_email_sent",
        skip_all,
        fields(
            db.query.text,
            user.id = %validity.user_id,
            account_validity.email_sent = email_sent,
        ),
        err,
    )]
    async fn set_email_sent(
        &mut self,
        validity: AccountValidity,
        email_sent: bool,
    ) -> Result<Option<AccountValidity>, Self::Error> {
        // Only flip the flag if the expiration did not move since the row was
        // loaded
        let res = sqlx::query(
            r"
                UPDATE account_validity
                SET email_sent = $2
                WHERE user_id = $1
                  AND expires_at = $3
            ",
        )
        .bind(Uuid::from(validity.user_id))
        .bind(email_sent)
        .bind(validity.expires_at)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        if res.rows_affected() == 0 {
            return Ok(None);
        }

        Ok(Some(AccountValidity {
            email_sent,
            ..validity
        }))
    }

    #[tracing::instrument(
        name = "db.account_validity.add_renewal_token",
        skip_all,
        fields(
            db.query.text,
            %user.id,
        ),
        err,
    )]
    async fn add_renewal_token(
        &mut self,
        clock: &dyn Clock,
        user: &User,
        token: String,
    ) -> Result<Option<RenewalToken>, Self::Error> {
        let created_at = clock.now();

        // A conflict on the token must not poison the transaction, so that the
        // caller can retry with another one
        let res = sqlx::query(
            r"
                INSERT INTO user_renewal_tokens (token, user_id, created_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (token) DO NOTHING
            ",
        )
        .bind(&token)
        .bind(Uuid::from(user.id))
        .bind(created_at)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        if res.rows_affected() == 0 {
            return Ok(None);
        }

        sqlx::query(
            r"
                DELETE FROM user_renewal_tokens
                WHERE user_id = $1
                  AND token <> $2
            ",
        )
        .bind(Uuid::from(user.id))
        .bind(&token)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(Some(RenewalToken {
            token,
            user_id: user.id,
            created_at,
            consumed_at: None,
        }))
    }

    #[tracing::instrument(
        name = "db.account_validity.find_renewal_token",
        skip_all,
        fields(
            db.query.text,
        ),
        err,
    )]
    async fn find_renewal_token(
        &mut self,
        token: &str,
    ) -> Result<Option<RenewalToken>, Self::Error> {
        let res = sqlx::query_as::<_, RenewalTokenLookup>(
            r"
                SELECT token
                     , user_id
                     , created_at
                     , consumed_at
                FROM user_renewal_tokens
                WHERE token = $1
                FOR UPDATE
            ",
        )
        .bind(token)
        .traced()
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(res.map(RenewalToken::from))
    }

    #[tracing::instrument(
        name = "db.account_validity.consume_renewal_token",
        skip_all,
        fields(
            db.query.text,
            user.id = %token.user_id,
        ),
        err,
    )]
    async fn consume_renewal_token(
        &mut self,
        clock: &dyn Clock,
        token: RenewalToken,
    ) -> Result<RenewalToken, Self::Error> {
        let consumed_at = clock.now();
        let token = token
            .consume(consumed_at)
            .map_err(DatabaseError::to_invalid_operation)?;

        let res = sqlx::query(
            r"
                UPDATE user_renewal_tokens
                SET consumed_at = $2
                WHERE token = $1
                  AND consumed_at IS NULL
            ",
        )
        .bind(&token.token)
        .bind(consumed_at)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        DatabaseError::ensure_affected_rows(&res, 1)?;

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use avs_storage::{Clock, RepositoryAccess, clock::MockClock};
    use chrono::Duration;
    use rand::SeedableRng;
    use rand_chacha::ChaChaRng;
    use sqlx::PgPool;

    use crate::PgRepository;

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    #[ignore = "requires a PostgreSQL database"]
    async fn test_account_validity_repo(pool: PgPool) {
        let mut repo = PgRepository::from_pool(&pool).await.unwrap().boxed();
        let mut rng = ChaChaRng::seed_from_u64(42);
        let clock = MockClock::default();

        let user = repo
            .user()
            .add(&mut rng, &clock, "john".to_owned())
            .await
            .unwrap();

        assert!(repo.account_validity().lookup(user.id).await.unwrap().is_none());

        let expires_at = clock.now() + Duration::days(3);
        let validity = repo
            .account_validity()
            .set_expiration(&user, expires_at)
            .await
            .unwrap();
        assert_eq!(validity.expires_at, expires_at);
        assert!(!validity.email_sent);

        // The account is in the window
        let window = repo
            .account_validity()
            .find_expiring_unnotified(clock.now(), clock.now() + Duration::days(7), None, 10)
            .await
            .unwrap();
        assert_eq!(window, vec![validity.clone()]);

        // But not after the keyset cursor
        let window = repo
            .account_validity()
            .find_expiring_unnotified(
                clock.now(),
                clock.now() + Duration::days(7),
                Some(user.id),
                10,
            )
            .await
            .unwrap();
        assert!(window.is_empty());

        // Flag the account as notified
        let notified = repo
            .account_validity()
            .set_email_sent(validity.clone(), true)
            .await
            .unwrap()
            .unwrap();
        assert!(notified.email_sent);

        let window = repo
            .account_validity()
            .find_expiring_unnotified(clock.now(), clock.now() + Duration::days(7), None, 10)
            .await
            .unwrap();
        assert!(window.is_empty());

        // Renewing clears the flag, and a stale snapshot no longer applies
        let renewed = repo
            .account_validity()
            .set_expiration(&user, clock.now() + Duration::days(30))
            .await
            .unwrap();
        assert!(!renewed.email_sent);
        assert!(
            repo.account_validity()
                .set_email_sent(validity, true)
                .await
                .unwrap()
                .is_none()
        );

        repo.save().await.unwrap();
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    #[ignore = "requires a PostgreSQL database"]
    async fn test_renewal_tokens(pool: PgPool) {
        let mut repo = PgRepository::from_pool(&pool).await.unwrap().boxed();
        let mut rng = ChaChaRng::seed_from_u64(42);
        let clock = MockClock::default();

        let alice = repo
            .user()
            .add(&mut rng, &clock, "alice".to_owned())
            .await
            .unwrap();
        let bob = repo
            .user()
            .add(&mut rng, &clock, "bob".to_owned())
            .await
            .unwrap();

        let first = repo
            .account_validity()
            .add_renewal_token(&clock, &alice, "first".to_owned())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.user_id, alice.id);

        // The same token can't be issued twice
        assert!(
            repo.account_validity()
                .add_renewal_token(&clock, &bob, "first".to_owned())
                .await
                .unwrap()
                .is_none()
        );

        // Issuing a new token invalidates the previous one
        repo.account_validity()
            .add_renewal_token(&clock, &alice, "second".to_owned())
            .await
            .unwrap()
            .unwrap();
        assert!(
            repo.account_validity()
                .find_renewal_token("first")
                .await
                .unwrap()
                .is_none()
        );

        let second = repo
            .account_validity()
            .find_renewal_token("second")
            .await
            .unwrap()
            .unwrap();
        assert!(!second.is_consumed());

        clock.advance(Duration::minutes(1));
        let consumed = repo
            .account_validity()
            .consume_renewal_token(&clock, second.clone())
            .await
            .unwrap();
        assert_eq!(consumed.consumed_at, Some(clock.now()));

        // Consuming twice fails
        assert!(
            repo.account_validity()
                .consume_renewal_token(&clock, second)
                .await
                .is_err()
        );

        repo.save().await.unwrap();
    }

    #[sqlx::test(migrator = "crate::MIGRATOR")]
    #[ignore = "requires a PostgreSQL database"]
    async fn test_renewal_token_lookup_waits_for_consumer(pool: PgPool) {
        let mut repo = PgRepository::from_pool(&pool).await.unwrap().boxed();
        let mut rng = ChaChaRng::seed_from_u64(42);
        let clock = MockClock::default();

        let alice = repo
            .user()
            .add(&mut rng, &clock, "alice".to_owned())
            .await
            .unwrap();
        repo.account_validity()
            .add_renewal_token(&clock, &alice, "token".to_owned())
            .await
            .unwrap()
            .unwrap();
        repo.save().await.unwrap();

        // The first transaction holds the token until it commits
        let mut first = PgRepository::from_pool(&pool).await.unwrap().boxed();
        let token = first
            .account_validity()
            .find_renewal_token("token")
            .await
            .unwrap()
            .unwrap();

        let second = tokio::spawn({
            let pool = pool.clone();
            async move {
                let mut repo = PgRepository::from_pool(&pool).await.unwrap().boxed();
                let token = repo
                    .account_validity()
                    .find_renewal_token("token")
                    .await
                    .unwrap();
                repo.cancel().await.unwrap();
                token
            }
        });

        first
            .account_validity()
            .consume_renewal_token(&clock, token)
            .await
            .unwrap();
        first.save().await.unwrap();

        // So the second one sees it consumed
        let token = second.await.unwrap().unwrap();
        assert!(token.is_consumed());
    }
}
