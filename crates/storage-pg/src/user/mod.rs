// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Accounts and addresses, stored in the `users` and `user_emails` tables

use async_trait::async_trait;
use avs_data_model::User;
use avs_storage::{Clock, user::UserRepository};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sqlx::PgConnection;
use ulid::Ulid;
use uuid::Uuid;

use crate::{DatabaseError, tracing::ExecuteExt};

mod email;

#[cfg(test)]
mod tests;

pub use self::email::PgUserEmailRepository;

/// [`UserRepository`] over the `users` table
pub struct PgUserRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgUserRepository<'c> {
    /// Borrow a connection, usually the transaction of a
    /// [`crate::PgRepository`]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    user_id: Uuid,
    username: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: Ulid::from(row.user_id),
            username: row.username,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.user.lookup",
        skip_all,
        fields(db.query.text, user.id = %id),
        err,
    )]
    async fn lookup(&mut self, id: Ulid) -> Result<Option<User>, Self::Error> {
        let row: Option<UserRow> = sqlx::query_as(
            r"
                SELECT user_id, username, created_at
                FROM users
                WHERE user_id = $1
            ",
        )
        .bind(Uuid::from(id))
        .traced()
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(
        name = "db.user.find_by_username",
        skip_all,
        fields(db.query.text, user.username = username),
        err,
    )]
    async fn find_by_username(&mut self, username: &str) -> Result<Option<User>, Self::Error> {
        let row: Option<UserRow> = sqlx::query_as(
            r"
                SELECT user_id, username, created_at
                FROM users
                WHERE username = $1
            ",
        )
        .bind(username)
        .traced()
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(row.map(Into::into))
    }

    #[tracing::instrument(
        name = "db.user.add",
        skip_all,
        fields(db.query.text, user.username = username, user.id),
        err,
    )]
    async fn add(
        &mut self,
        rng: &mut (dyn RngCore + Send),
        clock: &dyn Clock,
        username: String,
    ) -> Result<User, Self::Error> {
        let created_at = clock.now();
        let user = User {
            id: Ulid::from_datetime_with_source(created_at.into(), rng),
            username,
            created_at,
        };
        tracing::Span::current().record("user.id", tracing::field::display(user.id));

        // A taken username is reported as an error without aborting the
        // transaction
        let res = sqlx::query(
            r"
                INSERT INTO users (user_id, username, created_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (username) DO NOTHING
            ",
        )
        .bind(Uuid::from(user.id))
        .bind(&user.username)
        .bind(user.created_at)
        .traced()
        .execute(&mut *self.conn)
        .await?;
        DatabaseError::ensure_affected_rows(&res, 1)?;

        Ok(user)
    }

    #[tracing::instrument(
        name = "db.user.display_name",
        skip_all,
        fields(db.query.text, %user.id),
        err,
    )]
    async fn display_name(&mut self, user: &User) -> Result<Option<String>, Self::Error> {
        // Outer `None` for a missing row, inner one for a NULL column
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT display_name FROM users WHERE user_id = $1")
                .bind(Uuid::from(user.id))
                .traced()
                .fetch_optional(&mut *self.conn)
                .await?;

        Ok(value.flatten())
    }

    #[tracing::instrument(
        name = "db.user.set_display_name",
        skip_all,
        fields(db.query.text, %user.id),
        err,
    )]
    async fn set_display_name(
        &mut self,
        user: &User,
        display_name: Option<String>,
    ) -> Result<(), Self::Error> {
        let res = sqlx::query("UPDATE users SET display_name = $2 WHERE user_id = $1")
            .bind(Uuid::from(user.id))
            .bind(display_name)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        DatabaseError::ensure_affected_rows(&res, 1)
    }
}
