// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use avs_data_model::{User, UserEmail};
use avs_storage::{Clock, user::UserEmailRepository};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sqlx::PgConnection;
use ulid::Ulid;
use uuid::Uuid;

use crate::{DatabaseError, tracing::ExecuteExt};

/// [`UserEmailRepository`] over the `user_emails` table
pub struct PgUserEmailRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgUserEmailRepository<'c> {
    /// Borrow a connection, usually the transaction of a
    /// [`crate::PgRepository`]
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(sqlx::FromRow)]
struct UserEmailRow {
    user_email_id: Uuid,
    user_id: Uuid,
    email: String,
    created_at: DateTime<Utc>,
}

impl From<UserEmailRow> for UserEmail {
    fn from(row: UserEmailRow) -> Self {
        UserEmail {
            id: Ulid::from(row.user_email_id),
            user_id: Ulid::from(row.user_id),
            email: row.email,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl UserEmailRepository for PgUserEmailRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.user_email.all",
        skip_all,
        fields(db.query.text, %user.id),
        err,
    )]
    async fn all(&mut self, user: &User) -> Result<Vec<UserEmail>, Self::Error> {
        // ULIDs break the tie between addresses added in the same instant
        let rows: Vec<UserEmailRow> = sqlx::query_as(
            r"
                SELECT user_email_id, user_id, email, created_at
                FROM user_emails
                WHERE user_id = $1
                ORDER BY created_at, user_email_id
            ",
        )
        .bind(Uuid::from(user.id))
        .traced()
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(rows.into_iter().map(UserEmail::from).collect())
    }

    #[tracing::instrument(
        name = "db.user_email.add",
        skip_all,
        fields(db.query.text, %user.id, user_email.id, user_email.email = email),
        err,
    )]
    async fn add(
        &mut self,
        rng: &mut (dyn RngCore + Send),
        clock: &dyn Clock,
        user: &User,
        email: String,
    ) -> Result<UserEmail, Self::Error> {
        let created_at = clock.now();
        let user_email = UserEmail {
            id: Ulid::from_datetime_with_source(created_at.into(), rng),
            user_id: user.id,
            email,
            created_at,
        };
        tracing::Span::current().record("user_email.id", tracing::field::display(user_email.id));

        sqlx::query(
            r"
                INSERT INTO user_emails (user_email_id, user_id, email, created_at)
                VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(Uuid::from(user_email.id))
        .bind(Uuid::from(user_email.user_id))
        .bind(&user_email.email)
        .bind(user_email.created_at)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(user_email)
    }
}
