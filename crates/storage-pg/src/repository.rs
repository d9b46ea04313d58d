// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Instant;

use async_trait::async_trait;
use avs_storage::{
    BoxRepository, BoxRepositoryFactory, MapErr, Repository, RepositoryAccess, RepositoryError,
    RepositoryFactory, RepositoryTransaction,
    account_validity::AccountValidityRepository,
    user::{UserEmailRepository, UserRepository},
};
use futures_util::{FutureExt, future::BoxFuture};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::Instrument;

use crate::{
    DatabaseError,
    account_validity::PgAccountValidityRepository,
    telemetry::{DB_CLIENT_CONNECTIONS_CREATE_TIME_HISTOGRAM, record_transaction},
    user::{PgUserEmailRepository, PgUserRepository},
};

/// Hands out one [`PgRepository`] per unit of work, each in its own
/// transaction on the shared pool
#[derive(Clone)]
pub struct PgRepositoryFactory {
    pool: PgPool,
}

impl PgRepositoryFactory {
    /// Wrap a connection pool
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Box the factory, as expected by the scanner
    #[must_use]
    pub fn boxed(self) -> BoxRepositoryFactory {
        Box::new(self)
    }
}

#[async_trait]
impl RepositoryFactory for PgRepositoryFactory {
    async fn create(&self) -> Result<BoxRepository, RepositoryError> {
        let started = Instant::now();
        let repo = PgRepository::from_pool(&self.pool)
            .await
            .map_err(RepositoryError::from_error)?;

        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        DB_CLIENT_CONNECTIONS_CREATE_TIME_HISTOGRAM.record(elapsed, &[]);

        Ok(repo.boxed())
    }
}

/// A set of repositories sharing a single PostgreSQL transaction
///
/// Nothing is visible to other connections until [`RepositoryTransaction::save`]
/// is called. Dropping the repository rolls the transaction back.
pub struct PgRepository {
    txn: Transaction<'static, Postgres>,
}

impl PgRepository {
    /// Start a transaction on the pool
    ///
    /// # Errors
    ///
    /// Returns a [`DatabaseError`] if no connection could be acquired or the
    /// transaction could not be started
    pub async fn from_pool(pool: &PgPool) -> Result<Self, DatabaseError> {
        let txn = pool.begin().await?;
        Ok(Self { txn })
    }

    /// Erase the backend type, converting errors to [`RepositoryError`]
    #[must_use]
    pub fn boxed(self) -> BoxRepository {
        Box::new(MapErr::new(self, RepositoryError::from_error))
    }

    fn conn(&mut self) -> &mut PgConnection {
        &mut self.txn
    }
}

impl Repository<DatabaseError> for PgRepository {}

impl RepositoryTransaction for PgRepository {
    type Error = DatabaseError;

    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        async move {
            self.txn.commit().await?;
            record_transaction("commit");
            Ok(())
        }
        .instrument(tracing::info_span!("db.save"))
        .boxed()
    }

    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        async move {
            self.txn.rollback().await?;
            record_transaction("rollback");
            Ok(())
        }
        .instrument(tracing::info_span!("db.cancel"))
        .boxed()
    }
}

impl RepositoryAccess for PgRepository {
    type Error = DatabaseError;

    fn user<'c>(&'c mut self) -> Box<dyn UserRepository<Error = Self::Error> + 'c> {
        Box::new(PgUserRepository::new(self.conn()))
    }

    fn user_email<'c>(&'c mut self) -> Box<dyn UserEmailRepository<Error = Self::Error> + 'c> {
        Box::new(PgUserEmailRepository::new(self.conn()))
    }

    fn account_validity<'c>(
        &'c mut self,
    ) -> Box<dyn AccountValidityRepository<Error = Self::Error> + 'c> {
        Box::new(PgAccountValidityRepository::new(self.conn()))
    }
}
