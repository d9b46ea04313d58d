// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! An implementation of the storage traits for a PostgreSQL database
//!
//! This backend uses [`sqlx`] to interact with the database. Queries are
//! checked at runtime and mapped to rows with [`sqlx::FromRow`].
//!
//! # Adding a new repository
//!
//! 1. Define the repository trait in `avs-storage`
//! 2. Add a migration in `crates/storage-pg/migrations` if new tables are
//!    needed
//! 3. Implement the trait on a `Pg*Repository<'c>` struct holding a
//!    `&'c mut PgConnection`
//! 4. Expose it through [`PgRepository`]'s `RepositoryAccess` implementation
//!
//! Every query should be wrapped in a `tracing` span named `db.<repo>.<op>`,
//! and call [`ExecuteExt::traced`] to record the SQL statement.

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

use sqlx::{migrate::Migrator, postgres::PgQueryResult};
use thiserror::Error;

pub mod account_validity;
pub mod user;

mod repository;
mod telemetry;
pub(crate) mod tracing;

pub use self::{
    repository::{PgRepository, PgRepositoryFactory},
    tracing::ExecuteExt,
};

/// Embedded migrations, allowing them to run on startup
pub static MIGRATOR: Migrator = sqlx::migrate!();

/// Generic error when interacting with the database
#[derive(Debug, Error)]
#[error(transparent)]
pub enum DatabaseError {
    /// An error which came from the database itself
    Driver {
        /// The underlying error from the database driver
        #[from]
        source: sqlx::Error,
    },

    /// An error which happened because the requested database operation is
    /// invalid
    #[error("Invalid database operation")]
    InvalidOperation {
        /// The source of the error, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    /// An error which happens when an operation affects not enough or too many
    /// rows
    #[error("Expected {expected} rows to be affected, but {actual} rows were affected")]
    RowsAffected {
        /// How many rows were expected to be affected
        expected: u64,

        /// How many rows were actually affected
        actual: u64,
    },
}

impl DatabaseError {
    pub(crate) fn ensure_affected_rows(
        result: &PgQueryResult,
        expected: u64,
    ) -> Result<(), DatabaseError> {
        let actual = result.rows_affected();
        if actual == expected {
            Ok(())
        } else {
            Err(DatabaseError::RowsAffected { expected, actual })
        }
    }

    pub(crate) fn to_invalid_operation<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        Self::InvalidOperation {
            source: Some(Box::new(e)),
        }
    }
}
