// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Storage interfaces of the account validity service
//!
//! The service only needs three kinds of records: local users, the email
//! addresses attached to them, and one validity record per user. Each gets a
//! repository trait, and backends expose all of them through
//! [`RepositoryAccess`]. Callers hold a [`BoxRepository`], which is one
//! transaction: it must be [saved] for writes to become visible.
//!
//! Time comes from a [`Clock`], so that expiry logic can be driven by a
//! [`MockClock`] in tests instead of [`SystemClock`].
//!
//! [`MockClock`]: crate::clock::MockClock
//! [saved]: RepositoryTransaction::save
//!
//! # Repository traits
//!
//! Traits are declared with `#[async_trait]` and an associated `Error` type,
//! and every method takes `&mut self`, so that a repository only runs one
//! query at a time. Lookups return `Result<Option<T>, Self::Error>`. Methods
//! creating rows take an RNG for the ULID and a [`Clock`] for the timestamp.
//!
//! The [`repository_impl!`] macro then forwards the trait through `Box` and
//! [`MapErr`]:
//!
//! ```ignore
//! repository_impl!(UserRepository:
//!     async fn lookup(&mut self, id: Ulid) -> Result<Option<User>, Self::Error>;
//! );
//! ```

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod account_validity;
pub mod clock;
pub(crate) mod repository;
pub mod user;
mod utils;

pub use self::{
    clock::{Clock, SystemClock},
    repository::{
        BoxRepository, BoxRepositoryFactory, Repository, RepositoryAccess, RepositoryError,
        RepositoryFactory, RepositoryTransaction,
    },
    utils::MapErr,
};
