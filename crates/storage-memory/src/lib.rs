// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! An in-memory implementation of the storage traits
//!
//! Each [`MemoryRepository`] holds an exclusive lock on the shared state for
//! its whole lifetime and works on a copy of it. Saving the repository writes
//! the copy back, cancelling or dropping it discards the changes. This gives
//! serializable transactions, which is plenty for tests.

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use avs_data_model::{AccountValidity, InvalidTransitionError, RenewalToken, User, UserEmail};
use avs_storage::{
    BoxRepository, BoxRepositoryFactory, MapErr, Repository, RepositoryAccess, RepositoryError,
    RepositoryFactory, RepositoryTransaction,
    account_validity::AccountValidityRepository,
    user::{UserEmailRepository, UserRepository},
};
use futures_util::{FutureExt, future::BoxFuture};
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use ulid::Ulid;

mod account_validity;
mod user;

use self::{
    account_validity::MemoryAccountValidityRepository,
    user::{MemoryUserEmailRepository, MemoryUserRepository},
};

/// Errors returned by the in-memory repositories
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A user with the same username already exists
    #[error("Username {0:?} is already taken")]
    UsernameTaken(String),

    /// The row to update does not exist
    #[error("Row not found")]
    NotFound,

    /// The requested state transition is not allowed
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransitionError),

    /// A failure injected through [`MemoryRepositoryFactory`]
    #[error("Injected storage failure")]
    Injected,
}

#[derive(Debug, Clone)]
struct UserRow {
    user: User,
    display_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct State {
    users: BTreeMap<Ulid, UserRow>,
    user_emails: BTreeMap<Ulid, UserEmail>,
    account_validity: BTreeMap<Ulid, AccountValidity>,
    renewal_tokens: BTreeMap<String, RenewalToken>,
}

/// Failures which can be injected to exercise error paths
#[derive(Debug, Default)]
struct Faults {
    display_name: AtomicBool,
    user_emails: Mutex<HashSet<Ulid>>,
}

impl Faults {
    fn display_name(&self) -> Result<(), MemoryError> {
        if self.display_name.load(Ordering::Relaxed) {
            Err(MemoryError::Injected)
        } else {
            Ok(())
        }
    }

    fn user_emails(&self, user_id: Ulid) -> Result<(), MemoryError> {
        let broken = self
            .user_emails
            .lock()
            .map(|set| set.contains(&user_id))
            .unwrap_or(true);

        if broken {
            Err(MemoryError::Injected)
        } else {
            Ok(())
        }
    }
}

/// A [`RepositoryFactory`] handing out [`MemoryRepository`] instances which
/// all share the same state
#[derive(Clone, Default)]
pub struct MemoryRepositoryFactory {
    state: Arc<tokio::sync::Mutex<State>>,
    faults: Arc<Faults>,
}

impl MemoryRepositoryFactory {
    /// Create a new, empty, [`MemoryRepositoryFactory`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Box the factory
    #[must_use]
    pub fn boxed(self) -> BoxRepositoryFactory {
        Box::new(self)
    }

    /// Start a new transaction on the shared state
    ///
    /// This waits until any other [`MemoryRepository`] of this factory is
    /// saved, cancelled or dropped.
    pub async fn repository(&self) -> MemoryRepository {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        MemoryRepository {
            guard,
            working,
            faults: self.faults.clone(),
        }
    }

    /// Make every display name lookup fail
    pub fn fail_display_name_lookups(&self, fail: bool) {
        self.faults.display_name.store(fail, Ordering::Relaxed);
    }

    /// Make listing the email addresses of the given user fail
    pub fn fail_user_email_lookups(&self, user_id: Ulid) {
        if let Ok(mut set) = self.faults.user_emails.lock() {
            set.insert(user_id);
        }
    }

    /// List the renewal tokens stored for a user, consumed ones included
    ///
    /// Like [`Self::repository`], this waits for the current transaction to
    /// finish.
    pub async fn renewal_tokens(&self, user_id: Ulid) -> Vec<RenewalToken> {
        let state = self.state.lock().await;
        state
            .renewal_tokens
            .values()
            .filter(|token| token.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RepositoryFactory for MemoryRepositoryFactory {
    async fn create(&self) -> Result<BoxRepository, RepositoryError> {
        Ok(self.repository().await.boxed())
    }
}

/// An implementation of the [`Repository`] trait backed by an in-memory state
pub struct MemoryRepository {
    guard: OwnedMutexGuard<State>,
    working: State,
    faults: Arc<Faults>,
}

impl MemoryRepository {
    /// Transform the repository into a type-erased [`BoxRepository`]
    #[must_use]
    pub fn boxed(self) -> BoxRepository {
        Box::new(MapErr::new(self, RepositoryError::from_error))
    }
}

impl Repository<MemoryError> for MemoryRepository {}

impl RepositoryTransaction for MemoryRepository {
    type Error = MemoryError;

    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        let Self {
            mut guard, working, ..
        } = *self;
        *guard = working;
        tracing::debug!("In-memory transaction saved");
        futures_util::future::ok(()).boxed()
    }

    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
        tracing::debug!("In-memory transaction cancelled");
        futures_util::future::ok(()).boxed()
    }
}

impl RepositoryAccess for MemoryRepository {
    type Error = MemoryError;

    fn user<'c>(&'c mut self) -> Box<dyn UserRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryUserRepository::new(&mut self.working, &self.faults))
    }

    fn user_email<'c>(&'c mut self) -> Box<dyn UserEmailRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryUserEmailRepository::new(
            &mut self.working,
            &self.faults,
        ))
    }

    fn account_validity<'c>(
        &'c mut self,
    ) -> Box<dyn AccountValidityRepository<Error = Self::Error> + 'c> {
        Box::new(MemoryAccountValidityRepository::new(&mut self.working))
    }
}
