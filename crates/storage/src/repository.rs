// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::{
    account_validity::AccountValidityRepository,
    user::{UserEmailRepository, UserRepository},
};

/// Opens repositories on demand
///
/// The scanner opens one repository per account it processes, so that a
/// failure on one account does not roll back the others.
#[async_trait]
pub trait RepositoryFactory {
    /// Open a new [`BoxRepository`], starting a transaction
    async fn create(&self) -> Result<BoxRepository, RepositoryError>;
}

/// A boxed [`RepositoryFactory`], shared by the scanner tasks
pub type BoxRepositoryFactory = Box<dyn RepositoryFactory + Send + Sync + 'static>;

/// Everything a backend provides: the repositories and the transaction
/// around them
pub trait Repository<E>:
    RepositoryAccess<Error = E> + RepositoryTransaction<Error = E> + Send
where
    E: std::error::Error + Send + Sync + 'static,
{
}

/// A [`Repository`] with its backend hidden and its errors boxed
pub type BoxRepository = Box<dyn Repository<RepositoryError> + Send + Sync + 'static>;

/// A backend error, with its concrete type erased
#[derive(Debug, Error)]
#[error(transparent)]
pub struct RepositoryError {
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl RepositoryError {
    /// Box any backend error
    pub fn from_error<E>(value: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: Box::new(value),
        }
    }
}

/// The transaction wrapping a [`Repository`]
pub trait RepositoryTransaction {
    /// Error returned when the transaction cannot be closed
    type Error;

    /// Commit every write done through the repository
    ///
    /// # Errors
    ///
    /// Returns an error if the commit failed, in which case nothing was
    /// written
    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;

    /// Discard every write done through the repository
    ///
    /// # Errors
    ///
    /// Returns an error if the backend failed to roll back
    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;
}

/// Borrow one of the repositories of a backend
///
/// Each accessor mutably borrows the whole backend, so at most one
/// repository is in use at any time.
pub trait RepositoryAccess: Send {
    /// Error type shared by all the repositories of the backend
    type Error: std::error::Error + Send + Sync + 'static;

    /// The local accounts
    fn user<'c>(&'c mut self) -> Box<dyn UserRepository<Error = Self::Error> + 'c>;

    /// The email addresses of the accounts
    fn user_email<'c>(&'c mut self) -> Box<dyn UserEmailRepository<Error = Self::Error> + 'c>;

    /// The expiration dates and renewal tokens
    fn account_validity<'c>(
        &'c mut self,
    ) -> Box<dyn AccountValidityRepository<Error = Self::Error> + 'c>;
}

/// Forwarding through [`MapErr`] and [`Box<R>`]
mod impls {
    use futures_util::{FutureExt, TryFutureExt, future::BoxFuture};

    use super::RepositoryAccess;
    use crate::{
        MapErr, Repository, RepositoryTransaction,
        account_validity::AccountValidityRepository,
        user::{UserEmailRepository, UserRepository},
    };

    impl<R, F, E> Repository<E> for MapErr<R, F>
    where
        R: RepositoryAccess
            + RepositoryTransaction<Error = <R as RepositoryAccess>::Error>
            + Send,
        <R as RepositoryAccess>::Error: 'static,
        F: FnMut(<R as RepositoryAccess>::Error) -> E + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
    }

    impl<R, F, E> RepositoryTransaction for MapErr<R, F>
    where
        R: RepositoryTransaction,
        R::Error: 'static,
        F: FnMut(R::Error) -> E + Send + Sync + 'static,
        E: std::error::Error,
    {
        type Error = E;

        fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
            Box::new(self.inner).save().map_err(self.mapper).boxed()
        }

        fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
            Box::new(self.inner).cancel().map_err(self.mapper).boxed()
        }
    }

    impl<R, F, E> RepositoryAccess for MapErr<R, F>
    where
        R: RepositoryAccess,
        R::Error: 'static,
        F: FnMut(R::Error) -> E + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        type Error = E;

        fn user<'c>(&'c mut self) -> Box<dyn UserRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.user(), &mut self.mapper))
        }

        fn user_email<'c>(
            &'c mut self,
        ) -> Box<dyn UserEmailRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.user_email(), &mut self.mapper))
        }

        fn account_validity<'c>(
            &'c mut self,
        ) -> Box<dyn AccountValidityRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.account_validity(), &mut self.mapper))
        }
    }

    impl<R: RepositoryAccess + ?Sized> RepositoryAccess for Box<R> {
        type Error = R::Error;

        fn user<'c>(&'c mut self) -> Box<dyn UserRepository<Error = Self::Error> + 'c> {
            (**self).user()
        }

        fn user_email<'c>(
            &'c mut self,
        ) -> Box<dyn UserEmailRepository<Error = Self::Error> + 'c> {
            (**self).user_email()
        }

        fn account_validity<'c>(
            &'c mut self,
        ) -> Box<dyn AccountValidityRepository<Error = Self::Error> + 'c> {
            (**self).account_validity()
        }
    }
}
