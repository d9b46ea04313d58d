// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Local accounts and their email addresses

use async_trait::async_trait;
use avs_data_model::User;
use rand_core::RngCore;
use ulid::Ulid;

use crate::{Clock, repository_impl};

mod email;

pub use self::email::UserEmailRepository;

/// Reads and writes [`User`] rows
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Backend error type
    type Error;

    /// Get a [`User`] by its ID, or `None` if there is no such user
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the backend fails
    async fn lookup(&mut self, id: Ulid) -> Result<Option<User>, Self::Error>;

    /// Get a [`User`] by its localpart, or `None` if there is no such user
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the backend fails
    async fn find_by_username(&mut self, username: &str) -> Result<Option<User>, Self::Error>;

    /// Register a new local account, created at the current time of `clock`
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the backend fails, or if the username is
    /// already taken
    async fn add(
        &mut self,
        rng: &mut (dyn RngCore + Send),
        clock: &dyn Clock,
        username: String,
    ) -> Result<User, Self::Error>;

    /// The profile display name of the account, if it has one
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the backend fails
    async fn display_name(&mut self, user: &User) -> Result<Option<String>, Self::Error>;

    /// Replace the display name of the account. `None` clears it.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the backend fails
    async fn set_display_name(
        &mut self,
        user: &User,
        display_name: Option<String>,
    ) -> Result<(), Self::Error>;
}

repository_impl!(UserRepository:
    async fn lookup(&mut self, id: Ulid) -> Result<Option<User>, Self::Error>;
    async fn find_by_username(&mut self, username: &str) -> Result<Option<User>, Self::Error>;
    async fn add(
        &mut self,
        rng: &mut (dyn RngCore + Send),
        clock: &dyn Clock,
        username: String,
    ) -> Result<User, Self::Error>;
    async fn display_name(&mut self, user: &User) -> Result<Option<String>, Self::Error>;
    async fn set_display_name(
        &mut self,
        user: &User,
        display_name: Option<String>,
    ) -> Result<(), Self::Error>;
);
