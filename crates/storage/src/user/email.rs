// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use avs_data_model::{User, UserEmail};
use rand_core::RngCore;

use crate::{Clock, repository_impl};

/// The addresses renewal emails are sent to
///
/// A user may have any number of addresses, including none.
#[async_trait]
pub trait UserEmailRepository: Send + Sync {
    /// Backend error type
    type Error;

    /// Every address of `user`, oldest first
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the backend fails
    async fn all(&mut self, user: &User) -> Result<Vec<UserEmail>, Self::Error>;

    /// Attach an address to `user`
    ///
    /// The address is stored as given, without validation.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the backend fails
    async fn add(
        &mut self,
        rng: &mut (dyn RngCore + Send),
        clock: &dyn Clock,
        user: &User,
        email: String,
    ) -> Result<UserEmail, Self::Error>;
}

repository_impl!(UserEmailRepository:
    async fn all(&mut self, user: &User) -> Result<Vec<UserEmail>, Self::Error>;
    async fn add(
        &mut self,
        rng: &mut (dyn RngCore + Send),
        clock: &dyn Clock,
        user: &User,
        email: String,
    ) -> Result<UserEmail, Self::Error>;
);
