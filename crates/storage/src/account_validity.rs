// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repository to interact with the validity state of user accounts and their
//! renewal tokens

use async_trait::async_trait;
use avs_data_model::{AccountValidity, RenewalToken, User};
use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::{Clock, repository_impl};

/// An [`AccountValidityRepository`] helps interacting with
/// [`AccountValidity`] and [`RenewalToken`] saved in the storage backend
#[async_trait]
pub trait AccountValidityRepository: Send + Sync {
    /// The error type returned by the repository
    type Error;

    /// Lookup the [`AccountValidity`] of a user
    ///
    /// Returns `None` if the user has no validity record
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn lookup(&mut self, user_id: Ulid) -> Result<Option<AccountValidity>, Self::Error>;

    /// Set the expiration date of a [`User`] account, creating the record if
    /// needed
    ///
    /// This also clears the `email_sent` flag, so that a new renewal email
    /// gets sent when the new expiration date approaches.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn set_expiration(
        &mut self,
        user: &User,
        expires_at: DateTime<Utc>,
    ) -> Result<AccountValidity, Self::Error>;

    /// List accounts which expire in the `[since, until]` range and which were
    /// not notified yet, ordered by user ID
    ///
    /// # Parameters
    ///
    /// * `since`: The lower bound of the expiration range
    /// * `until`: The upper bound of the expiration range
    /// * `after`: Only return accounts with a user ID strictly greater than
    ///   this one
    /// * `limit`: The maximum number of accounts to return
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn find_expiring_unnotified(
        &mut self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        after: Option<Ulid>,
        limit: usize,
    ) -> Result<Vec<AccountValidity>, Self::Error>;

    /// Set the `email_sent` flag of an [`AccountValidity`]
    ///
    /// The update only happens if the expiration date did not change since
    /// the [`AccountValidity`] was loaded. Returns `None` if the record was
    /// changed in the meantime, for example by a concurrent renewal.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn set_email_sent(
        &mut self,
        validity: AccountValidity,
        email_sent: bool,
    ) -> Result<Option<AccountValidity>, Self::Error>;

    /// Store a new [`RenewalToken`] for a [`User`]
    ///
    /// Returns `None` if the token is already in use. On success, any other
    /// token previously issued to this user is invalidated.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn add_renewal_token(
        &mut self,
        clock: &dyn Clock,
        user: &User,
        token: String,
    ) -> Result<Option<RenewalToken>, Self::Error>;

    /// Find a [`RenewalToken`] by its value
    ///
    /// Returns `None` if no such token exists. The token stays locked until
    /// the end of the transaction, so that two renewals with the same token
    /// are serialized.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn find_renewal_token(&mut self, token: &str)
    -> Result<Option<RenewalToken>, Self::Error>;

    /// Mark a [`RenewalToken`] as consumed
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails, or if the
    /// token was already consumed
    async fn consume_renewal_token(
        &mut self,
        clock: &dyn Clock,
        token: RenewalToken,
    ) -> Result<RenewalToken, Self::Error>;
}

repository_impl!(AccountValidityRepository:
    async fn lookup(&mut self, user_id: Ulid) -> Result<Option<AccountValidity>, Self::Error>;
    async fn set_expiration(
        &mut self,
        user: &User,
        expires_at: DateTime<Utc>,
    ) -> Result<AccountValidity, Self::Error>;
    async fn find_expiring_unnotified(
        &mut self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        after: Option<Ulid>,
        limit: usize,
    ) -> Result<Vec<AccountValidity>, Self::Error>;
    async fn set_email_sent(
        &mut self,
        validity: AccountValidity,
        email_sent: bool,
    ) -> Result<Option<AccountValidity>, Self::Error>;
    async fn add_renewal_token(
        &mut self,
        clock: &dyn Clock,
        user: &User,
        token: String,
    ) -> Result<Option<RenewalToken>, Self::Error>;
    async fn find_renewal_token(&mut self, token: &str)
    -> Result<Option<RenewalToken>, Self::Error>;
    async fn consume_renewal_token(
        &mut self,
        clock: &dyn Clock,
        token: RenewalToken,
    ) -> Result<RenewalToken, Self::Error>;
);
