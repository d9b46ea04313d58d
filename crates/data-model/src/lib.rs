// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Records handled by the account validity service

#![allow(clippy::module_name_repetitions)]

use thiserror::Error;

pub(crate) mod account_validity;
mod policy;
pub(crate) mod users;

/// A record was asked to move to a state it cannot reach from its current
/// one, like consuming a token twice
#[derive(Debug, Error)]
#[error("invalid state transition")]
pub struct InvalidTransitionError;

pub use ulid::Ulid;

pub use self::{
    account_validity::{AccountValidity, RENEWAL_TOKEN_LENGTH, RenewalToken},
    policy::{AccountValidityPolicy, ExpirationOutOfRangeError},
    users::{User, UserEmail},
};
