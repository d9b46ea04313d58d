// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use avs_data_model::{RenewalToken, User};
use avs_storage::{Clock, RepositoryError, account_validity::AccountValidityRepository};
use rand::RngCore;
use thiserror::Error;
use tracing::{info, warn};

/// How many tokens are generated before giving up on finding a unique one
pub const MAX_TOKEN_GENERATION_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum TokenIssuerError {
    #[error("could not generate a unique renewal token after {attempts} attempts")]
    TokenGenerationExhausted { attempts: usize },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Generate a renewal token for a user and store it
///
/// The storage refuses tokens which are already in use, in which case a new
/// one is generated, up to [`MAX_TOKEN_GENERATION_ATTEMPTS`] times. Storing
/// the token invalidates the previous tokens of the user.
///
/// # Errors
///
/// Returns [`TokenIssuerError::TokenGenerationExhausted`] if every generated
/// token was already in use, or an error if the repository fails.
#[tracing::instrument(
    name = "account_validity.issue_token",
    skip_all,
    fields(user.id = %user.id),
    err,
)]
pub async fn issue_renewal_token(
    repo: &mut (dyn AccountValidityRepository<Error = RepositoryError> + '_),
    rng: &mut (dyn RngCore + Send),
    clock: &dyn Clock,
    user: &User,
) -> Result<RenewalToken, TokenIssuerError> {
    for attempt in 1..=MAX_TOKEN_GENERATION_ATTEMPTS {
        let token = RenewalToken::generate(rng);

        if let Some(token) = repo.add_renewal_token(clock, user, token).await? {
            info!(attempt, "Issued renewal token");
            return Ok(token);
        }

        warn!(attempt, "Generated renewal token is already in use");
    }

    Err(TokenIssuerError::TokenGenerationExhausted {
        attempts: MAX_TOKEN_GENERATION_ATTEMPTS,
    })
}
