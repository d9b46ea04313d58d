// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use avs_data_model::{AccountValidity, RenewalToken, User};
use avs_storage::{Clock, account_validity::AccountValidityRepository};
use chrono::{DateTime, SubsecRound, Utc};
use ulid::Ulid;

use crate::{MemoryError, State};

/// An implementation of [`AccountValidityRepository`] for the in-memory state
pub struct MemoryAccountValidityRepository<'c> {
    state: &'c mut State,
}

impl<'c> MemoryAccountValidityRepository<'c> {
    pub(crate) fn new(state: &'c mut State) -> Self {
        Self { state }
    }
}

#[async_trait]
impl AccountValidityRepository for MemoryAccountValidityRepository<'_> {
    type Error = MemoryError;

    async fn lookup(&mut self, user_id: Ulid) -> Result<Option<AccountValidity>, Self::Error> {
        Ok(self.state.account_validity.get(&user_id).cloned())
    }

    async fn set_expiration(
        &mut self,
        user: &User,
        expires_at: DateTime<Utc>,
    ) -> Result<AccountValidity, Self::Error> {
        if !self.state.users.contains_key(&user.id) {
            return Err(MemoryError::NotFound);
        }

        // Same precision as a PostgreSQL timestamp
        let validity = AccountValidity {
            user_id: user.id,
            expires_at: expires_at.trunc_subsecs(6),
            email_sent: false,
        };
        self.state
            .account_validity
            .insert(user.id, validity.clone());
        Ok(validity)
    }

    async fn find_expiring_unnotified(
        &mut self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        after: Option<Ulid>,
        limit: usize,
    ) -> Result<Vec<AccountValidity>, Self::Error> {
        // The map is keyed by user ID, so iteration is already in keyset order
        Ok(self
            .state
            .account_validity
            .values()
            .filter(|v| after.is_none_or(|after| v.user_id > after))
            .filter(|v| !v.email_sent && v.expires_at >= since && v.expires_at <= until)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_email_sent(
        &mut self,
        validity: AccountValidity,
        email_sent: bool,
    ) -> Result<Option<AccountValidity>, Self::Error> {
        let Some(current) = self.state.account_validity.get_mut(&validity.user_id) else {
            return Ok(None);
        };

        if current.expires_at != validity.expires_at {
            return Ok(None);
        }

        current.email_sent = email_sent;
        Ok(Some(current.clone()))
    }

    async fn add_renewal_token(
        &mut self,
        clock: &dyn Clock,
        user: &User,
        token: String,
    ) -> Result<Option<RenewalToken>, Self::Error> {
        if self.state.renewal_tokens.contains_key(&token) {
            return Ok(None);
        }

        self.state
            .renewal_tokens
            .retain(|_, existing| existing.user_id != user.id);

        let renewal_token = RenewalToken {
            token: token.clone(),
            user_id: user.id,
            created_at: clock.now(),
            consumed_at: None,
        };
        self.state
            .renewal_tokens
            .insert(token, renewal_token.clone());

        Ok(Some(renewal_token))
    }

    async fn find_renewal_token(
        &mut self,
        token: &str,
    ) -> Result<Option<RenewalToken>, Self::Error> {
        Ok(self.state.renewal_tokens.get(token).cloned())
    }

    async fn consume_renewal_token(
        &mut self,
        clock: &dyn Clock,
        token: RenewalToken,
    ) -> Result<RenewalToken, Self::Error> {
        let stored = self
            .state
            .renewal_tokens
            .get_mut(&token.token)
            .ok_or(MemoryError::NotFound)?;

        let consumed = stored.clone().consume(clock.now())?;
        *stored = consumed.clone();
        Ok(consumed)
    }
}
