// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use avs_data_model::{User, UserEmail};
use avs_storage::{
    Clock,
    user::{UserEmailRepository, UserRepository},
};
use rand::RngCore;
use ulid::Ulid;

use crate::{Faults, MemoryError, State, UserRow};

/// An implementation of [`UserRepository`] for the in-memory state
pub struct MemoryUserRepository<'c> {
    state: &'c mut State,
    faults: &'c Faults,
}

impl<'c> MemoryUserRepository<'c> {
    pub(crate) fn new(state: &'c mut State, faults: &'c Faults) -> Self {
        Self { state, faults }
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository<'_> {
    type Error = MemoryError;

    async fn lookup(&mut self, id: Ulid) -> Result<Option<User>, Self::Error> {
        Ok(self.state.users.get(&id).map(|row| row.user.clone()))
    }

    async fn find_by_username(&mut self, username: &str) -> Result<Option<User>, Self::Error> {
        Ok(self
            .state
            .users
            .values()
            .find(|row| row.user.username == username)
            .map(|row| row.user.clone()))
    }

    async fn add(
        &mut self,
        rng: &mut (dyn RngCore + Send),
        clock: &dyn Clock,
        username: String,
    ) -> Result<User, Self::Error> {
        if self
            .state
            .users
            .values()
            .any(|row| row.user.username == username)
        {
            return Err(MemoryError::UsernameTaken(username));
        }

        let created_at = clock.now();
        let id = Ulid::from_datetime_with_source(created_at.into(), rng);
        let user = User {
            id,
            username,
            created_at,
        };

        self.state.users.insert(
            id,
            UserRow {
                user: user.clone(),
                display_name: None,
            },
        );

        Ok(user)
    }

    async fn display_name(&mut self, user: &User) -> Result<Option<String>, Self::Error> {
        self.faults.display_name()?;

        Ok(self
            .state
            .users
            .get(&user.id)
            .and_then(|row| row.display_name.clone()))
    }

    async fn set_display_name(
        &mut self,
        user: &User,
        display_name: Option<String>,
    ) -> Result<(), Self::Error> {
        let row = self
            .state
            .users
            .get_mut(&user.id)
            .ok_or(MemoryError::NotFound)?;
        row.display_name = display_name;
        Ok(())
    }
}

/// An implementation of [`UserEmailRepository`] for the in-memory state
pub struct MemoryUserEmailRepository<'c> {
    state: &'c mut State,
    faults: &'c Faults,
}

impl<'c> MemoryUserEmailRepository<'c> {
    pub(crate) fn new(state: &'c mut State, faults: &'c Faults) -> Self {
        Self { state, faults }
    }
}

#[async_trait]
impl UserEmailRepository for MemoryUserEmailRepository<'_> {
    type Error = MemoryError;

    async fn all(&mut self, user: &User) -> Result<Vec<UserEmail>, Self::Error> {
        self.faults.user_emails(user.id)?;

        let mut emails: Vec<UserEmail> = self
            .state
            .user_emails
            .values()
            .filter(|email| email.user_id == user.id)
            .cloned()
            .collect();
        emails.sort_by_key(|email| (email.created_at, email.id));
        Ok(emails)
    }

    async fn add(
        &mut self,
        rng: &mut (dyn RngCore + Send),
        clock: &dyn Clock,
        user: &User,
        email: String,
    ) -> Result<UserEmail, Self::Error> {
        if !self.state.users.contains_key(&user.id) {
            return Err(MemoryError::NotFound);
        }

        let created_at = clock.now();
        let id = Ulid::from_datetime_with_source(created_at.into(), rng);
        let user_email = UserEmail {
            id,
            user_id: user.id,
            email,
            created_at,
        };

        self.state.user_emails.insert(id, user_email.clone());
        Ok(user_email)
    }
}
