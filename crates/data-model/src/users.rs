// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use ulid::Ulid;

/// A local account which may expire
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Ulid,

    /// The localpart of the Matrix ID
    pub username: String,

    pub created_at: DateTime<Utc>,
}

impl User {
    #[doc(hidden)]
    #[must_use]
    pub fn samples(now: DateTime<Utc>, rng: &mut impl Rng) -> Vec<Self> {
        ["alice", "bob"]
            .into_iter()
            .map(|username| Self {
                id: Ulid::from_datetime_with_source(now.into(), rng),
                username: username.to_owned(),
                created_at: now,
            })
            .collect()
    }
}

/// An email address renewal links get sent to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserEmail {
    pub id: Ulid,
    pub user_id: Ulid,

    /// The address, as stored. It is only parsed when an email gets sent.
    pub email: String,

    pub created_at: DateTime<Utc>,
}
