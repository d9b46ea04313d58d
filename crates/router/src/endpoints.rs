// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use serde::{Deserialize, Serialize};

pub use crate::traits::*;

/// `GET /_matrix/client/unstable/account_validity/renew?token=:token`
///
/// The link sent in renewal emails. The homeserver serves it and hands the
/// token over to the renewal logic.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AccountValidityRenew {
    token: String,
}

impl AccountValidityRenew {
    #[must_use]
    pub fn new(token: String) -> Self {
        Self { token }
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Route for AccountValidityRenew {
    type Query = AccountValidityRenew;

    fn route() -> &'static str {
        "/_matrix/client/unstable/account_validity/renew"
    }

    fn query(&self) -> Option<&Self::Query> {
        Some(self)
    }
}
