// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::borrow::Cow;

use serde::Serialize;
use url::Url;

/// An endpoint the service generates links to
pub trait Route {
    /// Query string parameters, serialized with `serde_urlencoded`
    type Query: Serialize;

    /// Path of the endpoint, starting with a `/`
    fn route() -> &'static str;

    fn query(&self) -> Option<&Self::Query> {
        None
    }

    fn path_and_query(&self) -> Cow<'static, str> {
        let query = self
            .query()
            .and_then(|query| serde_urlencoded::to_string(query).ok())
            .filter(|query| !query.is_empty());

        match query {
            Some(query) => Cow::Owned(format!("{}?{query}", Self::route())),
            None => Cow::Borrowed(Self::route()),
        }
    }

    /// Resolve the route under `base`, keeping any path prefix it has
    fn absolute_url(&self, base: &Url) -> Url {
        let relative = self.path_and_query();
        base.join(relative.trim_start_matches('/'))
            .unwrap_or_else(|_| base.clone())
    }
}
