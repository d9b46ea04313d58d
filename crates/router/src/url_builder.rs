// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Utility to build URLs

use url::Url;

use crate::{Route, endpoints};

/// Helps building absolute URLs from the public base of the homeserver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlBuilder {
    http_base: Url,
}

impl UrlBuilder {
    /// Create a new [`UrlBuilder`] from a base URL
    ///
    /// A trailing slash is added to the base path if it is missing, so that
    /// routes are resolved under it.
    #[must_use]
    pub fn new(mut base: Url) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Self { http_base: base }
    }

    /// The base URL every link is built from
    #[must_use]
    pub fn http_base(&self) -> &Url {
        &self.http_base
    }

    /// Build an absolute URL for a [`Route`]
    #[must_use]
    pub fn absolute_url_for<U>(&self, destination: &U) -> Url
    where
        U: Route,
    {
        destination.absolute_url(&self.http_base)
    }

    /// The link to renew an account with the given token
    #[must_use]
    pub fn account_validity_renew(&self, token: String) -> Url {
        self.absolute_url_for(&endpoints::AccountValidityRenew::new(token))
    }
}
