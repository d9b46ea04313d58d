// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Links to the endpoints of the homeserver

pub(crate) mod endpoints;
pub(crate) mod traits;
mod url_builder;

pub use self::{endpoints::*, traits::Route, url_builder::UrlBuilder};

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    #[test]
    fn token_is_url_encoded() {
        let route = AccountValidityRenew::new("a b&c".to_owned());
        assert_eq!(route.token(), "a b&c");
        assert_eq!(
            route.path_and_query(),
            "/_matrix/client/unstable/account_validity/renew?token=a+b%26c"
        );
    }

    #[test]
    fn renewal_link_is_absolute() {
        let base = Url::parse("https://example.com/").unwrap();
        let url = AccountValidityRenew::new("xyz".to_owned()).absolute_url(&base);
        assert_eq!(url.host_str(), Some("example.com"));
        assert_eq!(url.query(), Some("token=xyz"));
    }
}
