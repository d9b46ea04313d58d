// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::Error as _};
use url::Url;

use super::ConfigurationSection;

fn default_public_base() -> Url {
    "http://[::]:8080".parse().unwrap_or_else(|_| unreachable!())
}

fn http_address_example_1() -> &'static str {
    "https://matrix.example.com/"
}

/// Configuration related to the public HTTP endpoint
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HttpConfig {
    /// Public URL base from where the renewal links are served
    ///
    /// The renewal links sent by email look like
    /// `{public_base}_matrix/client/unstable/account_validity/renew?token=...`
    #[serde(default = "default_public_base")]
    #[schemars(example = "http_address_example_1")]
    pub public_base: Url,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            public_base: default_public_base(),
        }
    }
}

impl ConfigurationSection for HttpConfig {
    const PATH: Option<&'static str> = Some("http");

    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        let metadata = figment.find_metadata("http");
        let error_on_field = |mut error: figment::error::Error, field: &'static str| {
            error.metadata = metadata.cloned();
            error.profile = Some(figment::Profile::Default);
            error.path = vec!["http".to_owned(), field.to_owned()];
            error
        };

        if self.public_base.cannot_be_a_base()
            || !matches!(self.public_base.scheme(), "http" | "https")
        {
            return Err(error_on_field(
                figment::error::Error::custom("public_base must be an http or https base URL"),
                "public_base",
            )
            .into());
        }

        Ok(())
    }
}
