// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use avs_config::{AccountValidityConfig, ConfigurationSectionExt, DatabaseConfig};
use avs_storage::{RepositoryFactory, SystemClock};
use avs_storage_pg::PgRepositoryFactory;
use avs_tasks::RenewalError;
use clap::Parser;
use figment::Figment;
use tracing::{error, info, info_span, warn};
use url::Url;

use crate::util::{database_pool_from_config, policy_from_config};

/// Exit code used when the token is not valid, like a client error on the
/// renewal endpoint
const UNKNOWN_TOKEN_EXIT_CODE: u8 = 2;

#[derive(Parser, Debug)]
pub(super) struct Options {
    /// The renewal token, or the whole renewal link from the email
    token: String,
}

/// Get the token out of a renewal link, or take the input as the raw token
fn token_from_input(input: &str) -> Option<String> {
    let input = input.trim();

    if let Ok(url) = Url::parse(input) {
        return url
            .query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
            .filter(|token| !token.is_empty());
    }

    (!input.is_empty()).then(|| input.to_owned())
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let _span = info_span!("cli.renew").entered();

        let database_config =
            DatabaseConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
        let account_validity_config = AccountValidityConfig::extract_or_default(figment)
            .map_err(anyhow::Error::from_boxed)?;

        if !account_validity_config.enabled {
            warn!("Account validity is disabled in the configuration, renewing anyway");
        }

        let Some(token) = token_from_input(&self.token) else {
            error!("No renewal token found in the input");
            return Ok(ExitCode::from(UNKNOWN_TOKEN_EXIT_CODE));
        };

        let policy = policy_from_config(&account_validity_config)?;
        let clock = SystemClock::default();

        let pool = database_pool_from_config(&database_config).await?;
        let mut repo = PgRepositoryFactory::new(pool).create().await?;

        match avs_tasks::renew_account(&mut repo, &clock, &policy, &token).await {
            Ok(expires_at) => {
                repo.save().await?;
                info!(%expires_at, "Account renewed");
                Ok(ExitCode::SUCCESS)
            }

            Err(RenewalError::UnknownToken) => {
                repo.cancel().await?;
                error!("This renewal token is not valid, it may have expired or been used already");
                Ok(ExitCode::from(UNKNOWN_TOKEN_EXIT_CODE))
            }

            Err(e) => {
                repo.cancel().await?;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_from_input() {
        assert_eq!(
            token_from_input("aBcDeFgHiJkLmNoPqRsTuVwXyZ012345").as_deref(),
            Some("aBcDeFgHiJkLmNoPqRsTuVwXyZ012345")
        );

        assert_eq!(
            token_from_input(
                "https://matrix.example.com/_matrix/client/unstable/account_validity/renew?token=abc123"
            )
            .as_deref(),
            Some("abc123")
        );

        // Surrounding whitespace from a copy-paste
        assert_eq!(token_from_input("  abc123\n").as_deref(), Some("abc123"));

        assert_eq!(token_from_input(""), None);
        assert_eq!(
            token_from_input("https://matrix.example.com/_matrix/client/unstable/account_validity/renew"),
            None
        );
    }
}
