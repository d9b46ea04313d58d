// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};

mod account;
mod config;
mod database;
mod doctor;
mod renew;
mod templates;
mod worker;

/// Prefix of the environment variables overriding the configuration files
///
/// Nested keys are separated with a double underscore, for example
/// `AVS_DATABASE__URI` or `AVS_ACCOUNT_VALIDITY__ENABLED`.
const ENV_PREFIX: &str = "AVS_";

#[derive(Parser, Debug)]
enum Subcommand {
    /// Configuration-related commands
    Config(self::config::Options),

    /// Manage the database
    Database(self::database::Options),

    /// Run the account validity scanner
    Worker(self::worker::Options),

    /// Renew an account with a renewal token
    Renew(self::renew::Options),

    /// Manage the validity of accounts
    Account(self::account::Options),

    /// Templates-related commands
    Templates(self::templates::Options),

    /// Run diagnostics on the deployment
    Doctor(self::doctor::Options),
}

#[derive(Parser, Debug)]
#[command(version = crate::VERSION)]
pub struct Options {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Append,
        default_value = "config.yaml",
    )]
    config: Vec<Utf8PathBuf>,

    #[command(subcommand)]
    subcommand: Subcommand,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        use Subcommand as S;
        match self.subcommand {
            S::Config(c) => Box::pin(c.run(figment)).await,
            S::Database(c) => Box::pin(c.run(figment)).await,
            S::Worker(c) => Box::pin(c.run(figment)).await,
            S::Renew(c) => Box::pin(c.run(figment)).await,
            S::Account(c) => Box::pin(c.run(figment)).await,
            S::Templates(c) => Box::pin(c.run(figment)).await,
            S::Doctor(c) => Box::pin(c.run(figment)).await,
        }
    }

    /// Get a [`Figment`] instance with the configuration loaded
    pub fn figment(&self) -> Figment {
        let configs = self.config.iter();

        configs
            .fold(Figment::new(), |f, path| f.admerge(Yaml::file(path)))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

#[cfg(test)]
mod tests {
    use avs_config::{AppConfig, ConfigurationSection};
    use figment::Jail;

    use super::*;

    #[test]
    fn test_figment_merges_files_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "base.yaml",
                r"
                    http:
                      public_base: https://matrix.example.com/
                    account_validity:
                      enabled: true
                      period: 2592000
                ",
            )?;
            jail.create_file(
                "override.yaml",
                r"
                    account_validity:
                      renew_at: 86400
                ",
            )?;
            jail.set_env("AVS_ACCOUNT_VALIDITY__SINGLE_USE_TOKENS", "false");

            let opts = Options::try_parse_from([
                "avs-cli",
                "--config",
                "base.yaml",
                "--config",
                "override.yaml",
                "worker",
                "--once",
            ])
            .unwrap();

            let config = AppConfig::extract(&opts.figment()).unwrap();
            assert!(config.account_validity.enabled);
            assert_eq!(
                config.account_validity.renew_at,
                std::time::Duration::from_secs(86400)
            );
            assert!(!config.account_validity.single_use_tokens);
            assert_eq!(
                config.http.public_base.as_str(),
                "https://matrix.example.com/"
            );

            Ok(())
        });
    }
}
