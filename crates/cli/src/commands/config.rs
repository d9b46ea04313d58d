// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use avs_config::{ConfigurationSection, RootConfig};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use figment::Figment;
use tokio::io::AsyncWriteExt;
use tracing::{info, info_span};

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser, Debug)]
enum Subcommand {
    /// Print the merged configuration, with defaults filled in
    Dump {
        /// Write to this file instead of the standard output
        #[clap(short, long)]
        output: Option<Utf8PathBuf>,
    },

    /// Load and validate the configuration, then exit
    Check,

    /// Print a starting configuration, with account validity enabled
    Generate {
        /// Write to this file instead of the standard output
        #[clap(short, long)]
        output: Option<Utf8PathBuf>,
    },
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        match self.subcommand {
            Subcommand::Dump { output } => {
                let _span = info_span!("cli.config.dump").entered();
                let config = RootConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;
                write_yaml(&config, output.as_deref()).await?;
            }

            Subcommand::Check => {
                let _span = info_span!("cli.config.check").entered();
                let config = RootConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;
                if config.account_validity.enabled {
                    info!("Configuration is valid");
                } else {
                    info!("Configuration is valid, but account validity is disabled");
                }
            }

            Subcommand::Generate { output } => {
                let _span = info_span!("cli.config.generate").entered();
                write_yaml(&RootConfig::generate(), output.as_deref()).await?;
            }
        }

        Ok(ExitCode::SUCCESS)
    }
}

async fn write_yaml(config: &RootConfig, output: Option<&Utf8Path>) -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(config)?;

    match output {
        Some(path) => {
            info!(%path, "Writing configuration");
            tokio::fs::write(path, yaml).await?;
        }
        None => tokio::io::stdout().write_all(yaml.as_bytes()).await?,
    }

    Ok(())
}
