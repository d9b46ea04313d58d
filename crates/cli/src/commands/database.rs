// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use anyhow::Context;
use avs_config::{ConfigurationSectionExt, DatabaseConfig};
use avs_storage_pg::MIGRATOR;
use clap::Parser;
use figment::Figment;
use tracing::{Instrument, info, info_span};

use crate::util::database_connection_from_config;

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser, Debug)]
enum Subcommand {
    /// Apply the pending migrations
    Migrate,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        match self.subcommand {
            Subcommand::Migrate => {
                let config = DatabaseConfig::extract_or_default(figment)
                    .map_err(anyhow::Error::from_boxed)?;

                async {
                    let mut conn = database_connection_from_config(&config).await?;
                    MIGRATOR
                        .run(&mut conn)
                        .await
                        .context("Failed to apply the migrations")?;
                    info!(
                        migrations = MIGRATOR.iter().count(),
                        "Database schema is up to date"
                    );
                    anyhow::Ok(())
                }
                .instrument(info_span!("cli.database.migrate"))
                .await?;
            }
        }

        Ok(ExitCode::SUCCESS)
    }
}
