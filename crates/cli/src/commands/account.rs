// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use anyhow::Context;
use avs_config::{ConfigurationSectionExt, DatabaseConfig};
use avs_storage::{Clock, RepositoryAccess, RepositoryFactory, SystemClock};
use avs_storage_pg::PgRepositoryFactory;
use chrono::{DateTime, Utc};
use clap::Parser;
use figment::Figment;
use tracing::{info, info_span, warn};

use crate::util::database_pool_from_config;

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser, Debug)]
enum Subcommand {
    /// Show the expiration date of an account
    Show {
        /// Username of the account
        username: String,
    },

    /// Set the expiration date of an account
    ///
    /// This also makes the account eligible for a new renewal email.
    SetExpiration {
        /// Username of the account
        username: String,

        /// New expiration date, as an RFC 3339 timestamp, e.g.
        /// `2025-06-01T00:00:00Z`
        expires_at: DateTime<Utc>,
    },
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        use Subcommand as SC;

        let config =
            DatabaseConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
        let pool = database_pool_from_config(&config).await?;
        let mut repo = PgRepositoryFactory::new(pool).create().await?;

        match self.subcommand {
            SC::Show { username } => {
                let _span = info_span!("cli.account.show", user.username = %username).entered();

                let user = repo
                    .user()
                    .find_by_username(&username)
                    .await?
                    .context("User not found")?;

                let validity = repo.account_validity().lookup(user.id).await?;
                repo.cancel().await?;

                if let Some(validity) = validity {
                    let now = SystemClock::default().now();
                    info!(
                        user.id = %user.id,
                        expires_at = %validity.expires_at,
                        expired = validity.is_expired(now),
                        email_sent = validity.email_sent,
                        "Account validity"
                    );
                } else {
                    warn!(user.id = %user.id, "This account has no expiration date");
                }
            }

            SC::SetExpiration {
                username,
                expires_at,
            } => {
                let _span =
                    info_span!("cli.account.set_expiration", user.username = %username).entered();

                let user = repo
                    .user()
                    .find_by_username(&username)
                    .await?
                    .context("User not found")?;

                let validity = repo
                    .account_validity()
                    .set_expiration(&user, expires_at)
                    .await?;
                repo.save().await?;

                info!(
                    user.id = %user.id,
                    expires_at = %validity.expires_at,
                    "Expiration date updated"
                );
            }
        }

        Ok(ExitCode::SUCCESS)
    }
}
