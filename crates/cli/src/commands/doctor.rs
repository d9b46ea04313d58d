// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Diagnostic utility to check the health of the deployment

use std::process::ExitCode;

use avs_config::{AppConfig, ConfigurationSection, EmailTransportKind};
use avs_storage_pg::MIGRATOR;
use clap::Parser;
use figment::Figment;
use tracing::{error, info, info_span, warn};

use crate::util::{
    database_connection_from_config, mailer_from_config, policy_from_config,
    templates_from_config,
};

#[derive(Parser, Debug)]
pub(super) struct Options {}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let _span = info_span!("cli.doctor").entered();
        info!("💡 Running diagnostics, using the same configuration files as the worker.");

        let config = AppConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;
        let mut healthy = true;

        if config.account_validity.enabled {
            let policy = policy_from_config(&config.account_validity)?;
            info!(
                period = %policy.period,
                renew_at = %policy.renew_at,
                "✅ Account validity is enabled"
            );
        } else {
            warn!(
                "⚠️ Account validity is disabled (`account_validity.enabled`), the worker will not send any renewal email."
            );
        }

        if config.http.public_base.scheme() != "https" {
            warn!(
                public_base = %config.http.public_base,
                "⚠️ The public base in the config (`http.public_base`) is not an HTTPS URL, renewal links sent by email will not be secure."
            );
        }

        match database_connection_from_config(&config.database).await {
            Ok(mut conn) => {
                info!("✅ Connected to the database");

                let applied = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM _sqlx_migrations WHERE success",
                )
                .fetch_one(&mut conn)
                .await;

                let expected = MIGRATOR.iter().count();
                match applied {
                    Ok(applied) if usize::try_from(applied).is_ok_and(|a| a == expected) => {
                        info!("✅ The database schema is up to date");
                    }
                    _ => {
                        healthy = false;
                        error!(
                            "❌ The database schema is not up to date, run `avs-cli database migrate`"
                        );
                    }
                }
            }
            Err(e) => {
                healthy = false;
                error!(
                    error = &*e as &dyn std::error::Error,
                    "❌ Could not connect to the database (`database` section)"
                );
            }
        }

        let templates = match templates_from_config(&config.templates).await {
            Ok(templates) => {
                info!("✅ Templates loaded");
                Some(templates)
            }
            Err(e) => {
                healthy = false;
                error!(
                    error = &*e as &dyn std::error::Error,
                    "❌ Could not load the templates (`templates.path`)"
                );
                None
            }
        };

        if let Some(templates) = templates {
            let mailer = mailer_from_config(&config.email, &config.account_validity, &templates)?;
            match mailer.test_connection().await {
                Ok(()) if config.email.transport() == EmailTransportKind::Blackhole => {
                    warn!(
                        "⚠️ Emails are not sent anywhere (`email.transport` is `blackhole`), users will not receive their renewal links."
                    );
                }
                Ok(()) => info!("✅ Connected to the mail backend"),
                Err(e) => {
                    healthy = false;
                    error!(
                        error = &e as &dyn std::error::Error,
                        "❌ Could not connect to the mail backend (`email` section)"
                    );
                }
            }
        }

        Ok(if healthy {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        })
    }
}
