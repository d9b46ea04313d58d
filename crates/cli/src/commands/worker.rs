// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{process::ExitCode, time::Duration};

use avs_config::{AppConfig, ConfigurationSection};
use avs_router::UrlBuilder;
use avs_storage::SystemClock;
use avs_storage_pg::PgRepositoryFactory;
use clap::Parser;
use figment::Figment;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

use crate::{
    shutdown::ShutdownManager,
    util::{
        database_pool_from_config, mailer_from_config, policy_from_config,
        templates_from_config, test_mailer_in_background,
    },
};

#[derive(Parser, Debug, Default)]
pub(super) struct Options {
    /// Run a single scan and exit, instead of scanning every
    /// `account_validity.scan_interval`
    #[arg(long)]
    once: bool,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let span = info_span!("cli.worker.init").entered();
        let config = AppConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;

        if !config.account_validity.enabled {
            warn!("Account validity is disabled in the configuration, not starting the scanner");
            return Ok(ExitCode::SUCCESS);
        }

        let policy = policy_from_config(&config.account_validity)?;

        // Connect to the database
        info!("Connecting to the database");
        let pool = database_pool_from_config(&config.database).await?;
        let repository_factory = PgRepositoryFactory::new(pool).boxed();

        let url_builder = UrlBuilder::new(config.http.public_base.clone());

        // Load and compile the templates
        let templates = templates_from_config(&config.templates).await?;

        let mailer = mailer_from_config(&config.email, &config.account_validity, &templates)?;

        drop(config);

        if self.once {
            let scanner = avs_tasks::init(
                repository_factory,
                SystemClock::default(),
                &mailer,
                url_builder,
                &policy,
                CancellationToken::new(),
            );
            span.exit();

            let report = scanner.run_once().await?;
            info!(
                notified = report.notified,
                failed = report.failed,
                skipped = report.skipped,
                "Scan finished"
            );

            return Ok(if report.failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }

        let shutdown = ShutdownManager::new()?;
        test_mailer_in_background(&mailer, Duration::from_secs(30));

        info!(
            scan_interval = ?policy.scan_interval,
            "Starting the account validity scanner"
        );
        avs_tasks::init_and_run(
            repository_factory,
            SystemClock::default(),
            &mailer,
            url_builder,
            &policy,
            shutdown.shutdown_token(),
            shutdown.task_tracker(),
        );
        span.exit();

        shutdown.run().await;

        Ok(ExitCode::SUCCESS)
    }
}
