// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

#![allow(clippy::module_name_repetitions)]

use std::{io::IsTerminal, process::ExitCode};

use anyhow::Context;
use avs_config::{ConfigurationSectionExt, TelemetryConfig};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

mod commands;
mod shutdown;
mod telemetry;
mod util;

static VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let res = try_main().await;

        // Flush the exporters even if the command failed
        if let Err(err) = self::telemetry::shutdown() {
            eprintln!("Failed to flush telemetry: {err}");
        }

        res
    })
}

async fn try_main() -> anyhow::Result<ExitCode> {
    // A missing .env file is fine, anything else gets logged once logging is up
    let dotenv = match dotenvy::dotenv() {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e),
    };

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("could not install the rustls crypto provider"))?;

    let opts = self::commands::Options::parse();
    let figment = opts.figment();

    let telemetry_config = TelemetryConfig::extract_or_default(&figment)
        .map_err(anyhow::Error::from_boxed)
        .context("Invalid telemetry configuration")?;

    let sentry = sentry::init((
        telemetry_config.sentry.dsn.as_deref(),
        sentry::ClientOptions {
            release: Some(VERSION.into()),
            environment: telemetry_config.sentry.environment.clone().map(Into::into),
            sample_rate: telemetry_config.sentry.sample_rate.unwrap_or(1.0),
            traces_sample_rate: telemetry_config.sentry.traces_sample_rate.unwrap_or(0.0),
            ..Default::default()
        },
    ));

    let _log_guard = init_logging(&telemetry_config, sentry.is_enabled())?;

    match dotenv {
        Ok(Some(path)) => tracing::info!(?path, "Loaded environment variables from .env file"),
        Ok(None) => {}
        Err(error) => tracing::warn!(%error, "Could not load the .env file"),
    }

    tracing::trace!(?opts, "Running command");
    opts.run(&figment).await
}

/// Install the global subscriber
///
/// Logs go to stderr through a background writer, which flushes when the
/// returned guard is dropped.
fn init_logging(config: &TelemetryConfig, with_sentry: bool) -> anyhow::Result<WorkerGuard> {
    let stderr = std::io::stderr();
    let ansi = stderr.is_terminal();
    let (writer, guard) = tracing_appender::non_blocking(stderr);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid RUST_LOG filter")?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_file(true)
        .with_line_number(true);

    let sentry_layer = with_sentry.then(sentry_tracing::layer);

    let otel_layer = self::telemetry::setup(config)
        .context("Failed to set up OpenTelemetry")?
        .map(|tracer| {
            tracing_opentelemetry::layer()
                .with_tracer(tracer)
                .with_tracked_inactivity(false)
                .with_filter(LevelFilter::INFO)
        });

    Registry::default()
        .with(sentry_layer)
        .with(otel_layer)
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("could not initialize logging")?;

    Ok(guard)
}
