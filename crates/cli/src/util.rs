// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use anyhow::Context;
use avs_config::{
    AccountValidityConfig, DatabaseConfig, EmailConfig, EmailSmtpMode, EmailTransportKind,
    TemplatesConfig,
};
use avs_data_model::AccountValidityPolicy;
use avs_email::{MailTransport, Mailbox, Mailer, SmtpCredentials, SmtpMode};
use avs_templates::Templates;
use sqlx::{
    ConnectOptions, PgConnection, PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use tracing::{Instrument, log::LevelFilter};

/// Build the mailer the scanner sends renewal emails with
///
/// The `%(app)s` placeholder gets replaced by `email.app_name` in the sender,
/// the reply-to address and the renewal email subject.
pub fn mailer_from_config(
    config: &EmailConfig,
    account_validity: &AccountValidityConfig,
    templates: &Templates,
) -> Result<Mailer, anyhow::Error> {
    let from: Mailbox = config
        .with_app_name(&config.from)
        .parse()
        .context("invalid email.from address")?;
    let reply_to: Mailbox = config
        .with_app_name(&config.reply_to)
        .parse()
        .context("invalid email.reply_to address")?;

    let transport = match config.transport() {
        EmailTransportKind::Blackhole => MailTransport::blackhole(),
        EmailTransportKind::Sendmail => MailTransport::sendmail(config.command()),
        EmailTransportKind::Smtp => smtp_transport_from_config(config)?,
    };

    Ok(Mailer::new(
        templates.clone(),
        transport,
        from,
        reply_to,
        config.with_app_name(&account_validity.renew_email_subject),
    ))
}

fn smtp_transport_from_config(config: &EmailConfig) -> Result<MailTransport, anyhow::Error> {
    // Both are checked when the section is validated
    let hostname = config.hostname().context("missing email.hostname")?;
    let mode = match config.mode().context("missing email.mode")? {
        EmailSmtpMode::Plain => SmtpMode::Plain,
        EmailSmtpMode::StartTls => SmtpMode::StartTls,
        EmailSmtpMode::Tls => SmtpMode::Tls,
    };

    let credentials = match (config.username(), config.password()) {
        (Some(username), Some(password)) => {
            Some(SmtpCredentials::new(username.to_owned(), password.to_owned()))
        }
        (None, None) => None,
        _ => anyhow::bail!("email.username and email.password must be set together"),
    };

    MailTransport::smtp(mode, hostname, config.port(), credentials)
        .context("failed to set up the SMTP transport")
}

/// Test the connection to the mailer in a background task
pub fn test_mailer_in_background(mailer: &Mailer, timeout: Duration) {
    let mailer = mailer.clone();

    let span = tracing::info_span!("cli.test_mailer");
    tokio::spawn(
        async move {
            match tokio::time::timeout(timeout, mailer.test_connection()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        error = &err as &dyn std::error::Error,
                        "Could not connect to the mail backend, renewal emails may fail!"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        "Timed out while testing the mail backend connection, renewal emails may fail!"
                    );
                }
            }
        }
        .instrument(span),
    );
}

pub async fn templates_from_config(config: &TemplatesConfig) -> Result<Templates, anyhow::Error> {
    Templates::load(config.path.clone())
        .await
        .with_context(|| format!("Failed to load the templates at {}", config.path))
}

/// Convert the account validity section to the policy used by the tasks
pub fn policy_from_config(
    config: &AccountValidityConfig,
) -> Result<AccountValidityPolicy, anyhow::Error> {
    let period = chrono::Duration::from_std(config.period)
        .context("invalid account validity configuration: period is out of range")?;
    let renew_at = chrono::Duration::from_std(config.renew_at)
        .context("invalid account validity configuration: renew_at is out of range")?;

    Ok(AccountValidityPolicy {
        period,
        renew_at,
        scan_interval: config.scan_interval,
        single_use_tokens: config.single_use_tokens,
        batch_size: config.batch_size.get(),
    })
}

fn database_connect_options_from_config(
    config: &DatabaseConfig,
) -> Result<PgConnectOptions, anyhow::Error> {
    let options = match config.uri.as_deref() {
        Some(uri) => uri
            .parse::<PgConnectOptions>()
            .context("invalid database.uri")?,
        None => {
            let mut options =
                PgConnectOptions::new().application_name("account-validity-service");
            if let Some(host) = &config.host {
                options = options.host(host);
            }
            if let Some(port) = config.port {
                options = options.port(port);
            }
            if let Some(socket) = &config.socket {
                options = options.socket(socket);
            }
            if let Some(username) = &config.username {
                options = options.username(username);
            }
            if let Some(password) = &config.password {
                options = options.password(password);
            }
            if let Some(database) = &config.database {
                options = options.database(database);
            }
            options
        }
    };

    Ok(options
        .log_statements(LevelFilter::Debug)
        .log_slow_statements(LevelFilter::Warn, Duration::from_millis(100)))
}

/// Create a database connection pool from the configuration
#[tracing::instrument(name = "db.connect", skip_all)]
pub async fn database_pool_from_config(config: &DatabaseConfig) -> Result<PgPool, anyhow::Error> {
    let options = database_connect_options_from_config(config)?;
    PgPoolOptions::new()
        .max_connections(config.max_connections.into())
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect_with(options)
        .await
        .context("could not connect to the database")
}

/// Create a single database connection from the configuration
#[tracing::instrument(name = "db.connect", skip_all)]
pub async fn database_connection_from_config(
    config: &DatabaseConfig,
) -> Result<PgConnection, anyhow::Error> {
    database_connect_options_from_config(config)?
        .connect()
        .await
        .context("could not connect to the database")
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    #[test]
    fn test_policy_from_config() {
        let config = AccountValidityConfig {
            enabled: true,
            period: Duration::from_secs(10 * 24 * 60 * 60),
            renew_at: Duration::from_secs(2 * 24 * 60 * 60),
            batch_size: NonZeroUsize::new(50).unwrap(),
            ..AccountValidityConfig::default()
        };

        let policy = policy_from_config(&config).unwrap();
        assert_eq!(policy.period, chrono::Duration::days(10));
        assert_eq!(policy.renew_at, chrono::Duration::days(2));
        assert_eq!(policy.scan_interval, Duration::from_secs(30 * 60));
        assert!(policy.single_use_tokens);
        assert_eq!(policy.batch_size, 50);
    }

    #[test]
    fn test_mailer_subject_uses_app_name() {
        let mut email = EmailConfig::default();
        email.app_name = "Riot".to_owned();
        let account_validity = AccountValidityConfig::default();

        assert_eq!(
            email.with_app_name(&account_validity.renew_email_subject),
            "Renew your Riot account"
        );
        assert_eq!(
            email.with_app_name(&email.from),
            r#""Riot" <root@localhost>"#
        );
    }
}
