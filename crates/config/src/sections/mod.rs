// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod account_validity;
mod database;
mod email;
mod http;
mod telemetry;
mod templates;

pub use self::{
    account_validity::AccountValidityConfig,
    database::DatabaseConfig,
    email::{EmailConfig, EmailSmtpMode, EmailTransportKind},
    http::HttpConfig,
    telemetry::{ExporterKind, MetricsConfig, SentryConfig, TelemetryConfig, TracingConfig},
    templates::TemplatesConfig,
};
use crate::util::ConfigurationSection;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The whole configuration file
///
/// Only `config dump`, `config check` and the schema generator load all of
/// it. The other commands extract [`AppConfig`] or a single section.
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct RootConfig {
    /// Public URL of the homeserver
    #[serde(default)]
    pub http: HttpConfig,

    /// PostgreSQL connection
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Traces, metrics and error reporting
    #[serde(default, skip_serializing_if = "TelemetryConfig::is_default")]
    pub telemetry: TelemetryConfig,

    /// Email templates location
    #[serde(default, skip_serializing_if = "TemplatesConfig::is_default")]
    pub templates: TemplatesConfig,

    /// Outgoing email
    #[serde(default)]
    pub email: EmailConfig,

    /// Expiration and renewal of accounts
    #[serde(default)]
    pub account_validity: AccountValidityConfig,
}

impl ConfigurationSection for RootConfig {
    fn validate(&self, figment: &figment::Figment) -> Result<(), BoxError> {
        self.telemetry.validate(figment)?;
        AppConfig::validate_sections(
            figment,
            &self.http,
            &self.database,
            &self.templates,
            &self.email,
            &self.account_validity,
        )
    }
}

impl RootConfig {
    /// A starting configuration, with account validity switched on
    #[must_use]
    pub fn generate() -> Self {
        let mut config = Self::default();
        config.account_validity.enabled = true;
        config
    }
}

/// The sections needed to scan and renew accounts
#[allow(missing_docs)]
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub templates: TemplatesConfig,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub account_validity: AccountValidityConfig,
}

impl AppConfig {
    fn validate_sections(
        figment: &figment::Figment,
        http: &HttpConfig,
        database: &DatabaseConfig,
        templates: &TemplatesConfig,
        email: &EmailConfig,
        account_validity: &AccountValidityConfig,
    ) -> Result<(), BoxError> {
        http.validate(figment)?;
        database.validate(figment)?;
        templates.validate(figment)?;
        email.validate(figment)?;
        account_validity.validate(figment)
    }
}

impl ConfigurationSection for AppConfig {
    fn validate(&self, figment: &figment::Figment) -> Result<(), BoxError> {
        Self::validate_sections(
            figment,
            &self.http,
            &self.database,
            &self.templates,
            &self.email,
            &self.account_validity,
        )
    }
}

#[cfg(test)]
mod tests {
    use figment::{
        Figment, Jail,
        providers::{Env, Format, Serialized, Yaml},
    };

    use super::*;

    #[test]
    fn generated_config_is_valid() {
        Jail::expect_with(|_jail| {
            let config = RootConfig::generate();
            let figment = Figment::new().merge(Serialized::defaults(&config));
            let config = RootConfig::extract(&figment).unwrap();
            assert!(config.account_validity.enabled);

            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    http:
                      public_base: https://matrix.example.com/
                    account_validity:
                      enabled: true
                      scan_interval: 3600
                ",
            )?;
            jail.set_env("AVS_ACCOUNT_VALIDITY__SCAN_INTERVAL", "60");

            let figment = Figment::new()
                .merge(Yaml::file("config.yaml"))
                .merge(Env::prefixed("AVS_").split("__"));
            let config = AppConfig::extract(&figment).unwrap();

            assert!(config.account_validity.enabled);
            assert_eq!(
                config.account_validity.scan_interval,
                std::time::Duration::from_secs(60)
            );
            assert_eq!(
                config.http.public_base.as_str(),
                "https://matrix.example.com/"
            );

            Ok(())
        });
    }
}
