// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{num::NonZeroUsize, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::Error as _};
use serde_with::serde_as;

use super::ConfigurationSection;

const fn default_true() -> bool {
    true
}

/// Longest accepted period, so that renewed expiration dates stay far from
/// the latest date chrono can represent
const MAX_PERIOD: Duration = Duration::from_secs(1000 * 365 * 24 * 60 * 60);

fn default_period() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

fn default_renew_at() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_scan_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_renew_email_subject() -> String {
    "Renew your %(app)s account".to_owned()
}

fn default_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(1000).unwrap_or(NonZeroUsize::MIN)
}

/// Configuration related to the validity period of user accounts
#[serde_as]
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct AccountValidityConfig {
    /// Whether accounts expire and get renewal emails. Defaults to `false`.
    #[serde(default)]
    pub enabled: bool,

    /// How long an account stays valid after a renewal, in seconds. Defaults
    /// to 30 days.
    #[schemars(with = "u64", range(min = 1))]
    #[serde(default = "default_period")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub period: Duration,

    /// How long before the expiration the renewal email is sent, in seconds.
    /// Defaults to 7 days.
    #[schemars(with = "u64")]
    #[serde(default = "default_renew_at")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub renew_at: Duration,

    /// How often to look for accounts about to expire, in seconds. Defaults to
    /// 30 minutes.
    #[schemars(with = "u64", range(min = 1))]
    #[serde(default = "default_scan_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub scan_interval: Duration,

    /// Subject of the renewal email. `%(app)s` is replaced by the application
    /// name from the `email` section.
    #[serde(default = "default_renew_email_subject")]
    pub renew_email_subject: String,

    /// Whether a renewal link stops working once it has been used. Defaults to
    /// `true`.
    #[serde(default = "default_true")]
    pub single_use_tokens: bool,

    /// How many accounts to load at once when looking for accounts about to
    /// expire. Defaults to 1000.
    #[serde(default = "default_batch_size")]
    #[schemars(with = "u64", range(min = 1))]
    pub batch_size: NonZeroUsize,
}

impl Default for AccountValidityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period: default_period(),
            renew_at: default_renew_at(),
            scan_interval: default_scan_interval(),
            renew_email_subject: default_renew_email_subject(),
            single_use_tokens: default_true(),
            batch_size: default_batch_size(),
        }
    }
}

impl ConfigurationSection for AccountValidityConfig {
    const PATH: Option<&'static str> = Some("account_validity");

    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        let metadata = figment.find_metadata("account_validity");
        let error_on_field = |mut error: figment::error::Error, field: &'static str| {
            error.metadata = metadata.cloned();
            error.profile = Some(figment::Profile::Default);
            error.path = vec!["account_validity".to_owned(), field.to_owned()];
            error
        };

        if self.period.is_zero() {
            return Err(error_on_field(
                figment::error::Error::custom("period must be positive"),
                "period",
            )
            .into());
        }

        if self.period > MAX_PERIOD {
            return Err(error_on_field(
                figment::error::Error::custom("period must be at most 1000 years"),
                "period",
            )
            .into());
        }

        if self.renew_at >= self.period {
            return Err(error_on_field(
                figment::error::Error::custom("renew_at must be shorter than period"),
                "renew_at",
            )
            .into());
        }

        if self.scan_interval.is_zero() {
            return Err(error_on_field(
                figment::error::Error::custom("scan_interval must be positive"),
                "scan_interval",
            )
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use figment::{
        Figment, Jail,
        providers::{Env, Format, Yaml},
    };

    use super::*;
    use crate::ConfigurationSectionExt;

    #[test]
    fn load_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
                    account_validity:
                      enabled: true
                      period: 2592000
                      renew_at: 86400
                      renew_email_subject: "Time to renew your %(app)s account"
                      single_use_tokens: false
                "#,
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = AccountValidityConfig::extract(&figment).unwrap();

            assert!(config.enabled);
            assert_eq!(config.period, Duration::from_secs(30 * 24 * 60 * 60));
            assert_eq!(config.renew_at, Duration::from_secs(24 * 60 * 60));
            assert_eq!(config.scan_interval, Duration::from_secs(30 * 60));
            assert!(!config.single_use_tokens);
            assert_eq!(config.batch_size.get(), 1000);

            Ok(())
        });
    }

    #[test]
    fn missing_section_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = AccountValidityConfig::extract_or_default(&Figment::new()).unwrap();
            assert!(!config.enabled);
            assert!(config.single_use_tokens);
            assert_eq!(config, AccountValidityConfig::default());

            Ok(())
        });
    }

    #[test]
    fn load_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env("AVS_ACCOUNT_VALIDITY__ENABLED", "true");
            jail.set_env("AVS_ACCOUNT_VALIDITY__SCAN_INTERVAL", "60");

            let figment = Figment::new().merge(Env::prefixed("AVS_").split("__"));
            let config = AccountValidityConfig::extract(&figment).unwrap();

            assert!(config.enabled);
            assert_eq!(config.scan_interval, Duration::from_secs(60));

            Ok(())
        });
    }

    #[test]
    fn reject_invalid_periods() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    account_validity:
                      enabled: true
                      period: 86400
                      renew_at: 604800
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(AccountValidityConfig::extract(&figment).is_err());

            jail.create_file(
                "config.yaml",
                r"
                    account_validity:
                      period: 0
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(AccountValidityConfig::extract(&figment).is_err());

            // Would overflow the expiration date
            jail.create_file(
                "config.yaml",
                r"
                    account_validity:
                      period: 100000000000000
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let err = AccountValidityConfig::extract(&figment).unwrap_err();
            assert!(err.to_string().contains("1000 years"));

            jail.create_file(
                "config.yaml",
                r"
                    account_validity:
                      scan_interval: 0
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(AccountValidityConfig::extract(&figment).is_err());

            Ok(())
        });
    }
}
