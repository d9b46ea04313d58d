// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{num::NonZeroU16, str::FromStr};

use lettre::message::Mailbox;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::Error};

use super::ConfigurationSection;

/// Placeholder which gets replaced by `app_name` in the email strings
const APP_NAME_PLACEHOLDER: &str = "%(app)s";

fn default_app_name() -> String {
    "Matrix".to_owned()
}

fn default_email() -> String {
    r#""%(app)s" <root@localhost>"#.to_owned()
}

fn is_default_email(email: &str) -> bool {
    email == default_email()
}

/// Encryption mode to use
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmailSmtpMode {
    /// Plain text
    Plain,

    /// `StartTLS` (starts as plain text then upgrade to TLS)
    StartTls,

    /// TLS
    Tls,
}

/// What backend should be used when sending emails
#[derive(Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmailTransportKind {
    /// Don't send emails anywhere
    #[default]
    Blackhole,

    /// Send emails via an SMTP relay
    Smtp,

    /// Send emails by calling sendmail
    Sendmail,
}

/// Configuration related to sending emails
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct EmailConfig {
    /// Name of the application, substituted to `%(app)s` in the `from`
    /// address and in the email subjects
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Email address to use as From when sending emails
    ///
    /// May contain `%(app)s`, which is replaced by `app_name`
    #[serde(default = "default_email", skip_serializing_if = "is_default_email")]
    #[schemars(email)]
    pub from: String,

    /// Email address to use as Reply-To when sending emails
    ///
    /// May contain `%(app)s`, which is replaced by `app_name`
    #[serde(default = "default_email", skip_serializing_if = "is_default_email")]
    #[schemars(email)]
    pub reply_to: String,

    /// What backend should be used when sending emails
    #[serde(default)]
    transport: EmailTransportKind,

    /// SMTP transport: Connection mode to the relay
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<EmailSmtpMode>,

    /// SMTP transport: Hostname to connect to
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<crate::schema::Hostname>")]
    hostname: Option<String>,

    /// SMTP transport: Port to connect to. Default is 25 for plain, 465 for TLS
    /// and 587 for `StartTLS`
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1, max = 65535))]
    port: Option<NonZeroU16>,

    /// SMTP transport: Username for use to authenticate when connecting to the
    /// SMTP server
    ///
    /// Must be set if the `password` field is set
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,

    /// SMTP transport: Password for use to authenticate when connecting to the
    /// SMTP server
    ///
    /// Must be set if the `username` field is set
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,

    /// Sendmail transport: Command to use to send emails
    ///
    /// Defaults to `sendmail` when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
}

impl EmailConfig {
    /// What backend should be used when sending emails
    #[must_use]
    pub fn transport(&self) -> EmailTransportKind {
        self.transport
    }

    /// Connection mode to the relay
    #[must_use]
    pub fn mode(&self) -> Option<EmailSmtpMode> {
        self.mode
    }

    /// Hostname to connect to
    #[must_use]
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Port to connect to
    #[must_use]
    pub fn port(&self) -> Option<NonZeroU16> {
        self.port
    }

    /// Username for use to authenticate when connecting to the SMTP server
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Password for use to authenticate when connecting to the SMTP server
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Command to use to send emails
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Replace `%(app)s` with the application name in the given string
    #[must_use]
    pub fn with_app_name(&self, template: &str) -> String {
        template.replace(APP_NAME_PLACEHOLDER, &self.app_name)
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            from: default_email(),
            reply_to: default_email(),
            transport: EmailTransportKind::Blackhole,
            mode: None,
            hostname: None,
            port: None,
            username: None,
            password: None,
            command: None,
        }
    }
}

impl ConfigurationSection for EmailConfig {
    const PATH: Option<&'static str> = Some("email");

    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        let metadata = figment.find_metadata(Self::PATH.unwrap_or_default());

        let error_on_field = |mut error: figment::error::Error, field: &'static str| {
            error.metadata = metadata.cloned();
            error.profile = Some(figment::Profile::Default);
            error.path = vec!["email".to_owned(), field.to_owned()];
            error
        };

        let missing_field = |field: &'static str| {
            error_on_field(figment::error::Error::missing_field(field), field)
        };

        let unexpected_field = |field: &'static str, expected_fields: &'static [&'static str]| {
            error_on_field(
                figment::error::Error::unknown_field(field, expected_fields),
                field,
            )
        };

        if let Err(e) = Mailbox::from_str(&self.with_app_name(&self.from)) {
            return Err(error_on_field(figment::error::Error::custom(e), "from").into());
        }

        if let Err(e) = Mailbox::from_str(&self.with_app_name(&self.reply_to)) {
            return Err(error_on_field(figment::error::Error::custom(e), "reply_to").into());
        }

        match self.transport {
            EmailTransportKind::Blackhole => {}

            EmailTransportKind::Smtp => {
                if self.mode.is_none() {
                    return Err(missing_field("mode").into());
                }

                if self.hostname.is_none() {
                    return Err(missing_field("hostname").into());
                }

                if self.command.is_some() {
                    return Err(unexpected_field(
                        "command",
                        &["mode", "hostname", "port", "username", "password"],
                    )
                    .into());
                }

                match (self.username.is_some(), self.password.is_some()) {
                    (true, true) | (false, false) => {}
                    (true, false) => {
                        return Err(missing_field("password").into());
                    }
                    (false, true) => {
                        return Err(missing_field("username").into());
                    }
                }
            }

            EmailTransportKind::Sendmail => {
                let expected_fields = &["command"];

                if self.mode.is_some() {
                    return Err(unexpected_field("mode", expected_fields).into());
                }

                if self.hostname.is_some() {
                    return Err(unexpected_field("hostname", expected_fields).into());
                }

                if self.port.is_some() {
                    return Err(unexpected_field("port", expected_fields).into());
                }

                if self.username.is_some() {
                    return Err(unexpected_field("username", expected_fields).into());
                }

                if self.password.is_some() {
                    return Err(unexpected_field("password", expected_fields).into());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use figment::{
        Figment, Jail,
        providers::{Format, Yaml},
    };

    use super::*;
    use crate::ConfigurationSectionExt;

    #[test]
    fn load_smtp_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
                    email:
                      app_name: Riot
                      from: '"%(app)s" <noreply@example.com>'
                      transport: smtp
                      mode: starttls
                      hostname: smtp.example.com
                      username: avs
                      password: hunter2
                "#,
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = EmailConfig::extract(&figment).unwrap();

            assert_eq!(config.transport(), EmailTransportKind::Smtp);
            assert_eq!(config.mode(), Some(EmailSmtpMode::StartTls));
            assert_eq!(config.hostname(), Some("smtp.example.com"));
            assert_eq!(
                config.with_app_name(&config.from),
                r#""Riot" <noreply@example.com>"#
            );

            Ok(())
        });
    }

    #[test]
    fn load_sendmail_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    email:
                      transport: sendmail
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = EmailConfig::extract(&figment).unwrap();
            assert_eq!(config.transport(), EmailTransportKind::Sendmail);
            assert_eq!(config.command(), None);

            let schema = schemars::schema_for!(EmailConfig);
            let properties = &schema.schema.object.as_ref().unwrap().properties;
            assert!(properties.contains_key("command"));

            Ok(())
        });
    }

    #[test]
    fn default_config_is_valid() {
        Jail::expect_with(|_jail| {
            let figment = Figment::new();
            let config = EmailConfig::extract_or_default(&figment).unwrap();
            assert_eq!(config.transport(), EmailTransportKind::Blackhole);
            assert_eq!(config.with_app_name(&config.from), r#""Matrix" <root@localhost>"#);

            Ok(())
        });
    }

    #[test]
    fn reject_incomplete_smtp_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    email:
                      transport: smtp
                      mode: tls
                      hostname: smtp.example.com
                      username: avs
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(EmailConfig::extract(&figment).is_err());

            jail.create_file(
                "config.yaml",
                r"
                    email:
                      transport: smtp
                      hostname: smtp.example.com
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(EmailConfig::extract(&figment).is_err());

            Ok(())
        });
    }

    #[test]
    fn reject_invalid_sender() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    email:
                      from: not an email address
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(EmailConfig::extract(&figment).is_err());

            Ok(())
        });
    }
}
