// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use camino::Utf8PathBuf;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::Error as _};

use super::ConfigurationSection;

fn default_path() -> Utf8PathBuf {
    "./templates/".into()
}

fn is_default_path(value: &Utf8PathBuf) -> bool {
    *value == default_path()
}

/// Configuration related to the email templates
#[derive(Debug, Serialize, Deserialize, JsonSchema, Clone, PartialEq, Eq)]
pub struct TemplatesConfig {
    /// Path to the folder which holds the templates
    #[serde(default = "default_path", skip_serializing_if = "is_default_path")]
    #[schemars(with = "String")]
    pub path: Utf8PathBuf,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
        }
    }
}

impl TemplatesConfig {
    /// Returns true if all fields are at their default values
    pub(crate) fn is_default(&self) -> bool {
        is_default_path(&self.path)
    }
}

impl ConfigurationSection for TemplatesConfig {
    const PATH: Option<&'static str> = Some("templates");

    fn validate(
        &self,
        figment: &figment::Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        if self.path.as_str().is_empty() {
            let mut error = figment::error::Error::custom("path must not be empty");
            error.metadata = figment.find_metadata("templates").cloned();
            error.profile = Some(figment::Profile::Default);
            error.path = vec!["templates".to_owned(), "path".to_owned()];
            return Err(error.into());
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
    fn load_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    templates:
                      path: /usr/share/avs/templates
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = TemplatesConfig::extract(&figment).unwrap();
            assert_eq!(config.path, "/usr/share/avs/templates");
            assert!(!config.is_default());

            let config = TemplatesConfig::extract_or_default(&Figment::new()).unwrap();
            assert!(config.is_default());

            Ok(())
        });
    }
}
