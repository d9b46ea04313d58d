// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use figment::Figment;
use serde::de::DeserializeOwned;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A part of the configuration which can be loaded on its own
///
/// Commands only extract the sections they need, so that for example
/// `database migrate` works without a valid email configuration.
pub trait ConfigurationSection: Sized + DeserializeOwned {
    /// Key of the section in the configuration file, `None` for the root
    const PATH: Option<&'static str> = None;

    /// Check the constraints serde cannot express
    ///
    /// The whole [`Figment`] is passed so that errors can point at the
    /// offending key.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value
    fn validate(&self, _figment: &Figment) -> Result<(), BoxError> {
        Ok(())
    }

    /// Deserialize and validate the section
    ///
    /// # Errors
    ///
    /// Returns an error if the section is missing, malformed or invalid
    fn extract(figment: &Figment) -> Result<Self, BoxError> {
        let section: Self = match Self::PATH {
            Some(path) => figment.extract_inner(path)?,
            None => figment.extract()?,
        };
        section.validate(figment)?;
        Ok(section)
    }
}

/// Loading of optional sections
pub trait ConfigurationSectionExt: ConfigurationSection + Default {
    /// Like [`ConfigurationSection::extract`], but an absent section yields
    /// its default value
    ///
    /// # Errors
    ///
    /// Returns an error if the section is present but malformed or invalid
    fn extract_or_default(figment: &Figment) -> Result<Self, BoxError> {
        match Self::PATH {
            Some(path) if !figment.contains(path) => Ok(Self::default()),
            _ => Self::extract(figment),
        }
    }
}

impl<T: ConfigurationSection + Default> ConfigurationSectionExt for T {}
