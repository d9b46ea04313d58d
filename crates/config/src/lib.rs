// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

#![deny(missing_docs, rustdoc::missing_crate_level_docs)]
#![allow(clippy::module_name_repetitions)]
// derive(JSONSchema) uses &str.to_string()
#![allow(clippy::str_to_string)]

//! Configuration of the account validity service
//!
//! Sections are loaded from a [`figment::Figment`] merging the YAML files
//! and the `AVS_` environment variables. The JSON schema of the whole file
//! is printed by the `schema` binary of this crate.

mod schema;
mod sections;
mod util;

pub use self::{
    sections::*,
    util::{ConfigurationSection, ConfigurationSectionExt},
};
