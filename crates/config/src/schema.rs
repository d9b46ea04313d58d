// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Schema overrides for fields stored as plain strings

use schemars::{
    JsonSchema,
    r#gen::SchemaGenerator,
    schema::{InstanceType, Schema, SchemaObject},
};

/// Stands in for the SMTP and database host fields, so that editors can
/// validate them as hostnames
pub struct Hostname;

impl JsonSchema for Hostname {
    fn schema_name() -> String {
        String::from("Hostname")
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        SchemaObject {
            instance_type: Some(InstanceType::String.into()),
            format: Some(String::from("hostname")),
            ..Default::default()
        }
        .into()
    }
}
