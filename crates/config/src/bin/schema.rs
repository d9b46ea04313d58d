// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use schemars::r#gen::SchemaSettings;

fn main() -> ExitCode {
    let generator = SchemaSettings::draft07()
        .with(|settings| settings.option_add_null_type = false)
        .into_generator();
    let schema = generator.into_root_schema_for::<avs_config::RootConfig>();

    if let Err(e) = serde_json::to_writer_pretty(std::io::stdout(), &schema) {
        eprintln!("Failed to serialize schema: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
