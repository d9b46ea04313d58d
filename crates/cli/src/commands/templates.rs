// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{collections::BTreeMap, process::ExitCode};

use anyhow::{Context as _, bail};
use avs_config::{ConfigurationSectionExt, HttpConfig, TemplatesConfig};
use avs_router::UrlBuilder;
use avs_storage::{Clock, SystemClock};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use figment::Figment;
use rand::SeedableRng;
use rand_chacha::ChaChaRng;
use tracing::{info, info_span};

use crate::util::templates_from_config;

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser, Debug)]
enum Subcommand {
    /// Render every template with sample data
    Check {
        /// Also write the renders to this directory, which must be missing or
        /// empty
        #[arg(long = "out-dir")]
        out_dir: Option<Utf8PathBuf>,
    },
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let Subcommand::Check { out_dir } = self.subcommand;
        let _span = info_span!("cli.templates.check").entered();

        let templates_config =
            TemplatesConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
        let http_config =
            HttpConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;

        let templates = templates_from_config(&templates_config).await?;
        let url_builder = UrlBuilder::new(http_config.public_base);

        // Fixed seed, so that two runs produce the same renders
        let mut rng = ChaChaRng::seed_from_u64(42);
        let now = SystemClock::default().now();
        let renders = templates.check_render(now, &mut rng, &url_builder)?;

        let count: usize = renders.values().map(Vec::len).sum();
        info!(count, "All templates rendered successfully");

        if let Some(out_dir) = out_dir {
            write_renders(&out_dir, &renders).await?;
            info!(%out_dir, "Renders written");
        }

        Ok(ExitCode::SUCCESS)
    }
}

/// Write each render to `{template}-sample{n}.{ext}`, slashes in the template
/// name replaced by underscores
async fn write_renders(
    out_dir: &Utf8Path,
    renders: &BTreeMap<&'static str, Vec<String>>,
) -> anyhow::Result<()> {
    match tokio::fs::read_dir(out_dir).await {
        Ok(mut entries) => {
            if entries.next_entry().await?.is_some() {
                bail!("{out_dir} is not empty, refusing to write the renders there");
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(out_dir)
                .await
                .with_context(|| format!("could not create {out_dir}"))?;
        }
        Err(e) => return Err(e).with_context(|| format!("could not read {out_dir}")),
    }

    for (&template, samples) in renders {
        let (stem, ext) = template.rsplit_once('.').unwrap_or((template, "txt"));
        let stem = stem.replace('/', "_");

        for (idx, render) in samples.iter().enumerate() {
            let path = out_dir.join(format!("{stem}-sample{idx}.{ext}"));
            tokio::fs::write(&path, render)
                .await
                .with_context(|| format!("could not write {path}"))?;
        }
    }

    Ok(())
}
