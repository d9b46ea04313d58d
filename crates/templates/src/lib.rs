// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

//! Rendering of the renewal emails
//!
//! Templates are read from a directory at startup. Files ending in `.html`
//! are auto-escaped, `.txt` files are not.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use anyhow::Context as _;
use avs_router::UrlBuilder;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use minijinja::{Environment, UndefinedBehavior, Value};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, info};

mod context;
mod functions;

pub use self::context::{RenewalEmailContext, TemplateContext};

const RENEWAL_TXT: &str = "emails/renewal.txt";
const RENEWAL_HTML: &str = "emails/renewal.html";

/// Templates which must be present in the templates directory
const REQUIRED: [&str; 2] = [RENEWAL_TXT, RENEWAL_HTML];

/// The compiled templates
///
/// Cheap to clone, the environment is shared.
#[derive(Debug, Clone)]
pub struct Templates {
    environment: Arc<Environment<'static>>,
    path: Utf8PathBuf,
}

/// Failed to load the templates directory
#[derive(Error, Debug)]
pub enum TemplateLoadingError {
    /// Reading the directory or one of the files failed
    #[error(transparent)]
    IO(#[from] std::io::Error),

    /// Walking the directory failed
    #[error("failed to traverse the templates directory")]
    WalkDir(#[from] walkdir::Error),

    /// A file name is not valid UTF-8
    #[error("encountered non-UTF-8 path")]
    NonUtf8PathBuf(#[from] camino::FromPathBufError),

    /// A file was found outside of the templates directory
    #[error("encountered invalid path")]
    InvalidPath(#[from] std::path::StripPrefixError),

    /// A template has a syntax error
    #[error("could not compile the templates")]
    Compile(#[from] minijinja::Error),

    /// The loading task panicked
    #[error("error from async runtime")]
    Runtime(#[from] JoinError),

    /// Some templates the service renders are not in the directory
    #[error("missing templates {missing:?}")]
    MissingTemplates {
        /// The required templates which were not found
        missing: HashSet<String>,
        /// Every template which was found
        loaded: HashSet<String>,
    },
}

/// Compile every `.html` and `.txt` file below `root`, skipping hidden
/// entries. Returns the environment and the names of the templates.
fn compile_dir(
    root: &Utf8Path,
) -> Result<(Environment<'static>, HashSet<String>), TemplateLoadingError> {
    let root = root.canonicalize_utf8()?;
    info!(%root, "Loading templates from filesystem");

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    let mut names = HashSet::new();

    let walker = walkdir::WalkDir::new(&root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !entry.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = Utf8PathBuf::try_from(entry.into_path())?;
        if !matches!(path.extension(), Some("html" | "txt")) {
            continue;
        }

        let name = path.strip_prefix(&root)?.as_str().to_owned();
        debug!(%name, "Registering template");
        let source = std::fs::read_to_string(&path)?;
        env.add_template_owned(name.clone(), source)?;
        names.insert(name);
    }

    Ok((env, names))
}

impl Templates {
    /// Load and compile the templates found in `path`
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read, if a template does
    /// not compile, or if one of the renewal email templates is missing
    #[tracing::instrument(name = "templates.load", skip_all, fields(%path))]
    pub async fn load(path: Utf8PathBuf) -> Result<Self, TemplateLoadingError> {
        let root = path.clone();
        let span = tracing::Span::current();
        let (mut env, loaded) =
            tokio::task::spawn_blocking(move || span.in_scope(|| compile_dir(&root))).await??;

        self::functions::register(&mut env);

        let missing: HashSet<String> = REQUIRED
            .iter()
            .filter(|name| !loaded.contains(**name))
            .map(|name| (*name).to_owned())
            .collect();
        if !missing.is_empty() {
            return Err(TemplateLoadingError::MissingTemplates { missing, loaded });
        }

        Ok(Self {
            environment: Arc::new(env),
            path,
        })
    }

    /// The directory the templates were loaded from
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn render(
        &self,
        template: &'static str,
        context: &impl Serialize,
    ) -> Result<String, TemplateError> {
        let tmpl = self
            .environment
            .get_template(template)
            .map_err(|source| TemplateError::Missing { template, source })?;

        tmpl.render(Value::from_serialize(context))
            .map_err(|source| TemplateError::Render { template, source })
    }

    /// Render the plain text body of the renewal email
    ///
    /// # Errors
    ///
    /// Returns an error if the template fails to render
    pub fn render_email_renewal_txt(
        &self,
        context: &RenewalEmailContext,
    ) -> Result<String, TemplateError> {
        self.render(RENEWAL_TXT, context)
    }

    /// Render the HTML body of the renewal email
    ///
    /// # Errors
    ///
    /// Returns an error if the template fails to render
    pub fn render_email_renewal_html(
        &self,
        context: &RenewalEmailContext,
    ) -> Result<String, TemplateError> {
        self.render(RENEWAL_HTML, context)
    }

    /// Render every template with sample contexts
    ///
    /// Returns the renders, keyed by template name. Used by
    /// `avs-cli templates check` to catch broken templates before deploying
    /// them.
    ///
    /// # Errors
    ///
    /// Returns an error if any template fails to render with any sample
    pub fn check_render(
        &self,
        now: DateTime<Utc>,
        rng: &mut impl Rng,
        url_builder: &UrlBuilder,
    ) -> anyhow::Result<BTreeMap<&'static str, Vec<String>>> {
        let samples = RenewalEmailContext::sample(now, rng, url_builder);

        let mut renders = BTreeMap::new();
        for template in REQUIRED {
            let mut out = Vec::with_capacity(samples.len());
            for (idx, sample) in samples.iter().enumerate() {
                debug!(template, idx, "Rendering sample");
                let rendered = self
                    .render(template, sample)
                    .with_context(|| format!("Failed to render {template:?} with sample {idx}"))?;
                out.push(rendered);
            }
            renders.insert(template, out);
        }

        Ok(renders)
    }
}

/// Failed to render a template
#[derive(Error, Debug)]
pub enum TemplateError {
    /// The template is not loaded
    #[error("missing template {template:?}")]
    Missing {
        /// Name of the template
        template: &'static str,

        /// The underlying error
        #[source]
        source: minijinja::Error,
    },

    /// The template failed while rendering, for example on an undefined
    /// variable
    #[error("could not render template {template:?}")]
    Render {
        /// Name of the template
        template: &'static str,

        /// The underlying error
        #[source]
        source: minijinja::Error,
    },
}

#[cfg(test)]
mod tests {
    use avs_data_model::{AccountValidity, Ulid};
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand_chacha::ChaChaRng;

    use super::*;

    fn templates_path() -> Utf8PathBuf {
        Utf8Path::new(env!("CARGO_MANIFEST_DIR")).join("../../templates/")
    }

    #[tokio::test]
    async fn check_builtin_templates() {
        let now = chrono::Utc
            .with_ymd_and_hms(2022, 1, 16, 14, 40, 0)
            .unwrap();
        let url_builder = UrlBuilder::new("https://example.com/".parse().unwrap());

        let templates = Templates::load(templates_path()).await.unwrap();

        // Check the renders are deterministic, when given the same rng
        let render1 = templates
            .check_render(now, &mut ChaChaRng::seed_from_u64(42), &url_builder)
            .unwrap();
        let render2 = templates
            .check_render(now, &mut ChaChaRng::seed_from_u64(42), &url_builder)
            .unwrap();

        assert_eq!(render1, render2);
        assert_eq!(render1.len(), 2);
    }

    #[tokio::test]
    async fn render_renewal_email() {
        let templates = Templates::load(templates_path()).await.unwrap();

        let validity = AccountValidity {
            user_id: Ulid::nil(),
            expires_at: chrono::Utc.with_ymd_and_hms(2019, 4, 17, 14, 0, 0).unwrap(),
            email_sent: false,
        };
        let url: url::Url =
            "https://example.com/_matrix/client/unstable/account_validity/renew?token=abc&x=<y>"
                .parse()
                .unwrap();
        let context = RenewalEmailContext::new("<Alice>".to_owned(), &validity, url);

        let text = templates.render_email_renewal_txt(&context).unwrap();
        assert!(text.contains("Hello <Alice>,"));
        assert!(text.contains("17-04-2019"));
        assert!(text.contains("renew?token=abc"));

        // The HTML variant is escaped
        let html = templates.render_email_renewal_html(&context).unwrap();
        assert!(html.contains("Hello &lt;Alice&gt;,"));
        assert!(html.contains("17-04-2019"));
        assert!(!html.contains("<Alice>"));
    }

    #[tokio::test]
    async fn missing_templates_are_reported() {
        let dir = Utf8Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
        let err = Templates::load(dir).await.unwrap_err();
        assert!(matches!(err, TemplateLoadingError::MissingTemplates { .. }));
    }
}
