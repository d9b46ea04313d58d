// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use figment::Figment;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::Error as _};
use url::Url;

use super::ConfigurationSection;

fn sample_rate_example() -> f64 {
    0.1
}

#[allow(clippy::unnecessary_wraps)]
fn otlp_endpoint_example() -> Option<String> {
    Some("http://localhost:4318".to_owned())
}

fn sentry_dsn_example() -> &'static str {
    "https://public@sentry.example.com/1"
}

/// Where traces or metrics get sent
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    /// Nowhere
    #[default]
    None,

    /// Printed on the standard output, for debugging
    Stdout,

    /// Pushed to an OTLP over HTTP collector
    Otlp,
}

/// Export of the spans emitted while scanning and renewing accounts
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct TracingConfig {
    /// Where to send the traces
    #[serde(default)]
    pub exporter: ExporterKind,

    /// Collector URL, when using the `otlp` exporter
    ///
    /// The standard `OTEL_EXPORTER_OTLP_*` variables apply when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(url, example = "otlp_endpoint_example")]
    pub endpoint: Option<Url>,

    /// Ratio of the traces to keep, `1.0` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(example = "sample_rate_example", range(min = 0.0, max = 1.0))]
    pub sample_rate: Option<f64>,
}

impl TracingConfig {
    fn is_default(&self) -> bool {
        self.exporter == ExporterKind::None
            && self.endpoint.is_none()
            && self.sample_rate.is_none()
    }
}

/// Export of the scanner and database metrics
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct MetricsConfig {
    /// Where to send the metrics
    #[serde(default)]
    pub exporter: ExporterKind,

    /// Collector URL, when using the `otlp` exporter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(url, example = "otlp_endpoint_example")]
    pub endpoint: Option<Url>,
}

impl MetricsConfig {
    fn is_default(&self) -> bool {
        self.exporter == ExporterKind::None && self.endpoint.is_none()
    }
}

/// Error reporting to Sentry. Disabled unless a DSN is set.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct SentryConfig {
    /// Project DSN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(url, example = "sentry_dsn_example")]
    pub dsn: Option<String>,

    /// Environment attached to the events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    /// Ratio of the error events to send, `1.0` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(example = "sample_rate_example", range(min = 0.0, max = 1.0))]
    pub sample_rate: Option<f32>,

    /// Ratio of the transactions to send, `0.0` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(example = "sample_rate_example", range(min = 0.0, max = 1.0))]
    pub traces_sample_rate: Option<f32>,
}

impl SentryConfig {
    fn is_default(&self) -> bool {
        self.dsn.is_none()
            && self.environment.is_none()
            && self.sample_rate.is_none()
            && self.traces_sample_rate.is_none()
    }
}

/// Monitoring of the service
///
/// Logs are not configured here: they always go to the standard error,
/// filtered by the `RUST_LOG` environment variable.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct TelemetryConfig {
    /// Traces export
    #[serde(default, skip_serializing_if = "TracingConfig::is_default")]
    pub tracing: TracingConfig,

    /// Metrics export
    #[serde(default, skip_serializing_if = "MetricsConfig::is_default")]
    pub metrics: MetricsConfig,

    /// Sentry integration
    #[serde(default, skip_serializing_if = "SentryConfig::is_default")]
    pub sentry: SentryConfig,
}

impl TelemetryConfig {
    pub(crate) fn is_default(&self) -> bool {
        self.tracing.is_default() && self.metrics.is_default() && self.sentry.is_default()
    }
}

impl ConfigurationSection for TelemetryConfig {
    const PATH: Option<&'static str> = Some("telemetry");

    fn validate(
        &self,
        _figment: &Figment,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
        let rates = [
            ("tracing.sample_rate", self.tracing.sample_rate),
            ("sentry.sample_rate", self.sentry.sample_rate.map(f64::from)),
            (
                "sentry.traces_sample_rate",
                self.sentry.traces_sample_rate.map(f64::from),
            ),
        ];

        for (path, rate) in rates {
            if rate.is_some_and(|rate| !(0.0..=1.0).contains(&rate)) {
                return Err(figment::Error::custom("must be between 0.0 and 1.0")
                    .with_path(path)
                    .into());
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
    fn load_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    telemetry:
                      tracing:
                        exporter: otlp
                        endpoint: https://otel.example.com:4318
                      metrics:
                        exporter: stdout
                      sentry:
                        dsn: https://public@sentry.example.com/1
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = TelemetryConfig::extract(&figment).unwrap();

            assert_eq!(config.tracing.exporter, ExporterKind::Otlp);
            assert_eq!(config.metrics.exporter, ExporterKind::Stdout);
            assert!(config.sentry.dsn.is_some());
            assert!(!config.is_default());

            Ok(())
        });
    }

    #[test]
    fn missing_section_is_default() {
        Jail::expect_with(|_jail| {
            let config = TelemetryConfig::extract_or_default(&Figment::new()).unwrap();
            assert!(config.is_default());
            Ok(())
        });
    }

    #[test]
    fn reject_invalid_sample_rate() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    telemetry:
                      sentry:
                        traces_sample_rate: 1.5
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            assert!(TelemetryConfig::extract_or_default(&figment).is_err());

            Ok(())
        });
    }
}
