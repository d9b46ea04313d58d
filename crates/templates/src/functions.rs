// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Additional functions, tests and filters used in templates

use std::fmt::Write as _;

use chrono::DateTime;
use minijinja::{Environment, Error, ErrorKind};

pub fn register(env: &mut Environment) {
    env.add_filter("format_ts", filter_format_ts);
}

/// Format a timestamp in milliseconds since the UNIX epoch with a `strftime`
/// format string. Defaults to an ISO 8601 date.
fn filter_format_ts(timestamp_millis: i64, format: Option<&str>) -> Result<String, Error> {
    let datetime = DateTime::from_timestamp_millis(timestamp_millis).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("timestamp {timestamp_millis} is out of range"),
        )
    })?;

    let mut out = String::new();
    write!(out, "{}", datetime.format(format.unwrap_or("%Y-%m-%d"))).map_err(|_| {
        Error::new(
            ErrorKind::InvalidOperation,
            "invalid timestamp format string",
        )
    })?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use minijinja::{Environment, context};

    #[test]
    fn test_format_ts() {
        let mut env = Environment::new();
        super::register(&mut env);

        let render = |template: &str, ts: i64| {
            env.render_str(template, context! { ts => ts })
        };

        // 2019-04-17T14:00:00Z
        assert_eq!(
            render(r#"{{ ts | format_ts("%d-%m-%Y") }}"#, 1_555_509_600_000).unwrap(),
            "17-04-2019"
        );
        assert_eq!(
            render("{{ ts | format_ts }}", 1_555_509_600_000).unwrap(),
            "2019-04-17"
        );
        assert!(render(r#"{{ ts | format_ts("%Q") }}"#, 0).is_err());
    }
}
