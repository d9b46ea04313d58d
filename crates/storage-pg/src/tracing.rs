// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use opentelemetry_semantic_conventions::attribute::DB_QUERY_TEXT;
use tracing::Span;

/// Attaches the SQL of a query to the span it runs in
///
/// The repository methods declare an empty `db.query.text` field on their
/// span, which gets filled by calling `.traced()` on the query before
/// executing it.
pub trait ExecuteExt<'q, DB>: sqlx::Execute<'q, DB> + Sized
where
    DB: sqlx::Database,
{
    /// Record the query text on the current span
    #[must_use]
    fn traced(self) -> Self {
        Span::current().record(DB_QUERY_TEXT, self.sql());
        self
    }
}

impl<'q, DB, T> ExecuteExt<'q, DB> for T
where
    T: sqlx::Execute<'q, DB>,
    DB: sqlx::Database,
{
}
