// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Database client metrics

use std::sync::LazyLock;

use opentelemetry::{
    InstrumentationScope, KeyValue,
    metrics::{Counter, Histogram, Meter},
};
use opentelemetry_semantic_conventions as semcov;

static METER: LazyLock<Meter> = LazyLock::new(|| {
    let scope = InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semcov::SCHEMA_URL)
        .build();
    opentelemetry::global::meter_with_scope(scope)
});

/// Milliseconds spent acquiring a connection and opening a transaction
pub(crate) static DB_CLIENT_CONNECTIONS_CREATE_TIME_HISTOGRAM: LazyLock<Histogram<u64>> =
    LazyLock::new(|| {
        METER
            .u64_histogram("db.client.connections.create_time")
            .with_description("Time taken to open a transaction on the pool")
            .with_unit("ms")
            .build()
    });

static TRANSACTIONS: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("db.client.transactions")
        .with_description("Closed transactions, by outcome")
        .with_unit("{transaction}")
        .build()
});

/// Count a transaction which was committed or rolled back
pub(crate) fn record_transaction(outcome: &'static str) {
    TRANSACTIONS.add(1, &[KeyValue::new("outcome", outcome)]);
}
