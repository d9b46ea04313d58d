// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Background work around account validity: finding the accounts which are
//! about to expire, sending them a renewal email, and redeeming the renewal
//! tokens sent in those emails.

use std::sync::{Arc, LazyLock};

use avs_data_model::AccountValidityPolicy;
use avs_email::Mailer;
use avs_router::UrlBuilder;
use avs_storage::{BoxRepository, BoxRepositoryFactory, Clock, RepositoryError, RepositoryFactory};
use opentelemetry::metrics::Meter;
use rand::SeedableRng;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

mod email;
mod renewal;
mod scanner;
mod token;

pub use self::{
    email::{DispatchError, DispatchOutcome, dispatch_renewal_email},
    renewal::{RenewalError, renew_account},
    scanner::{ExpiryScanner, ScanReport},
    token::{MAX_TOKEN_GENERATION_ATTEMPTS, TokenIssuerError, issue_renewal_token},
};

static METER: LazyLock<Meter> = LazyLock::new(|| {
    let scope = opentelemetry::InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(opentelemetry_semantic_conventions::SCHEMA_URL)
        .build();

    opentelemetry::global::meter_with_scope(scope)
});

#[derive(Clone)]
struct State {
    repository_factory: Arc<dyn RepositoryFactory + Send + Sync>,
    mailer: Mailer,
    clock: Arc<dyn Clock + Send>,
    url_builder: UrlBuilder,
    policy: AccountValidityPolicy,
}

impl State {
    pub fn new(
        repository_factory: BoxRepositoryFactory,
        clock: impl Clock + Send + 'static,
        mailer: Mailer,
        url_builder: UrlBuilder,
        policy: AccountValidityPolicy,
    ) -> Self {
        Self {
            repository_factory: Arc::from(repository_factory),
            mailer,
            clock: Arc::new(clock),
            url_builder,
            policy,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        &self.clock
    }

    pub fn mailer(&self) -> &Mailer {
        &self.mailer
    }

    // This is fine for now, we may move that to a trait at some point.
    #[allow(clippy::unused_self)]
    pub fn rng(&self) -> rand_chacha::ChaChaRng {
        rand_chacha::ChaChaRng::from_entropy()
    }

    pub async fn repository(&self) -> Result<BoxRepository, RepositoryError> {
        self.repository_factory.create().await
    }

    pub fn url_builder(&self) -> &UrlBuilder {
        &self.url_builder
    }

    pub fn policy(&self) -> &AccountValidityPolicy {
        &self.policy
    }
}

/// Initialise the expiry scanner, without running it.
///
/// This is mostly useful for tests, and to run a single scan with
/// [`ExpiryScanner::run_once`].
#[must_use]
pub fn init(
    repository_factory: BoxRepositoryFactory,
    clock: impl Clock + Send + 'static,
    mailer: &Mailer,
    url_builder: UrlBuilder,
    policy: &AccountValidityPolicy,
    cancellation_token: CancellationToken,
) -> ExpiryScanner {
    let state = State::new(
        repository_factory,
        clock,
        mailer.clone(),
        url_builder,
        policy.clone(),
    );

    ExpiryScanner::new(state, cancellation_token)
}

/// Initialise the expiry scanner and run it in the background, until the
/// cancellation token is cancelled.
pub fn init_and_run(
    repository_factory: BoxRepositoryFactory,
    clock: impl Clock + Send + 'static,
    mailer: &Mailer,
    url_builder: UrlBuilder,
    policy: &AccountValidityPolicy,
    cancellation_token: CancellationToken,
    task_tracker: &TaskTracker,
) {
    let scanner = init(
        repository_factory,
        clock,
        mailer,
        url_builder,
        policy,
        cancellation_token,
    );

    task_tracker.spawn(scanner.run());
}
