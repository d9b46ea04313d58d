// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use tokio::signal::unix::{Signal, SignalKind};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// How long the tracked tasks have to finish after the first signal
const GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Coordinates the shutdown of the worker.
///
/// The first SIGTERM or SIGINT cancels the shutdown token: the scanner
/// finishes the account it is working on and stops. A second signal, or the
/// grace period running out, makes [`ShutdownManager::run`] return without
/// waiting any longer, and the remaining tasks are dropped with the runtime.
///
/// Long-running tasks should be spawned on the [`TaskTracker`], so that the
/// manager knows when they are all done.
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownManager {
    /// Create a new shutdown manager, installing the signal handlers
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handler could not be installed
    pub fn new() -> Result<Self, std::io::Error> {
        Ok(Self {
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
            sigterm: tokio::signal::unix::signal(SignalKind::terminate())?,
            sigint: tokio::signal::unix::signal(SignalKind::interrupt())?,
        })
    }

    #[must_use]
    pub fn task_tracker(&self) -> &TaskTracker {
        &self.task_tracker
    }

    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    async fn next_signal(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }

    /// Run until every tracked task is done, or until the shutdown is forced
    pub async fn run(mut self) {
        let signal = self.next_signal().await;
        tracing::info!(signal, "Shutdown signal received, shutting down");

        self.shutdown_token.cancel();
        self.task_tracker.close();

        let tracker = self.task_tracker.clone();
        tokio::select! {
            signal = self.next_signal() => {
                tracing::warn!(signal, "Second shutdown signal received, abort");
            },
            () = tokio::time::sleep(GRACE_PERIOD) => {
                tracing::warn!("Shutdown timeout reached, abort");
            },
            () = tracker.wait() => {
                tracing::info!("All tasks are done, exiting");
            },
        }
    }
}
