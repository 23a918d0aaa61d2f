//! Startup/shutdown coordination.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::stories::StoryChecker;

/// Coordinates graceful shutdown.
///
/// Ingestion loops watch [`Lifecycle::token`] and stop accepting updates once
/// it is cancelled; [`Lifecycle::finish`] then releases the story session.
pub struct Lifecycle {
    token: CancellationToken,
    stories: Arc<StoryChecker>,
    finished: AtomicBool,
}

impl Lifecycle {
    pub fn new(stories: Arc<StoryChecker>) -> Self {
        Self {
            token: CancellationToken::new(),
            stories,
            finished: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request shutdown. Safe to call repeatedly.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("Shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Release shared resources. Only the first call does anything.
    pub async fn finish(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.token.cancel();
        info!("Cleaning up resources...");
        self.stories.shutdown().await;
    }
}

/// Resolves when the process receives SIGINT or SIGTERM.
///
/// On non-Unix only Ctrl-C is available.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm => {}
    }
}
