//! Story-check orchestration over a single shared collaborator session.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::{handle::Handle, Result};

/// A story item as reported by the story-checking service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub media_type: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub taken_at: Option<i64>,
}

/// Outcome of one check. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoryResult {
    pub handle: Handle,
    pub stories: Vec<Story>,
}

impl StoryResult {
    pub fn active_count(&self) -> usize {
        self.stories.len()
    }
}

/// Factory for the expensive, authenticated session (login/handshake).
#[async_trait]
pub trait StorySource: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn StorySession>>;
}

/// An open session with the story-checking service.
#[async_trait]
pub trait StorySession: Send + Sync {
    /// Currently active stories for `handle`; errors on network/auth failure.
    async fn active_stories(&self, handle: &Handle) -> Result<Vec<Story>>;

    /// Release the session. Called at most once by the orchestrator.
    async fn close(&self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckerState {
    Uninitialized,
    Ready,
}

/// Owns the zero-or-one process-wide story session.
///
/// The session is opened lazily by the first check and reused by every
/// later check until [`StoryChecker::shutdown`].
pub struct StoryChecker {
    source: Arc<dyn StorySource>,
    session: Mutex<Option<Arc<dyn StorySession>>>,
}

impl StoryChecker {
    pub fn new(source: Arc<dyn StorySource>) -> Self {
        Self {
            source,
            session: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> CheckerState {
        if self.session.lock().await.is_some() {
            CheckerState::Ready
        } else {
            CheckerState::Uninitialized
        }
    }

    async fn ready_session(&self) -> Result<Arc<dyn StorySession>> {
        // Lock held across `open` so concurrent first checks share one session.
        let mut slot = self.session.lock().await;
        if let Some(s) = slot.as_ref() {
            return Ok(s.clone());
        }
        info!("Opening story session");
        let s = self.source.open().await?;
        *slot = Some(s.clone());
        Ok(s)
    }

    /// Check `handle` for active stories, opening the shared session first
    /// if needed. Errors propagate to the caller.
    pub async fn check_stories(&self, handle: &Handle) -> Result<StoryResult> {
        let session = self.ready_session().await?;
        let stories = session.active_stories(handle).await?;
        Ok(StoryResult {
            handle: handle.clone(),
            stories,
        })
    }

    /// Close and forget the session. No-op when none is open.
    pub async fn shutdown(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        info!("Closing story session");
        match session.close().await {
            Ok(()) => info!("Story session closed"),
            Err(e) => error!(error = %e, "Error during story session cleanup"),
        }
    }
}
