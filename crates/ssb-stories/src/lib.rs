//! HTTP adapter for the story-checking service.
//!
//! Implements the `ssb-core` story ports against a small REST surface:
//! `GET /session` (handshake), `GET /stories/{handle}`, `DELETE /session`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use ssb_core::{
    errors::Error,
    handle::Handle,
    stories::{Story, StorySession, StorySource},
    Result,
};

/// Opens authenticated sessions against `base_url`.
#[derive(Clone, Debug)]
pub struct HttpStorySource {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpStorySource {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl StorySource for HttpStorySource {
    async fn open(&self) -> Result<Arc<dyn StorySession>> {
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Story(format!("http client error: {e}")))?;

        let session = HttpStorySession {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            http,
        };
        if session.api_key.is_some() {
            session.handshake().await?;
        }
        info!(base_url = %self.base_url, "Story service session ready");
        Ok(Arc::new(session))
    }
}

pub struct HttpStorySession {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
struct StoriesResponse {
    #[serde(default)]
    stories: Option<Vec<Story>>,
}

impl HttpStorySession {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .http
            .request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn handshake(&self) -> Result<()> {
        let resp = self
            .request(reqwest::Method::GET, "/session")
            .send()
            .await
            .map_err(|e| Error::Story(format!("session request error: {e}")))?;
        ensure_success(resp, "session handshake").await?;
        Ok(())
    }
}

#[async_trait]
impl StorySession for HttpStorySession {
    async fn active_stories(&self, handle: &Handle) -> Result<Vec<Story>> {
        debug!(handle = %handle, "Checking stories");
        // Handles are restricted to [a-z0-9._], safe as a path segment.
        let resp = self
            .request(reqwest::Method::GET, &stories_path(handle))
            .send()
            .await
            .map_err(|e| Error::Story(format!("stories request error: {e}")))?;
        let resp = ensure_success(resp, "stories lookup").await?;

        let body = resp
            .text()
            .await
            .map_err(|e| Error::Story(format!("stories body error: {e}")))?;
        parse_stories(&body)
    }

    async fn close(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Ok(());
        }
        let resp = self
            .request(reqwest::Method::DELETE, "/session")
            .send()
            .await
            .map_err(|e| Error::Story(format!("session close error: {e}")))?;
        ensure_success(resp, "session close").await?;
        Ok(())
    }
}

/// Used when no story service is configured; every check fails cleanly.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnconfiguredStorySource;

#[async_trait]
impl StorySource for UnconfiguredStorySource {
    async fn open(&self) -> Result<Arc<dyn StorySession>> {
        Err(Error::Story(
            "story service is not configured (set STORY_API_URL)".to_string(),
        ))
    }
}

fn stories_path(handle: &Handle) -> String {
    format!("/stories/{}", handle.as_str())
}

fn parse_stories(body: &str) -> Result<Vec<Story>> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parsed: StoriesResponse = serde_json::from_str(body)
        .map_err(|e| Error::Story(format!("stories json error: {e}")))?;
    Ok(parsed.stories.unwrap_or_default())
}

async fn ensure_success(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Story(format!(
        "{what} failed: {status} {}",
        body.chars().take(200).collect::<String>()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stories_payload_shapes() {
        let stories = parse_stories(
            r#"{"stories":[{"id":"1","media_type":"image","taken_at":1700000000},{"id":"2"}]}"#,
        )
        .unwrap();
        assert_eq!(stories.len(), 2);
        assert_eq!(stories[0].media_type.as_deref(), Some("image"));
        assert_eq!(stories[1].taken_at, None);

        assert!(parse_stories(r#"{"stories":[]}"#).unwrap().is_empty());
        assert!(parse_stories(r#"{"stories":null}"#).unwrap().is_empty());
        assert!(parse_stories(r#"{}"#).unwrap().is_empty());
        assert!(parse_stories("").unwrap().is_empty());
    }

    #[test]
    fn malformed_payload_is_story_error() {
        let err = parse_stories("<html>").unwrap_err();
        assert!(matches!(err, Error::Story(_)));
    }

    #[test]
    fn path_uses_canonical_handle() {
        let h = Handle::parse("Kim.K_").unwrap();
        assert_eq!(stories_path(&h), "/stories/kim.k_");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let s = HttpStorySource::new("https://stories.local/", None, Duration::from_secs(1));
        assert_eq!(s.base_url, "https://stories.local");
    }

    #[tokio::test]
    async fn unconfigured_source_fails_open() {
        let err = UnconfiguredStorySource.open().await.err().unwrap();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn unreachable_service_surfaces_story_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let source = HttpStorySource::new(
            "http://127.0.0.1:9",
            Some("key".to_string()),
            Duration::from_millis(500),
        );
        let err = source.open().await.err().unwrap();
        assert!(matches!(err, Error::Story(_)));
    }
}
