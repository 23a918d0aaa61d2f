//! Webhook ingestion: an axum server that acknowledges Telegram pushes
//! immediately and hands them to a worker pool.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use teloxide::{
    prelude::*,
    types::{AllowedUpdate, Update},
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ssb_core::{commands::CommandRouter, config::Config, security::RateLimiter};

use crate::ingest::{route_update, BotIdentity};

#[derive(Clone)]
pub struct WebhookState {
    queue: mpsc::Sender<Update>,
    limiter: Arc<Mutex<RateLimiter<IpAddr>>>,
}

impl WebhookState {
    pub fn new(queue: mpsc::Sender<Update>, limiter: RateLimiter<IpAddr>) -> Self {
        Self {
            queue,
            limiter: Arc::new(Mutex::new(limiter)),
        }
    }
}

pub fn webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook))
        .route("/health", get(health))
        .route("/test", get(test_probe))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn test_probe() -> &'static str {
    "Bot is running!"
}

pub async fn handle_webhook(
    State(state): State<WebhookState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let (allowed, retry_after) = state.limiter.lock().await.check(&remote.ip());
    if !allowed {
        warn!(remote = %remote.ip(), retry_after = ?retry_after, "Webhook rate limit exceeded");
        return (StatusCode::TOO_MANY_REQUESTS, "rate limited");
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(e) => {
            error!(error = %e, "Error processing webhook update");
            return (StatusCode::INTERNAL_SERVER_ERROR, "error");
        }
    };

    // Acknowledge regardless of processing outcome.
    if let Err(e) = state.queue.try_send(update) {
        warn!(error = %e, "Update queue unavailable, dropping update");
    }
    (StatusCode::OK, "ok")
}

/// Start `count` workers draining `rx` into the router.
///
/// Workers exit once every sender is dropped and the queue is empty.
pub fn spawn_workers(
    count: usize,
    rx: mpsc::Receiver<Update>,
    router: Arc<CommandRouter>,
    me: BotIdentity,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..count.max(1))
        .map(|worker| {
            let rx = rx.clone();
            let router = router.clone();
            let me = me.clone();
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(update) = next else {
                        break;
                    };
                    route_update(&router, &me, &update).await;
                }
                debug!(worker, "Update worker stopped");
            })
        })
        .collect()
}

/// Register the webhook with Telegram and serve it until `cancel` fires.
pub async fn run_webhook(
    bot: Bot,
    me: BotIdentity,
    cfg: &Config,
    base_url: &str,
    router: Arc<CommandRouter>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let webhook_url = format!("{base_url}/webhook");
    let url = url::Url::parse(&webhook_url)
        .with_context(|| format!("invalid WEBHOOK_URL: {webhook_url}"))?;

    bot.set_webhook(url)
        .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
        .drop_pending_updates(true)
        .await
        .context("setWebhook failed")?;
    info!(url = %webhook_url, "Webhook set, starting the bot in webhook mode...");

    let (tx, rx) = mpsc::channel(cfg.webhook_queue_size);
    let workers = spawn_workers(cfg.update_workers, rx, router, me);

    let limiter = RateLimiter::new(true, cfg.webhook_rate_limit, cfg.webhook_rate_window);
    let state = WebhookState::new(tx, limiter);
    spawn_limiter_pruning(state.limiter.clone(), cancel.clone());
    let app = webhook_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "Webhook server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await
    .context("webhook server failed")?;

    // Server (and its queue sender) is gone: let workers drain what is queued.
    info!("Webhook server stopped, draining queued updates");
    await_workers(workers, cfg.shutdown_grace).await;
    Ok(())
}

fn spawn_limiter_pruning(limiter: Arc<Mutex<RateLimiter<IpAddr>>>, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => limiter.lock().await.prune(Instant::now()),
            }
        }
    });
}

/// Wait for workers, abandoning them after `grace`.
pub async fn await_workers(workers: Vec<JoinHandle<()>>, grace: Duration) {
    let aborts: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();
    let all = async {
        for w in workers {
            let _ = w.await;
        }
    };
    if tokio::time::timeout(grace, all).await.is_err() {
        warn!("In-flight updates did not finish in time, abandoning them");
        for a in aborts {
            a.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use ssb_core::{
        domain::{ChatId, MessageId, MessageRef},
        handle::Handle,
        messaging::port::MessagingPort,
        store::SubscriptionStore,
        stories::{Story, StoryChecker, StorySession, StorySource},
        Result,
    };

    use super::*;
    use crate::ingest::fixtures::message_update;

    struct NoStories;

    #[async_trait]
    impl StorySource for NoStories {
        async fn open(&self) -> Result<Arc<dyn StorySession>> {
            Ok(Arc::new(NoStories))
        }
    }

    #[async_trait]
    impl StorySession for NoStories {
        async fn active_stories(&self, _handle: &Handle) -> Result<Vec<Story>> {
            Ok(Vec::new())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Sink {
        sent: std::sync::Mutex<Vec<(ChatId, String)>>,
    }

    #[async_trait]
    impl MessagingPort for Sink {
        async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
            self.sent.lock().unwrap().push((chat_id, html.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }
    }

    fn remote() -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000)))
    }

    fn state(capacity: usize, per_sec: u32) -> (WebhookState, mpsc::Receiver<Update>) {
        let (tx, rx) = mpsc::channel(capacity);
        let limiter = RateLimiter::new(true, per_sec, Duration::from_secs(1));
        (WebhookState::new(tx, limiter), rx)
    }

    fn body(v: serde_json::Value) -> Bytes {
        Bytes::from(serde_json::to_vec(&v).unwrap())
    }

    #[tokio::test]
    async fn valid_update_is_queued_and_acked() {
        let (st, mut rx) = state(8, 10);
        let resp = handle_webhook(State(st), remote(), body(message_update(1, 42, "/list"))).await;
        assert_eq!(resp, (StatusCode::OK, "ok"));
        let queued = rx.try_recv().unwrap();
        assert_eq!(
            crate::ingest::command_from_update(&queued, &BotIdentity::default())
                .unwrap()
                .name,
            "list"
        );
    }

    #[tokio::test]
    async fn malformed_body_is_500() {
        let (st, mut rx) = state(8, 10);
        let resp = handle_webhook(State(st), remote(), Bytes::from_static(b"{oops")).await;
        assert_eq!(resp, (StatusCode::INTERNAL_SERVER_ERROR, "error"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_still_acks() {
        let (st, _rx) = state(1, 10);
        let first = handle_webhook(State(st.clone()), remote(), body(message_update(1, 1, "/a")));
        let first = first.await;
        let second = handle_webhook(State(st), remote(), body(message_update(2, 1, "/b"))).await;
        assert_eq!(first.0, StatusCode::OK);
        assert_eq!(second.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn rate_limit_rejects_bursts() {
        let (st, _rx) = state(16, 2);
        for i in 0..2 {
            let update = body(message_update(i, 1, "/x"));
            let resp = handle_webhook(State(st.clone()), remote(), update).await;
            assert_eq!(resp.0, StatusCode::OK);
        }
        let resp = handle_webhook(State(st), remote(), body(message_update(9, 1, "/x"))).await;
        assert_eq!(resp.0, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn probes_return_static_bodies() {
        assert_eq!(health().await, "ok");
        assert_eq!(test_probe().await, "Bot is running!");
    }

    #[tokio::test]
    async fn workers_route_queued_updates_then_exit() {
        let dir = tempfile::tempdir().unwrap();
        let users = dir.path().join("users.json");

        let store = Arc::new(SubscriptionStore::new(&users));
        let sink = Arc::new(Sink::default());
        let router = Arc::new(CommandRouter::new(
            store.clone(),
            Arc::new(StoryChecker::new(Arc::new(NoStories))),
            sink.clone(),
        ));

        let (tx, rx) = mpsc::channel(8);
        let workers = spawn_workers(2, rx, router, BotIdentity::new("StoryBot"));
        let updates = [
            message_update(1, 7, "/track Alpha"),
            message_update(2, 8, "/track beta"),
            message_update(3, 8, "just chatting"),
            message_update(4, 9, "/track@SomeOtherBot gamma"),
        ];
        for u in updates {
            tx.send(crate::ingest::fixtures::parse(u)).await.unwrap();
        }
        drop(tx);
        await_workers(workers, Duration::from_secs(5)).await;

        assert_eq!(store.tracked(ChatId(7)).await, vec!["alpha"]);
        assert_eq!(store.tracked(ChatId(8)).await, vec!["beta"]);
        assert!(store.tracked(ChatId(9)).await.is_empty());
        assert_eq!(sink.sent.lock().unwrap().len(), 2);
    }
}
