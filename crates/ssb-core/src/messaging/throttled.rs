use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::port::MessagingPort,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two sends (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40),
            per_chat_min_interval: Duration::from_millis(1050),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return how long to wait before using it.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = self.next.max(now);
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// How often idle per-chat slots are swept.
const PRUNE_EVERY: Duration = Duration::from_secs(60);

/// Next free send slot per chat.
///
/// A chat whose slot is already in the past behaves exactly like an unknown
/// chat, so such entries are dropped on the periodic sweep.
#[derive(Debug)]
struct ChatSlots {
    next: HashMap<ChatId, Instant>,
    last_prune: Instant,
}

impl ChatSlots {
    fn new() -> Self {
        Self {
            next: HashMap::new(),
            last_prune: Instant::now(),
        }
    }

    fn reserve(&mut self, chat_id: ChatId, interval: Duration) -> Duration {
        let now = Instant::now();
        if now.saturating_duration_since(self.last_prune) >= PRUNE_EVERY {
            self.next.retain(|_, next| *next > now);
            self.last_prune = now;
        }
        let start = self.next.get(&chat_id).map_or(now, |next| (*next).max(now));
        self.next.insert(chat_id, start + interval);
        start.saturating_duration_since(now)
    }
}

/// MessagingPort decorator that spaces out outbound sends.
///
/// Reduces Telegram 429s when several replies go to one chat in a burst
/// (e.g. the `/download` acknowledgement followed by its result).
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<ChatSlots>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(ChatSlots::new()),
        }
    }

    async fn wait_for_slot(&self, chat_id: ChatId) {
        let global_wait = self.global.lock().await.reserve();
        let chat_wait = self
            .per_chat
            .lock()
            .await
            .reserve(chat_id, self.cfg.per_chat_min_interval);

        let wait = global_wait.max(chat_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait]
impl MessagingPort for ThrottledMessenger {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.wait_for_slot(chat_id).await;
        self.inner.send_html(chat_id, html).await
    }
}
