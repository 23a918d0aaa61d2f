//! Durable per-chat subscription store (`users.json`).
//!
//! Every mutation is a read-modify-write of the whole file. There is no
//! in-memory cache, so edits made by other processes are picked up on the
//! next command.

use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{domain::ChatId, errors::Error, handle::Handle, Result};

/// Chat id (string form) -> tracked handles in insertion order.
///
/// Invariant: a chat is present only while its list is non-empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subscriptions(BTreeMap<String, Vec<String>>);

impl Subscriptions {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn chat_count(&self) -> usize {
        self.0.len()
    }

    pub fn has_chat(&self, chat_id: ChatId) -> bool {
        self.0.contains_key(&chat_id.store_key())
    }

    pub fn handles(&self, chat_id: ChatId) -> &[String] {
        self.0
            .get(&chat_id.store_key())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Append `handle` for `chat_id`. Returns false if it was already tracked.
    pub fn insert(&mut self, chat_id: ChatId, handle: &Handle) -> bool {
        let list = self.0.entry(chat_id.store_key()).or_default();
        if list.iter().any(|h| h == handle.as_str()) {
            return false;
        }
        list.push(handle.as_str().to_string());
        true
    }

    /// Remove `handle` for `chat_id`, dropping the chat when its list empties.
    pub fn remove(&mut self, chat_id: ChatId, handle: &Handle) -> bool {
        let key = chat_id.store_key();
        let Some(list) = self.0.get_mut(&key) else {
            return false;
        };
        let Some(idx) = list.iter().position(|h| h == handle.as_str()) else {
            return false;
        };
        list.remove(idx);
        if list.is_empty() {
            self.0.remove(&key);
        }
        true
    }

    /// Drop entries that break the store invariants (hand-edited files).
    fn sanitized(self) -> Self {
        let mut out = BTreeMap::new();
        for (chat, handles) in self.0 {
            let mut kept: Vec<String> = Vec::with_capacity(handles.len());
            for raw in handles {
                match Handle::parse(&raw) {
                    Ok(h) if h.as_str() == raw => {
                        if !kept.contains(&raw) {
                            kept.push(raw);
                        }
                    }
                    _ => warn!(chat = %chat, handle = %raw, "Dropping invalid stored handle"),
                }
            }
            if !kept.is_empty() {
                out.insert(chat, kept);
            }
        }
        Self(out)
    }
}

/// JSON-file backed subscription store.
pub struct SubscriptionStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl SubscriptionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current state. Never fails: a missing, empty, unreadable or
    /// corrupt file is treated as "no subscriptions yet".
    pub async fn load(&self) -> Subscriptions {
        let txt = match tokio::fs::read_to_string(&self.path).await {
            Ok(txt) => txt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No subscription file yet");
                return Subscriptions::default();
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Error loading users");
                return Subscriptions::default();
            }
        };
        if txt.trim().is_empty() {
            return Subscriptions::default();
        }
        match serde_json::from_str::<Subscriptions>(&txt) {
            Ok(subs) => {
                let subs = subs.sanitized();
                debug!(path = %self.path.display(), chats = subs.chat_count(), "Loaded users");
                subs
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Error loading users");
                Subscriptions::default()
            }
        }
    }

    /// Persist `subs`. Failures are logged and swallowed.
    pub async fn save(&self, subs: &Subscriptions) {
        if let Err(e) = self.write_atomic(subs).await {
            error!(path = %self.path.display(), error = %e, "Error saving users");
        }
    }

    async fn write_atomic(&self, subs: &Subscriptions) -> Result<()> {
        let txt = serde_json::to_vec(subs)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || persist_atomically(&path, &txt))
            .await
            .map_err(|e| Error::External(format!("store writer panicked: {e}")))?
    }

    /// Start tracking `raw` for `chat_id`. Returns false if the handle is
    /// invalid or already tracked (no write in either case).
    pub async fn add(&self, chat_id: ChatId, raw: &str) -> bool {
        let Ok(handle) = Handle::parse(raw) else {
            return false;
        };

        let _guard = self.write_lock.lock().await;
        let mut subs = self.load().await;
        if !subs.insert(chat_id, &handle) {
            return false;
        }
        self.save(&subs).await;
        info!(chat_id = %chat_id, handle = %handle, "Tracking started");
        true
    }

    /// Stop tracking `raw` for `chat_id`. Returns false if the handle is
    /// invalid or was not tracked (no write in either case).
    pub async fn remove(&self, chat_id: ChatId, raw: &str) -> bool {
        let Ok(handle) = Handle::parse(raw) else {
            return false;
        };

        let _guard = self.write_lock.lock().await;
        let mut subs = self.load().await;
        if !subs.remove(chat_id, &handle) {
            return false;
        }
        self.save(&subs).await;
        info!(chat_id = %chat_id, handle = %handle, "Tracking stopped");
        true
    }

    /// Handles tracked by `chat_id`, in insertion order.
    pub async fn tracked(&self, chat_id: ChatId) -> Vec<String> {
        self.load().await.handles(chat_id).to_vec()
    }
}

/// Write into a uniquely named temp file next to `path`, then rename it
/// over `path`. The temp file is removed if anything fails.
fn persist_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn tmp_store() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.json");
        (dir, path)
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let (_dir, path) = tmp_store();
        let store = SubscriptionStore::new(&path);
        assert!(store.load().await.is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn corrupt_file_loads_empty() {
        let (_dir, path) = tmp_store();
        std::fs::write(&path, "{not json").unwrap();
        let store = SubscriptionStore::new(&path);
        assert!(store.load().await.is_empty());

        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn add_lowercases_and_persists() {
        let (_dir, path) = tmp_store();
        let store = SubscriptionStore::new(&path);

        assert!(store.add(ChatId(42), "Instagram").await);
        assert_eq!(store.tracked(ChatId(42)).await, vec!["instagram"]);

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, serde_json::json!({ "42": ["instagram"] }));
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let (_dir, path) = tmp_store();
        let store = SubscriptionStore::new(&path);

        assert!(store.add(ChatId(7), "natgeo").await);
        let before = store.load().await;
        assert!(!store.add(ChatId(7), "NatGeo").await);
        assert_eq!(store.load().await, before);
        assert_eq!(store.tracked(ChatId(7)).await, vec!["natgeo"]);
    }

    #[tokio::test]
    async fn insertion_order_is_preserved() {
        let (_dir, path) = tmp_store();
        let store = SubscriptionStore::new(&path);
        for h in ["zeta", "alpha", "mid"] {
            assert!(store.add(ChatId(1), h).await);
        }
        assert_eq!(store.tracked(ChatId(1)).await, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn removing_last_handle_drops_chat() {
        let (_dir, path) = tmp_store();
        let store = SubscriptionStore::new(&path);

        assert!(store.add(ChatId(42), "instagram").await);
        assert!(store.add(ChatId(43), "other").await);
        assert!(store.remove(ChatId(42), "instagram").await);

        let subs = store.load().await;
        assert!(!subs.has_chat(ChatId(42)));
        assert!(subs.has_chat(ChatId(43)));
        assert_eq!(subs.chat_count(), 1);
    }

    #[tokio::test]
    async fn remove_untracked_leaves_file_untouched() {
        let (_dir, path) = tmp_store();
        let store = SubscriptionStore::new(&path);
        assert!(store.add(ChatId(1), "a.b").await);
        let before = std::fs::read(&path).unwrap();

        assert!(!store.remove(ChatId(1), "nobody").await);
        assert!(!store.remove(ChatId(2), "a.b").await);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn invalid_handles_are_rejected_without_writing() {
        let (_dir, path) = tmp_store();
        let store = SubscriptionStore::new(&path);
        assert!(!store.add(ChatId(42), "bad handle!").await);
        assert!(!store.remove(ChatId(42), "").await);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn load_drops_entries_breaking_invariants() {
        let (_dir, path) = tmp_store();
        std::fs::write(
            &path,
            r#"{"1": [], "2": ["ok", "Upper", "bad one", "ok"], "3": ["fine"]}"#,
        )
        .unwrap();
        let store = SubscriptionStore::new(&path);
        let subs = store.load().await;
        assert!(!subs.has_chat(ChatId(1)));
        assert_eq!(subs.handles(ChatId(2)), ["ok".to_string()]);
        assert_eq!(subs.handles(ChatId(3)), ["fine".to_string()]);
    }

    #[tokio::test]
    async fn unwritable_target_is_swallowed() {
        let (_dir, path) = tmp_store();
        // A directory where the file should be makes the rename fail.
        std::fs::create_dir_all(&path).unwrap();
        let store = SubscriptionStore::new(&path);
        // Mutation is still reported; persistence failure only logs.
        assert!(store.add(ChatId(9), "someone").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_saves_all_land_without_leftovers() {
        let (dir, path) = tmp_store();
        let store = Arc::new(SubscriptionStore::new(&path));

        let mut tasks = Vec::new();
        for chat in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut subs = Subscriptions::default();
                subs.insert(ChatId(chat), &Handle::parse("someone").unwrap());
                store.save(&subs).await;
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }

        // The last writer wins and no temp files are left behind.
        assert_eq!(store.load().await.chat_count(), 1);
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("users.json")]);
    }

    #[tokio::test]
    async fn failed_save_removes_temp_file() {
        let (dir, path) = tmp_store();
        std::fs::create_dir_all(&path).unwrap();
        let store = SubscriptionStore::new(&path);
        store.save(&Subscriptions::default()).await;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
