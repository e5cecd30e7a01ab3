use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

type DedupKey = [u8; 32];

/// Suppresses repeated assistant messages for the same task.
///
/// Upstream CLIs re-emit the same assistant text several times while a turn
/// streams; only the first copy inside the suppression window is forwarded.
pub struct DedupCache {
    window: Duration,
    retention: Duration,
    entries: Mutex<HashMap<DedupKey, Instant>>,
}

impl DedupCache {
    /// Create a new cache.
    /// - `window`: an identical message seen this recently is suppressed
    /// - `retention`: entries older than this are evicted on insert
    pub fn new(window: Duration, retention: Duration) -> Self {
        Self {
            window,
            retention,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if the caller should drop this message.
    pub async fn should_suppress(&self, task_id: &str, content: &str) -> bool {
        self.should_suppress_at(task_id, content, Instant::now()).await
    }

    /// [`should_suppress`](Self::should_suppress) with an explicit clock.
    pub async fn should_suppress_at(&self, task_id: &str, content: &str, now: Instant) -> bool {
        let key = Self::key(task_id, content);
        let mut entries = self.entries.lock().await;

        if let Some(seen) = entries.get(&key) {
            if now.saturating_duration_since(*seen) < self.window {
                return true;
            }
        }

        entries.insert(key, now);
        let retention = self.retention;
        entries.retain(|_, seen| now.saturating_duration_since(*seen) <= retention);
        false
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    fn key(task_id: &str, content: &str) -> DedupKey {
        let mut hasher = Sha256::new();
        hasher.update(task_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(content.as_bytes());
        hasher.finalize().into()
    }
}

/// Extract the assistant text of a `worker:message` payload.
///
/// Only assistant messages carrying text are subject to deduplication; any
/// other payload yields `None` and bypasses the cache. Accepts both
/// `{"message": {"type": "assistant", "content": ...}}` and the nested
/// stream-json form `{"message": {"type": "assistant", "message": {"content": [...]}}}`.
pub fn assistant_text(payload: &serde_json::Value) -> Option<String> {
    let message = payload.get("message")?;
    if message.get("type").and_then(serde_json::Value::as_str) != Some("assistant") {
        return None;
    }
    let content = message
        .get("content")
        .or_else(|| message.get("message").and_then(|m| m.get("content")))?;

    let text = match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(serde_json::Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(serde_json::Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
