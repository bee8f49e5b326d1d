use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wright_core::messages::{Message, Role};

use crate::error::StoreError;
use crate::list::ListStore;
use crate::tokens::TokenCounter;

/// Tags marking content that can be regenerated on demand, so it is the
/// first thing evicted when memory grows too large.
pub const PRIMABLE_TAGS: &[&str] = &[
    "<project-info>",
    "<supabase-report>",
    "<supabase-general-instructions>",
    "<supabase-integration-instructions>",
    "<environment-details>",
];

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub compact_threshold_tokens: usize,
    pub compact_target_ratio: f64,
    pub compaction_lock_timeout: Duration,
    pub compaction_check_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compact_threshold_tokens: 30_000,
            compact_target_ratio: 0.3,
            compaction_lock_timeout: Duration::from_secs(1),
            compaction_check_interval: Duration::from_secs(1),
        }
    }
}

impl StoreConfig {
    /// Token count compaction aims for: threshold × ratio.
    pub fn target_tokens(&self) -> usize {
        (self.compact_threshold_tokens as f64 * self.compact_target_ratio).round() as usize
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionStats {
    pub original_tokens: usize,
    pub new_tokens: usize,
    pub removed_messages: usize,
}

impl CompactionStats {
    fn unchanged(tokens: usize) -> Self {
        Self {
            original_tokens: tokens,
            new_tokens: tokens,
            removed_messages: 0,
        }
    }
}

/// Wraps a list store and keeps each key under a token budget.
pub struct CompactingListStore {
    backend: Arc<dyn ListStore>,
    counter: Arc<dyn TokenCounter>,
    config: StoreConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
    last_check: DashMap<String, Instant>,
    token_counts: DashMap<String, usize>,
}

impl CompactingListStore {
    pub fn new(backend: Arc<dyn ListStore>, counter: Arc<dyn TokenCounter>, config: StoreConfig) -> Self {
        info!(
            threshold = config.compact_threshold_tokens,
            ratio = config.compact_target_ratio,
            "compacting list store initialized"
        );
        Self {
            backend,
            counter,
            config,
            locks: DashMap::new(),
            last_check: DashMap::new(),
            token_counts: DashMap::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current token count of the list at `key`.
    pub fn token_count(&self, key: &str) -> Result<usize, StoreError> {
        let count = self.counter.count(&self.backend.all(key)?);
        self.token_counts.insert(key.to_string(), count);
        Ok(count)
    }

    /// Token count recorded by the most recent check or compaction.
    pub fn last_token_count(&self, key: &str) -> Option<usize> {
        self.token_counts.get(key).map(|c| *c)
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_default().clone()
    }

    fn should_compact(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        if let Some(last) = self.last_check.get(key) {
            if now.duration_since(*last) < self.config.compaction_check_interval {
                return Ok(false);
            }
        }
        self.last_check.insert(key.to_string(), now);

        let messages = self.backend.all(key)?;
        if messages.is_empty() {
            return Ok(false);
        }
        let count = self.counter.count(&messages);
        self.token_counts.insert(key.to_string(), count);
        debug!(key, tokens = count, threshold = self.config.compact_threshold_tokens, "token check");
        Ok(count >= self.config.compact_threshold_tokens)
    }

    /// Compact `key` if it is over the threshold. Returns zeros when another
    /// compaction holds the key's lock past the configured timeout.
    pub fn perform_compaction(&self, key: &str) -> Result<CompactionStats, StoreError> {
        let lock = self.key_lock(key);
        let Some(_guard) = lock.try_lock_for(self.config.compaction_lock_timeout) else {
            warn!(key, "could not acquire compaction lock, skipping");
            return Ok(CompactionStats::default());
        };
        info!(key, "starting compaction");
        self.compact_locked(key)
    }

    fn compact_locked(&self, key: &str) -> Result<CompactionStats, StoreError> {
        let mut messages = self.backend.all(key)?;
        if messages.is_empty() {
            return Ok(CompactionStats::default());
        }

        let original = self.counter.count(&messages);
        if original < self.config.compact_threshold_tokens {
            debug!(key, tokens = original, "below threshold, skipping compaction");
            return Ok(CompactionStats::unchanged(original));
        }

        let before = messages.len();
        messages.retain(|m| !is_primable(m));
        let primable_removed = before - messages.len();
        if primable_removed > 0 {
            info!(key, removed = primable_removed, "removed primable messages");
        }

        let target = self.config.target_tokens();
        let mut tokens = self.counter.count(&messages);
        let mut removed = primable_removed;

        if tokens > target {
            let start = usize::from(messages.first().is_some_and(|m| m.role == Role::System));
            while start < messages.len() && tokens > target {
                let evicted = messages.remove(start);
                tokens = tokens.saturating_sub(self.counter.count_message(&evicted));
                removed += 1;
            }
        }

        // Replace only the prefix read above; pushes that landed meanwhile stay.
        self.backend.ltrim(key, before as i64, -1)?;
        if !messages.is_empty() {
            messages.reverse();
            self.backend.lpush(key, messages)?;
        }
        self.token_counts.insert(key.to_string(), tokens);
        info!(key, original, tokens, removed, "compaction completed");

        Ok(CompactionStats {
            original_tokens: original,
            new_tokens: tokens,
            removed_messages: removed,
        })
    }

    fn maybe_compact(&self, key: &str) {
        match self.should_compact(key) {
            Ok(true) => {
                info!(key, "compaction triggered by push");
                if let Err(e) = self.perform_compaction(key) {
                    warn!(key, error = %e, "compaction failed");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(key, error = %e, "token check failed"),
        }
    }
}

fn is_primable(message: &Message) -> bool {
    PRIMABLE_TAGS.iter().any(|tag| message.contains(tag))
}

impl ListStore for CompactingListStore {
    fn lpush(&self, key: &str, values: Vec<Message>) -> Result<usize, StoreError> {
        let len = self.backend.lpush(key, values)?;
        self.maybe_compact(key);
        Ok(len)
    }

    /// Never waits on a running compaction; the compaction lock is only
    /// taken by the compaction itself.
    fn rpush(&self, key: &str, values: Vec<Message>) -> Result<usize, StoreError> {
        let len = self.backend.rpush(key, values)?;
        self.maybe_compact(key);
        Ok(len)
    }

    fn lpop(&self, key: &str) -> Result<Option<Message>, StoreError> {
        self.backend.lpop(key)
    }

    fn rpop(&self, key: &str) -> Result<Option<Message>, StoreError> {
        self.backend.rpop(key)
    }

    fn lrange(&self, key: &str, start: i64, end: i64) -> Result<Vec<Message>, StoreError> {
        self.backend.lrange(key, start, end)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.backend.delete(key)
    }

    fn ltrim(&self, key: &str, start: i64, end: i64) -> Result<bool, StoreError> {
        self.backend.ltrim(key, start, end)
    }

    fn lrem(&self, key: &str, value: &Message, count: i64) -> Result<usize, StoreError> {
        self.backend.lrem(key, value, count)
    }

    fn lclear(&self, key: &str) -> Result<bool, StoreError> {
        self.backend.lclear(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryListStore;
    use crate::tokens::CharEstimator;

    fn store(threshold: usize, ratio: f64) -> (Arc<MemoryListStore>, CompactingListStore) {
        let backend = Arc::new(MemoryListStore::new());
        let compacting = CompactingListStore::new(
            backend.clone(),
            Arc::new(CharEstimator),
            StoreConfig {
                compact_threshold_tokens: threshold,
                compact_target_ratio: ratio,
                compaction_lock_timeout: Duration::from_millis(50),
                compaction_check_interval: Duration::ZERO,
            },
        );
        (backend, compacting)
    }

    /// A message of exactly `tokens` tokens under the char estimator.
    fn sized(role: Role, tokens: usize, tag: &str) -> Message {
        let body = format!("{tag}{}", "x".repeat(tokens * 4 - tag.len()));
        Message {
            role,
            content: wright_core::messages::MessageContent::Text(body),
        }
    }

    #[test]
    fn below_threshold_is_untouched() {
        let (backend, store) = store(100, 0.5);
        store.rpush("k", vec![sized(Role::User, 10, "")]).unwrap();
        let stats = store.perform_compaction("k").unwrap();
        assert_eq!(stats, CompactionStats::unchanged(10));
        assert_eq!(backend.all("k").unwrap().len(), 1);
    }

    #[test]
    fn primable_removed_first() {
        let (backend, store) = store(100, 0.5);
        backend
            .rpush(
                "k",
                vec![
                    sized(Role::User, 20, ""),
                    sized(Role::User, 70, "<environment-details>"),
                    sized(Role::Assistant, 20, ""),
                ],
            )
            .unwrap();

        let stats = store.perform_compaction("k").unwrap();
        assert_eq!(stats.original_tokens, 110);
        assert_eq!(stats.new_tokens, 40);
        assert_eq!(stats.removed_messages, 1);
        let left = backend.all("k").unwrap();
        assert_eq!(left.len(), 2);
        assert!(left.iter().all(|m| !m.contains("<environment-details>")));
    }

    #[test]
    fn evicts_oldest_but_keeps_system() {
        let (backend, store) = store(100, 0.3);
        backend
            .rpush(
                "k",
                vec![
                    sized(Role::System, 10, ""),
                    sized(Role::User, 30, "first"),
                    sized(Role::Assistant, 30, "second"),
                    sized(Role::User, 15, "third"),
                    sized(Role::Assistant, 15, "fourth"),
                ],
            )
            .unwrap();

        let stats = store.perform_compaction("k").unwrap();
        assert_eq!(stats.original_tokens, 100);
        assert!(stats.new_tokens <= 30);
        let left = backend.all("k").unwrap();
        assert_eq!(left[0].role, Role::System);
        assert!(left.iter().all(|m| !m.contains("first") && !m.contains("second")));
        assert!(left.last().unwrap().contains("fourth"));
        assert_eq!(stats.removed_messages, 5 - left.len());
    }

    #[test]
    fn push_triggers_compaction() {
        let (backend, store) = store(50, 0.4);
        store.rpush("k", vec![sized(Role::User, 30, "")]).unwrap();
        assert_eq!(backend.all("k").unwrap().len(), 1);
        store.rpush("k", vec![sized(Role::User, 30, "")]).unwrap();
        let left = backend.all("k").unwrap();
        assert_eq!(left.len(), 0);
        assert_eq!(store.last_token_count("k"), Some(0));
    }

    #[test]
    fn throttle_skips_rapid_checks() {
        let backend = Arc::new(MemoryListStore::new());
        let store = CompactingListStore::new(
            backend.clone(),
            Arc::new(CharEstimator),
            StoreConfig {
                compact_threshold_tokens: 10,
                compact_target_ratio: 0.5,
                compaction_lock_timeout: Duration::from_millis(50),
                compaction_check_interval: Duration::from_secs(3600),
            },
        );
        store.rpush("k", vec![sized(Role::User, 2, "")]).unwrap();
        // Over threshold now, but the check ran moments ago.
        store.rpush("k", vec![sized(Role::User, 20, "")]).unwrap();
        assert_eq!(backend.all("k").unwrap().len(), 2);
        assert_eq!(store.token_count("k").unwrap(), 22);
    }

    #[test]
    fn lock_timeout_reports_zeros() {
        let (backend, store) = store(10, 0.5);
        backend.rpush("k", vec![sized(Role::User, 20, "")]).unwrap();
        let lock = store.key_lock("k");
        let _held = lock.lock();
        let stats = store.perform_compaction("k").unwrap();
        assert_eq!(stats, CompactionStats::default());
        assert_eq!(backend.all("k").unwrap().len(), 1);
    }

    /// Counts like `CharEstimator` but takes `delay` per message.
    struct SlowCounter {
        delay: Duration,
    }

    impl TokenCounter for SlowCounter {
        fn count_message(&self, message: &Message) -> usize {
            std::thread::sleep(self.delay);
            CharEstimator.count_message(message)
        }
    }

    #[test]
    fn push_does_not_wait_for_running_compaction() {
        let backend = Arc::new(MemoryListStore::new());
        let store = Arc::new(CompactingListStore::new(
            backend.clone(),
            Arc::new(SlowCounter {
                delay: Duration::from_millis(100),
            }),
            StoreConfig {
                compact_threshold_tokens: 30,
                compact_target_ratio: 0.5,
                compaction_lock_timeout: Duration::from_millis(50),
                compaction_check_interval: Duration::from_secs(3600),
            },
        ));
        backend
            .rpush(
                "k",
                vec![
                    sized(Role::User, 20, "old"),
                    sized(Role::Assistant, 20, "older"),
                    sized(Role::User, 5, "recent"),
                ],
            )
            .unwrap();
        // Arm the throttle so the push below does not run its own check.
        store.last_check.insert("k".to_string(), Instant::now());

        let compactor = {
            let store = store.clone();
            std::thread::spawn(move || store.perform_compaction("k").unwrap())
        };
        std::thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        store.rpush("k", vec![sized(Role::User, 2, "appended")]).unwrap();
        let waited = started.elapsed();

        let stats = compactor.join().unwrap();
        assert!(waited < Duration::from_millis(50), "push waited {waited:?}");
        assert!(stats.removed_messages > 0);

        let left = backend.all("k").unwrap();
        assert!(left.last().unwrap().contains("appended"));
        assert!(left.iter().all(|m| !m.contains("older")));
        assert!(left.iter().any(|m| m.contains("recent")));
    }

    #[test]
    fn kept_messages_stay_in_order() {
        let (backend, store) = store(40, 0.5);
        backend
            .rpush(
                "k",
                vec![
                    sized(Role::System, 5, "sys"),
                    sized(Role::User, 30, "big"),
                    sized(Role::User, 5, "a"),
                    sized(Role::Assistant, 5, "b"),
                ],
            )
            .unwrap();
        store.perform_compaction("k").unwrap();
        let left: Vec<String> = backend.all("k").unwrap().iter().map(|m| m.text()[..3].to_string()).collect();
        assert_eq!(left, vec!["sys", "axx", "bxx"]);
    }

    #[test]
    fn target_is_threshold_times_ratio() {
        let config = StoreConfig::default();
        assert_eq!(config.target_tokens(), 9_000);
    }
}
