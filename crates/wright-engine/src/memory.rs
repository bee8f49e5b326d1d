use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, info};
use wright_core::messages::{CacheControl, ContentPart, Message, MessageContent, Role};
use wright_store::{CompactingListStore, CompactionStats, ListStore, StoreError};

pub const MESSAGES_KEY: &str = "messages";

const ENVIRONMENT_DETAILS: &str = "<environment-details>";

/// Conversation memory of the agent, kept in a compacting list store.
pub struct MessageManager {
    store: Arc<CompactingListStore>,
    enable_prompt_cache: bool,
    max_checkpoints: usize,
    checkpoint_count: AtomicUsize,
}

impl MessageManager {
    pub fn new(store: Arc<CompactingListStore>, enable_prompt_cache: bool, max_checkpoints: usize) -> Self {
        Self {
            store,
            enable_prompt_cache,
            max_checkpoints,
            checkpoint_count: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &Arc<CompactingListStore> {
        &self.store
    }

    pub fn add_user_message(&self, text: impl Into<String>) -> Result<(), StoreError> {
        self.store.rpush(MESSAGES_KEY, vec![Message::user(text)])?;
        Ok(())
    }

    /// With prompt caching on, the first `max_checkpoints` assistant messages
    /// are stored as a single part marked as a cache checkpoint.
    pub fn add_assistant_message(&self, text: impl Into<String>) -> Result<(), StoreError> {
        let text = text.into();
        let checkpoint = self.enable_prompt_cache
            && self
                .checkpoint_count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < self.max_checkpoints).then_some(n + 1)
                })
                .is_ok();

        let message = if checkpoint {
            let mut part = ContentPart::text(text);
            part.set_cache_control(Some(CacheControl::ephemeral()));
            Message::with_parts(Role::Assistant, vec![part])
        } else {
            Message::assistant(text)
        };
        self.store.rpush(MESSAGES_KEY, vec![message])?;
        Ok(())
    }

    pub fn reset_checkpoints(&self) {
        self.checkpoint_count.store(0, Ordering::SeqCst);
        debug!("reset prompt cache checkpoints");
    }

    /// Store an item that is part of the model's context only.
    ///
    /// Without prompt caching, a user item carrying environment details
    /// replaces the ones already stored in multi-part messages.
    pub fn add_memory_item(&self, content: MessageContent, role: Role) -> Result<(), StoreError> {
        let message = Message { role, content };
        if !self.enable_prompt_cache && role == Role::User && message.contains(ENVIRONMENT_DETAILS) {
            self.strip_environment_details()?;
        }
        self.store.rpush(MESSAGES_KEY, vec![message])?;
        Ok(())
    }

    fn strip_environment_details(&self) -> Result<(), StoreError> {
        let messages = self.store.all(MESSAGES_KEY)?;
        let before = messages.len();
        let kept: Vec<Message> = messages
            .into_iter()
            .filter_map(|mut message| {
                if let MessageContent::Parts(parts) = &mut message.content {
                    parts.retain(|p| !p.as_text().contains(ENVIRONMENT_DETAILS));
                    if parts.is_empty() {
                        return None;
                    }
                }
                Some(message)
            })
            .collect();

        debug!(before, after = kept.len(), "stripped stale environment details");
        self.store.delete(MESSAGES_KEY)?;
        if !kept.is_empty() {
            self.store.rpush(MESSAGES_KEY, kept)?;
        }
        Ok(())
    }

    pub fn messages(&self) -> Result<Vec<Message>, StoreError> {
        self.store.all(MESSAGES_KEY)
    }

    pub fn compact_memory(&self) -> Result<CompactionStats, StoreError> {
        let stats = self.store.perform_compaction(MESSAGES_KEY)?;
        if stats.removed_messages > 0 {
            info!(
                original_tokens = stats.original_tokens,
                new_tokens = stats.new_tokens,
                removed = stats.removed_messages,
                "memory compacted"
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wright_store::{CharEstimator, MemoryListStore, StoreConfig};

    fn manager(enable_prompt_cache: bool, max_checkpoints: usize) -> MessageManager {
        let store = CompactingListStore::new(
            Arc::new(MemoryListStore::new()),
            Arc::new(CharEstimator),
            StoreConfig::default(),
        );
        MessageManager::new(Arc::new(store), enable_prompt_cache, max_checkpoints)
    }

    fn env_parts(body: &str) -> MessageContent {
        MessageContent::Parts(vec![
            ContentPart::text(body),
            ContentPart::text(format!("{ENVIRONMENT_DETAILS}\ncwd: /tmp\n</environment-details>")),
        ])
    }

    #[test]
    fn checkpoints_limited_to_max() {
        let memory = manager(true, 2);
        for i in 0..3 {
            memory.add_assistant_message(format!("reply {i}")).unwrap();
        }
        let cached: Vec<bool> = memory
            .messages()
            .unwrap()
            .iter()
            .map(|m| matches!(&m.content, MessageContent::Parts(p) if p[0].has_cache_control()))
            .collect();
        assert_eq!(cached, vec![true, true, false]);

        memory.reset_checkpoints();
        memory.add_assistant_message("after reset").unwrap();
        let last = memory.messages().unwrap().pop().unwrap();
        assert!(matches!(last.content, MessageContent::Parts(_)));
    }

    #[test]
    fn no_checkpoints_when_cache_disabled() {
        let memory = manager(false, 4);
        memory.add_assistant_message("plain").unwrap();
        assert_eq!(memory.messages().unwrap(), vec![Message::assistant("plain")]);
    }

    #[test]
    fn new_environment_details_replace_old_ones() {
        let memory = manager(false, 4);
        memory.add_memory_item(env_parts("first task"), Role::User).unwrap();
        memory.add_assistant_message("ok").unwrap();
        memory
            .add_memory_item(
                MessageContent::Parts(vec![ContentPart::text(format!("{ENVIRONMENT_DETAILS}only</environment-details>"))]),
                Role::User,
            )
            .unwrap();
        memory.add_memory_item(env_parts("second"), Role::User).unwrap();

        let messages = memory.messages().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].text(), "first task");
        assert_eq!(messages[1], Message::assistant("ok"));
        assert!(messages[2].contains(ENVIRONMENT_DETAILS));
    }

    #[test]
    fn environment_details_kept_with_prompt_cache() {
        let memory = manager(true, 4);
        memory.add_memory_item(env_parts("a"), Role::User).unwrap();
        memory.add_memory_item(env_parts("b"), Role::User).unwrap();
        let messages = memory.messages().unwrap();
        assert!(messages.iter().all(|m| m.contains(ENVIRONMENT_DETAILS)));
    }

    #[test]
    fn compact_below_threshold_removes_nothing() {
        let memory = manager(false, 4);
        memory.add_user_message("hello").unwrap();
        let stats = memory.compact_memory().unwrap();
        assert_eq!(stats.removed_messages, 0);
        assert_eq!(memory.messages().unwrap().len(), 1);
    }
}
