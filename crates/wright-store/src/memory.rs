use parking_lot::Mutex;
use wright_core::messages::Message;

use crate::error::StoreError;
use crate::list::{ListData, ListStore};

/// In-process list store. Lost when the process exits.
#[derive(Default)]
pub struct MemoryListStore {
    data: Mutex<ListData>,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ListStore for MemoryListStore {
    fn lpush(&self, key: &str, values: Vec<Message>) -> Result<usize, StoreError> {
        Ok(self.data.lock().lpush(key, values))
    }

    fn rpush(&self, key: &str, values: Vec<Message>) -> Result<usize, StoreError> {
        Ok(self.data.lock().rpush(key, values))
    }

    fn lpop(&self, key: &str) -> Result<Option<Message>, StoreError> {
        Ok(self.data.lock().lpop(key))
    }

    fn rpop(&self, key: &str) -> Result<Option<Message>, StoreError> {
        Ok(self.data.lock().rpop(key))
    }

    fn lrange(&self, key: &str, start: i64, end: i64) -> Result<Vec<Message>, StoreError> {
        Ok(self.data.lock().lrange(key, start, end))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.data.lock().delete(key))
    }

    fn ltrim(&self, key: &str, start: i64, end: i64) -> Result<bool, StoreError> {
        Ok(self.data.lock().ltrim(key, start, end))
    }

    fn lrem(&self, key: &str, value: &Message, count: i64) -> Result<usize, StoreError> {
        Ok(self.data.lock().lrem(key, value, count))
    }

    fn lclear(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.data.lock().lclear(key))
    }
}
