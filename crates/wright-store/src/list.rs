use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use wright_core::messages::Message;

use crate::error::StoreError;

/// Redis-style per-key lists of conversation messages.
///
/// Indices follow Redis conventions: `end` is inclusive and negative values
/// count from the tail (`-1` is the last element).
pub trait ListStore: Send + Sync {
    /// Prepend `values`; the last value ends up at the head. Returns the new length.
    fn lpush(&self, key: &str, values: Vec<Message>) -> Result<usize, StoreError>;
    /// Append `values`. Returns the new length.
    fn rpush(&self, key: &str, values: Vec<Message>) -> Result<usize, StoreError>;
    fn lpop(&self, key: &str) -> Result<Option<Message>, StoreError>;
    fn rpop(&self, key: &str) -> Result<Option<Message>, StoreError>;
    fn lrange(&self, key: &str, start: i64, end: i64) -> Result<Vec<Message>, StoreError>;
    /// Remove the key entirely. False if it did not exist.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;
    /// Keep only the inclusive range. False if the key did not exist.
    fn ltrim(&self, key: &str, start: i64, end: i64) -> Result<bool, StoreError>;
    /// Remove elements equal to `value`: `count > 0` from the head, `count < 0`
    /// from the tail, `0` for all. Returns the number removed.
    fn lrem(&self, key: &str, value: &Message, count: i64) -> Result<usize, StoreError>;
    /// Empty the list but keep the key. False if it did not exist.
    fn lclear(&self, key: &str) -> Result<bool, StoreError>;

    fn all(&self, key: &str) -> Result<Vec<Message>, StoreError> {
        self.lrange(key, 0, -1)
    }
}

/// Resolve Redis-style inclusive bounds against a list of `len` items into a
/// half-open slice range. Out-of-range bounds clamp; an empty range is `None`.
pub(crate) fn resolve_range(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    let len_i = len as i64;
    let start = if start < 0 { (len_i + start).max(0) } else { start };
    let end = if end < 0 { len_i + end + 1 } else { end + 1 };
    let start = start.min(len_i);
    let end = end.clamp(0, len_i);
    (start < end).then_some((start as usize, end as usize))
}

/// Shared list state behind both the in-memory and the file-backed stores.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ListData {
    pub lists: HashMap<String, Vec<Message>>,
}

impl ListData {
    pub fn lpush(&mut self, key: &str, values: Vec<Message>) -> usize {
        let list = self.lists.entry(key.to_string()).or_default();
        for value in values {
            list.insert(0, value);
        }
        list.len()
    }

    pub fn rpush(&mut self, key: &str, values: Vec<Message>) -> usize {
        let list = self.lists.entry(key.to_string()).or_default();
        list.extend(values);
        list.len()
    }

    pub fn lpop(&mut self, key: &str) -> Option<Message> {
        let list = self.lists.get_mut(key)?;
        if list.is_empty() {
            return None;
        }
        Some(list.remove(0))
    }

    pub fn rpop(&mut self, key: &str) -> Option<Message> {
        self.lists.get_mut(key)?.pop()
    }

    pub fn lrange(&self, key: &str, start: i64, end: i64) -> Vec<Message> {
        let Some(list) = self.lists.get(key) else {
            return Vec::new();
        };
        match resolve_range(list.len(), start, end) {
            Some((s, e)) => list[s..e].to_vec(),
            None => Vec::new(),
        }
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.lists.remove(key).is_some()
    }

    pub fn ltrim(&mut self, key: &str, start: i64, end: i64) -> bool {
        let Some(list) = self.lists.get_mut(key) else {
            return false;
        };
        *list = match resolve_range(list.len(), start, end) {
            Some((s, e)) => list[s..e].to_vec(),
            None => Vec::new(),
        };
        true
    }

    pub fn lrem(&mut self, key: &str, value: &Message, count: i64) -> usize {
        let Some(list) = self.lists.get_mut(key) else {
            return 0;
        };
        if count == 0 {
            let before = list.len();
            list.retain(|m| m != value);
            return before - list.len();
        }

        let limit = count.unsigned_abs() as usize;
        let mut removed = 0;
        if count > 0 {
            let mut i = 0;
            while i < list.len() && removed < limit {
                if &list[i] == value {
                    list.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = list.len();
            while i > 0 && removed < limit {
                i -= 1;
                if &list[i] == value {
                    list.remove(i);
                    removed += 1;
                }
            }
        }
        removed
    }

    pub fn lclear(&mut self, key: &str) -> bool {
        match self.lists.get_mut(key) {
            Some(list) => {
                list.clear();
                true
            }
            None => false,
        }
    }
}
