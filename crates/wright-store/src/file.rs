use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wright_core::messages::Message;

use crate::error::StoreError;
use crate::list::{ListData, ListStore};

/// One line of the store file.
#[derive(Serialize, Deserialize)]
struct Record {
    key: String,
    values: Vec<Message>,
}

/// List store persisted as NDJSON, one record per key. Every mutation
/// rewrites the file through a temp file and a rename.
pub struct FileListStore {
    path: PathBuf,
    data: Mutex<ListData>,
}

impl FileListStore {
    /// Open (or lazily create) the store at `path`. An unreadable or corrupt
    /// file loads as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match load(&path) {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "list store file unreadable, starting empty");
                ListData::default()
            }
        };
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate<T>(&self, op: impl FnOnce(&mut ListData) -> T) -> Result<T, StoreError> {
        let mut data = self.data.lock();
        let out = op(&mut data);
        persist(&self.path, &data)?;
        Ok(out)
    }
}

fn load(path: &Path) -> Result<ListData, StoreError> {
    let mut data = ListData::default();
    if !path.exists() {
        return Ok(data);
    }
    let raw = std::fs::read_to_string(path)?;
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let record: Record = serde_json::from_str(line)?;
        data.lists.insert(record.key, record.values);
    }
    debug!(path = %path.display(), keys = data.lists.len(), "list store loaded");
    Ok(data)
}

fn persist(path: &Path, data: &ListData) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut keys: Vec<&String> = data.lists.keys().collect();
    keys.sort();
    let mut buf = Vec::new();
    for key in keys {
        let record = Record {
            key: key.clone(),
            values: data.lists.get(key).cloned().unwrap_or_default(),
        };
        serde_json::to_writer(&mut buf, &record)?;
        buf.push(b'\n');
    }

    let tmp = path.with_extension("tmp");
    let written = (|| -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

impl ListStore for FileListStore {
    fn lpush(&self, key: &str, values: Vec<Message>) -> Result<usize, StoreError> {
        self.mutate(|d| d.lpush(key, values))
    }

    fn rpush(&self, key: &str, values: Vec<Message>) -> Result<usize, StoreError> {
        self.mutate(|d| d.rpush(key, values))
    }

    fn lpop(&self, key: &str) -> Result<Option<Message>, StoreError> {
        self.mutate(|d| d.lpop(key))
    }

    fn rpop(&self, key: &str) -> Result<Option<Message>, StoreError> {
        self.mutate(|d| d.rpop(key))
    }

    fn lrange(&self, key: &str, start: i64, end: i64) -> Result<Vec<Message>, StoreError> {
        Ok(self.data.lock().lrange(key, start, end))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.mutate(|d| d.delete(key))
    }

    fn ltrim(&self, key: &str, start: i64, end: i64) -> Result<bool, StoreError> {
        self.mutate(|d| d.ltrim(key, start, end))
    }

    fn lrem(&self, key: &str, value: &Message, count: i64) -> Result<usize, StoreError> {
        self.mutate(|d| d.lrem(key, value, count))
    }

    fn lclear(&self, key: &str) -> Result<bool, StoreError> {
        self.mutate(|d| d.lclear(key))
    }
}
