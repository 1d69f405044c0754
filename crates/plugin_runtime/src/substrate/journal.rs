//! Host Journal
//!
//! Append-only log of host state changes, replayed when a host is activated.
//! `FileJournal` keeps one JSON-lines file per host id.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use plugin_types::{PluginError, PluginResult};
use tokio::io::AsyncWriteExt;

use crate::HostLogEntry;

#[async_trait]
pub trait HostJournal: Send + Sync {
    async fn append(&self, host_id: &str, entry: &HostLogEntry) -> PluginResult<()>;

    /// Every entry of a host in append order; empty for unknown hosts
    async fn replay(&self, host_id: &str) -> PluginResult<Vec<HostLogEntry>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// In-Memory Journal
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct InMemoryJournal {
    entries: DashMap<String, Vec<HostLogEntry>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, host_id: &str) -> usize {
        self.entries.get(host_id).map(|e| e.len()).unwrap_or(0)
    }
}

#[async_trait]
impl HostJournal for InMemoryJournal {
    async fn append(&self, host_id: &str, entry: &HostLogEntry) -> PluginResult<()> {
        self.entries
            .entry(host_id.to_string())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn replay(&self, host_id: &str) -> PluginResult<Vec<HostLogEntry>> {
        Ok(self
            .entries
            .get(host_id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Journal
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct FileJournal {
    dir: PathBuf,
    /// Serializes appends per host
    locks: DashMap<String, std::sync::Arc<tokio::sync::Mutex<()>>>,
}

impl FileJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Percent-encoded host id; `%` alone never comes out of the encoder,
    /// so it names the empty id
    fn path_for(&self, host_id: &str) -> PathBuf {
        let stem = match host_id {
            "" => std::borrow::Cow::Borrowed("%"),
            id => urlencoding::encode(id),
        };
        self.dir.join(format!("{}.jsonl", stem))
    }

    fn lock_for(&self, host_id: &str) -> std::sync::Arc<tokio::sync::Mutex<()>> {
        std::sync::Arc::clone(self.locks.entry(host_id.to_string()).or_default().value())
    }
}

fn journal_error(path: &Path, e: impl std::fmt::Display) -> PluginError {
    PluginError::Journal(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl HostJournal for FileJournal {
    async fn append(&self, host_id: &str, entry: &HostLogEntry) -> PluginResult<()> {
        let path = self.path_for(host_id);
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let lock = self.lock_for(host_id);
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| journal_error(&self.dir, e))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| journal_error(&path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| journal_error(&path, e))?;
        file.flush().await.map_err(|e| journal_error(&path, e))?;
        Ok(())
    }

    async fn replay(&self, host_id: &str) -> PluginResult<Vec<HostLogEntry>> {
        let path = self.path_for(host_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(journal_error(&path, e)),
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line)
                    .map_err(|e| journal_error(&path, format!("line {}: {}", index + 1, e)))
            })
            .collect()
    }
}
