//! Buffering of hashes while the index is unavailable
//!
//! Storage is FIFO: `drain` returns everything enqueued so far, oldest first,
//! and leaves the storage empty.

use crate::fingerprint::Hashes;
use anyhow::{Context, Result};
use async_trait::async_trait;
use soundprint_fp::{FileFormat, FpJsonFile};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[async_trait]
pub trait OfflineStorage: Send + Sync {
    async fn enqueue(&self, hashes: Hashes) -> Result<()>;

    async fn drain(&self) -> Result<Vec<Hashes>>;
}

#[derive(Debug, Default)]
pub struct InMemoryOfflineStorage {
    queue: Mutex<VecDeque<Hashes>>,
}

impl InMemoryOfflineStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OfflineStorage for InMemoryOfflineStorage {
    async fn enqueue(&self, hashes: Hashes) -> Result<()> {
        self.queue
            .lock()
            .map_err(|_| anyhow::anyhow!("offline queue lock poisoned"))?
            .push_back(hashes);
        Ok(())
    }

    async fn drain(&self) -> Result<Vec<Hashes>> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| anyhow::anyhow!("offline queue lock poisoned"))?;
        Ok(queue.drain(..).collect())
    }
}

/// One fingerprint file per buffered `Hashes`, named by a zero-padded counter
///
/// Files left by a previous process are picked up by the next drain, ahead of
/// anything enqueued since.
pub struct FilesystemOfflineStorage {
    dir: PathBuf,
    format: FileFormat,
    sample_rate: u32,
    counter: AtomicU64,
}

impl FilesystemOfflineStorage {
    pub fn new(dir: impl Into<PathBuf>, format: FileFormat, sample_rate: u32) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create offline storage: {}", dir.display()))?;

        let next = list_buffered(&dir)?
            .last()
            .map(|(counter, _)| counter + 1)
            .unwrap_or(0);

        Ok(Self {
            dir,
            format: match format {
                FileFormat::Auto => FileFormat::Json,
                other => other,
            },
            sample_rate,
            counter: AtomicU64::new(next),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl OfflineStorage for FilesystemOfflineStorage {
    async fn enqueue(&self, hashes: Hashes) -> Result<()> {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self
            .dir
            .join(format!("{:020}.{}", counter, self.format.extension()));
        hashes.to_fp_file(self.sample_rate).save_as(&path, self.format)?;
        log::debug!("Buffered {} fingerprints to {}", hashes.len(), path.display());
        Ok(())
    }

    async fn drain(&self) -> Result<Vec<Hashes>> {
        let mut drained = Vec::new();
        for (_, path) in list_buffered(&self.dir)? {
            let file = FpJsonFile::load_auto(&path)?;
            drained.push(Hashes::from_fp_file(&file));
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove buffered hashes: {}", path.display()))?;
        }
        Ok(drained)
    }
}

/// Buffered files in `dir`, oldest first
fn list_buffered(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read offline storage: {}", dir.display()))?;
    let mut files: Vec<(u64, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| FileFormat::from_path(path).is_some())
        .filter_map(|path| {
            let counter = path.file_stem()?.to_str()?.parse::<u64>().ok()?;
            Some((counter, path))
        })
        .collect();
    files.sort();
    Ok(files)
}
