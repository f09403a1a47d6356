//! Browsing history split across fixed-capacity chunks.
//!
//! Storage layout:
//!
//! ```txt
//! history_meta       {"capacities":[..]}   plain json, index = chunk id, value = free slots
//! history_chunk_<id> [{"url":..,"t":..}]   json, zstd compressed
//! app_history        [{"url":..,"t":..}]   legacy flat list, read once then removed
//! ```
//!
//! Chunks are never deleted, only emptied, so `capacities.len()` always equals the
//! number of chunk keys in storage.

pub mod codec;
pub mod error;
pub mod storage;

use codec::Loaded;
use error::{HistoryError, Result};
use serde::{Deserialize, Serialize};
use storage::KeyValueStore;
use tracing::{debug, info, warn};

pub const CHUNK_SIZE: u32 = 1000;
pub const META_KEY: &str = "history_meta";
pub const CHUNK_PREFIX: &str = "history_chunk_";
pub const LEGACY_KEY: &str = "app_history";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub url: String,
    /// Seconds since the unix epoch.
    pub t: i64,
}

/// A history item together with the chunk it was read from, which is what
/// [`ChunkedHistoryStore::remove`] needs to find it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedHistoryItem {
    pub chunk_id: usize,
    pub url: String,
    pub t: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMeta {
    pub capacities: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySnapshot {
    /// Newest first.
    pub items: Vec<LoadedHistoryItem>,
    pub corrupt_chunks: Vec<usize>,
    pub meta_corrupt: bool,
}

impl HistorySnapshot {
    pub fn is_intact(&self) -> bool {
        !self.meta_corrupt && self.corrupt_chunks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Migration {
    /// No legacy key present.
    NotNeeded,
    Migrated { items: usize, skipped: usize },
    /// Legacy data could not be read; the key is kept so a later run can retry.
    Retained(String),
    /// Legacy data parsed but was not a list; the key was removed.
    Discarded(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyEntry {
    Item(HistoryItem),
    Url(String),
}

pub fn chunk_key(id: usize) -> String {
    format!("{}{}", CHUNK_PREFIX, id)
}

fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

fn first_free(meta: &HistoryMeta, from: usize) -> Option<usize> {
    meta.capacities
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, cap)| **cap > 0)
        .map(|(id, _)| id)
}

fn allocate(meta: &mut HistoryMeta) -> usize {
    meta.capacities.push(CHUNK_SIZE);
    let id = meta.capacities.len() - 1;
    debug!(chunk_id = id, "allocated history chunk");
    id
}

pub struct ChunkedHistoryStore<S: KeyValueStore> {
    backend: S,
    compression_level: i32,
    migration: Migration,
}

impl<S: KeyValueStore> ChunkedHistoryStore<S> {
    /// Wrap a backend without touching legacy data. See [`Self::open`].
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            compression_level: 0,
            migration: Migration::NotNeeded,
        }
    }

    /// Wrap a backend and run the one-shot legacy migration.
    pub fn open(backend: S) -> Result<Self> {
        Self::open_with(backend, 0)
    }

    /// [`Self::open`] with a zstd level, applied to chunks written by the
    /// migration as well.
    pub fn open_with(backend: S, compression_level: i32) -> Result<Self> {
        let mut store = Self::new(backend).with_compression_level(compression_level);
        store.migration = store.migrate_legacy()?;
        Ok(store)
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Outcome of the migration run by [`Self::open`].
    pub fn migration(&self) -> &Migration {
        &self.migration
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut S {
        &mut self.backend
    }

    pub fn into_inner(self) -> S {
        self.backend
    }

    fn read(&self, key: &str) -> Loaded<Vec<u8>> {
        match self.backend.get(key) {
            Ok(Some(raw)) => Loaded::Present(raw),
            Ok(None) => Loaded::Absent,
            Err(e) => Loaded::Corrupt(e.to_string()),
        }
    }

    pub fn load_meta(&self) -> Loaded<HistoryMeta> {
        match self.read(META_KEY) {
            Loaded::Present(raw) => codec::decode_meta(&raw),
            Loaded::Absent => Loaded::Absent,
            Loaded::Corrupt(e) => Loaded::Corrupt(e),
        }
    }

    pub fn load_chunk(&self, id: usize) -> Loaded<Vec<HistoryItem>> {
        match self.read(&chunk_key(id)) {
            Loaded::Present(raw) => codec::decode_chunk(&raw),
            Loaded::Absent => Loaded::Absent,
            Loaded::Corrupt(e) => Loaded::Corrupt(e),
        }
    }

    fn meta(&self) -> HistoryMeta {
        let loaded = self.load_meta();
        if let Loaded::Corrupt(e) = &loaded {
            warn!(error = %e, "failed to read history meta, treating as empty");
        }
        loaded.into_lenient()
    }

    fn chunk(&self, id: usize) -> Vec<HistoryItem> {
        let loaded = self.load_chunk(id);
        if let Loaded::Corrupt(e) = &loaded {
            warn!(chunk_id = id, error = %e, "failed to read history chunk, treating as empty");
        }
        loaded.into_lenient()
    }

    fn save_meta(&mut self, meta: &HistoryMeta) -> Result<()> {
        let raw = codec::encode_meta(meta)?;
        self.backend.set(META_KEY, &raw)
    }

    fn save_chunk(&mut self, id: usize, items: &[HistoryItem]) -> Result<()> {
        let raw = codec::encode_chunk(items, self.compression_level)?;
        self.backend.set(&chunk_key(id), &raw)
    }

    /// Free slots per chunk, indexed by chunk id.
    pub fn capacities(&self) -> Vec<u32> {
        self.meta().capacities
    }

    pub fn add(&mut self, url: &str) -> Result<()> {
        if url.is_empty() {
            return Ok(());
        }
        let item = HistoryItem {
            url: url.to_string(),
            t: now_seconds(),
        };
        self.append(std::iter::once(item))?;
        Ok(())
    }

    /// Add several urls with one shared timestamp. Ends in the same state as
    /// calling [`Self::add`] for each url, with one write per touched chunk.
    pub fn add_bulk<I, U>(&mut self, urls: I) -> Result<usize>
    where
        I: IntoIterator<Item = U>,
        U: Into<String>,
    {
        let t = now_seconds();
        let items = urls
            .into_iter()
            .map(Into::<String>::into)
            .filter(|url| !url.is_empty())
            .map(|url| HistoryItem { url, t });
        self.append(items)
    }

    /// First-fit placement. The scan starts at the lowest free chunk and only
    /// moves forward, since every chunk behind the cursor is full. A freshly
    /// allocated chunk starts empty, whatever is left under its key.
    fn append<I>(&mut self, items: I) -> Result<usize>
    where
        I: IntoIterator<Item = HistoryItem>,
    {
        let mut items = items.into_iter().peekable();
        if items.peek().is_none() {
            return Ok(0);
        }

        let mut meta = self.meta();
        let (mut current, mut chunk) = match first_free(&meta, 0) {
            Some(id) => (id, self.chunk(id)),
            None => (allocate(&mut meta), Vec::new()),
        };
        let mut written = 0;

        for item in items {
            if meta.capacities[current] == 0 {
                self.save_chunk(current, &chunk)?;
                (current, chunk) = match first_free(&meta, current + 1) {
                    Some(id) => (id, self.chunk(id)),
                    None => (allocate(&mut meta), Vec::new()),
                };
            }
            chunk.push(item);
            meta.capacities[current] -= 1;
            written += 1;
        }

        self.save_chunk(current, &chunk)?;
        self.save_meta(&meta)?;
        Ok(written)
    }

    /// Every item, newest first. Equal timestamps keep chunk order.
    pub fn get_all(&self) -> Vec<LoadedHistoryItem> {
        self.get_all_checked().items
    }

    /// Like [`Self::get_all`], but also reports which records were unreadable.
    pub fn get_all_checked(&self) -> HistorySnapshot {
        let mut snapshot = HistorySnapshot::default();
        let meta = match self.load_meta() {
            Loaded::Corrupt(e) => {
                warn!(error = %e, "failed to read history meta, treating as empty");
                snapshot.meta_corrupt = true;
                HistoryMeta::default()
            }
            loaded => loaded.into_lenient(),
        };

        for id in 0..meta.capacities.len() {
            let chunk = match self.load_chunk(id) {
                Loaded::Corrupt(e) => {
                    warn!(chunk_id = id, error = %e, "failed to read history chunk, treating as empty");
                    snapshot.corrupt_chunks.push(id);
                    continue;
                }
                loaded => loaded.into_lenient(),
            };
            snapshot
                .items
                .extend(chunk.into_iter().map(|item| LoadedHistoryItem {
                    chunk_id: id,
                    url: item.url,
                    t: item.t,
                }));
        }

        snapshot.items.sort_by(|a, b| b.t.cmp(&a.t));
        snapshot
    }

    /// Remove every entry in the item's chunk with the same url and timestamp.
    /// Returns how many were removed; nothing is written when that is zero.
    pub fn remove(&mut self, item: &LoadedHistoryItem) -> Result<usize> {
        let mut meta = self.meta();
        if item.chunk_id >= meta.capacities.len() {
            return Ok(0);
        }

        let mut chunk = self.chunk(item.chunk_id);
        let before = chunk.len();
        chunk.retain(|i| i.url != item.url || i.t != item.t);
        let removed = before - chunk.len();
        if removed == 0 {
            return Ok(0);
        }

        self.save_chunk(item.chunk_id, &chunk)?;
        meta.capacities[item.chunk_id] += removed as u32;
        self.save_meta(&meta)?;
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<()> {
        let meta = self.meta();
        for id in 0..meta.capacities.len() {
            self.backend.remove(&chunk_key(id))?;
        }
        self.backend.remove(META_KEY)
    }

    /// Bytes held under the meta and chunk keys.
    pub fn stored_bytes(&self) -> u64 {
        let mut total = 0;
        if let Loaded::Present(raw) = self.read(META_KEY) {
            total += raw.len() as u64;
        }
        for id in 0..self.capacities().len() {
            if let Loaded::Present(raw) = self.read(&chunk_key(id)) {
                total += raw.len() as u64;
            }
        }
        total
    }

    /// Stage `raw` as legacy data and migrate it. Refuses while an earlier
    /// legacy blob is still waiting for a retry, so it is never overwritten.
    pub fn import_legacy(&mut self, raw: &[u8]) -> Result<Migration> {
        if self.backend.get(LEGACY_KEY)?.is_some() {
            return Err(HistoryError::LegacyPending);
        }
        self.backend.set(LEGACY_KEY, raw)?;
        self.migrate_legacy()
    }

    /// Move the legacy flat list under [`LEGACY_KEY`] into chunks.
    ///
    /// Entries keep their timestamps; bare url strings get the current time.
    /// Unparseable entries are skipped. Calling this again after a successful
    /// run is a no-op because the legacy key is gone.
    pub fn migrate_legacy(&mut self) -> Result<Migration> {
        let raw = match self.read(LEGACY_KEY) {
            Loaded::Present(raw) => raw,
            Loaded::Absent => return Ok(Migration::NotNeeded),
            Loaded::Corrupt(e) => {
                warn!(error = %e, "failed to read legacy history");
                return Ok(Migration::Retained(e));
            }
        };

        let parsed: serde_json::Value = match serde_json::from_slice(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "legacy history migration failed, keeping it for a later attempt");
                return Ok(Migration::Retained(e.to_string()));
            }
        };

        let serde_json::Value::Array(entries) = parsed else {
            warn!("legacy history is not a list, discarding it");
            self.backend.remove(LEGACY_KEY)?;
            return Ok(Migration::Discarded("not a list".to_string()));
        };

        let now = now_seconds();
        let mut skipped = 0;
        let items: Vec<HistoryItem> = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(LegacyEntry::Item(item)) if !item.url.is_empty() => Some(item),
                Ok(LegacyEntry::Url(url)) if !url.is_empty() => Some(HistoryItem { url, t: now }),
                _ => {
                    skipped += 1;
                    None
                }
            })
            .collect();

        let migrated = self.append(items)?;
        self.backend.remove(LEGACY_KEY)?;
        if skipped > 0 {
            warn!(skipped, "skipped malformed legacy history entries");
        }
        info!(items = migrated, "migrated legacy history");

        Ok(Migration::Migrated {
            items: migrated,
            skipped,
        })
    }
}
