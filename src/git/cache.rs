//! Persisted commit-history cache.
//!
//! Remembers resolved file histories across builds so a file whose blob at
//! the head commit has not changed is answered without walking the graph.
//! - One LRU table per file path, each behind its own lock
//! - Keyed by (head commit key, blob key); staleness is a key mismatch
//! - Eviction runs at save time only, keeping the newest `max_entries_per_file`
//! - One binary file per repository identity, written atomically
//!
//! File layout, all integers little-endian:
//!
//! ```text
//! u32 file_count
//! file_count × {
//!     u32 path_len, path_len × u8 (UTF-8)
//!     u32 entry_count
//!     entry_count × {
//!         u64 head, u64 blob, u32 history_len, history_len × u64
//!     }
//! }
//! ```
//!
//! Entries are written most recently used first; load rebuilds recency from
//! that order. A missing or truncated file loads as an empty cache. A length
//! prefix beyond the format's limits, a non-UTF-8 path or trailing bytes make
//! the file corrupt.
//!
//! Keys are 64-bit prefixes of object ids. Nothing here can tell two objects
//! sharing a prefix apart.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use crate::error::{HistoryError, Result};

/// 64-bit key of a commit id.
pub type CommitKey = u64;
/// 64-bit key of a blob id; [`ABSENT_BLOB`] when the file does not exist.
pub type BlobKey = u64;

pub const ABSENT_BLOB: BlobKey = 0;

pub const DEFAULT_MAX_ENTRIES_PER_FILE: usize = 16;

const MAX_FILES: u32 = 1 << 24;
const MAX_PATH_BYTES: u32 = 4096;
const MAX_ENTRIES: u32 = 1 << 16;
const MAX_HISTORY: u32 = 1 << 26;

/// Cache file name for a repository identity (remote URL or path).
pub fn cache_file_name(identity: &str) -> String {
    format!(
        "commit-history-{:016x}.bin",
        xxhash_rust::xxh3::xxh3_64(identity.as_bytes())
    )
}

#[derive(Debug, Clone)]
struct CacheEntry {
    history: Arc<[CommitKey]>,
    last_used: u64,
}

#[derive(Debug, Default)]
struct FileTable {
    entries: HashMap<(CommitKey, BlobKey), CacheEntry>,
}

impl FileTable {
    /// Drop least recently used entries beyond `cap`. Returns how many went.
    fn evict(&mut self, cap: usize) -> usize {
        if self.entries.len() <= cap {
            return 0;
        }
        let mut by_recency: Vec<((CommitKey, BlobKey), u64)> = self
            .entries
            .iter()
            .map(|(key, entry)| (*key, entry.last_used))
            .collect();
        by_recency.sort_unstable_by(|a, b| b.1.cmp(&a.1));

        let evicted = by_recency.len() - cap;
        for (key, _) in by_recency.into_iter().skip(cap) {
            self.entries.remove(&key);
        }
        evicted
    }

    fn most_recent_first(&self) -> Vec<(&(CommitKey, BlobKey), &CacheEntry)> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_unstable_by(|a, b| b.1.last_used.cmp(&a.1.last_used));
        entries
    }
}

pub struct CommitHistoryCache {
    files: DashMap<String, Arc<Mutex<FileTable>>>,
    clock: AtomicU64,
    dirty: AtomicBool,
    /// Held for the whole of a save; saves share one temp file.
    save_lock: Mutex<()>,
    max_entries_per_file: usize,
}

impl CommitHistoryCache {
    pub fn new(max_entries_per_file: usize) -> Self {
        Self {
            files: DashMap::new(),
            clock: AtomicU64::new(1),
            dirty: AtomicBool::new(false),
            save_lock: Mutex::new(()),
            max_entries_per_file: max_entries_per_file.clamp(1, MAX_ENTRIES as usize),
        }
    }

    /// Cached history of `file` for this head and blob. Refreshes recency.
    pub fn get(&self, file: &str, head: CommitKey, blob: BlobKey) -> Option<Arc<[CommitKey]>> {
        let table = self.files.get(file).map(|t| Arc::clone(t.value()))?;
        let mut table = table.lock();
        let entry = table.entries.get_mut(&(head, blob))?;
        entry.last_used = self.tick();
        Some(Arc::clone(&entry.history))
    }

    pub fn put(&self, file: &str, head: CommitKey, blob: BlobKey, history: &[CommitKey]) {
        let table = Arc::clone(
            self.files
                .entry(file.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(FileTable::default())))
                .value(),
        );
        let last_used = self.tick();
        let mut table = table.lock();

        match table.entries.get_mut(&(head, blob)) {
            Some(existing) if *existing.history == *history => {
                existing.last_used = last_used;
            }
            _ => {
                table.entries.insert(
                    (head, blob),
                    CacheEntry {
                        history: Arc::from(history),
                        last_used,
                    },
                );
                self.dirty.store(true, Ordering::Release);
            }
        }
    }

    /// Apply the per-file cap to every table. Returns the number of entries
    /// removed.
    pub fn evict(&self) -> usize {
        let cap = self.max_entries_per_file;
        let tables: Vec<Arc<Mutex<FileTable>>> =
            self.files.iter().map(|t| Arc::clone(t.value())).collect();
        tables.iter().map(|t| t.lock().evict(cap)).sum()
    }

    /// Load a cache file. A missing or truncated file gives an empty cache.
    pub fn load(path: &Path, max_entries_per_file: usize) -> Result<Self> {
        let cache = Self::new(max_entries_per_file);
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("No commit-history cache at {:?}", path);
                return Ok(cache);
            }
            Err(e) => return Err(HistoryError::io(path, e)),
        };

        let started = Instant::now();
        match cache.read_from(&bytes) {
            Ok(()) => {}
            Err(ParseError::Truncated) => {
                tracing::warn!("Commit-history cache {:?} is truncated, starting empty", path);
                return Ok(Self::new(max_entries_per_file));
            }
            Err(ParseError::Corrupt(reason)) => {
                return Err(HistoryError::CacheCorrupt {
                    path: path.to_path_buf(),
                    reason,
                });
            }
        }

        tracing::info!(
            "Loaded commit-history cache: {} files in {:?}",
            cache.file_count(),
            started.elapsed()
        );
        Ok(cache)
    }

    /// Persist to `path` if anything changed since load. Returns whether a
    /// file was written.
    pub fn save(&self, path: &Path) -> Result<bool> {
        let _saving = self.save_lock.lock();

        // Cleared before writing: a put racing with the write marks it again
        if !self.dirty.swap(false, Ordering::AcqRel) {
            tracing::debug!("Commit-history cache unchanged, skipping save");
            return Ok(false);
        }

        match self.write_file(path) {
            Ok(evicted) => {
                tracing::info!(
                    "Saved commit-history cache: {} files, {} evicted, {:?}",
                    self.file_count(),
                    evicted,
                    path
                );
                Ok(true)
            }
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    fn write_file(&self, path: &Path) -> Result<usize> {
        let evicted = self.evict();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| HistoryError::io(parent, e))?;
        }

        // Write to a sibling temp file, then rename over the old cache
        let tmp_path = path.with_extension("tmp");
        let file = File::create(&tmp_path).map_err(|e| HistoryError::io(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)
            .and_then(|()| writer.flush())
            .map_err(|e| HistoryError::io(&tmp_path, e))?;
        drop(writer);
        fs::rename(&tmp_path, path).map_err(|e| HistoryError::io(path, e))?;
        Ok(evicted)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Force the next save to write, e.g. to replace a corrupt file.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn entry_count(&self, file: &str) -> usize {
        self.files
            .get(file)
            .map(|t| t.value().lock().entries.len())
            .unwrap_or(0)
    }

    pub fn max_entries_per_file(&self) -> usize {
        self.max_entries_per_file
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        // Paths the reader would reject are not persisted
        let mut paths: Vec<String> = self
            .files
            .iter()
            .map(|t| t.key().clone())
            .filter(|path| {
                let fits = path.len() <= MAX_PATH_BYTES as usize;
                if !fits {
                    tracing::debug!("Not persisting history of {}-byte path", path.len());
                }
                fits
            })
            .collect();
        paths.sort_unstable();

        w.write_u32::<LittleEndian>(paths.len() as u32)?;
        for path in &paths {
            let Some(table) = self.files.get(path).map(|t| Arc::clone(t.value())) else {
                continue;
            };
            let table = table.lock();

            w.write_u32::<LittleEndian>(path.len() as u32)?;
            w.write_all(path.as_bytes())?;
            w.write_u32::<LittleEndian>(table.entries.len() as u32)?;
            for ((head, blob), entry) in table.most_recent_first() {
                w.write_u64::<LittleEndian>(*head)?;
                w.write_u64::<LittleEndian>(*blob)?;
                w.write_u32::<LittleEndian>(entry.history.len() as u32)?;
                for commit in entry.history.iter() {
                    w.write_u64::<LittleEndian>(*commit)?;
                }
            }
        }
        Ok(())
    }

    fn read_from(&self, bytes: &[u8]) -> std::result::Result<(), ParseError> {
        let r = &mut Cursor::new(bytes);
        let file_count = checked_len(r, MAX_FILES, "file count")?;

        for _ in 0..file_count {
            let path_len = checked_len(r, MAX_PATH_BYTES, "path length")?;
            let mut raw = vec![0u8; path_len as usize];
            r.read_exact(&mut raw)?;
            let path = String::from_utf8(raw)
                .map_err(|_| ParseError::Corrupt("path is not valid UTF-8".to_string()))?;

            let entry_count = checked_len(r, MAX_ENTRIES, "entry count")?;
            let mut table = FileTable::default();
            for i in 0..entry_count {
                let head = r.read_u64::<LittleEndian>()?;
                let blob = r.read_u64::<LittleEndian>()?;
                let history_len = checked_len(r, MAX_HISTORY, "history length")?;
                let mut history = Vec::with_capacity(history_len.min(4096) as usize);
                for _ in 0..history_len {
                    history.push(r.read_u64::<LittleEndian>()?);
                }
                table.entries.insert(
                    (head, blob),
                    CacheEntry {
                        history: Arc::from(history),
                        last_used: u64::from(entry_count - i),
                    },
                );
            }

            self.files.insert(path, Arc::new(Mutex::new(table)));
        }

        if r.position() != bytes.len() as u64 {
            return Err(ParseError::Corrupt("trailing bytes after last file".to_string()));
        }

        self.clock.store(u64::from(MAX_ENTRIES) + 1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug)]
enum ParseError {
    Truncated,
    Corrupt(String),
}

impl From<io::Error> for ParseError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => ParseError::Truncated,
            _ => ParseError::Corrupt(e.to_string()),
        }
    }
}

fn checked_len(
    r: &mut Cursor<&[u8]>,
    max: u32,
    what: &str,
) -> std::result::Result<u32, ParseError> {
    let len = r.read_u32::<LittleEndian>()?;
    if len > max {
        return Err(ParseError::Corrupt(format!("{} {} exceeds {}", what, len, max)));
    }
    Ok(len)
}

/// Cache file location for a repository identity under `dir`.
pub fn cache_path(dir: &Path, identity: &str) -> PathBuf {
    dir.join(cache_file_name(identity))
}
