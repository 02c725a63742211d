//! Multi-version engine over a concurrent skip list.
//!
//! Every committed write is stored under `(key, Reverse(version))`, so all
//! versions of a key are adjacent with the newest first, and a snapshot read
//! at version `v` is a single seek to `(key, Reverse(v))`.
//!
//! Transactions are optimistic. They buffer writes and record the keys they
//! read and the ranges they scanned. Commit takes the writer lock and fails
//! with `Error::Conflict` if anything it read, scanned or wrote has a version
//! newer than its snapshot; otherwise the batch is logged, installed at the
//! next version and published by bumping the committed version. This makes
//! committed transactions serializable in commit order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::ops::{Bound, RangeBounds};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crossbeam_skiplist::SkipMap;
use tracing::{debug, info};

use super::wal::{Batch, Wal};
use super::{Engine, Transaction};
use crate::config::EngineConfig;
use crate::encoding::format::{self, Formatter as _};
use crate::error::{Error, Result};
use crate::flock::FileLock;

const WAL_FILE: &str = "ashsrs.wal";

type VersionedKey = (Vec<u8>, Reverse<u64>);
type KeyRange = (Bound<Vec<u8>>, Bound<Vec<u8>>);

pub struct MvccStore {
    data: SkipMap<VersionedKey, Vec<u8>>,
    /// Last published version. Versions above it are invisible.
    committed: AtomicU64,
    /// Serializes commits and owns the log of a durable store.
    writer: Mutex<Option<Wal>>,
    /// Snapshot versions of open transactions, with their counts.
    active: Mutex<BTreeMap<u64, usize>>,
    config: EngineConfig,
    _lock: Option<FileLock>,
}

impl MvccStore {
    /// Opens a store. With a directory, the directory is locked and the log
    /// in it is replayed.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let Some(dir) = config.dir.clone() else {
            return Ok(Self::with_parts(config, None, None));
        };

        fs::create_dir_all(&dir)?;
        let lock = FileLock::lock_dir(&dir)?;
        let mut wal = Wal::open(dir.join(WAL_FILE))?;
        let mut store = Self::with_parts(config, None, Some(lock));

        let mut committed = 0;
        let mut replay = wal.replay()?;
        for batch in replay.by_ref() {
            let batch = batch?;
            for (key, value) in batch.writes {
                store.data.insert((key.clone(), Reverse(batch.version)), value);
                prune(&store.data, &key, batch.version);
            }
            committed = batch.version;
        }
        wal.truncate(replay.offset())?;

        info!(dir = %dir.display(), version = committed, "opened store");

        store.committed.store(committed, Ordering::Release);
        *store.writer.get_mut().map_err(|_| Error::MutexPoisoned)? = Some(wal);
        Ok(store)
    }

    /// Opens a store that keeps nothing on disk.
    pub fn in_memory() -> Self {
        Self::with_parts(EngineConfig::in_memory(), None, None)
    }

    fn with_parts(config: EngineConfig, wal: Option<Wal>, lock: Option<FileLock>) -> Self {
        Self {
            data: SkipMap::new(),
            committed: AtomicU64::new(0),
            writer: Mutex::new(wal),
            active: Mutex::new(BTreeMap::new()),
            config,
            _lock: lock,
        }
    }

    /// The last committed version.
    pub fn version(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    fn begin(&self, read_only: bool) -> Result<MvccTransaction<'_>> {
        let mut active = self.active.lock().map_err(|_| Error::MutexPoisoned)?;
        let version = self.committed.load(Ordering::Acquire);
        *active.entry(version).or_insert(0) += 1;

        Ok(MvccTransaction {
            store: self,
            version,
            read_only,
            writes: BTreeMap::new(),
            reads: BTreeSet::new(),
            scans: Vec::new(),
            registered: true,
        })
    }

    fn release(&self, version: u64) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(count) = active.get_mut(&version) {
                *count -= 1;
                if *count == 0 {
                    active.remove(&version);
                }
            }
        }
    }

    /// Versions at or below the watermark are invisible to every open
    /// transaction except as the newest version of their key.
    fn watermark(&self) -> Result<u64> {
        let active = self.active.lock().map_err(|_| Error::MutexPoisoned)?;
        let committed = self.committed.load(Ordering::Acquire);
        Ok(active
            .keys()
            .next()
            .map_or(committed, |&oldest| oldest.min(committed)))
    }

    fn get_at(&self, key: &[u8], version: u64) -> Option<Vec<u8>> {
        self.data
            .range((key.to_vec(), Reverse(version))..)
            .next()
            .filter(|entry| entry.key().0 == key)
            .map(|entry| entry.value().clone())
    }

    fn latest_version(&self, key: &[u8]) -> Option<u64> {
        self.data
            .range((key.to_vec(), Reverse(u64::MAX))..)
            .next()
            .filter(|entry| entry.key().0 == key)
            .map(|entry| entry.key().1 .0)
    }

    fn scan_at(&self, range: &KeyRange, version: u64) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut visible = BTreeMap::new();
        for entry in self.data.range(versioned(range)) {
            let (key, Reverse(v)) = entry.key();
            if *v <= version && !visible.contains_key(key) {
                visible.insert(key.clone(), entry.value().clone());
            }
        }
        visible
    }

    /// Fails if anything `txn` depends on changed after its snapshot.
    fn validate(&self, txn: &MvccTransaction<'_>) -> Result<()> {
        let newer = |key: &[u8]| {
            self.latest_version(key)
                .is_some_and(|v| v > txn.version)
        };

        for key in txn.reads.iter().chain(txn.writes.keys()) {
            if newer(key.as_slice()) {
                return Err(Error::Conflict(format::Raw::key(key)));
            }
        }

        for range in &txn.scans {
            if let Some(entry) = self
                .data
                .range(versioned(range))
                .find(|entry| entry.key().1 .0 > txn.version)
            {
                return Err(Error::Conflict(format::Raw::key(&entry.key().0)));
            }
        }
        Ok(())
    }

    fn commit(&self, txn: &mut MvccTransaction<'_>) -> Result<()> {
        let mut writer = self.writer.lock().map_err(|_| Error::MutexPoisoned)?;
        self.validate(txn)?;

        let version = self.committed.load(Ordering::Acquire) + 1;
        let batch = Batch {
            version,
            writes: std::mem::take(&mut txn.writes).into_iter().collect(),
        };

        if let Some(wal) = writer.as_mut() {
            wal.append(&batch)?;
            if self.config.sync_on_commit {
                wal.sync()?;
            }
        }

        for (key, value) in &batch.writes {
            self.data.insert((key.clone(), Reverse(version)), value.clone());
        }
        self.committed.store(version, Ordering::Release);
        txn.unregister();

        let watermark = self.watermark()?;
        for (key, _) in &batch.writes {
            prune(&self.data, key, watermark);
        }

        debug!(version, count = batch.writes.len(), "committed transaction");
        Ok(())
    }
}

impl Engine for MvccStore {
    type Transaction<'a> = MvccTransaction<'a>;

    fn begin_write(&self) -> Result<MvccTransaction<'_>> {
        self.begin(false)
    }

    fn begin_read(&self) -> Result<MvccTransaction<'_>> {
        self.begin(true)
    }
}

/// Removes versions of `key` that are shadowed for every snapshot at or
/// above `watermark`.
fn prune(data: &SkipMap<VersionedKey, Vec<u8>>, key: &[u8], watermark: u64) {
    let versions = (
        Bound::Included((key.to_vec(), Reverse(u64::MAX))),
        Bound::Included((key.to_vec(), Reverse(0))),
    );
    let mut visible_found = false;
    for entry in data.range(versions) {
        if entry.key().1 .0 > watermark {
            continue;
        }
        if visible_found {
            entry.remove();
        } else {
            visible_found = true;
        }
    }
}

fn is_inverted(range: &KeyRange) -> bool {
    match range {
        (Bound::Included(start), Bound::Included(end)) => start > end,
        (Bound::Included(start) | Bound::Excluded(start), Bound::Excluded(end))
        | (Bound::Excluded(start), Bound::Included(end)) => start >= end,
        _ => false,
    }
}

fn versioned(range: &KeyRange) -> (Bound<VersionedKey>, Bound<VersionedKey>) {
    let start = match &range.0 {
        Bound::Included(k) => Bound::Included((k.clone(), Reverse(u64::MAX))),
        Bound::Excluded(k) => Bound::Excluded((k.clone(), Reverse(0))),
        Bound::Unbounded => Bound::Unbounded,
    };
    let end = match &range.1 {
        Bound::Included(k) => Bound::Included((k.clone(), Reverse(0))),
        Bound::Excluded(k) => Bound::Excluded((k.clone(), Reverse(u64::MAX))),
        Bound::Unbounded => Bound::Unbounded,
    };
    (start, end)
}

pub struct MvccTransaction<'a> {
    store: &'a MvccStore,
    version: u64,
    read_only: bool,
    writes: BTreeMap<Vec<u8>, Vec<u8>>,
    reads: BTreeSet<Vec<u8>>,
    scans: Vec<KeyRange>,
    registered: bool,
}

impl MvccTransaction<'_> {
    fn unregister(&mut self) {
        if std::mem::take(&mut self.registered) {
            self.store.release(self.version);
        }
    }
}

impl Transaction for MvccTransaction<'_> {
    type ScanIterator<'b>
        = ScanIter
    where
        Self: 'b;

    fn version(&self) -> u64 {
        self.version
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.writes.get(key) {
            return Ok(Some(value.clone()));
        }
        if !self.read_only {
            self.reads.insert(key.to_vec());
        }
        Ok(self.store.get_at(key, self.version))
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let max = self.store.config.max_txn_entries;
        if !self.writes.contains_key(key) && self.writes.len() >= max {
            return Err(Error::TxnTooBig(max));
        }
        self.writes.insert(key.to_vec(), value);
        Ok(())
    }

    fn scan(&mut self, range: impl RangeBounds<Vec<u8>>) -> Result<ScanIter> {
        let range: KeyRange = (range.start_bound().cloned(), range.end_bound().cloned());
        if is_inverted(&range) {
            return Ok(ScanIter {
                inner: Vec::new().into_iter(),
            });
        }

        let mut visible = self.store.scan_at(&range, self.version);
        for (key, value) in self.writes.range::<Vec<u8>, _>(range.clone()) {
            visible.insert(key.clone(), value.clone());
        }

        if !self.read_only {
            self.scans.push(range);
        }
        Ok(ScanIter {
            inner: visible.into_iter().collect::<Vec<_>>().into_iter(),
        })
    }

    fn commit(mut self) -> Result<()> {
        if self.read_only || self.writes.is_empty() {
            return Ok(());
        }
        let store = self.store;
        store.commit(&mut self)
    }

    fn discard(self) {}
}

impl Drop for MvccTransaction<'_> {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Materialized scan result.
pub struct ScanIter {
    inner: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl Iterator for ScanIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(Ok)
    }
}

impl DoubleEndedIterator for ScanIter {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(Ok)
    }
}
