//! Ordered, transactional key-value storage.
//!
//! Keys and values are byte strings; keys are ordered lexicographically.
//! All access goes through a [`Transaction`], which sees a consistent snapshot
//! and applies its writes atomically on commit.

pub mod mvcc;
pub mod wal;

use std::ops::{Bound, RangeBounds};

use crate::error::Result;

pub use mvcc::MvccStore;

/// A store that hands out transactions.
pub trait Engine: Send + Sync {
    /// The transaction type, borrowing the engine.
    type Transaction<'a>: Transaction + 'a
    where
        Self: 'a;

    /// Begins a read-write transaction.
    fn begin_write(&self) -> Result<Self::Transaction<'_>>;

    /// Begins a read-only transaction. Writes fail with `Error::ReadOnly`.
    fn begin_read(&self) -> Result<Self::Transaction<'_>>;
}

/// A unit of work over an [`Engine`]. Dropping it without committing
/// discards every pending write.
pub trait Transaction {
    /// The iterator returned by scan().
    type ScanIterator<'a>: ScanIterator + 'a
    where
        Self: 'a;

    /// The snapshot version this transaction reads at.
    fn version(&self) -> u64;

    /// Retrieves the value for a given key.
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Inserts or updates a key-value pair.
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<()>;

    /// Iterates over an ordered range of key-value pairs, forwards or
    /// backwards.
    fn scan(&mut self, range: impl RangeBounds<Vec<u8>>) -> Result<Self::ScanIterator<'_>>;

    /// Iterates over all key-value pairs starting with the given prefix.
    fn scan_prefix(&mut self, prefix: &[u8]) -> Result<Self::ScanIterator<'_>> {
        self.scan(prefix_range(prefix))
    }

    /// Applies all pending writes atomically.
    fn commit(self) -> Result<()>;

    /// Drops all pending writes.
    fn discard(self);
}

pub trait ScanIterator: DoubleEndedIterator<Item = Result<(Vec<u8>, Vec<u8>)>> {}

impl<I> ScanIterator for I where I: DoubleEndedIterator<Item = Result<(Vec<u8>, Vec<u8>)>> {}

/// The range of keys starting with `prefix`.
pub fn prefix_range(prefix: &[u8]) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let start = Bound::Included(prefix.to_vec());
    let end = match prefix.iter().rposition(|b| *b != 0xff) {
        Some(i) => Bound::Excluded(
            prefix[..i]
                .iter()
                .chain(std::iter::once(&(prefix[i] + 1)))
                .copied()
                .collect::<Vec<u8>>(),
        ),
        None => Bound::Unbounded,
    };
    (start, end)
}
