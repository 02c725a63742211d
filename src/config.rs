use std::path::PathBuf;

/// Configuration for the transactional key-value engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory for the write-ahead log. `None` keeps everything in memory
    /// (default: None)
    pub dir: Option<PathBuf>,

    /// fsync the WAL on every commit (default: true)
    pub sync_on_commit: bool,

    /// Maximum pending writes in a single transaction (default: 10_000)
    pub max_txn_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dir: None,
            sync_on_commit: true,
            max_txn_entries: 10_000,
        }
    }
}

impl EngineConfig {
    /// Create a durable config rooted at the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Default::default()
        }
    }

    /// Create a config for a purely in-memory engine
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Set whether commits fsync the WAL
    pub fn sync_on_commit(mut self, enabled: bool) -> Self {
        self.sync_on_commit = enabled;
        self
    }

    /// Set the pending write limit per transaction
    pub fn max_txn_entries(mut self, max: usize) -> Self {
        self.max_txn_entries = max;
        self
    }
}

/// Configuration for the card store
#[derive(Debug, Clone)]
pub struct CardStoreConfig {
    /// How many times a batch is attempted when its commit conflicts with a
    /// concurrent one (default: 8)
    pub max_commit_attempts: usize,
}

impl Default for CardStoreConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 8,
        }
    }
}

impl CardStoreConfig {
    /// Set the commit attempt limit. Values below 1 are treated as 1.
    pub fn max_commit_attempts(mut self, attempts: usize) -> Self {
        self.max_commit_attempts = attempts.max(1);
        self
    }
}
