//! Pluggable scheduling algorithms.
//!
//! An algorithm owns the format of the per-card state it persists. The store
//! only moves that state around as opaque bytes.

pub mod sm2;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::review::{CardId, ReviewItem};

pub use sm2::Sm2;

/// Serialized per-card scheduling state, produced and read only by the
/// algorithm that wrote it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingState(Vec<u8>);

impl SchedulingState {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

pub trait Algorithm: Send + Sync {
    /// Short name for log fields.
    fn name(&self) -> &'static str;

    /// Computes the state after `item` was reviewed. `prior` is `None` for a
    /// card that has never been stored. Fails with `Error::Decode` if `prior`
    /// is not a state this algorithm wrote.
    fn update(&self, prior: Option<&SchedulingState>, item: &ReviewItem)
        -> Result<SchedulingState>;

    /// Returns the card id if the card is due at `as_of`. Undecodable state
    /// is never due.
    fn due(&self, state: &SchedulingState, as_of: DateTime<Utc>) -> Option<CardId>;
}
