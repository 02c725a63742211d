use std::io;

use crate::review::{CardId, MAX_CARD_ID};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Review validation, reported before any store access.
    #[error("invalid quality {0}")]
    InvalidQuality(u8),
    #[error("card id {0} is not below the maximum {max}", max = MAX_CARD_ID)]
    InvalidCardId(CardId),
    #[error("card id given but no deck id")]
    CardIdWithoutDeckId,
    #[error("the review contains mixed new and existing card ids")]
    MixedCardId,
    #[error("the review contains no items")]
    EmptyReview,
    #[error("no deck id given")]
    MissingDeckId,
    #[error("invalid deck id {0:?}")]
    InvalidDeckId(String),

    // Lookups
    #[error("deck id {0} does not exist")]
    DeckIdNotExists(String),
    #[error("card id {card_id} does not exist in deck {deck}")]
    CardIdNotExists { deck: String, card_id: CardId },
    #[error("deck {deck} cannot hold {requested} more cards (last card id {last})")]
    DeckFull {
        deck: String,
        last: CardId,
        requested: usize,
    },

    // Scheduling state corruption, fatal to the enclosing transaction.
    #[error("failed to decode {0}")]
    Decode(String),
    #[error("failed to encode {0}")]
    Encode(String),

    // Store
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("transaction conflict on key {0}")]
    Conflict(String),
    #[error("transaction exceeds {0} pending writes")]
    TxnTooBig(usize),
    #[error("write in a read-only transaction")]
    ReadOnly,
    #[error("corrupted WAL: {0}")]
    CorruptedWal(String),
    #[error("WAL {0} is unusable after a failed write")]
    WalFailed(String),
    #[error("invalid WAL header")]
    InvalidHeader,
    #[error("mutex was poisoned")]
    MutexPoisoned,
    #[error("failed to lock {0}: {1}")]
    Lock(String, io::Error),
}

impl Error {
    /// Whether retrying the whole transaction may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}
