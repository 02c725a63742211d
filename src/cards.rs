//! Card store: scheduling state of every card, keyed by deck and sequence.
//!
//! Each operation runs in a single transaction. Writes are all-or-nothing; a
//! commit that loses a race with a concurrent one is retried from scratch, so
//! sequence allocation re-reads the deck's last card on every attempt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::algo::{Algorithm, SchedulingState};
use crate::config::CardStoreConfig;
use crate::encoding::format::{self, Formatter as _};
use crate::encoding::keycode::CardKey;
use crate::encoding::Key as _;
use crate::error::{Error, Result};
use crate::kv::{Engine, Transaction};
use crate::review::{CardId, Due, Review, ReviewItem, MAX_CARD_ID};

pub struct CardStore<E: Engine> {
    engine: E,
    algo: Arc<dyn Algorithm>,
    config: CardStoreConfig,
}

impl<E: Engine> CardStore<E> {
    pub fn new(engine: E, algo: Arc<dyn Algorithm>, config: CardStoreConfig) -> Self {
        Self {
            engine,
            algo,
            config,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Creates a card for every item of `review`.
    ///
    /// With a non-empty `new_deck_id` the cards start a new deck at sequence
    /// 1. Otherwise they are appended to `review.deck_id` after its last
    /// card, which must exist. Item card ids are ignored; the allocated ids
    /// are returned in input order.
    pub fn insert(&self, review: &Review, new_deck_id: &str) -> Result<Due> {
        let fresh = !new_deck_id.is_empty();
        let deck = if fresh {
            new_deck_id
        } else {
            review.deck_id.as_str()
        };
        if deck.is_empty() {
            return Err(Error::MissingDeckId);
        }

        let due = self.in_transaction("insert", deck, |txn| {
            let last = if fresh {
                0
            } else {
                find_max_sequence(txn, deck)?
            };

            let requested = review.items.len();
            if u64::from(last) + requested as u64 >= u64::from(MAX_CARD_ID) {
                return Err(Error::DeckFull {
                    deck: deck.to_string(),
                    last,
                    requested,
                });
            }

            let mut due = Due::new(deck);
            for (card_id, item) in (last + 1..).zip(&review.items) {
                let item = ReviewItem::new(card_id, item.quality);
                let state = self.algo.update(None, &item)?;
                txn.set(&CardKey::new(deck, card_id).encode(), state.into_bytes())?;
                due.card_ids.push(card_id);
            }
            Ok(due)
        })?;

        debug!(
            deck,
            count = due.len(),
            first = ?due.card_ids.first(),
            algo = self.algo.name(),
            "inserted cards"
        );
        Ok(due)
    }

    /// Applies every item of `review` to its existing card.
    pub fn update(&self, review: &Review) -> Result<Due> {
        let deck = review.deck_id.as_str();
        if deck.is_empty() {
            return Err(Error::MissingDeckId);
        }

        let due = self.in_transaction("update", deck, |txn| {
            let mut due = Due::new(deck);
            for item in &review.items {
                let key = CardKey::new(deck, item.card_id).encode();
                let prior = txn
                    .get(&key)?
                    .map(SchedulingState::from_bytes)
                    .ok_or_else(|| Error::CardIdNotExists {
                        deck: deck.to_string(),
                        card_id: item.card_id,
                    })?;

                let state = self.algo.update(Some(&prior), item)?;
                txn.set(&key, state.into_bytes())?;
                due.card_ids.push(item.card_id);
            }
            Ok(due)
        })?;

        debug!(deck, count = due.len(), algo = self.algo.name(), "updated cards");
        Ok(due)
    }

    /// Card ids of `deck` that are due at `as_of`, ascending. An unknown deck
    /// has no due cards.
    pub fn due(&self, deck: &str, as_of: DateTime<Utc>) -> Result<Due> {
        if deck.is_empty() {
            return Err(Error::MissingDeckId);
        }

        let mut txn = self.engine.begin_read()?;
        let mut due = Due::new(deck);
        for entry in txn.scan_prefix(&CardKey::prefix(deck))? {
            let (key, value) = entry?;
            if CardKey::sequence_in(&key, deck).is_none() {
                continue;
            }
            let state = SchedulingState::from_bytes(value);
            match self.algo.due(&state, as_of) {
                Some(card_id) => due.card_ids.push(card_id),
                None => debug!(card = %format::Card::key(&key), "not due"),
            }
        }

        debug!(deck, count = due.len(), version = txn.version(), "queried due cards");
        Ok(due)
    }

    /// Runs `body` in a write transaction and commits it, retrying the whole
    /// transaction on commit conflicts.
    fn in_transaction<'s, T>(
        &'s self,
        operation: &str,
        deck: &str,
        mut body: impl FnMut(&mut E::Transaction<'s>) -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 1;
        loop {
            let mut txn = self.engine.begin_write()?;
            let result = match body(&mut txn) {
                Ok(value) => txn.commit().map(|()| value),
                Err(e) => {
                    txn.discard();
                    Err(e)
                }
            };

            match result {
                Err(e) if e.is_conflict() && attempt < self.config.max_commit_attempts => {
                    warn!(operation, deck, attempt, error = %e, "retrying conflicting transaction");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

/// The highest card sequence stored for `deck`.
///
/// Seeks a reverse scan to a key past every valid sequence of the deck and
/// takes the first key that belongs to it. Fails with `DeckIdNotExists` if
/// the deck has no cards.
pub fn find_max_sequence<T: Transaction>(txn: &mut T, deck: &str) -> Result<CardId> {
    let range = CardKey::prefix(deck)..=CardKey::seek_past(deck);
    let mut scan = txn.scan(range)?;
    while let Some(entry) = scan.next_back() {
        let (key, _) = entry?;
        if let Some(sequence) = CardKey::sequence_in(&key, deck) {
            return Ok(sequence);
        }
    }
    Err(Error::DeckIdNotExists(deck.to_string()))
}
