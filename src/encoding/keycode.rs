//! Card keys: the deck id followed by the card sequence as fixed-width,
//! zero-padded decimal.
//!
//! ```text
//!   01hq3v9d2k...   000042
//!  |-------------| |------|
//!     deck id       sequence (SEQUENCE_WIDTH digits)
//! ```
//!
//! All cards of a deck share the deck id as prefix, and zero padding makes
//! byte order match numeric order within the deck.

use super::Key;
use crate::error::{Error, Result};
use crate::review::{CardId, MAX_CARD_ID};

/// Number of decimal digits in the sequence part of a key.
pub const SEQUENCE_WIDTH: usize = 6;

const _: () = assert!((MAX_CARD_ID as u64) < 10u64.pow(SEQUENCE_WIDTH as u32));

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CardKey {
    pub deck: String,
    pub sequence: CardId,
}

impl CardKey {
    pub fn new(deck: impl Into<String>, sequence: CardId) -> Self {
        Self {
            deck: deck.into(),
            sequence,
        }
    }

    /// Prefix shared by every key of the deck.
    pub fn prefix(deck: &str) -> Vec<u8> {
        deck.as_bytes().to_vec()
    }

    /// A key that sorts after every valid key of the deck, for seeking a
    /// reverse scan to the deck's last card.
    pub fn seek_past(deck: &str) -> Vec<u8> {
        let mut key = Self::prefix(deck);
        key.extend(std::iter::repeat(b'9').take(SEQUENCE_WIDTH + 1));
        key
    }

    /// Returns the sequence if `key` is a card key of exactly this deck.
    ///
    /// Rejects keys of other decks whose id merely starts with `deck`.
    pub fn sequence_in(key: &[u8], deck: &str) -> Option<CardId> {
        let deck = deck.as_bytes();
        if key.len() != deck.len() + SEQUENCE_WIDTH || !key.starts_with(deck) {
            return None;
        }
        parse_sequence(&key[deck.len()..]).ok()
    }
}

impl Key for CardKey {
    fn encode(&self) -> Vec<u8> {
        let mut key = Self::prefix(&self.deck);
        key.extend_from_slice(
            format!("{:0width$}", self.sequence, width = SEQUENCE_WIDTH).as_bytes(),
        );
        key
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SEQUENCE_WIDTH {
            return Err(Error::Decode(format!(
                "card key: {} bytes is shorter than the sequence",
                bytes.len()
            )));
        }

        let (deck, sequence) = bytes.split_at(bytes.len() - SEQUENCE_WIDTH);
        let deck = std::str::from_utf8(deck)
            .map_err(|e| Error::Decode(format!("card key deck id: {}", e)))?;

        Ok(Self {
            deck: deck.to_string(),
            sequence: parse_sequence(sequence)?,
        })
    }
}

fn parse_sequence(digits: &[u8]) -> Result<CardId> {
    if digits.len() != SEQUENCE_WIDTH || !digits.iter().all(u8::is_ascii_digit) {
        return Err(Error::Decode(format!(
            "card key sequence: {:?} is not {} digits",
            String::from_utf8_lossy(digits),
            SEQUENCE_WIDTH
        )));
    }

    // Leading zeros are padding.
    Ok(digits
        .iter()
        .fold(0, |acc, d| acc * 10 + CardId::from(d - b'0')))
}
