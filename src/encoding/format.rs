//! Formats raw keys and values for log fields.

use itertools::Itertools as _;

use super::{keycode::CardKey, Key as _};

/// Formats encoded keys and values.
pub trait Formatter {
    /// Formats a key.
    fn key(key: &[u8]) -> String;

    /// Formats a value. Also takes the key to determine the kind of value.
    fn value(key: &[u8], value: &[u8]) -> String;

    /// Formats a key/value pair.
    fn key_value(key: &[u8], value: &[u8]) -> String {
        format!("{} => {}", Self::key(key), Self::value(key, value))
    }
}

/// Formats raw byte slices without any decoding.
pub struct Raw;

impl Raw {
    /// Formats raw bytes as escaped ASCII strings.
    pub fn bytes(bytes: &[u8]) -> String {
        let escaped = bytes
            .iter()
            .copied()
            .flat_map(std::ascii::escape_default)
            .collect_vec();
        format!("\"{}\"", String::from_utf8_lossy(&escaped))
    }
}

impl Formatter for Raw {
    fn key(key: &[u8]) -> String {
        Self::bytes(key)
    }

    fn value(_key: &[u8], value: &[u8]) -> String {
        Self::bytes(value)
    }
}

/// Formats card keys as `deck/sequence`. Values are opaque scheduling state
/// and only their size is shown.
pub struct Card;

impl Formatter for Card {
    fn key(key: &[u8]) -> String {
        match CardKey::decode(key) {
            Ok(card) => format!("{}/{}", card.deck, card.sequence),
            Err(_) => Raw::key(key),
        }
    }

    fn value(_key: &[u8], value: &[u8]) -> String {
        format!("<{} bytes>", value.len())
    }
}
