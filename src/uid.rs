//! Deck id generation.

use uuid::Uuid;

use crate::error::{Error, Result};

/// Produces unique deck ids.
pub trait IdGenerator: Send + Sync {
    fn create(&self) -> String;

    /// Checks that `id` has the shape of an id this generator creates.
    fn validate(&self, id: &str) -> Result<()>;
}

const SIMPLE_LEN: usize = 32;

/// Random v4 UUIDs in simple form: 32 lowercase hex digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn create(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn validate(&self, id: &str) -> Result<()> {
        let strict = id.len() == SIMPLE_LEN
            && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if strict && Uuid::parse_str(id).is_ok() {
            Ok(())
        } else {
            Err(Error::InvalidDeckId(id.to_string()))
        }
    }
}
