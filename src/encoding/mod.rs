pub mod bincode;
pub mod format;
pub mod keycode;

use crate::error::Result;

/// Trait for encoding keys with order preservation.
///
/// Encoded keys must sort like the values they encode under byte-wise
/// comparison, so range and prefix scans visit them in order.
pub trait Key {
    /// Encode the key to bytes while preserving sort order
    fn encode(&self) -> Vec<u8>;

    /// Decode bytes back to the original key type
    fn decode(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

/// Trait for encoding values for storage.
///
/// Values don't need to preserve ordering.
pub trait Value {
    /// Encode the value to bytes
    fn encode(&self) -> Result<Vec<u8>>;

    /// Decode bytes back to the original value type
    fn decode(bytes: &[u8]) -> Result<Self>
    where
        Self: Sized;
}
