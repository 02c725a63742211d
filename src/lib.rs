//! Spaced-repetition card scheduling over a transactional key-value store.
//!
//! Reviews go in through [`SchedulingService`], which validates them and hands
//! them to the [`CardStore`]. The card store keeps one entry per card, keyed by
//! deck id and a zero-padded sequence number, and lets a pluggable
//! [`Algorithm`] decide what is stored and when a card is due.

pub mod algo;
pub mod cards;
pub mod clock;
pub mod config;
pub mod encoding;
pub mod error;
pub mod flock;
mod hasher;
pub mod kv;
pub mod review;
pub mod service;
pub mod uid;

pub use algo::{Algorithm, SchedulingState, Sm2};
pub use cards::CardStore;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CardStoreConfig, EngineConfig};
pub use error::{Error, Result};
pub use kv::{Engine, MvccStore, Transaction};
pub use review::{CardId, Due, Quality, Review, ReviewItem, MAX_CARD_ID};
pub use service::SchedulingService;
pub use uid::{IdGenerator, UuidGenerator};
