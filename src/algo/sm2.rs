//! SM-2 spaced repetition.
//!
//! Grades map to the SM-2 scale as `q = quality - 1`, so `NO_REVIEW` is only
//! meaningful when a card is created. After each review:
//!
//! ```text
//! EF' = max(1.3, EF - 0.8 + 0.28 q + 0.02 q²)
//! I   = round(6 × EF^(n-1)) days   if quality >= CORRECT_HARD
//!       1 day                      otherwise
//! n'  = n + 1 on a correct answer, 0 otherwise
//! ```
//!
//! `EF` and `n` are the values *before* the review. A newly created card is
//! always due one day later, whatever its first grade. `I` is capped at
//! [`MAX_INTERVAL_DAYS`].

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Algorithm, SchedulingState};
use crate::clock::Clock;
use crate::encoding::Value as _;
use crate::error::{Error, Result};
use crate::review::{CardId, Quality, ReviewItem};

pub const DEFAULT_EASINESS: f64 = 2.5;
pub const MIN_EASINESS: f64 = 1.3;

pub const EASINESS_CONST: f64 = -0.8;
pub const EASINESS_LINEAR: f64 = 0.28;
pub const EASINESS_QUADRATIC: f64 = 0.02;

pub const INTERVAL_BASE_DAYS: f64 = 6.0;

/// Longest interval between two reviews, about 100 years.
pub const MAX_INTERVAL_DAYS: f64 = 36_500.0;

/// Lowest grade that counts as a correct answer.
pub const CORRECT_THRESHOLD: Quality = Quality::CORRECT_HARD;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sm2State {
    pub card_id: CardId,
    pub easiness: f64,
    pub consecutive_correct: u32,
    /// Unix seconds.
    pub due: i64,
}

pub struct Sm2 {
    clock: Arc<dyn Clock>,
}

impl Sm2 {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Algorithm for Sm2 {
    fn name(&self) -> &'static str {
        "sm2"
    }

    fn update(
        &self,
        prior: Option<&SchedulingState>,
        item: &ReviewItem,
    ) -> Result<SchedulingState> {
        let now = self.clock.now();
        let next = match prior {
            Some(state) => {
                let old = Sm2State::decode(state.as_bytes())?;
                update(&old, item, now)?
            }
            None => create(item, now)?,
        };
        Ok(SchedulingState::from_bytes(next.encode()?))
    }

    fn due(&self, state: &SchedulingState, as_of: DateTime<Utc>) -> Option<CardId> {
        match Sm2State::decode(state.as_bytes()) {
            Ok(state) if state.due < as_of.timestamp() => Some(state.card_id),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "skipping undecodable sm2 state");
                None
            }
        }
    }
}

/// State of a card seen for the first time.
pub fn create(item: &ReviewItem, now: DateTime<Utc>) -> Result<Sm2State> {
    let (easiness_factor, consecutive_correct) = if item.quality == Quality::NO_REVIEW {
        (DEFAULT_EASINESS, 0)
    } else {
        (easiness(DEFAULT_EASINESS, item.quality), 1)
    };

    Ok(Sm2State {
        card_id: item.card_id,
        easiness: easiness_factor,
        consecutive_correct,
        due: due_after(now, 1.0)?,
    })
}

/// State after reviewing a card that was already scheduled.
pub fn update(old: &Sm2State, item: &ReviewItem, now: DateTime<Utc>) -> Result<Sm2State> {
    let correct = item.quality >= CORRECT_THRESHOLD;

    let (days, consecutive_correct) = if correct {
        let exponent = i32::try_from(old.consecutive_correct)
            .unwrap_or(i32::MAX)
            .saturating_sub(1);
        (
            (INTERVAL_BASE_DAYS * old.easiness.powi(exponent)).min(MAX_INTERVAL_DAYS),
            old.consecutive_correct.saturating_add(1),
        )
    } else {
        (1.0, 0)
    };

    Ok(Sm2State {
        card_id: item.card_id,
        easiness: easiness(old.easiness, item.quality),
        consecutive_correct,
        due: due_after(now, days)?,
    })
}

pub fn easiness(old: f64, quality: Quality) -> f64 {
    let q = f64::from(quality.0) - 1.0;
    let value = old + EASINESS_CONST + EASINESS_LINEAR * q + EASINESS_QUADRATIC * q * q;
    value.max(MIN_EASINESS)
}

/// Unix seconds `days` (rounded) after `now`.
fn due_after(now: DateTime<Utc>, days: f64) -> Result<i64> {
    let days = days.round();
    let overflow = || Error::Encode(format!("sm2 due date {} days after {}", days, now));

    if !days.is_finite() || days.abs() >= i64::MAX as f64 {
        return Err(overflow());
    }
    let delta = TimeDelta::try_days(days as i64).ok_or_else(overflow)?;
    let due = now.checked_add_signed(delta).ok_or_else(overflow)?;
    Ok(due.timestamp())
}
