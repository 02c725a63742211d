//! Review submissions and their validation.
//!
//! A [`Review`] is a batch of graded cards for one deck. An empty deck id asks
//! for a new deck; a card id of 0 asks for a new card. Validation runs before
//! any store access so a rejected batch never touches persisted state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Per-deck card sequence number. 0 means "not yet allocated".
pub type CardId = u32;

/// Exclusive upper bound for card ids. Bounded by the width of the decimal
/// sequence in store keys.
pub const MAX_CARD_ID: CardId = 100_000;

/// Self-assessed grade of a review, on a 7-level scale.
///
/// Raw grades come from callers and may be out of range; [`Review::validate`]
/// rejects those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quality(pub u8);

impl Quality {
    /// The card was added but not reviewed.
    pub const NO_REVIEW: Quality = Quality(0);
    /// Total blackout, complete failure to recall.
    pub const INCORRECT_BLACKOUT: Quality = Quality(1);
    /// Incorrect, but the answer felt familiar once seen.
    pub const INCORRECT_FAMILIAR: Quality = Quality(2);
    /// Incorrect, but the answer seemed easy to remember once seen.
    pub const INCORRECT_EASY: Quality = Quality(3);
    /// Correct, with significant difficulty.
    pub const CORRECT_HARD: Quality = Quality(4);
    /// Correct, after some hesitation.
    pub const CORRECT_EFFORT: Quality = Quality(5);
    /// Correct, with perfect recall.
    pub const CORRECT_EASY: Quality = Quality(6);

    pub fn is_valid(self) -> bool {
        self <= Self::CORRECT_EASY
    }

    pub fn validate(self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::InvalidQuality(self.0))
        }
    }
}

impl From<u8> for Quality {
    fn from(grade: u8) -> Self {
        Quality(grade)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A graded card. `card_id == 0` marks a card that does not exist yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub card_id: CardId,
    pub quality: Quality,
}

impl ReviewItem {
    pub fn new(card_id: CardId, quality: Quality) -> Self {
        Self { card_id, quality }
    }

    /// An item for a card that has not been allocated yet.
    pub fn new_card(quality: Quality) -> Self {
        Self::new(0, quality)
    }

    pub fn is_new(&self) -> bool {
        self.card_id == 0
    }
}

/// A batch of review items for one deck. An empty `deck_id` asks for a new
/// deck.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub deck_id: String,
    pub items: Vec<ReviewItem>,
}

impl Review {
    pub fn new(deck_id: impl Into<String>, items: Vec<ReviewItem>) -> Self {
        Self {
            deck_id: deck_id.into(),
            items,
        }
    }

    /// A review that creates a new deck.
    pub fn for_new_deck(items: Vec<ReviewItem>) -> Self {
        Self::new(String::new(), items)
    }

    /// Validate the review, stopping at the first violated rule:
    ///
    /// - a review carries at least one item
    /// - no card id without a deck id
    /// - card ids stay below [`MAX_CARD_ID`]
    /// - qualities are in range
    /// - with a deck id, card ids are either all 0 or all non-zero
    pub fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(Error::EmptyReview);
        }

        let has_deck = !self.deck_id.is_empty();
        let mut any_new = false;
        let mut any_existing = false;

        for item in &self.items {
            if !item.is_new() && !has_deck {
                return Err(Error::CardIdWithoutDeckId);
            }

            if item.card_id >= MAX_CARD_ID {
                return Err(Error::InvalidCardId(item.card_id));
            }

            item.quality.validate()?;

            if item.is_new() {
                any_new = true;
            } else {
                any_existing = true;
            }
        }

        if has_deck && any_new && any_existing {
            return Err(Error::MixedCardId);
        }

        Ok(())
    }

    /// Whether the batch only adds cards. Decided by the first item, which is
    /// enough once the review has been validated.
    pub fn all_new(&self) -> bool {
        self.items.first().is_some_and(ReviewItem::is_new)
    }
}

/// Card ids of one deck, ascending for due queries and in input order for
/// submitted reviews.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Due {
    pub deck_id: String,
    pub card_ids: Vec<CardId>,
}

impl Due {
    pub fn new(deck_id: impl Into<String>) -> Self {
        Self {
            deck_id: deck_id.into(),
            card_ids: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.card_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.card_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(ids: &[CardId]) -> Vec<ReviewItem> {
        ids.iter()
            .map(|&id| ReviewItem::new(id, Quality::CORRECT_HARD))
            .collect()
    }

    #[test]
    fn test_validate_valid() {
        let review = Review::new(
            "hi",
            vec![
                ReviewItem::new_card(Quality(4)),
                ReviewItem::new_card(Quality(3)),
                ReviewItem::new_card(Quality(0)),
            ],
        );
        assert!(review.validate().is_ok());
    }

    #[test]
    fn test_validate_all_new_with_deck() {
        assert!(Review::new("d", items(&[0, 0, 0])).validate().is_ok());
    }

    #[test]
    fn test_validate_all_existing_with_deck() {
        assert!(Review::new("d", items(&[1, 2, 3])).validate().is_ok());
    }

    #[test]
    fn test_validate_new_deck_without_card_ids() {
        assert!(Review::for_new_deck(items(&[0, 0])).validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_quality() {
        let review = Review::for_new_deck(vec![
            ReviewItem::new_card(Quality(4)),
            ReviewItem::new_card(Quality(3)),
            ReviewItem::new_card(Quality(10)),
        ]);
        assert!(matches!(review.validate(), Err(Error::InvalidQuality(10))));
    }

    #[test]
    fn test_validate_card_id_without_deck_id() {
        let review = Review::for_new_deck(items(&[5]));
        assert!(matches!(review.validate(), Err(Error::CardIdWithoutDeckId)));
    }

    #[test]
    fn test_validate_mixed_card_ids() {
        let review = Review::new("d", items(&[5, 0, 7]));
        assert!(matches!(review.validate(), Err(Error::MixedCardId)));
    }

    #[test]
    fn test_validate_card_id_at_max() {
        let review = Review::new("d", items(&[MAX_CARD_ID]));
        assert!(matches!(
            review.validate(),
            Err(Error::InvalidCardId(MAX_CARD_ID))
        ));

        let review = Review::new("d", items(&[MAX_CARD_ID - 1]));
        assert!(review.validate().is_ok());
    }

    #[test]
    fn test_validate_short_circuits_in_rule_order() {
        // Missing deck id is reported before the bad quality on the same item.
        let review = Review::for_new_deck(vec![ReviewItem::new(3, Quality(9))]);
        assert!(matches!(review.validate(), Err(Error::CardIdWithoutDeckId)));

        // Card id bound before quality.
        let review = Review::new("d", vec![ReviewItem::new(MAX_CARD_ID, Quality(9))]);
        assert!(matches!(review.validate(), Err(Error::InvalidCardId(_))));

        // Per-item rules before the mixed check.
        let review = Review::new(
            "d",
            vec![ReviewItem::new(1, Quality(4)), ReviewItem::new(0, Quality(8))],
        );
        assert!(matches!(review.validate(), Err(Error::InvalidQuality(8))));
    }

    #[test]
    fn test_validate_empty_review() {
        assert!(matches!(
            Review::new("d", Vec::new()).validate(),
            Err(Error::EmptyReview)
        ));
    }

    #[test]
    fn test_all_new() {
        assert!(Review::new("hi", items(&[0, 0])).all_new());
        assert!(!Review::new("hi", items(&[3, 4])).all_new());
        assert!(!Review::default().all_new());
    }

    #[test]
    fn test_quality_ordering() {
        assert!(Quality::INCORRECT_EASY < Quality::CORRECT_HARD);
        assert!(Quality::CORRECT_EASY.is_valid());
        assert!(!Quality(7).is_valid());
    }
}
