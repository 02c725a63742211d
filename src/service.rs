//! Entry point for review submissions and due queries.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::cards::CardStore;
use crate::error::Result;
use crate::kv::Engine;
use crate::review::{Due, Review};
use crate::uid::IdGenerator;

/// Validates reviews and routes them to the card store.
pub struct SchedulingService<E: Engine> {
    cards: CardStore<E>,
    ids: Box<dyn IdGenerator>,
}

impl<E: Engine> SchedulingService<E> {
    pub fn new(cards: CardStore<E>, ids: Box<dyn IdGenerator>) -> Self {
        Self { cards, ids }
    }

    pub fn cards(&self) -> &CardStore<E> {
        &self.cards
    }

    /// Records a review batch and returns the ids of the affected cards, in
    /// input order.
    ///
    /// - no deck id: the cards start a new deck under a generated id
    /// - a deck id and only new cards: the cards are appended to the deck
    /// - a deck id and existing cards: the cards are updated
    ///
    /// A rejected review leaves the store untouched.
    pub fn submit_review(&self, review: &Review) -> Result<Due> {
        review.validate()?;

        if review.deck_id.is_empty() {
            let deck = self.ids.create();
            info!(deck = %deck, count = review.items.len(), "creating deck");
            return self.cards.insert(review, &deck);
        }

        if review.all_new() {
            self.cards.insert(review, "")
        } else {
            self.cards.update(review)
        }
    }

    /// Card ids of `deck_id` due at `as_of`, ascending. An empty deck id
    /// fails with [`MissingDeckId`](crate::Error::MissingDeckId).
    pub fn query_due(&self, deck_id: &str, as_of: DateTime<Utc>) -> Result<Due> {
        self.cards.due(deck_id, as_of)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::Sm2;
    use crate::clock::ManualClock;
    use crate::config::CardStoreConfig;
    use crate::error::Error;
    use crate::kv::MvccStore;
    use crate::review::{Quality, ReviewItem};
    use crate::uid::UuidGenerator;
    use chrono::{TimeDelta, TimeZone};
    use std::sync::Arc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 11, 1, 1, 0, 0).unwrap()
    }

    fn service() -> SchedulingService<MvccStore> {
        let algo = Arc::new(Sm2::new(Arc::new(ManualClock::new(now()))));
        let cards = CardStore::new(MvccStore::in_memory(), algo, CardStoreConfig::default());
        SchedulingService::new(cards, Box::new(UuidGenerator))
    }

    #[test]
    fn test_new_deck_gets_generated_id() {
        let service = service();
        let review = Review::for_new_deck(vec![ReviewItem::new_card(Quality::NO_REVIEW); 2]);

        let first = service.submit_review(&review).unwrap();
        let second = service.submit_review(&review).unwrap();

        assert_eq!(first.deck_id.len(), 32);
        assert_ne!(first.deck_id, second.deck_id);
        assert_eq!(first.card_ids, vec![1, 2]);
        assert_eq!(second.card_ids, vec![1, 2]);
        UuidGenerator.validate(&first.deck_id).unwrap();
    }

    #[test]
    fn test_routes_append_and_update() {
        let service = service();
        let created = service
            .submit_review(&Review::for_new_deck(vec![ReviewItem::new_card(
                Quality::NO_REVIEW,
            )]))
            .unwrap();
        let deck = created.deck_id;

        let appended = service
            .submit_review(&Review::new(
                deck.clone(),
                vec![ReviewItem::new_card(Quality::CORRECT_HARD); 2],
            ))
            .unwrap();
        assert_eq!(appended.card_ids, vec![2, 3]);

        let updated = service
            .submit_review(&Review::new(
                deck.clone(),
                vec![
                    ReviewItem::new(3, Quality::CORRECT_EASY),
                    ReviewItem::new(1, Quality::INCORRECT_EASY),
                ],
            ))
            .unwrap();
        assert_eq!(updated.deck_id, deck);
        assert_eq!(updated.card_ids, vec![3, 1]);
    }

    #[test]
    fn test_rejects_before_store_access() {
        let service = service();
        let invalid = Review::for_new_deck(vec![ReviewItem::new_card(Quality(9))]);
        assert!(matches!(
            service.submit_review(&invalid),
            Err(Error::InvalidQuality(9))
        ));
        assert_eq!(service.cards().engine().version(), 0);

        let mixed = Review::new(
            "deck",
            vec![
                ReviewItem::new(5, Quality::CORRECT_HARD),
                ReviewItem::new_card(Quality::CORRECT_HARD),
            ],
        );
        assert!(matches!(
            service.submit_review(&mixed),
            Err(Error::MixedCardId)
        ));
        assert!(matches!(
            service.submit_review(&Review::default()),
            Err(Error::EmptyReview)
        ));
    }

    #[test]
    fn test_query_due() {
        let service = service();
        let created = service
            .submit_review(&Review::for_new_deck(vec![ReviewItem::new_card(
                Quality::NO_REVIEW,
            )]))
            .unwrap();

        let due = service
            .query_due(&created.deck_id, now() + TimeDelta::days(2))
            .unwrap();
        assert_eq!(due.card_ids, vec![1]);
        assert!(matches!(
            service.query_due("", now()),
            Err(Error::MissingDeckId)
        ));
    }
}
