//! Card Shuffling
//!
//! Every player commits to a secret, the round combines the reveals, and
//! the deck is shuffled with Fisher-Yates driven by the combined seed. No
//! player learns the order before the last reveal, and anyone holding the
//! round audit can replay the shuffle.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::ids::RoundId;
use crate::core::secret::Secret;
use crate::exchange::{ExchangeError, SeedExchange};
use crate::proof::combiner::CombinedSeed;
use crate::proof::verify::{verify_round, RoundAudit, VerificationError};

/// Cards in a standard deck.
pub const DECK_SIZE: usize = 52;

/// Card suit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Suit {
    /// ♣
    Clubs,
    /// ♦
    Diamonds,
    /// ♥
    Hearts,
    /// ♠
    Spades,
}

impl Suit {
    /// All suits in deck order.
    pub const ALL: [Suit; 4] = [Suit::Clubs, Suit::Diamonds, Suit::Hearts, Suit::Spades];

    fn letter(&self) -> char {
        match self {
            Self::Clubs => 'C',
            Self::Diamonds => 'D',
            Self::Hearts => 'H',
            Self::Spades => 'S',
        }
    }
}

/// A playing card. Rank 1 is the ace, 11-13 are J, Q, K.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Card {
    /// 1..=13.
    pub rank: u8,
    /// Suit.
    pub suit: Suit,
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rank {
            1 => write!(f, "A{}", self.suit.letter()),
            11 => write!(f, "J{}", self.suit.letter()),
            12 => write!(f, "Q{}", self.suit.letter()),
            13 => write!(f, "K{}", self.suit.letter()),
            n => write!(f, "{}{}", n, self.suit.letter()),
        }
    }
}

/// Unshuffled deck, suit-major.
pub fn standard_deck() -> Vec<Card> {
    Suit::ALL
        .iter()
        .flat_map(|&suit| (1..=13).map(move |rank| Card { rank, suit }))
        .collect()
}

/// Deterministic shuffle of a standard deck.
pub fn shuffle_deck(seed: &CombinedSeed) -> Vec<Card> {
    let mut deck = standard_deck();
    seed.rng_for(b"deck").shuffle(&mut deck);
    deck
}

/// A deck shuffled by a completed round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffledDeck {
    /// Round that produced the seed.
    pub round_id: RoundId,
    /// Seed driving the shuffle.
    pub seed: CombinedSeed,
    /// Shuffled cards, top first.
    pub cards: Vec<Card>,
    /// Published round data.
    pub audit: RoundAudit,
    dealt: usize,
}

impl ShuffledDeck {
    /// Take part in a round and shuffle with its seed.
    pub async fn shuffle<E: SeedExchange>(
        exchange: &mut E,
        round_id: RoundId,
        secret: Secret,
    ) -> Result<Self, ExchangeError> {
        let outcome = exchange.exchange(round_id, secret).await?;
        Ok(Self {
            round_id: outcome.round_id,
            seed: outcome.seed,
            cards: shuffle_deck(&outcome.seed),
            audit: outcome.audit,
            dealt: 0,
        })
    }

    /// Deal the next `count` cards; fewer if the deck runs out.
    pub fn deal(&mut self, count: usize) -> &[Card] {
        let start = self.dealt;
        self.dealt = (start + count).min(self.cards.len());
        &self.cards[start..self.dealt]
    }

    /// Cards not yet dealt.
    pub fn remaining(&self) -> usize {
        self.cards.len() - self.dealt
    }

    /// Recompute the seed from the audit and replay the shuffle.
    pub fn verify(&self) -> Result<bool, VerificationError> {
        let seed = verify_round(self.round_id, &self.audit)?;
        Ok(seed == self.seed && shuffle_deck(&seed) == self.cards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_standard_deck() {
        let deck = standard_deck();
        assert_eq!(deck.len(), DECK_SIZE);
        assert_eq!(deck.iter().collect::<BTreeSet<_>>().len(), DECK_SIZE);
        assert_eq!(deck[0].to_string(), "AC");
        assert_eq!(deck[51].to_string(), "KS");
    }

    #[test]
    fn test_shuffle_is_permutation_and_deterministic() {
        let seed = CombinedSeed([42; 32]);
        let a = shuffle_deck(&seed);
        let b = shuffle_deck(&seed);
        assert_eq!(a, b);
        assert_ne!(a, standard_deck());

        let mut sorted = a.clone();
        sorted.sort();
        let mut reference = standard_deck();
        reference.sort();
        assert_eq!(sorted, reference);

        assert_ne!(shuffle_deck(&CombinedSeed([43; 32])), a);
    }
}
