//! Application callers.
//!
//! - `cards.rs` - one-shot deck shuffle from a combined round seed
//! - `dice.rs`  - sequential rolls, one precommitted leaf per roll

pub mod cards;
pub mod dice;

pub use cards::{shuffle_deck, standard_deck, Card, ShuffledDeck, Suit, DECK_SIZE};
pub use dice::{roll_value, DiceRoller, DieRoll};
