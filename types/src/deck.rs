//! Canonical playing-card deck.
//!
//! Cards are indexed `0..=51`, where:
//! - suit = index / 13, in the order Spades, Hearts, Diamonds, Clubs
//! - rank = index % 13, from Ace (0) to King (12)
//!
//! Both players build the same unshuffled deck, so a card position is a shared
//! reference once the on-chain shuffle permutes it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Total cards in a standard deck.
pub const DECK_SIZE: usize = 52;

/// Ranks per suit.
const RANKS_PER_SUIT: u8 = 13;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Suit {
    Spades,
    Hearts,
    Diamonds,
    Clubs,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Spades, Suit::Hearts, Suit::Diamonds, Suit::Clubs];

    pub fn symbol(self) -> char {
        match self {
            Suit::Spades => '♠',
            Suit::Hearts => '♥',
            Suit::Diamonds => '♦',
            Suit::Clubs => '♣',
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    Ace,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
}

impl Rank {
    pub const ALL: [Rank; 13] = [
        Rank::Ace,
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
    ];

    /// Returns the 1-based value (1..=13), where 1 is Ace and 13 is King.
    pub fn value(self) -> u8 {
        self as u8 + 1
    }

    pub fn label(self) -> &'static str {
        match self {
            Rank::Ace => "A",
            Rank::Two => "2",
            Rank::Three => "3",
            Rank::Four => "4",
            Rank::Five => "5",
            Rank::Six => "6",
            Rank::Seven => "7",
            Rank::Eight => "8",
            Rank::Nine => "9",
            Rank::Ten => "10",
            Rank::Jack => "J",
            Rank::Queen => "Q",
            Rank::King => "K",
        }
    }
}

/// A card is a plain value: two cards with the same suit and rank are the same card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    pub suit: Suit,
    pub rank: Rank,
}

impl Card {
    pub const fn new(suit: Suit, rank: Rank) -> Self {
        Self { suit, rank }
    }

    pub fn value(&self) -> u8 {
        self.rank.value()
    }

    /// Position of this card in the deck returned by [build_deck].
    pub fn index(&self) -> u8 {
        self.suit as u8 * RANKS_PER_SUIT + self.rank as u8
    }

    /// Returns `None` if `index` is outside `0..52`.
    pub fn from_index(index: u8) -> Option<Self> {
        let suit = *Suit::ALL.get(usize::from(index / RANKS_PER_SUIT))?;
        let rank = Rank::ALL[usize::from(index % RANKS_PER_SUIT)];
        Some(Self { suit, rank })
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.suit.symbol(), self.rank.label())
    }
}

/// Build the unshuffled reference deck (suits outer, ranks inner).
pub fn build_deck() -> [Card; DECK_SIZE] {
    let mut deck = [Card::new(Suit::Spades, Rank::Ace); DECK_SIZE];
    for (suit_index, suit) in Suit::ALL.iter().enumerate() {
        for (rank_index, rank) in Rank::ALL.iter().enumerate() {
            deck[suit_index * Rank::ALL.len() + rank_index] = Card::new(*suit, *rank);
        }
    }
    deck
}
