use rand::prelude::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;
// --- 核心数据结构定义 ---

/// 花色 (Suit)
/// 对应葡萄牙牌的 Copas / Ouros / Espadas / Paus
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
pub enum Suit {
    Heart,   // 红心 Copas ♥️
    Diamond, // 方块 Ouros ♦️
    Spade,   // 黑桃 Espadas ♠️
    Club,    // 梅花 Paus ♣️
}

/// 点数 (Rank)
/// Bisca 使用 40 张牌：2-7、Q、J、K、A（没有 8、9、10）。
/// 变体按"牌力"从弱到强排列，因此派生的 `Ord` 就是比牌时的强弱顺序：
/// A > 7 > K > J > Q > 6 > 5 > 4 > 3 > 2
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
pub enum Rank {
    Two,
    Three,
    Four,
    Five,
    Six,
    Queen,
    Jack,
    King,
    Seven,
    Ace,
}

impl Rank {
    /// 每张牌的分值。A=11, 7=10, K=4, J=3, Q=2，其余为 0。
    /// 整副牌的总分恰好是 120。
    pub fn points(self) -> u32 {
        match self {
            Rank::Ace => 11,
            Rank::Seven => 10,
            Rank::King => 4,
            Rank::Jack => 3,
            Rank::Queen => 2,
            _ => 0,
        }
    }

    /// 牌力数值。仅用于展示和调试；比较强弱时直接用 `Ord` 即可。
    pub fn power(self) -> u8 {
        self as u8
    }
}

/// 单张牌 (Card)。创建后不可变。
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

impl Card {
    pub fn new(rank: Rank, suit: Suit) -> Card {
        Card { rank, suit }
    }

    pub fn points(self) -> u32 {
        self.rank.points()
    }

    pub fn power(self) -> u8 {
        self.rank.power()
    }
}

/// 一整副牌的张数
pub const DECK_SIZE: usize = 40;
/// 整副牌的总分值
pub const TOTAL_POINTS: u32 = 120;

// --- 实现辅助功能 ---

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", match self {
            Suit::Heart => "♥️",
            Suit::Diamond => "♦️",
            Suit::Spade => "♠️",
            Suit::Club => "♣️",
        })
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", match self {
            Rank::Two => "2",
            Rank::Three => "3",
            Rank::Four => "4",
            Rank::Five => "5",
            Rank::Six => "6",
            Rank::Queen => "Q",
            Rank::Jack => "J",
            Rank::King => "K",
            Rank::Seven => "7",
            Rank::Ace => "A",
        })
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.suit, self.rank)
    }
}

// --- 牌组生成 ---

/// 创建一副完整的 40 张 Bisca 牌（未洗牌）
pub fn full_deck() -> Vec<Card> {
    let suits = [Suit::Heart, Suit::Diamond, Suit::Spade, Suit::Club];
    let ranks = [
        Rank::Two, Rank::Three, Rank::Four, Rank::Five, Rank::Six,
        Rank::Queen, Rank::Jack, Rank::King, Rank::Seven, Rank::Ace,
    ];
    let mut deck = Vec::with_capacity(DECK_SIZE);
    for &suit in &suits {
        for &rank in &ranks {
            deck.push(Card { rank, suit });
        }
    }
    deck
}

/// 创建并洗好一副牌。每局开始时调用一次。
pub fn shuffled_deck() -> Vec<Card> {
    let mut deck = full_deck();
    let mut rng = rand::rng();
    deck.shuffle(&mut rng);
    deck
}

// --- 单元测试 ---
