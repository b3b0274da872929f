//! Game types, pairings and match results.

use crate::models::player::Address;
use crate::models::tournament::TournamentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger-assigned match identifier.
pub type MatchId = u64;

/// Which protocol a tournament's matches are played under.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    OracleDuel,
    StrategyArena,
    AuctionWars,
    QuizBowl,
}

impl GameType {
    pub const ALL: [GameType; 4] = [
        GameType::OracleDuel,
        GameType::StrategyArena,
        GameType::AuctionWars,
        GameType::QuizBowl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::OracleDuel => "oracle_duel",
            GameType::StrategyArena => "strategy_arena",
            GameType::AuctionWars => "auction_wars",
            GameType::QuizBowl => "quiz_bowl",
        }
    }
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two agents scheduled to meet in a round.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Pairing {
    pub player1: Address,
    pub player2: Address,
}

impl Pairing {
    pub fn new(player1: impl Into<Address>, player2: impl Into<Address>) -> Self {
        Self {
            player1: player1.into(),
            player2: player2.into(),
        }
    }

    pub fn involves(&self, address: &str) -> bool {
        self.player1 == address || self.player2 == address
    }

    /// True if this pairing is the same two agents as `a` vs `b`, in either order.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.player1 == a && self.player2 == b) || (self.player1 == b && self.player2 == a)
    }
}

/// Settled result of one match. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_id: MatchId,
    pub tournament_id: TournamentId,
    pub round: u32,
    pub player1: Address,
    pub player2: Address,
    /// None on a draw.
    pub winner: Option<Address>,
    /// None on a draw.
    pub loser: Option<Address>,
    pub is_draw: bool,
    pub is_upset: bool,
    pub game_type: GameType,
    /// Per-game statistics, opaque to the orchestrator.
    pub stats: serde_json::Value,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl MatchResult {
    /// Both participants, in pairing order.
    pub fn players(&self) -> [&str; 2] {
        [self.player1.as_str(), self.player2.as_str()]
    }
}
