//! Per-match game protocols behind one interface, plus the registry that maps a
//! game type to its engine.
//!
//! Engines keep their own match state behind a mutex and may be called from
//! outside the tick loop. Deadlines are the only admission control: an action
//! that arrives after its window is rejected, and an expired window is the only
//! way an in-flight step is abandoned.

mod auction_wars;
mod commit_reveal;
mod oracle_duel;
mod quiz_bowl;
mod strategy_arena;

pub use auction_wars::{AuctionWars, BoxHint, MysteryBox};
pub use oracle_duel::OracleDuel;
pub use quiz_bowl::{Question, QuestionBank, QuestionBankError, QuizBowl};
pub use strategy_arena::{Move, Payoffs, StrategyArena};

use crate::models::{canonical_json, sha256_hex, Address, GameParameters, GameType, MatchId};
use crate::ports::{Clock, PriceFeed};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("unknown match {0}")]
    UnknownMatch(MatchId),
    #[error("match {0} already exists")]
    DuplicateMatch(MatchId),
    #[error("match {0} already resolved")]
    AlreadyResolved(MatchId),
    #[error("match {0} cannot be resolved yet")]
    NotResolvable(MatchId),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("a match needs exactly two players, got {0}")]
    PlayerCount(usize),
    #[error("price unavailable: {0}")]
    PriceFeed(String),
}

/// A player's move in a commit-reveal game.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameAction {
    /// Hash from [`commitment_hash`] over the hidden payload and a salt.
    Commit { hash: String },
    RevealMove { choice: Move, salt: String },
    RevealBid { bid: u64, salt: String },
    RevealAnswer { answer: usize, salt: String },
}

/// Whether an action was taken. Rejections never change match state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Accepted,
    Rejected(String),
}

impl ActionOutcome {
    pub fn rejected(reason: impl Into<String>) -> Self {
        ActionOutcome::Rejected(reason.into())
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ActionOutcome::Accepted)
    }
}

/// Commitment over a revealed payload: `0x` + hex SHA-256 of `"{payload}:{salt}"`.
pub fn commitment_hash(payload: &str, salt: &str) -> String {
    format!("0x{}", sha256_hex(format!("{payload}:{salt}").as_bytes()))
}

/// Final result of a match as reported by its engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// None on a draw.
    pub winner: Option<Address>,
    pub scores: BTreeMap<Address, i64>,
    /// Game-specific statistics.
    pub result: serde_json::Value,
    /// Hash over winner, scores and result; see [`Outcome::compute_hash`].
    pub result_hash: String,
}

impl Outcome {
    pub fn new(
        winner: Option<Address>,
        scores: BTreeMap<Address, i64>,
        result: serde_json::Value,
    ) -> Self {
        let result_hash = Self::compute_hash(&winner, &scores, &result);
        Self {
            winner,
            scores,
            result,
            result_hash,
        }
    }

    /// Canonical-JSON SHA-256 over the outcome data, so anyone holding the data
    /// can check it against the hash recorded on-chain.
    pub fn compute_hash(
        winner: &Option<Address>,
        scores: &BTreeMap<Address, i64>,
        result: &serde_json::Value,
    ) -> String {
        let doc = serde_json::json!({
            "winner": winner,
            "scores": scores,
            "result": result,
        });
        format!("0x{}", sha256_hex(canonical_json(&doc).as_bytes()))
    }

    pub fn verify(&self) -> bool {
        Self::compute_hash(&self.winner, &self.scores, &self.result) == self.result_hash
    }
}

/// One game protocol. Match state is keyed by match id and owned by the engine.
#[async_trait]
pub trait GameEngine: Send + Sync {
    fn game_type(&self) -> GameType;

    async fn init_match(
        &self,
        match_id: MatchId,
        players: &[Address],
        params: &GameParameters,
    ) -> Result<(), GameError>;

    fn process_action(&self, match_id: MatchId, player: &str, action: &GameAction) -> ActionOutcome;

    fn is_resolvable(&self, match_id: MatchId) -> bool;

    /// Final outcome. A second call for the same match is rejected.
    async fn resolve(&self, match_id: MatchId) -> Result<Outcome, GameError>;

    /// Public view; never includes hidden information.
    fn get_state(&self, match_id: MatchId) -> Option<serde_json::Value>;

    fn validate_parameters(&self, params: &GameParameters) -> bool;
}

/// Game type → engine.
#[derive(Clone, Default)]
pub struct GameRegistry {
    engines: HashMap<GameType, Arc<dyn GameEngine>>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All four engines over the given clock, price feed and question bank.
    pub fn standard(clock: Arc<dyn Clock>, prices: Arc<dyn PriceFeed>, questions: QuestionBank) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(OracleDuel::new(clock.clone(), prices)));
        registry.register(Arc::new(StrategyArena::new(clock.clone())));
        registry.register(Arc::new(AuctionWars::new(clock.clone())));
        registry.register(Arc::new(QuizBowl::new(clock, questions)));
        registry
    }

    pub fn register(&mut self, engine: Arc<dyn GameEngine>) {
        self.engines.insert(engine.game_type(), engine);
    }

    pub fn get(&self, game_type: GameType) -> Option<Arc<dyn GameEngine>> {
        self.engines.get(&game_type).cloned()
    }
}

/// Lock a match table, recovering from a poisoned mutex.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Seat index of `player` in a two-player match.
pub(crate) fn seat_of(players: &[Address; 2], player: &str) -> Option<usize> {
    players.iter().position(|p| p == player)
}

pub(crate) fn two_players(players: &[Address]) -> Result<[Address; 2], GameError> {
    match players {
        [a, b] if a != b => Ok([a.clone(), b.clone()]),
        _ => Err(GameError::PlayerCount(players.len())),
    }
}

/// Seconds to milliseconds, floored at one second.
pub(crate) fn secs_to_ms(secs: i64) -> i64 {
    secs.max(1).saturating_mul(1_000)
}

/// Winner seat by higher score; None on a tie.
pub(crate) fn leader(scores: &[i64; 2]) -> Option<usize> {
    match scores[0].cmp(&scores[1]) {
        std::cmp::Ordering::Greater => Some(0),
        std::cmp::Ordering::Less => Some(1),
        std::cmp::Ordering::Equal => None,
    }
}

pub(crate) fn score_map(players: &[Address; 2], scores: &[i64; 2]) -> BTreeMap<Address, i64> {
    players.iter().cloned().zip(scores.iter().copied()).collect()
}
