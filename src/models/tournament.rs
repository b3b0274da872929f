//! TournamentConfig, TournamentState and RoundData.

use crate::games::GameError;
use crate::models::amount::{self, Amount};
use crate::models::game::{GameType, MatchId, MatchResult, Pairing};
use crate::models::params::GameParameters;
use crate::models::player::{Address, AgentStanding};
use crate::ports::{LedgerError, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Ledger-assigned tournament identifier.
pub type TournamentId = u64;

/// Errors surfaced by orchestrator operations.
#[derive(Debug, Error)]
pub enum ArenaError {
    /// Config rejected before any side effect.
    #[error("invalid tournament config: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("tournament {0} not found")]
    TournamentNotFound(TournamentId),
    #[error("tournament {id} is {status}, expected {expected}")]
    InvalidState {
        id: TournamentId,
        status: TournamentStatus,
        expected: &'static str,
    },
    #[error("no engine registered for {0}")]
    NoEngine(GameType),
    #[error("prize distribution failed: {0}")]
    Distribution(String),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("snapshot store: {0}")]
    Store(#[from] StoreError),
    #[error("game engine: {0}")]
    Game(#[from] GameError),
}

/// Result type for orchestrator operations.
pub type ArenaResult<T> = Result<T, ArenaError>;

/// Pairing format.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentFormat {
    #[default]
    Swiss,
    SingleElimination,
    DoubleElimination,
    RoundRobin,
    BestOfN,
    RoyalRumble,
    Pentathlon,
}

impl TournamentFormat {
    /// Formats that knock players out and use bracket pairing.
    pub fn is_elimination(&self) -> bool {
        matches!(
            self,
            TournamentFormat::SingleElimination | TournamentFormat::DoubleElimination
        )
    }

    /// Losses after which a player is flagged eliminated, if the format eliminates at all.
    pub fn losses_to_eliminate(&self) -> Option<u32> {
        match self {
            TournamentFormat::SingleElimination => Some(1),
            TournamentFormat::DoubleElimination => Some(2),
            _ => None,
        }
    }
}

/// Lifecycle phase of a tournament.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TournamentStatus {
    /// Accepting participants.
    #[default]
    Open,
    /// Rounds being played.
    Active,
    /// Rounds frozen; resumes where it stopped.
    Paused,
    /// All rounds done; waiting for prize distribution to succeed.
    Completing,
    Completed,
}

impl fmt::Display for TournamentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TournamentStatus::Open => "open",
            TournamentStatus::Active => "active",
            TournamentStatus::Paused => "paused",
            TournamentStatus::Completing => "completing",
            TournamentStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Creation parameters. Everything except `game_parameters` is fixed for the
/// tournament's lifetime.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TournamentConfig {
    pub name: String,
    pub game_type: GameType,
    #[serde(default)]
    pub format: TournamentFormat,
    #[serde(with = "amount")]
    pub entry_stake: Amount,
    pub max_participants: u32,
    pub round_count: u32,
    #[serde(default)]
    pub game_parameters: GameParameters,
}

/// One round: its pairings, the matches created from them and their results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundData {
    pub round: u32,
    pub pairings: Vec<Pairing>,
    /// Match ids created from `pairings`, in creation order.
    #[serde(default)]
    pub match_ids: Vec<MatchId>,
    /// Player left unpaired this round.
    #[serde(default)]
    pub bye: Option<Address>,
    pub results: Vec<MatchResult>,
    pub completed: bool,
}

impl RoundData {
    pub fn new(round: u32, pairings: Vec<Pairing>, bye: Option<Address>) -> Self {
        Self {
            round,
            pairings,
            match_ids: Vec::new(),
            bye,
            results: Vec::new(),
            completed: false,
        }
    }

    /// Flip `completed`. Returns false if it had already flipped.
    pub fn mark_completed(&mut self) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        true
    }
}

/// Full orchestrator-side state of one tournament.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TournamentState {
    pub id: TournamentId,
    pub config: TournamentConfig,
    pub standings: Vec<AgentStanding>,
    pub rounds: Vec<RoundData>,
    /// 0 until the tournament starts.
    pub current_round: u32,
    pub status: TournamentStatus,
    /// Content hash of `config.game_parameters`.
    pub params_hash: String,
    /// Set once `batch_distribute` has succeeded, so a retried completion never pays twice.
    #[serde(default)]
    pub prizes_distributed: bool,
    pub created_at: DateTime<Utc>,
}

impl TournamentState {
    pub fn new(id: TournamentId, config: TournamentConfig, created_at: DateTime<Utc>) -> Self {
        let params_hash = config.game_parameters.content_hash();
        Self {
            id,
            config,
            standings: Vec::new(),
            rounds: Vec::new(),
            current_round: 0,
            status: TournamentStatus::Open,
            params_hash,
            prizes_distributed: false,
            created_at,
        }
    }

    pub fn standing(&self, address: &str) -> Option<&AgentStanding> {
        self.standings.iter().find(|s| s.address == address)
    }

    pub fn standing_mut(&mut self, address: &str) -> Option<&mut AgentStanding> {
        self.standings.iter_mut().find(|s| s.address == address)
    }

    pub fn elo_of(&self, address: &str) -> i32 {
        self.standing(address)
            .map(|s| s.elo)
            .unwrap_or(crate::models::player::DEFAULT_ELO)
    }

    pub fn round_data(&self, round: u32) -> Option<&RoundData> {
        self.rounds.iter().find(|r| r.round == round)
    }

    pub fn round_data_mut(&mut self, round: u32) -> Option<&mut RoundData> {
        self.rounds.iter_mut().find(|r| r.round == round)
    }

    pub fn is_full(&self) -> bool {
        self.standings.len() as u32 >= self.config.max_participants
    }

    /// Players not yet eliminated.
    pub fn remaining_players(&self) -> usize {
        self.standings.iter().filter(|s| !s.eliminated).count()
    }

    /// Standings ordered by points, then Elo, both descending.
    pub fn ranked_standings(&self) -> Vec<AgentStanding> {
        let mut ranked = self.standings.clone();
        ranked.sort_by(|a, b| b.points.cmp(&a.points).then(b.elo.cmp(&a.elo)));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TournamentConfig {
        TournamentConfig {
            name: "Spring Open".into(),
            game_type: GameType::StrategyArena,
            format: TournamentFormat::Swiss,
            entry_stake: 1_000,
            max_participants: 4,
            round_count: 3,
            game_parameters: GameParameters::defaults_for(GameType::StrategyArena),
        }
    }

    #[test]
    fn new_state_is_open_with_hash() {
        let t = TournamentState::new(7, config(), Utc::now());
        assert_eq!(t.status, TournamentStatus::Open);
        assert_eq!(t.current_round, 0);
        assert_eq!(t.params_hash, t.config.game_parameters.content_hash());
    }

    #[test]
    fn round_completes_once() {
        let mut r = RoundData::new(1, vec![Pairing::new("a", "b")], None);
        assert!(r.mark_completed());
        assert!(!r.mark_completed());
    }

    #[test]
    fn ranking_orders_points_then_elo() {
        let mut t = TournamentState::new(1, config(), Utc::now());
        t.standings = vec![
            AgentStanding::new("a").with_elo(1300),
            AgentStanding::new("b").with_elo(1100),
            AgentStanding::new("c").with_elo(1250),
        ];
        t.standing_mut("b").unwrap().add_win();
        let order: Vec<_> = t.ranked_standings().into_iter().map(|s| s.address).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TournamentStatus::Completing).unwrap();
        assert_eq!(json, "\"completing\"");
    }
}
