//! Autonomous agent tournament arena: orchestration, commit-reveal game
//! engines, pairing and rating, and between-round parameter evolution.

pub mod config;
pub mod games;
pub mod logic;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod ports;
pub mod scheduler;
pub mod validation;

pub use config::ArenaConfig;
pub use games::{commitment_hash, ActionOutcome, GameAction, GameEngine, GameError, GameRegistry, Outcome};
pub use models::{
    AgentStanding, ArenaError, ArenaResult, GameParameters, GameType, MatchId, MatchResult,
    TournamentConfig, TournamentFormat, TournamentId, TournamentState, TournamentStatus,
};
pub use orchestrator::{ActiveMatch, InboxHandle, LedgerNotification, Orchestrator};
pub use scheduler::TickScheduler;
pub use validation::DefaultValidator;
