//! Data structures for the arena: standings, rounds, match results, parameters.

pub mod amount;
mod game;
mod params;
mod player;
mod tournament;

pub use amount::Amount;
pub use game::{GameType, MatchId, MatchResult, Pairing};
pub use params::{
    canonical_json, sha256_hex, EvolutionRecord, GameParameters, Mutation, MutationOp,
    MutationSource, NUMERIC_FIELDS,
};
pub use player::{short_handle, Address, AgentStanding, DEFAULT_ELO};
pub use tournament::{
    ArenaError, ArenaResult, RoundData, TournamentConfig, TournamentFormat, TournamentId,
    TournamentState, TournamentStatus,
};
