//! Collaborator interfaces consumed by the orchestrator and the game engines,
//! plus the bounded retry wrapper used for every ledger write.

use crate::logic::RoundMetrics;
use crate::models::{
    amount, Address, Amount, GameParameters, GameType, MatchId, MatchResult, Mutation,
    TournamentConfig, TournamentFormat, TournamentId, TournamentState,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Transport or node failure; worth retrying.
    #[error("rpc failure: {0}")]
    Rpc(String),
    /// The transaction reverted.
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Io(String),
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("analysis service: {0}")]
pub struct AnalysisError(pub String);

#[derive(Debug, Error)]
#[error("price feed: {0}")]
pub struct PriceFeedError(pub String);

// ============================================================================
// Ledger
// ============================================================================

/// Tournament status as the ledger reports it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerTournamentStatus {
    Open,
    Active,
    Completed,
    Cancelled,
}

/// Tournament record as stored on the ledger.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LedgerTournament {
    pub id: TournamentId,
    pub name: String,
    pub game_type: GameType,
    pub format: TournamentFormat,
    pub status: LedgerTournamentStatus,
    #[serde(with = "amount")]
    pub entry_stake: Amount,
    pub max_participants: u32,
    pub round_count: u32,
    pub current_round: u32,
    pub params_hash: String,
    /// Set once `batch_distribute` has paid out this tournament's pool.
    #[serde(default)]
    pub prizes_distributed: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LedgerAgent {
    pub address: Address,
    pub handle: String,
    pub elo: i32,
}

/// Creation request submitted to the ledger.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NewTournament {
    pub name: String,
    pub game_type: GameType,
    pub format: TournamentFormat,
    #[serde(with = "amount")]
    pub entry_stake: Amount,
    pub max_participants: u32,
    pub round_count: u32,
    pub params_hash: String,
}

impl NewTournament {
    pub fn from_config(config: &TournamentConfig, params_hash: &str) -> Self {
        Self {
            name: config.name.clone(),
            game_type: config.game_type,
            format: config.format,
            entry_stake: config.entry_stake,
            max_participants: config.max_participants,
            round_count: config.round_count,
            params_hash: params_hash.to_string(),
        }
    }
}

/// On-chain client. Every write returns only after its transaction is confirmed.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn create_tournament(&self, spec: &NewTournament) -> Result<TournamentId, LedgerError>;
    async fn start_tournament(&self, id: TournamentId) -> Result<(), LedgerError>;
    async fn advance_round(&self, id: TournamentId) -> Result<(), LedgerError>;
    async fn evolve_parameters(&self, id: TournamentId, params_hash: &str) -> Result<(), LedgerError>;
    async fn update_elo(&self, agent: &str, new_elo: i32, won: bool) -> Result<(), LedgerError>;
    async fn record_seasonal_match(&self, winner: &str, loser: &str) -> Result<(), LedgerError>;
    async fn create_match(
        &self,
        tournament_id: TournamentId,
        player1: &str,
        player2: &str,
    ) -> Result<MatchId, LedgerError>;
    async fn start_match(&self, match_id: MatchId) -> Result<(), LedgerError>;
    async fn lock_escrow(&self, match_id: MatchId) -> Result<(), LedgerError>;
    async fn record_result(
        &self,
        match_id: MatchId,
        winner: Option<&str>,
        result_hash: &str,
    ) -> Result<(), LedgerError>;
    async fn open_betting(&self, match_id: MatchId) -> Result<(), LedgerError>;
    async fn close_betting(&self, match_id: MatchId) -> Result<(), LedgerError>;
    async fn settle_bets(&self, match_id: MatchId) -> Result<(), LedgerError>;
    async fn store_replay_commitment(&self, match_id: MatchId, hash: &str) -> Result<(), LedgerError>;
    async fn batch_distribute(
        &self,
        tournament_id: TournamentId,
        recipients: &[Address],
        amounts: &[Amount],
    ) -> Result<(), LedgerError>;
    async fn complete_tournament(&self, id: TournamentId) -> Result<(), LedgerError>;

    async fn get_tournament(&self, id: TournamentId) -> Result<Option<LedgerTournament>, LedgerError>;
    async fn get_agent(&self, address: &str) -> Result<Option<LedgerAgent>, LedgerError>;
    async fn get_tournament_participants(&self, id: TournamentId) -> Result<Vec<Address>, LedgerError>;
    async fn get_tournament_count(&self) -> Result<u64, LedgerError>;
    async fn get_match_count(&self) -> Result<u64, LedgerError>;
    async fn get_tournament_pool(&self, id: TournamentId) -> Result<Amount, LedgerError>;
}

// ============================================================================
// Snapshot store
// ============================================================================

/// Crash-recovery cache. Never the authority on tournament status.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save_tournament_state(&self, state: &TournamentState) -> Result<(), StoreError>;
    async fn load_tournament_state(&self, id: TournamentId) -> Result<Option<TournamentState>, StoreError>;
    async fn delete_tournament_state(&self, id: TournamentId) -> Result<(), StoreError>;
    async fn list_active_tournament_ids(&self) -> Result<Vec<TournamentId>, StoreError>;
    async fn save_match_result(&self, result: &MatchResult) -> Result<(), StoreError>;
    async fn get_match(&self, match_id: MatchId) -> Result<Option<MatchResult>, StoreError>;
    async fn get_matches_by_tournament(&self, id: TournamentId) -> Result<Vec<MatchResult>, StoreError>;
}

// ============================================================================
// Events and notifications
// ============================================================================

/// Lifecycle notifications. `name()` is the event name, the serde form the payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArenaEvent {
    TournamentCreated {
        tournament_id: TournamentId,
        name: String,
    },
    TournamentStarted {
        tournament_id: TournamentId,
        participants: usize,
    },
    TournamentPaused {
        tournament_id: TournamentId,
    },
    TournamentResumed {
        tournament_id: TournamentId,
    },
    TournamentCompleted {
        tournament_id: TournamentId,
        winner: Option<Address>,
    },
    MatchCreated {
        tournament_id: TournamentId,
        match_id: MatchId,
        round: u32,
        player1: Address,
        player2: Address,
    },
    MatchCompleted {
        tournament_id: TournamentId,
        match_id: MatchId,
        winner: Option<Address>,
        is_upset: bool,
    },
    RoundAdvanced {
        tournament_id: TournamentId,
        round: u32,
    },
    ParametersEvolved {
        tournament_id: TournamentId,
        round: u32,
        params_hash: String,
        mutations: usize,
    },
    EloUpdated {
        agent: Address,
        elo: i32,
    },
}

impl ArenaEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ArenaEvent::TournamentCreated { .. } => "tournament:created",
            ArenaEvent::TournamentStarted { .. } => "tournament:started",
            ArenaEvent::TournamentPaused { .. } => "tournament:paused",
            ArenaEvent::TournamentResumed { .. } => "tournament:resumed",
            ArenaEvent::TournamentCompleted { .. } => "tournament:completed",
            ArenaEvent::MatchCreated { .. } => "match:created",
            ArenaEvent::MatchCompleted { .. } => "match:completed",
            ArenaEvent::RoundAdvanced { .. } => "round:advanced",
            ArenaEvent::ParametersEvolved { .. } => "parameters:evolved",
            ArenaEvent::EloUpdated { .. } => "elo:updated",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Fire-and-forget event broadcaster.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ArenaEvent);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    Announcement,
    Results,
    Upset,
}

/// A social post queued for delivery elsewhere.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub kind: PostKind,
    pub tournament_id: Option<TournamentId>,
    pub text: String,
}

/// Best-effort outbound queue; enqueue never blocks on delivery.
pub trait NotificationQueue: Send + Sync {
    fn enqueue(&self, post: Post);
}

// ============================================================================
// Analysis, validation, prices
// ============================================================================

/// Optional model-assisted mutation planner.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// `Ok(None)` means "no suggestion"; the caller falls back to its rules.
    async fn analyze_evolution(
        &self,
        metrics: &RoundMetrics,
        game_type: GameType,
        params: &GameParameters,
        recent_results: &[MatchResult],
        round: u32,
    ) -> Result<Option<Vec<Mutation>>, AnalysisError>;
}

pub trait Validator: Send + Sync {
    /// Empty when the config is acceptable.
    fn validate_config(&self, config: &TournamentConfig) -> Vec<String>;
    fn sanitize_name(&self, name: &str) -> String;
}

/// Spot price source for Oracle Duel, in integer micro-units.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn current_price(&self, symbol: &str) -> Result<u64, PriceFeedError>;
}

// ============================================================================
// Clock
// ============================================================================

/// Wall-clock source in unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;

    fn now(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms())
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, ms: i64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Retry
// ============================================================================

/// Fixed attempt count with a fixed pause between attempts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

/// Run `op` until it succeeds or the policy's attempts are spent; the last
/// error is returned to the caller.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!("{label} failed (attempt {attempt}/{attempts}): {e}");
                attempt += 1;
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
            Err(e) => {
                warn!("{label} failed after {attempts} attempt(s): {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn retry_stops_at_first_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::ZERO,
        };
        let calls = &calls;
        let out: Result<u32, LedgerError> = with_retry(&policy, "op", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 2 {
                Err(LedgerError::Rpc("flaky".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(out, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            delay: Duration::ZERO,
        };
        let calls = &calls;
        let out: Result<(), LedgerError> = with_retry(&policy, "op", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(LedgerError::Rpc("down".into()))
        })
        .await;
        assert_eq!(out, Err(LedgerError::Rpc("down".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn manual_clock_moves_on_demand() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_ms(), 3_000);
        assert_eq!(clock.now().timestamp_millis(), 3_000);
    }

    #[test]
    fn event_names_and_payloads() {
        let e = ArenaEvent::RoundAdvanced {
            tournament_id: 3,
            round: 2,
        };
        assert_eq!(e.name(), "round:advanced");
        assert_eq!(e.payload()["round_advanced"]["round"], 2);
    }
}
