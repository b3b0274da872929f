//! In-process collaborators: a ledger, snapshot store, event sink, notification
//! queue and price feed that live entirely in memory. Used by the sandbox
//! binary and by tests; the ledger and store can be told to fail on demand.

use crate::games::lock;
use crate::models::{short_handle, Address, Amount, MatchId, MatchResult, TournamentId, TournamentState, TournamentStatus};
use crate::ports::{
    ArenaEvent, EventSink, Ledger, LedgerAgent, LedgerError, LedgerTournament,
    LedgerTournamentStatus, NewTournament, NotificationQueue, Post, PriceFeed, PriceFeedError,
    SnapshotStore, StoreError,
};
use async_trait::async_trait;
use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

// ============================================================================
// Ledger
// ============================================================================

/// Match record as the in-memory ledger keeps it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerMatch {
    pub tournament_id: TournamentId,
    pub player1: Address,
    pub player2: Address,
    pub started: bool,
    pub escrow_locked: bool,
    pub betting_open: bool,
    pub bets_settled: bool,
    pub winner: Option<Address>,
    pub result_hash: Option<String>,
    pub replay_commitment: Option<String>,
}

#[derive(Default)]
struct LedgerInner {
    tournaments: BTreeMap<TournamentId, LedgerTournament>,
    participants: BTreeMap<TournamentId, Vec<Address>>,
    pools: BTreeMap<TournamentId, Amount>,
    distributed: BTreeMap<TournamentId, Vec<(Address, Amount)>>,
    agents: BTreeMap<Address, LedgerAgent>,
    matches: BTreeMap<MatchId, LedgerMatch>,
    seasonal: Vec<(Address, Address)>,
    calls: Vec<&'static str>,
    /// Method name → remaining injected failures.
    failures: HashMap<&'static str, u32>,
}

impl LedgerInner {
    fn enter(&mut self, method: &'static str) -> Result<(), LedgerError> {
        self.calls.push(method);
        if let Some(left) = self.failures.get_mut(method) {
            if *left > 0 {
                *left -= 1;
                return Err(LedgerError::Rpc(format!("{method}: injected failure")));
            }
        }
        Ok(())
    }

    fn tournament_mut(&mut self, id: TournamentId) -> Result<&mut LedgerTournament, LedgerError> {
        self.tournaments
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("tournament {id}")))
    }

    fn match_mut(&mut self, id: MatchId) -> Result<&mut LedgerMatch, LedgerError> {
        self.matches
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("match {id}")))
    }
}

/// Ledger with confirmed-on-return writes. Tournament ids start at 0, match ids at 1.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: Mutex<LedgerInner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls to `method` fail with an RPC error.
    pub fn fail_next(&self, method: &'static str, times: u32) {
        lock(&self.inner).failures.insert(method, times);
    }

    pub fn register_agent(&self, address: &str, handle: &str, elo: i32) {
        lock(&self.inner).agents.insert(
            address.to_string(),
            LedgerAgent {
                address: address.to_string(),
                handle: handle.to_string(),
                elo,
            },
        );
    }

    /// Agent-side join: adds the participant and their stake to the pool.
    pub fn join_tournament(&self, id: TournamentId, address: &str) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        let t = inner.tournament_mut(id)?;
        if t.status != LedgerTournamentStatus::Open {
            return Err(LedgerError::Rejected(format!("tournament {id} is not open")));
        }
        let (stake, max) = (t.entry_stake, t.max_participants as usize);
        let participants = inner.participants.entry(id).or_default();
        if participants.iter().any(|p| p == address) {
            return Err(LedgerError::Rejected(format!("{address} already joined")));
        }
        if participants.len() >= max {
            return Err(LedgerError::Rejected(format!("tournament {id} is full")));
        }
        participants.push(address.to_string());
        *inner.pools.entry(id).or_default() += stake;
        Ok(())
    }

    pub fn set_tournament_status(&self, id: TournamentId, status: LedgerTournamentStatus) {
        if let Some(t) = lock(&self.inner).tournaments.get_mut(&id) {
            t.status = status;
        }
    }

    /// How many times `method` has been called, failures included.
    pub fn call_count(&self, method: &str) -> usize {
        lock(&self.inner).calls.iter().filter(|c| **c == method).count()
    }

    pub fn tournament(&self, id: TournamentId) -> Option<LedgerTournament> {
        lock(&self.inner).tournaments.get(&id).cloned()
    }

    pub fn match_record(&self, id: MatchId) -> Option<LedgerMatch> {
        lock(&self.inner).matches.get(&id).cloned()
    }

    pub fn agent(&self, address: &str) -> Option<LedgerAgent> {
        lock(&self.inner).agents.get(address).cloned()
    }

    pub fn distributions(&self, id: TournamentId) -> Option<Vec<(Address, Amount)>> {
        lock(&self.inner).distributed.get(&id).cloned()
    }

    pub fn seasonal_matches(&self) -> Vec<(Address, Address)> {
        lock(&self.inner).seasonal.clone()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn create_tournament(&self, spec: &NewTournament) -> Result<TournamentId, LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("create_tournament")?;
        let id = inner.tournaments.len() as TournamentId;
        inner.tournaments.insert(
            id,
            LedgerTournament {
                id,
                name: spec.name.clone(),
                game_type: spec.game_type,
                format: spec.format,
                status: LedgerTournamentStatus::Open,
                entry_stake: spec.entry_stake,
                max_participants: spec.max_participants,
                round_count: spec.round_count,
                current_round: 0,
                params_hash: spec.params_hash.clone(),
                prizes_distributed: false,
            },
        );
        debug!("ledger: tournament {id} created");
        Ok(id)
    }

    async fn start_tournament(&self, id: TournamentId) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("start_tournament")?;
        let t = inner.tournament_mut(id)?;
        if t.status != LedgerTournamentStatus::Open {
            return Err(LedgerError::Rejected(format!("tournament {id} is not open")));
        }
        t.status = LedgerTournamentStatus::Active;
        t.current_round = 1;
        Ok(())
    }

    async fn advance_round(&self, id: TournamentId) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("advance_round")?;
        let t = inner.tournament_mut(id)?;
        if t.status != LedgerTournamentStatus::Active {
            return Err(LedgerError::Rejected(format!("tournament {id} is not active")));
        }
        t.current_round += 1;
        Ok(())
    }

    async fn evolve_parameters(&self, id: TournamentId, params_hash: &str) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("evolve_parameters")?;
        inner.tournament_mut(id)?.params_hash = params_hash.to_string();
        Ok(())
    }

    async fn update_elo(&self, agent: &str, new_elo: i32, _won: bool) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("update_elo")?;
        inner
            .agents
            .entry(agent.to_string())
            .or_insert_with(|| LedgerAgent {
                address: agent.to_string(),
                handle: short_handle(agent),
                elo: new_elo,
            })
            .elo = new_elo;
        Ok(())
    }

    async fn record_seasonal_match(&self, winner: &str, loser: &str) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("record_seasonal_match")?;
        inner.seasonal.push((winner.to_string(), loser.to_string()));
        Ok(())
    }

    async fn create_match(
        &self,
        tournament_id: TournamentId,
        player1: &str,
        player2: &str,
    ) -> Result<MatchId, LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("create_match")?;
        inner.tournament_mut(tournament_id)?;
        let id = inner.matches.len() as MatchId + 1;
        inner.matches.insert(
            id,
            LedgerMatch {
                tournament_id,
                player1: player1.to_string(),
                player2: player2.to_string(),
                ..LedgerMatch::default()
            },
        );
        Ok(id)
    }

    async fn start_match(&self, match_id: MatchId) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("start_match")?;
        inner.match_mut(match_id)?.started = true;
        Ok(())
    }

    async fn lock_escrow(&self, match_id: MatchId) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("lock_escrow")?;
        inner.match_mut(match_id)?.escrow_locked = true;
        Ok(())
    }

    async fn record_result(
        &self,
        match_id: MatchId,
        winner: Option<&str>,
        result_hash: &str,
    ) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("record_result")?;
        let m = inner.match_mut(match_id)?;
        if m.result_hash.is_some() {
            return Err(LedgerError::Rejected(format!("match {match_id} already has a result")));
        }
        m.winner = winner.map(str::to_string);
        m.result_hash = Some(result_hash.to_string());
        Ok(())
    }

    async fn open_betting(&self, match_id: MatchId) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("open_betting")?;
        inner.match_mut(match_id)?.betting_open = true;
        Ok(())
    }

    async fn close_betting(&self, match_id: MatchId) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("close_betting")?;
        inner.match_mut(match_id)?.betting_open = false;
        Ok(())
    }

    async fn settle_bets(&self, match_id: MatchId) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("settle_bets")?;
        inner.match_mut(match_id)?.bets_settled = true;
        Ok(())
    }

    async fn store_replay_commitment(&self, match_id: MatchId, hash: &str) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("store_replay_commitment")?;
        inner.match_mut(match_id)?.replay_commitment = Some(hash.to_string());
        Ok(())
    }

    async fn batch_distribute(
        &self,
        tournament_id: TournamentId,
        recipients: &[Address],
        amounts: &[Amount],
    ) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("batch_distribute")?;
        inner.tournament_mut(tournament_id)?;
        if recipients.len() != amounts.len() {
            return Err(LedgerError::Rejected("recipients and amounts differ in length".into()));
        }
        if inner.distributed.contains_key(&tournament_id) {
            return Err(LedgerError::Rejected(format!(
                "tournament {tournament_id} already distributed"
            )));
        }
        let total = amounts
            .iter()
            .try_fold(0 as Amount, |acc, a| acc.checked_add(*a))
            .ok_or_else(|| LedgerError::Rejected("payout total overflows".into()))?;
        let pool = inner.pools.entry(tournament_id).or_default();
        if total > *pool {
            return Err(LedgerError::Rejected(format!("payout {total} exceeds pool {pool}")));
        }
        *pool -= total;
        let paid = recipients.iter().cloned().zip(amounts.iter().copied()).collect();
        inner.distributed.insert(tournament_id, paid);
        inner.tournament_mut(tournament_id)?.prizes_distributed = true;
        info!("ledger: tournament {tournament_id} paid {total} to {} recipient(s)", recipients.len());
        Ok(())
    }

    async fn complete_tournament(&self, id: TournamentId) -> Result<(), LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("complete_tournament")?;
        inner.tournament_mut(id)?.status = LedgerTournamentStatus::Completed;
        Ok(())
    }

    async fn get_tournament(&self, id: TournamentId) -> Result<Option<LedgerTournament>, LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("get_tournament")?;
        Ok(inner.tournaments.get(&id).cloned())
    }

    async fn get_agent(&self, address: &str) -> Result<Option<LedgerAgent>, LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("get_agent")?;
        Ok(inner.agents.get(address).cloned())
    }

    async fn get_tournament_participants(&self, id: TournamentId) -> Result<Vec<Address>, LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("get_tournament_participants")?;
        Ok(inner.participants.get(&id).cloned().unwrap_or_default())
    }

    async fn get_tournament_count(&self) -> Result<u64, LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("get_tournament_count")?;
        Ok(inner.tournaments.len() as u64)
    }

    async fn get_match_count(&self) -> Result<u64, LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("get_match_count")?;
        Ok(inner.matches.len() as u64)
    }

    async fn get_tournament_pool(&self, id: TournamentId) -> Result<Amount, LedgerError> {
        let mut inner = lock(&self.inner);
        inner.enter("get_tournament_pool")?;
        inner.tournament_mut(id)?;
        Ok(inner.pools.get(&id).copied().unwrap_or(0))
    }
}

// ============================================================================
// Snapshot store
// ============================================================================

/// Keeps snapshots as serialized JSON so a round trip exercises the same
/// encoding a durable store would use.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    states: Mutex<BTreeMap<TournamentId, String>>,
    matches: Mutex<BTreeMap<MatchId, MatchResult>>,
    failing: AtomicBool,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every write fails.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io("store unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save_tournament_state(&self, state: &TournamentState) -> Result<(), StoreError> {
        self.check_writable()?;
        let json = serde_json::to_string(state)?;
        lock(&self.states).insert(state.id, json);
        Ok(())
    }

    async fn load_tournament_state(&self, id: TournamentId) -> Result<Option<TournamentState>, StoreError> {
        let raw = lock(&self.states).get(&id).cloned();
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete_tournament_state(&self, id: TournamentId) -> Result<(), StoreError> {
        self.check_writable()?;
        lock(&self.states).remove(&id);
        Ok(())
    }

    async fn list_active_tournament_ids(&self) -> Result<Vec<TournamentId>, StoreError> {
        let states = lock(&self.states);
        let mut ids = Vec::new();
        for (id, json) in states.iter() {
            let state: TournamentState = serde_json::from_str(json)?;
            if state.status != TournamentStatus::Completed {
                ids.push(*id);
            }
        }
        Ok(ids)
    }

    async fn save_match_result(&self, result: &MatchResult) -> Result<(), StoreError> {
        self.check_writable()?;
        lock(&self.matches).insert(result.match_id, result.clone());
        Ok(())
    }

    async fn get_match(&self, match_id: MatchId) -> Result<Option<MatchResult>, StoreError> {
        Ok(lock(&self.matches).get(&match_id).cloned())
    }

    async fn get_matches_by_tournament(&self, id: TournamentId) -> Result<Vec<MatchResult>, StoreError> {
        Ok(lock(&self.matches)
            .values()
            .filter(|m| m.tournament_id == id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Events, notifications, prices
// ============================================================================

/// Writes every event to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: &ArenaEvent) {
        info!("[{}] {}", event.name(), event.payload());
    }
}

/// Keeps every event for later inspection.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<ArenaEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ArenaEvent> {
        lock(&self.events).clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(ArenaEvent::name).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &ArenaEvent) {
        lock(&self.events).push(event.clone());
    }
}

#[derive(Default)]
pub struct InMemoryNotificationQueue {
    posts: Mutex<Vec<Post>>,
}

impl InMemoryNotificationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posts(&self) -> Vec<Post> {
        lock(&self.posts).clone()
    }
}

impl NotificationQueue for InMemoryNotificationQueue {
    fn enqueue(&self, post: Post) {
        debug!("queued {:?} post: {}", post.kind, post.text);
        lock(&self.posts).push(post);
    }
}

/// Price feed with prices set by hand. Unknown symbols fail.
#[derive(Default)]
pub struct FixedPriceFeed {
    prices: Mutex<HashMap<String, u64>>,
}

impl FixedPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(self, symbol: &str, price: u64) -> Self {
        self.set(symbol, price);
        self
    }

    pub fn set(&self, symbol: &str, price: u64) {
        lock(&self.prices).insert(symbol.to_ascii_uppercase(), price);
    }
}

#[async_trait]
impl PriceFeed for FixedPriceFeed {
    async fn current_price(&self, symbol: &str) -> Result<u64, PriceFeedError> {
        lock(&self.prices)
            .get(&symbol.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| PriceFeedError(format!("no price for {symbol}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GameType, TournamentFormat};

    fn spec() -> NewTournament {
        NewTournament {
            name: "t".into(),
            game_type: GameType::OracleDuel,
            format: TournamentFormat::Swiss,
            entry_stake: 100,
            max_participants: 2,
            round_count: 1,
            params_hash: "0x0".into(),
        }
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let ledger = InMemoryLedger::new();
        ledger.fail_next("create_tournament", 2);
        assert!(ledger.create_tournament(&spec()).await.is_err());
        assert!(ledger.create_tournament(&spec()).await.is_err());
        assert_eq!(ledger.create_tournament(&spec()).await, Ok(0));
        assert_eq!(ledger.call_count("create_tournament"), 3);
    }

    #[tokio::test]
    async fn joins_fund_the_pool_and_distribution_is_guarded() {
        let ledger = InMemoryLedger::new();
        let id = ledger.create_tournament(&spec()).await.unwrap();
        ledger.join_tournament(id, "a").unwrap();
        ledger.join_tournament(id, "b").unwrap();
        assert!(ledger.join_tournament(id, "c").is_err());
        assert_eq!(ledger.get_tournament_pool(id).await, Ok(200));

        let to = vec!["a".to_string()];
        assert!(ledger.batch_distribute(id, &to, &[300]).await.is_err());
        assert!(!ledger.tournament(id).unwrap().prizes_distributed);
        assert!(ledger.batch_distribute(id, &to, &[150]).await.is_ok());
        assert!(ledger.tournament(id).unwrap().prizes_distributed);
        assert!(ledger.batch_distribute(id, &to, &[10]).await.is_err());
        assert_eq!(ledger.get_tournament_pool(id).await, Ok(50));
    }

    #[tokio::test]
    async fn snapshot_round_trip() {
        let store = InMemorySnapshotStore::new();
        let config = crate::models::TournamentConfig {
            name: "x".into(),
            game_type: GameType::QuizBowl,
            format: TournamentFormat::RoundRobin,
            entry_stake: u128::MAX,
            max_participants: 4,
            round_count: 3,
            game_parameters: Default::default(),
        };
        let state = TournamentState::new(7, config, chrono::Utc::now());
        store.save_tournament_state(&state).await.unwrap();
        assert_eq!(store.load_tournament_state(7).await.unwrap(), Some(state));
        assert_eq!(store.list_active_tournament_ids().await.unwrap(), vec![7]);

        store.set_failing(true);
        assert!(store.delete_tournament_state(7).await.is_err());
    }

    #[tokio::test]
    async fn price_feed_is_case_insensitive() {
        let feed = FixedPriceFeed::new().with_price("eth", 3_000);
        assert_eq!(feed.current_price("ETH").await.unwrap(), 3_000);
        assert!(feed.current_price("BTC").await.is_err());
    }
}
