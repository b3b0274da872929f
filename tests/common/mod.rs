//! Shared harness: an orchestrator over in-memory collaborators and a manual clock.

#![allow(dead_code)]

use arena_orchestrator::games::{AuctionWars, OracleDuel, QuizBowl, QuestionBank, StrategyArena};
use arena_orchestrator::memory::{
    FixedPriceFeed, InMemoryLedger, InMemoryNotificationQueue, InMemorySnapshotStore,
    RecordingEventSink,
};
use arena_orchestrator::ports::{AnalysisService, Clock, ManualClock};
use arena_orchestrator::{
    ArenaConfig, DefaultValidator, GameParameters, GameRegistry, GameType, LedgerNotification,
    Orchestrator, TournamentConfig, TournamentFormat, TournamentId,
};
use std::sync::Arc;
use std::time::Duration;

pub const SYMBOL: &str = "ETH";
pub const STAKE: u128 = 1_000;

/// Longer than any evolved Oracle Duel duration plus grace.
pub const PAST_ANY_DEADLINE: Duration = Duration::from_secs(4_000);

/// Longer than one default commit window plus grace, for any game.
pub const PAST_ONE_WINDOW: Duration = Duration::from_secs(200);

pub fn agent(i: usize) -> String {
    format!("0x{i:040x}")
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub ledger: Arc<InMemoryLedger>,
    pub store: Arc<InMemorySnapshotStore>,
    pub events: Arc<RecordingEventSink>,
    pub posts: Arc<InMemoryNotificationQueue>,
    pub clock: Arc<ManualClock>,
    pub prices: Arc<FixedPriceFeed>,
}

pub fn registry(clock: Arc<dyn Clock>, prices: Arc<FixedPriceFeed>) -> Arc<GameRegistry> {
    let mut registry = GameRegistry::new();
    registry.register(Arc::new(OracleDuel::with_seed(clock.clone(), prices, 7)));
    registry.register(Arc::new(StrategyArena::new(clock.clone())));
    registry.register(Arc::new(AuctionWars::with_seed(clock.clone(), 7)));
    registry.register(Arc::new(QuizBowl::with_seed(clock, QuestionBank::builtin(), 7)));
    Arc::new(registry)
}

fn config() -> ArenaConfig {
    ArenaConfig {
        retry_delay_ms: 0,
        ..ArenaConfig::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_parts(
            Arc::new(InMemoryLedger::new()),
            Arc::new(InMemorySnapshotStore::new()),
        )
    }

    /// A fresh orchestrator over existing ledger and store, as after a restart.
    pub fn with_parts(ledger: Arc<InMemoryLedger>, store: Arc<InMemorySnapshotStore>) -> Self {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let prices = Arc::new(FixedPriceFeed::new().with_price(SYMBOL, 3_000));
        let events = Arc::new(RecordingEventSink::new());
        let posts = Arc::new(InMemoryNotificationQueue::new());
        let registry = registry(clock.clone(), prices.clone());
        let orchestrator = Orchestrator::new(
            ledger.clone(),
            Arc::new(DefaultValidator::with_registry(registry.clone())),
            registry,
            clock.clone(),
            config(),
        )
        .with_store(store.clone())
        .with_events(events.clone())
        .with_notifications(posts.clone());
        Self {
            orchestrator,
            ledger,
            store,
            events,
            posts,
            clock,
            prices,
        }
    }

    pub fn with_analysis(mut self, service: Arc<dyn AnalysisService>) -> Self {
        self.orchestrator = self.orchestrator.with_analysis(service);
        self
    }

    pub async fn create(&mut self, game_type: GameType, players: u32, rounds: u32) -> TournamentId {
        let game_parameters = match game_type {
            GameType::OracleDuel => GameParameters {
                duration_secs: Some(60),
                token_symbol: Some(SYMBOL.to_string()),
                ..GameParameters::default()
            },
            _ => GameParameters::default(),
        };
        self.orchestrator
            .create_tournament(TournamentConfig {
                name: "Test Cup".to_string(),
                game_type,
                format: TournamentFormat::Swiss,
                entry_stake: STAKE,
                max_participants: players,
                round_count: rounds,
                game_parameters,
            })
            .await
            .unwrap()
    }

    /// Let `turns` commit windows lapse with nobody acting, ticking after each.
    /// Engines settle one lapsed turn per poll.
    pub async fn let_turns_lapse(&mut self, turns: usize) {
        for _ in 0..turns {
            self.clock.advance(PAST_ONE_WINDOW);
            self.orchestrator.tick().await;
        }
    }

    /// Join on the ledger and queue the notification, as a ledger listener would.
    pub fn join(&self, id: TournamentId, count: usize) {
        let inbox = self.orchestrator.inbox();
        for i in 0..count {
            self.ledger.join_tournament(id, &agent(i)).unwrap();
            inbox.push(LedgerNotification::ParticipantJoined {
                tournament_id: id,
                address: agent(i),
            });
        }
    }

    /// Set the closing price and let every open duel run out.
    pub async fn finish_duels(&mut self, price: u64) {
        self.prices.set(SYMBOL, price);
        self.clock.advance(PAST_ANY_DEADLINE);
        self.orchestrator.tick().await;
    }

    pub fn count_events(&self, name: &str) -> usize {
        self.events.names().iter().filter(|n| **n == name).count()
    }
}
