//! Sandbox runner: the orchestrator against in-memory collaborators, with a
//! demo Oracle Duel tournament and a drifting price feed.
//! Run with: cargo run --bin arena
//! Configure with ARENA_* env vars (see `ArenaConfig`); RUST_LOG controls logging.

use arena_orchestrator::games::QuestionBank;
use arena_orchestrator::memory::{
    FixedPriceFeed, InMemoryLedger, InMemoryNotificationQueue, InMemorySnapshotStore, LogEventSink,
};
use arena_orchestrator::ports::SystemClock;
use arena_orchestrator::{
    ArenaConfig, ArenaError, DefaultValidator, GameParameters, GameRegistry, GameType,
    LedgerNotification, Orchestrator, TickScheduler, TournamentConfig, TournamentFormat,
};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const DEMO_SYMBOL: &str = "ETH";
const DEMO_AGENTS: [&str; 4] = [
    "0x1111111111111111111111111111111111111111",
    "0x2222222222222222222222222222222222222222",
    "0x3333333333333333333333333333333333333333",
    "0x4444444444444444444444444444444444444444",
];

fn load_questions(config: &ArenaConfig) -> QuestionBank {
    let Some(path) = &config.question_bank_path else {
        return QuestionBank::builtin();
    };
    match QuestionBank::from_path(path) {
        Ok(bank) => {
            log::info!("loaded {} question(s) from {}", bank.len(), path.display());
            bank
        }
        Err(e) => {
            log::warn!("could not load {}: {e}; using the built-in questions", path.display());
            QuestionBank::builtin()
        }
    }
}

fn demo_config() -> TournamentConfig {
    TournamentConfig {
        name: "Sandbox Oracle Cup".to_string(),
        game_type: GameType::OracleDuel,
        format: TournamentFormat::Swiss,
        entry_stake: 1_000_000_000_000_000,
        max_participants: DEMO_AGENTS.len() as u32,
        round_count: 3,
        game_parameters: GameParameters {
            duration_secs: Some(60),
            token_symbol: Some(DEMO_SYMBOL.to_string()),
            ..GameParameters::default()
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), ArenaError> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = ArenaConfig::from_env();
    log::info!("starting arena sandbox, tick every {:?}", config.tick_interval());

    let clock = Arc::new(SystemClock);
    let prices = Arc::new(FixedPriceFeed::new().with_price(DEMO_SYMBOL, 3_000_000_000));
    let registry = Arc::new(GameRegistry::standard(
        clock.clone(),
        prices.clone(),
        load_questions(&config),
    ));
    let ledger = Arc::new(InMemoryLedger::new());
    for (i, agent) in DEMO_AGENTS.iter().enumerate() {
        ledger.register_agent(agent, &format!("agent-{}", i + 1), 1150 + 50 * i as i32);
    }

    let mut orchestrator = Orchestrator::new(
        ledger.clone(),
        Arc::new(DefaultValidator::with_registry(registry.clone())),
        registry,
        clock,
        config.clone(),
    )
    .with_store(Arc::new(InMemorySnapshotStore::new()))
    .with_events(Arc::new(LogEventSink))
    .with_notifications(Arc::new(InMemoryNotificationQueue::new()));

    let tracked = orchestrator.recover().await?;
    if tracked == 0 {
        let id = orchestrator.create_tournament(demo_config()).await?;
        let inbox = orchestrator.inbox();
        for agent in DEMO_AGENTS {
            ledger.join_tournament(id, agent)?;
            inbox.push(LedgerNotification::ParticipantJoined {
                tournament_id: id,
                address: agent.to_string(),
            });
        }
    }

    // Random walk so duels are not all draws.
    let feed = prices.clone();
    tokio::spawn(async move {
        let mut price: u64 = 3_000_000_000;
        let mut interval = tokio::time::interval(Duration::from_secs(7));
        loop {
            interval.tick().await;
            let step = rand::thread_rng().gen_range(-30_000_000i64..=30_000_000);
            price = price.saturating_add_signed(step).max(1);
            feed.set(DEMO_SYMBOL, price);
        }
    });

    let scheduler = Arc::new(TickScheduler::new(
        Arc::new(Mutex::new(orchestrator)),
        config.tick_interval(),
    ));
    scheduler
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("ctrl-c handler failed: {e}");
            }
        })
        .await;
    log::info!("arena sandbox stopped");
    Ok(())
}
