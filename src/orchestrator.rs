//! Tournament lifecycle controller.
//!
//! The orchestrator owns every tracked [`TournamentState`] and the set of
//! in-flight matches. It is advanced by [`Orchestrator::tick`], which must never
//! run concurrently with itself; [`crate::scheduler::TickScheduler`] enforces that.
//!
//! In-memory state changes first, snapshot writes and event emission are
//! best-effort, and ledger writes go through [`with_retry`]. Prize distribution
//! is the only step whose failure holds a tournament back: it stays
//! `Completing` until the payout and the ledger completion both succeed.

use crate::config::ArenaConfig;
use crate::games::{lock, ActionOutcome, GameAction, GameEngine, GameError, GameRegistry};
use crate::logic::{
    calculate_elo, compute_payouts, distributable_pool, generate_pairings, is_upset,
    update_standings, AnalysisGate, EloOutcome, EvolutionEngine, EvolutionError,
};
use crate::models::{
    Address, AgentStanding, Amount, ArenaError, ArenaResult, GameParameters, GameType, MatchId,
    MatchResult, Pairing, RoundData, TournamentConfig, TournamentId, TournamentState,
    TournamentStatus,
};
use crate::ports::{
    with_retry, AnalysisService, ArenaEvent, Clock, EventSink, Ledger, LedgerError,
    LedgerTournament, LedgerTournamentStatus, NewTournament, NotificationQueue, Post, PostKind,
    RetryPolicy, SnapshotStore, Validator,
};
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// Something the ledger told us about outside the tick loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerNotification {
    ParticipantJoined {
        tournament_id: TournamentId,
        address: Address,
    },
}

/// Cloneable producer side of the orchestrator's notification queue.
#[derive(Clone, Debug, Default)]
pub struct InboxHandle {
    queue: Arc<Mutex<VecDeque<LedgerNotification>>>,
}

impl InboxHandle {
    pub fn push(&self, notification: LedgerNotification) {
        lock(&self.queue).push_back(notification);
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain(&self) -> Vec<LedgerNotification> {
        lock(&self.queue).drain(..).collect()
    }
}

/// A match that has been created and not yet resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveMatch {
    pub tournament_id: TournamentId,
    pub round: u32,
    pub game_type: GameType,
    pub player1: Address,
    pub player2: Address,
    pub started_at_ms: i64,
}

impl ActiveMatch {
    fn is_for(&self, tournament_id: TournamentId, round: u32, pairing: &Pairing) -> bool {
        self.tournament_id == tournament_id
            && self.round == round
            && pairing.is_between(&self.player1, &self.player2)
    }
}

/// Log target for a skipped best-effort write.
#[derive(Clone, Copy)]
enum Subject {
    Tournament(TournamentId),
    Match(MatchId),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Tournament(id) => write!(f, "tournament {id}"),
            Subject::Match(id) => write!(f, "match {id}"),
        }
    }
}

pub struct Orchestrator {
    ledger: Arc<dyn Ledger>,
    store: Option<Arc<dyn SnapshotStore>>,
    events: Option<Arc<dyn EventSink>>,
    notifications: Option<Arc<dyn NotificationQueue>>,
    validator: Arc<dyn Validator>,
    registry: Arc<GameRegistry>,
    clock: Arc<dyn Clock>,
    evolution: EvolutionEngine,
    retry: RetryPolicy,
    config: ArenaConfig,
    tournaments: BTreeMap<TournamentId, TournamentState>,
    active_matches: BTreeMap<MatchId, ActiveMatch>,
    /// Ledger ids known to be finished; discovery skips them.
    settled: BTreeSet<TournamentId>,
    inbox: InboxHandle,
}

impl Orchestrator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        validator: Arc<dyn Validator>,
        registry: Arc<GameRegistry>,
        clock: Arc<dyn Clock>,
        config: ArenaConfig,
    ) -> Self {
        Self {
            ledger,
            store: None,
            events: None,
            notifications: None,
            validator,
            registry,
            clock,
            evolution: EvolutionEngine::new(None, Self::analysis_gate(&config)),
            retry: config.retry_policy(),
            config,
            tournaments: BTreeMap::new(),
            active_matches: BTreeMap::new(),
            settled: BTreeSet::new(),
            inbox: InboxHandle::default(),
        }
    }

    fn analysis_gate(config: &ArenaConfig) -> AnalysisGate {
        AnalysisGate::new(config.analysis_failure_threshold, config.analysis_cooldown())
    }

    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_notifications(mut self, queue: Arc<dyn NotificationQueue>) -> Self {
        self.notifications = Some(queue);
        self
    }

    pub fn with_analysis(mut self, service: Arc<dyn AnalysisService>) -> Self {
        self.evolution = EvolutionEngine::new(Some(service), Self::analysis_gate(&self.config));
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // ------------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------------

    pub fn tournament(&self, id: TournamentId) -> Option<&TournamentState> {
        self.tournaments.get(&id)
    }

    pub fn tournament_ids(&self) -> Vec<TournamentId> {
        self.tournaments.keys().copied().collect()
    }

    pub fn active_match(&self, match_id: MatchId) -> Option<&ActiveMatch> {
        self.active_matches.get(&match_id)
    }

    pub fn active_match_ids(&self) -> Vec<MatchId> {
        self.active_matches.keys().copied().collect()
    }

    pub fn is_settled(&self, id: TournamentId) -> bool {
        self.settled.contains(&id)
    }

    pub fn evolution(&self) -> &EvolutionEngine {
        &self.evolution
    }

    pub fn inbox(&self) -> InboxHandle {
        self.inbox.clone()
    }

    pub fn engine_for(&self, game_type: GameType) -> ArenaResult<Arc<dyn GameEngine>> {
        self.registry.get(game_type).ok_or(ArenaError::NoEngine(game_type))
    }

    /// Forward a player action to the engine running `match_id`.
    pub fn submit_action(&self, match_id: MatchId, player: &str, action: &GameAction) -> ActionOutcome {
        let Some(active) = self.active_matches.get(&match_id) else {
            return ActionOutcome::rejected("match is not active");
        };
        match self.registry.get(active.game_type) {
            Some(engine) => engine.process_action(match_id, player, action),
            None => ActionOutcome::rejected("no engine for this game"),
        }
    }

    /// Public view of an active match.
    pub fn match_state(&self, match_id: MatchId) -> Option<serde_json::Value> {
        let active = self.active_matches.get(&match_id)?;
        self.registry.get(active.game_type)?.get_state(match_id)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Validate, register on the ledger and start tracking a new tournament.
    pub async fn create_tournament(&mut self, mut config: TournamentConfig) -> ArenaResult<TournamentId> {
        config.name = self.validator.sanitize_name(&config.name);
        let errors = self.validator.validate_config(&config);
        if !errors.is_empty() {
            warn!("rejected tournament config {:?}: {}", config.name, errors.join("; "));
            return Err(ArenaError::Validation(errors));
        }

        let params_hash = config.game_parameters.content_hash();
        let request = NewTournament::from_config(&config, &params_hash);
        let id = with_retry(&self.retry, "create_tournament", || {
            self.ledger.create_tournament(&request)
        })
        .await?;

        let announcement = format!(
            "New {} tournament \"{}\": {} agents, {} rounds, entry stake {}",
            config.game_type, config.name, config.max_participants, config.round_count, config.entry_stake
        );
        let name = config.name.clone();
        self.tournaments
            .insert(id, TournamentState::new(id, config, self.clock.now()));
        info!("tournament {id} created: {name}");
        self.persist(id).await;
        self.emit(ArenaEvent::TournamentCreated {
            tournament_id: id,
            name,
        });
        self.post(PostKind::Announcement, Some(id), announcement);
        Ok(id)
    }

    /// Add an agent to an open tournament, starting it once it is full.
    /// Unknown, closed or full tournaments and repeat joins are ignored.
    pub async fn on_participant_joined(&mut self, tournament_id: TournamentId, address: Address) -> ArenaResult<()> {
        let default_elo = self.config.default_elo;
        let Some(state) = self.tournaments.get_mut(&tournament_id) else {
            debug!("join for untracked tournament {tournament_id} ignored");
            return Ok(());
        };
        if state.status != TournamentStatus::Open {
            debug!("tournament {tournament_id} is {}, join by {address} ignored", state.status);
            return Ok(());
        }
        if state.standing(&address).is_some() {
            return Ok(());
        }
        if state.is_full() {
            warn!("tournament {tournament_id} is full, join by {address} ignored");
            return Ok(());
        }
        state
            .standings
            .push(AgentStanding::new(address.clone()).with_elo(default_elo));
        let (joined, max) = (state.standings.len(), state.config.max_participants);
        let full = state.is_full();
        info!("tournament {tournament_id}: {address} joined ({joined}/{max})");
        self.persist(tournament_id).await;

        if full {
            self.start_tournament(tournament_id).await?;
        }
        Ok(())
    }

    /// Refresh ratings, start on the ledger and open round one.
    pub async fn start_tournament(&mut self, tournament_id: TournamentId) -> ArenaResult<()> {
        let state = self.state(tournament_id)?;
        if state.status != TournamentStatus::Open {
            return Err(ArenaError::InvalidState {
                id: tournament_id,
                status: state.status,
                expected: "open",
            });
        }
        if state.standings.len() < 2 {
            return Err(ArenaError::Validation(vec![
                "at least two participants are needed to start".to_string(),
            ]));
        }
        let addresses: Vec<Address> = state.standings.iter().map(|s| s.address.clone()).collect();

        let ledger = &self.ledger;
        let profiles = join_all(addresses.iter().map(|a| ledger.get_agent(a))).await;
        let state = self.state_mut(tournament_id)?;
        for (address, profile) in addresses.iter().zip(profiles) {
            match profile {
                Ok(Some(agent)) => {
                    if let Some(s) = state.standing_mut(address) {
                        s.elo = agent.elo;
                        if !agent.handle.is_empty() {
                            s.handle = agent.handle;
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("tournament {tournament_id}: keeping default rating for {address}: {e}"),
            }
        }

        with_retry(&self.retry, "start_tournament", || {
            self.ledger.start_tournament(tournament_id)
        })
        .await?;

        let state = self.state_mut(tournament_id)?;
        state.status = TournamentStatus::Active;
        state.current_round = 1;
        let participants = state.standings.len();
        let name = state.config.name.clone();
        info!("tournament {tournament_id} started with {participants} agents");
        self.emit(ArenaEvent::TournamentStarted {
            tournament_id,
            participants,
        });
        self.post(
            PostKind::Announcement,
            Some(tournament_id),
            format!("\"{name}\" is underway with {participants} agents"),
        );
        self.open_round(tournament_id, 1).await
    }

    pub async fn pause_tournament(&mut self, tournament_id: TournamentId) -> ArenaResult<()> {
        self.switch_status(tournament_id, TournamentStatus::Active, TournamentStatus::Paused)
            .await?;
        self.emit(ArenaEvent::TournamentPaused { tournament_id });
        Ok(())
    }

    pub async fn resume_tournament(&mut self, tournament_id: TournamentId) -> ArenaResult<()> {
        self.switch_status(tournament_id, TournamentStatus::Paused, TournamentStatus::Active)
            .await?;
        self.emit(ArenaEvent::TournamentResumed { tournament_id });
        Ok(())
    }

    async fn switch_status(
        &mut self,
        tournament_id: TournamentId,
        from: TournamentStatus,
        to: TournamentStatus,
    ) -> ArenaResult<()> {
        let state = self.state_mut(tournament_id)?;
        if state.status != from {
            return Err(ArenaError::InvalidState {
                id: tournament_id,
                status: state.status,
                expected: if from == TournamentStatus::Active { "active" } else { "paused" },
            });
        }
        state.status = to;
        info!("tournament {tournament_id}: {from} -> {to}");
        self.persist(tournament_id).await;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------------

    /// One pass: drain notifications, resolve finished matches, advance every
    /// tracked tournament by status, then look for new ledger tournaments.
    /// Failures are logged per item and never stop the pass.
    pub async fn tick(&mut self) {
        for notification in self.inbox.drain() {
            match notification {
                LedgerNotification::ParticipantJoined {
                    tournament_id,
                    address,
                } => {
                    if let Err(e) = self.on_participant_joined(tournament_id, address).await {
                        warn!("tournament {tournament_id}: join handling failed: {e}");
                    }
                }
            }
        }

        self.poll_matches().await;

        for id in self.tournament_ids() {
            let Some(status) = self.tournaments.get(&id).map(|s| s.status) else {
                continue;
            };
            let outcome = match status {
                TournamentStatus::Open | TournamentStatus::Paused | TournamentStatus::Completed => Ok(()),
                TournamentStatus::Active => self.process_active_round(id).await,
                TournamentStatus::Completing => self.complete_tournament(id).await,
            };
            if let Err(e) = outcome {
                warn!("tournament {id}: {e}");
            }
        }

        match self.discover_tournaments().await {
            Ok(0) => {}
            Ok(n) => info!("discovered {n} tournament(s) on the ledger"),
            Err(e) => warn!("tournament discovery failed: {e}"),
        }
    }

    /// Resolve every active match whose engine reports it resolvable, in id order.
    async fn poll_matches(&mut self) {
        for match_id in self.active_match_ids() {
            let Some(game_type) = self.active_matches.get(&match_id).map(|m| m.game_type) else {
                continue;
            };
            let Some(engine) = self.registry.get(game_type) else {
                warn!("match {match_id}: no engine for {game_type}");
                continue;
            };
            if engine.is_resolvable(match_id) {
                if let Err(e) = self.resolve_match(match_id).await {
                    warn!("match {match_id}: resolution failed: {e}");
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Matches
    // ------------------------------------------------------------------------

    /// Generate and store the pairings for `round`, then create its matches.
    /// A round with no possible pairing ends the tournament.
    async fn open_round(&mut self, tournament_id: TournamentId, round: u32) -> ArenaResult<()> {
        let state = self.state_mut(tournament_id)?;
        if state.round_data(round).is_some() {
            return Ok(());
        }
        let plan = generate_pairings(state.config.format, &state.standings, &state.rounds, round);
        if plan.pairings.is_empty() {
            info!("tournament {tournament_id}: nothing to pair in round {round}, completing");
            state.status = TournamentStatus::Completing;
            self.persist(tournament_id).await;
            return Ok(());
        }
        if let Some(bye) = &plan.bye {
            info!("tournament {tournament_id} round {round}: bye for {bye}");
        }
        info!(
            "tournament {tournament_id} round {round}: {} pairing(s)",
            plan.pairings.len()
        );
        state
            .rounds
            .push(RoundData::new(round, plan.pairings, plan.bye));
        self.persist(tournament_id).await;
        self.fill_missing_matches(tournament_id).await;
        Ok(())
    }

    /// Create a match for every pairing of the current round that has neither
    /// a result nor a live match. Each pairing is tried on its own.
    async fn fill_missing_matches(&mut self, tournament_id: TournamentId) {
        let Some(state) = self.tournaments.get(&tournament_id) else {
            return;
        };
        let round = state.current_round;
        let Some(data) = state.round_data(round) else {
            return;
        };
        let pending: Vec<Pairing> = data
            .pairings
            .iter()
            .filter(|p| !data.results.iter().any(|r| p.is_between(&r.player1, &r.player2)))
            .filter(|p| !self.active_matches.values().any(|m| m.is_for(tournament_id, round, p)))
            .cloned()
            .collect();
        if pending.is_empty() {
            return;
        }

        let mut created = 0;
        for pairing in &pending {
            match self.create_match(tournament_id, round, pairing).await {
                Ok(_) => created += 1,
                Err(e) => warn!(
                    "tournament {tournament_id} round {round}: no match for {} vs {}: {e}",
                    pairing.player1, pairing.player2
                ),
            }
        }
        if created > 0 {
            self.persist(tournament_id).await;
        }
    }

    async fn create_match(
        &mut self,
        tournament_id: TournamentId,
        round: u32,
        pairing: &Pairing,
    ) -> ArenaResult<MatchId> {
        let state = self.state(tournament_id)?;
        let game_type = state.config.game_type;
        let params = state.config.game_parameters.clone();
        let engine = self.engine_for(game_type)?;
        let (p1, p2) = (pairing.player1.as_str(), pairing.player2.as_str());

        let match_id = with_retry(&self.retry, "create_match", || {
            self.ledger.create_match(tournament_id, p1, p2)
        })
        .await?;
        engine
            .init_match(match_id, &[pairing.player1.clone(), pairing.player2.clone()], &params)
            .await?;

        let subject = Subject::Match(match_id);
        self.best_effort("start_match", subject, || self.ledger.start_match(match_id))
            .await;
        self.best_effort("lock_escrow", subject, || self.ledger.lock_escrow(match_id))
            .await;
        self.best_effort("open_betting", subject, || self.ledger.open_betting(match_id))
            .await;

        self.active_matches.insert(
            match_id,
            ActiveMatch {
                tournament_id,
                round,
                game_type,
                player1: pairing.player1.clone(),
                player2: pairing.player2.clone(),
                started_at_ms: self.clock.now_ms(),
            },
        );
        if let Some(data) = self.state_mut(tournament_id)?.round_data_mut(round) {
            data.match_ids.push(match_id);
        }
        debug!("match {match_id}: {p1} vs {p2} ({game_type})");
        self.emit(ArenaEvent::MatchCreated {
            tournament_id,
            match_id,
            round,
            player1: pairing.player1.clone(),
            player2: pairing.player2.clone(),
        });
        Ok(match_id)
    }

    /// Settle a finished match and file its result under its round.
    pub async fn resolve_match(&mut self, match_id: MatchId) -> ArenaResult<MatchResult> {
        let active = self
            .active_matches
            .get(&match_id)
            .cloned()
            .ok_or(GameError::UnknownMatch(match_id))?;
        let engine = self.engine_for(active.game_type)?;
        let outcome = engine.resolve(match_id).await?;
        let tournament_id = active.tournament_id;

        let winner = outcome.winner.as_deref();
        let hash = outcome.result_hash.as_str();
        if let Err(e) = with_retry(&self.retry, "record_result", || {
            self.ledger.record_result(match_id, winner, hash)
        })
        .await
        {
            error!("match {match_id}: result {hash} not recorded on the ledger: {e}");
        }
        let subject = Subject::Match(match_id);
        self.best_effort("close_betting", subject, || self.ledger.close_betting(match_id))
            .await;
        self.best_effort("settle_bets", subject, || self.ledger.settle_bets(match_id))
            .await;
        self.best_effort("store_replay_commitment", subject, || {
            self.ledger.store_replay_commitment(match_id, hash)
        })
        .await;

        let loser = outcome.winner.as_ref().map(|w| {
            if *w == active.player1 {
                active.player2.clone()
            } else {
                active.player1.clone()
            }
        });
        let upset = match (&outcome.winner, &loser, self.tournaments.get(&tournament_id)) {
            (Some(w), Some(l), Some(state)) => {
                is_upset(state.elo_of(w), state.elo_of(l), self.config.upset_threshold)
            }
            _ => false,
        };
        let now = self.clock.now_ms();
        let result = MatchResult {
            match_id,
            tournament_id,
            round: active.round,
            player1: active.player1.clone(),
            player2: active.player2.clone(),
            winner: outcome.winner.clone(),
            loser,
            is_draw: outcome.winner.is_none(),
            is_upset: upset,
            game_type: active.game_type,
            stats: outcome.result.clone(),
            duration_ms: u64::try_from(now - active.started_at_ms).unwrap_or(0),
            completed_at: self.clock.now(),
        };

        self.active_matches.remove(&match_id);
        match self
            .tournaments
            .get_mut(&tournament_id)
            .and_then(|s| s.round_data_mut(active.round))
        {
            Some(data) => data.results.push(result.clone()),
            None => warn!("match {match_id}: round {} of tournament {tournament_id} is gone", active.round),
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.save_match_result(&result).await {
                warn!("match {match_id}: result not saved: {e}");
            }
        }
        self.persist(tournament_id).await;

        match &result.winner {
            Some(w) => info!("match {match_id} won by {w}"),
            None => info!("match {match_id} drawn"),
        }
        self.emit(ArenaEvent::MatchCompleted {
            tournament_id,
            match_id,
            winner: result.winner.clone(),
            is_upset: upset,
        });
        if let (true, Some(w), Some(l)) = (upset, &result.winner, &result.loser) {
            self.post(
                PostKind::Upset,
                Some(tournament_id),
                format!("Upset in round {}: {w} beat {l}", result.round),
            );
        }
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Rounds
    // ------------------------------------------------------------------------

    /// Close the current round once no match is outstanding and at least one
    /// result is in, then advance or move to `Completing`. A no-op unless the
    /// tournament is `Active`.
    pub async fn process_active_round(&mut self, tournament_id: TournamentId) -> ArenaResult<()> {
        let state = self.state(tournament_id)?;
        if state.status != TournamentStatus::Active {
            return Ok(());
        }
        let round = state.current_round;
        if state.round_data(round).is_none() {
            return self.open_round(tournament_id, round).await;
        }

        self.fill_missing_matches(tournament_id).await;
        let outstanding = self
            .active_matches
            .values()
            .any(|m| m.tournament_id == tournament_id && m.round == round);
        if outstanding {
            return Ok(());
        }

        let Some(data) = self.state_mut(tournament_id)?.round_data_mut(round) else {
            return Ok(());
        };
        if !data.completed {
            if data.results.is_empty() {
                return Ok(());
            }
            data.mark_completed();
            self.settle_round(tournament_id, round).await?;
        }
        self.advance_round(tournament_id, round).await
    }

    fn is_terminating(state: &TournamentState, round: u32) -> bool {
        round >= state.config.round_count
            || (state.config.format.is_elimination() && state.remaining_players() <= 1)
    }

    /// Standings, ratings and (unless this was the last round) parameter evolution.
    async fn settle_round(&mut self, tournament_id: TournamentId, round: u32) -> ArenaResult<()> {
        let state = self.state_mut(tournament_id)?;
        let results = state
            .round_data(round)
            .map(|r| r.results.clone())
            .unwrap_or_default();
        let format = state.config.format;
        let game_type = state.config.game_type;
        let params = state.config.game_parameters.clone();
        update_standings(&mut state.standings, &results, format);

        let mut elo_updates: Vec<(Address, i32, bool)> = Vec::with_capacity(results.len() * 2);
        for r in &results {
            let outcome = match r.winner.as_deref() {
                Some(w) if w == r.player1 => EloOutcome::Win,
                Some(_) => EloOutcome::Loss,
                None => EloOutcome::Draw,
            };
            let (elo1, elo2) = calculate_elo(state.elo_of(&r.player1), state.elo_of(&r.player2), outcome);
            for (player, elo) in [(&r.player1, elo1), (&r.player2, elo2)] {
                if let Some(s) = state.standing_mut(player) {
                    s.elo = elo;
                }
            }
            elo_updates.push((r.player1.clone(), elo1, outcome == EloOutcome::Win));
            elo_updates.push((r.player2.clone(), elo2, outcome == EloOutcome::Loss));
        }
        let terminating = Self::is_terminating(state, round);
        for (agent, elo, _) in &elo_updates {
            self.emit(ArenaEvent::EloUpdated {
                agent: agent.clone(),
                elo: *elo,
            });
        }

        if terminating {
            debug!("tournament {tournament_id}: final round, parameters frozen");
        } else {
            self.evolve_parameters(tournament_id, round, &results, game_type, &params)
                .await;
        }

        let ledger = &self.ledger;
        let retry = &self.retry;
        let seasonal: Vec<(&str, &str)> = results
            .iter()
            .filter_map(|r| Some((r.winner.as_deref()?, r.loser.as_deref()?)))
            .collect();
        let (elo_outcomes, seasonal_outcomes) = futures::join!(
            join_all(elo_updates.iter().map(|(agent, elo, won)| {
                with_retry(retry, "update_elo", move || ledger.update_elo(agent, *elo, *won))
            })),
            join_all(seasonal.iter().map(|(winner, loser)| {
                with_retry(retry, "record_seasonal_match", move || {
                    ledger.record_seasonal_match(winner, loser)
                })
            })),
        );
        let failed_elo = elo_outcomes.iter().filter(|r| r.is_err()).count();
        if failed_elo > 0 {
            warn!(
                "tournament {tournament_id} round {round}: {failed_elo}/{} Elo update(s) failed",
                elo_updates.len()
            );
        }
        let failed_seasonal = seasonal_outcomes.iter().filter(|r| r.is_err()).count();
        if failed_seasonal > 0 {
            warn!(
                "tournament {tournament_id} round {round}: {failed_seasonal}/{} seasonal update(s) failed",
                seasonal.len()
            );
        }

        info!(
            "tournament {tournament_id} round {round} settled: {} result(s)",
            results.len()
        );
        self.persist(tournament_id).await;
        Ok(())
    }

    /// One evolution step. Any failure keeps the current parameters.
    async fn evolve_parameters(
        &mut self,
        tournament_id: TournamentId,
        round: u32,
        results: &[MatchResult],
        game_type: GameType,
        params: &GameParameters,
    ) {
        let Some(engine) = self.registry.get(game_type) else {
            return;
        };
        let evolved = match self
            .evolution
            .evolve(tournament_id, round, results, game_type, params, |p| {
                engine.validate_parameters(p)
            })
            .await
        {
            Ok(evolved) => evolved,
            Err(EvolutionError::Unchanged) => {
                debug!("tournament {tournament_id} round {round}: parameters carry over");
                return;
            }
            Err(e) => {
                warn!("tournament {tournament_id} round {round}: parameters unchanged: {e}");
                return;
            }
        };

        let mutations = evolved.record.mutations.len();
        let hash = evolved.hash;
        if let Some(state) = self.tournaments.get_mut(&tournament_id) {
            state.config.game_parameters = evolved.params;
            state.params_hash = hash.clone();
        }
        self.best_effort("evolve_parameters", Subject::Tournament(tournament_id), || {
            self.ledger.evolve_parameters(tournament_id, &hash)
        })
        .await;
        self.emit(ArenaEvent::ParametersEvolved {
            tournament_id,
            round,
            params_hash: hash,
            mutations,
        });
    }

    async fn advance_round(&mut self, tournament_id: TournamentId, round: u32) -> ArenaResult<()> {
        if let Err(e) = with_retry(&self.retry, "advance_round", || {
            self.ledger.advance_round(tournament_id)
        })
        .await
        {
            warn!("tournament {tournament_id}: ledger round not advanced past {round}: {e}");
        }
        self.emit(ArenaEvent::RoundAdvanced {
            tournament_id,
            round,
        });

        let state = self.state_mut(tournament_id)?;
        if Self::is_terminating(state, round) {
            state.status = TournamentStatus::Completing;
            info!("tournament {tournament_id}: all rounds played, completing");
            self.persist(tournament_id).await;
            return Ok(());
        }
        state.current_round = round + 1;
        self.open_round(tournament_id, round + 1).await
    }

    // ------------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------------

    /// Pay out and close a `Completing` tournament. Payment is attempted at
    /// most once successfully; until the ledger confirms completion the
    /// tournament stays `Completing` and the next tick tries again.
    pub async fn complete_tournament(&mut self, tournament_id: TournamentId) -> ArenaResult<()> {
        let state = self.state(tournament_id)?;
        if state.status != TournamentStatus::Completing {
            return Err(ArenaError::InvalidState {
                id: tournament_id,
                status: state.status,
                expected: "completing",
            });
        }

        if !state.prizes_distributed {
            self.distribute_prizes(tournament_id).await?;
            self.state_mut(tournament_id)?.prizes_distributed = true;
            self.persist(tournament_id).await;
        }

        with_retry(&self.retry, "complete_tournament", || {
            self.ledger.complete_tournament(tournament_id)
        })
        .await?;

        let mut state = self
            .tournaments
            .remove(&tournament_id)
            .ok_or(ArenaError::TournamentNotFound(tournament_id))?;
        state.status = TournamentStatus::Completed;
        self.settled.insert(tournament_id);
        self.active_matches
            .retain(|_, m| m.tournament_id != tournament_id);
        if let Some(store) = &self.store {
            if let Err(e) = store.delete_tournament_state(tournament_id).await {
                warn!("tournament {tournament_id}: snapshot not deleted: {e}");
            }
        }

        let champion = state.ranked_standings().into_iter().next();
        info!(
            "tournament {tournament_id} completed, winner {}",
            champion.as_ref().map_or("none", |s| s.address.as_str())
        );
        self.emit(ArenaEvent::TournamentCompleted {
            tournament_id,
            winner: champion.as_ref().map(|s| s.address.clone()),
        });
        let text = match &champion {
            Some(s) => format!("\"{}\" is over. {} wins with {} point(s)", state.config.name, s.handle, s.points),
            None => format!("\"{}\" is over", state.config.name),
        };
        self.post(PostKind::Results, Some(tournament_id), text);
        Ok(())
    }

    async fn distribute_prizes(&self, tournament_id: TournamentId) -> ArenaResult<()> {
        // The ledger outlives our snapshot; a payout it already holds is final.
        let record = with_retry(&self.retry, "get_tournament", || {
            self.ledger.get_tournament(tournament_id)
        })
        .await
        .map_err(|e| ArenaError::Distribution(format!("ledger record unavailable: {e}")))?;
        if record.is_some_and(|r| r.prizes_distributed) {
            info!("tournament {tournament_id}: prizes already paid on the ledger");
            return Ok(());
        }

        let pool = with_retry(&self.retry, "get_tournament_pool", || {
            self.ledger.get_tournament_pool(tournament_id)
        })
        .await
        .map_err(|e| ArenaError::Distribution(format!("prize pool unavailable: {e}")))?;

        let state = self.state(tournament_id)?;
        let distributable = distributable_pool(pool, self.config.protocol_fee_bps);
        let payouts = compute_payouts(state.config.format, &state.ranked_standings(), distributable);
        if payouts.is_empty() {
            info!("tournament {tournament_id}: nothing to distribute from pool {pool}");
            return Ok(());
        }
        let (recipients, amounts): (Vec<Address>, Vec<Amount>) = payouts.into_iter().unzip();
        with_retry(&self.retry, "batch_distribute", || {
            self.ledger.batch_distribute(tournament_id, &recipients, &amounts)
        })
        .await
        .map_err(|e| {
            error!("tournament {tournament_id}: prize distribution failed, will retry: {e}");
            ArenaError::Distribution(e.to_string())
        })?;
        info!(
            "tournament {tournament_id}: distributed {} of pool {pool} to {} agent(s)",
            amounts.iter().sum::<Amount>(),
            recipients.len()
        );
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Discovery and recovery
    // ------------------------------------------------------------------------

    /// Track any ledger tournament that is open or active and not yet known.
    /// Returns how many were picked up.
    pub async fn discover_tournaments(&mut self) -> ArenaResult<usize> {
        let count = self.ledger.get_tournament_count().await?;
        let mut found = 0;
        for id in 0..count {
            if self.tournaments.contains_key(&id) || self.settled.contains(&id) {
                continue;
            }
            let record = match self.ledger.get_tournament(id).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    warn!("tournament {id}: ledger read failed: {e}");
                    continue;
                }
            };
            match record.status {
                LedgerTournamentStatus::Completed | LedgerTournamentStatus::Cancelled => {
                    self.settled.insert(id);
                }
                LedgerTournamentStatus::Open | LedgerTournamentStatus::Active => {
                    let participants = match self.ledger.get_tournament_participants(id).await {
                        Ok(p) => p,
                        Err(e) => {
                            warn!("tournament {id}: participants unavailable: {e}");
                            continue;
                        }
                    };
                    let state = self.rehydrate(record, participants);
                    let ready = state.status == TournamentStatus::Open && state.is_full();
                    info!("tournament {id} picked up from the ledger ({})", state.status);
                    self.tournaments.insert(id, state);
                    self.persist(id).await;
                    found += 1;
                    if ready {
                        if let Err(e) = self.start_tournament(id).await {
                            warn!("tournament {id}: start after discovery failed: {e}");
                        }
                    }
                }
            }
        }
        Ok(found)
    }

    /// Minimal state for a ledger tournament we hold no snapshot of. Round
    /// history is not on the ledger; an active tournament pairs its current
    /// round afresh on the next tick.
    fn rehydrate(&self, record: LedgerTournament, participants: Vec<Address>) -> TournamentState {
        let config = TournamentConfig {
            name: record.name,
            game_type: record.game_type,
            format: record.format,
            entry_stake: record.entry_stake,
            max_participants: record.max_participants,
            round_count: record.round_count,
            game_parameters: GameParameters::default(),
        };
        let mut state = TournamentState::new(record.id, config, self.clock.now());
        state.params_hash = record.params_hash;
        state.standings = participants
            .into_iter()
            .map(|a| AgentStanding::new(a).with_elo(self.config.default_elo))
            .collect();
        if record.status == LedgerTournamentStatus::Active {
            state.status = TournamentStatus::Active;
            state.current_round = record.current_round.max(1);
        }
        state
    }

    /// Reload snapshots, drop those the ledger has already finished, then
    /// discover anything else. Returns the number of tournaments now tracked.
    pub async fn recover(&mut self) -> ArenaResult<usize> {
        if let Some(store) = self.store.clone() {
            for id in store.list_active_tournament_ids().await? {
                let state = match store.load_tournament_state(id).await {
                    Ok(Some(state)) => state,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!("tournament {id}: snapshot unreadable: {e}");
                        continue;
                    }
                };
                match self.ledger.get_tournament(id).await {
                    Ok(Some(record))
                        if matches!(
                            record.status,
                            LedgerTournamentStatus::Completed | LedgerTournamentStatus::Cancelled
                        ) =>
                    {
                        info!("tournament {id}: finished on the ledger, dropping snapshot");
                        self.settled.insert(id);
                        if let Err(e) = store.delete_tournament_state(id).await {
                            warn!("tournament {id}: snapshot not deleted: {e}");
                        }
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("tournament {id}: ledger unavailable, trusting snapshot: {e}"),
                }
                info!("tournament {id} restored from snapshot ({})", state.status);
                self.tournaments.insert(id, state);
            }
        }
        self.discover_tournaments().await?;
        Ok(self.tournaments.len())
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn state(&self, id: TournamentId) -> ArenaResult<&TournamentState> {
        self.tournaments
            .get(&id)
            .ok_or(ArenaError::TournamentNotFound(id))
    }

    fn state_mut(&mut self, id: TournamentId) -> ArenaResult<&mut TournamentState> {
        self.tournaments
            .get_mut(&id)
            .ok_or(ArenaError::TournamentNotFound(id))
    }

    /// Retried ledger write whose failure is logged and otherwise ignored.
    async fn best_effort<F, Fut>(&self, label: &'static str, subject: Subject, op: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), LedgerError>>,
    {
        if let Err(e) = with_retry(&self.retry, label, op).await {
            warn!("{subject}: {label} skipped: {e}");
        }
    }

    async fn persist(&self, id: TournamentId) {
        let (Some(store), Some(state)) = (&self.store, self.tournaments.get(&id)) else {
            return;
        };
        if let Err(e) = store.save_tournament_state(state).await {
            warn!("tournament {id}: snapshot write failed: {e}");
        }
    }

    fn emit(&self, event: ArenaEvent) {
        if let Some(sink) = &self.events {
            sink.emit(&event);
        }
    }

    fn post(&self, kind: PostKind, tournament_id: Option<TournamentId>, text: String) {
        if let Some(queue) = &self.notifications {
            queue.enqueue(Post {
                kind,
                tournament_id,
                text,
            });
        }
    }
}
