//! Oracle Duel: one player takes the bull side, the other the bear side, and
//! the price move over the match duration decides the winner.

use super::{lock, two_players, ActionOutcome, GameAction, GameEngine, GameError, Outcome};
use crate::models::{Address, GameParameters, GameType, MatchId};
use crate::ports::{Clock, PriceFeed};
use async_trait::async_trait;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::json;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug)]
struct Settings {
    duration_ms: i64,
    symbol: String,
}

impl Settings {
    fn from_params(params: &GameParameters) -> Result<Self, GameError> {
        let p = params
            .clone()
            .merged_over(&GameParameters::defaults_for(GameType::OracleDuel));
        let duration = p.duration_secs.unwrap_or(0);
        if duration < 1 {
            return Err(GameError::InvalidParameters("duration_secs must be positive".into()));
        }
        let symbol = p.token_symbol.unwrap_or_default();
        if symbol.trim().is_empty() {
            return Err(GameError::InvalidParameters("token_symbol is required".into()));
        }
        let grace = p.grace_period_secs.unwrap_or(0).max(0);
        Ok(Self {
            duration_ms: (duration + grace).saturating_mul(1_000),
            symbol,
        })
    }
}

struct DuelMatch {
    bull: Address,
    bear: Address,
    symbol: String,
    start_price: u64,
    started_at: i64,
    ends_at: i64,
    resolved: bool,
}

pub struct OracleDuel {
    clock: Arc<dyn Clock>,
    prices: Arc<dyn PriceFeed>,
    rng: Mutex<StdRng>,
    matches: Mutex<HashMap<MatchId, DuelMatch>>,
}

impl OracleDuel {
    pub fn new(clock: Arc<dyn Clock>, prices: Arc<dyn PriceFeed>) -> Self {
        Self::with_rng(clock, prices, StdRng::from_entropy())
    }

    /// Deterministic side assignment.
    pub fn with_seed(clock: Arc<dyn Clock>, prices: Arc<dyn PriceFeed>, seed: u64) -> Self {
        Self::with_rng(clock, prices, StdRng::seed_from_u64(seed))
    }

    fn with_rng(clock: Arc<dyn Clock>, prices: Arc<dyn PriceFeed>, rng: StdRng) -> Self {
        Self {
            clock,
            prices,
            rng: Mutex::new(rng),
            matches: Mutex::new(HashMap::new()),
        }
    }

    async fn price(&self, symbol: &str) -> Result<u64, GameError> {
        self.prices
            .current_price(symbol)
            .await
            .map_err(|e| GameError::PriceFeed(e.to_string()))
    }
}

#[async_trait]
impl GameEngine for OracleDuel {
    fn game_type(&self) -> GameType {
        GameType::OracleDuel
    }

    async fn init_match(
        &self,
        match_id: MatchId,
        players: &[Address],
        params: &GameParameters,
    ) -> Result<(), GameError> {
        let mut seats = two_players(players)?;
        let settings = Settings::from_params(params)?;
        if lock(&self.matches).contains_key(&match_id) {
            return Err(GameError::DuplicateMatch(match_id));
        }
        let start_price = self.price(&settings.symbol).await?;
        seats.shuffle(&mut *lock(&self.rng));
        let [bull, bear] = seats;

        let now = self.clock.now_ms();
        let mut matches = lock(&self.matches);
        if matches.contains_key(&match_id) {
            return Err(GameError::DuplicateMatch(match_id));
        }
        debug!("oracle duel {match_id}: {bull} bull, {bear} bear on {} at {start_price}", settings.symbol);
        matches.insert(
            match_id,
            DuelMatch {
                bull,
                bear,
                symbol: settings.symbol,
                start_price,
                started_at: now,
                ends_at: now + settings.duration_ms,
                resolved: false,
            },
        );
        Ok(())
    }

    fn process_action(&self, match_id: MatchId, _player: &str, _action: &GameAction) -> ActionOutcome {
        if lock(&self.matches).contains_key(&match_id) {
            ActionOutcome::rejected("oracle duel takes no player actions")
        } else {
            ActionOutcome::rejected("unknown match")
        }
    }

    fn is_resolvable(&self, match_id: MatchId) -> bool {
        let now = self.clock.now_ms();
        lock(&self.matches)
            .get(&match_id)
            .is_some_and(|m| !m.resolved && now >= m.ends_at)
    }

    async fn resolve(&self, match_id: MatchId) -> Result<Outcome, GameError> {
        let now = self.clock.now_ms();
        let symbol = {
            let matches = lock(&self.matches);
            let m = matches.get(&match_id).ok_or(GameError::UnknownMatch(match_id))?;
            if m.resolved {
                return Err(GameError::AlreadyResolved(match_id));
            }
            if now < m.ends_at {
                return Err(GameError::NotResolvable(match_id));
            }
            m.symbol.clone()
        };
        let end_price = self.price(&symbol).await?;

        let mut matches = lock(&self.matches);
        let m = matches
            .get_mut(&match_id)
            .ok_or(GameError::UnknownMatch(match_id))?;
        // A concurrent resolve may have won while the price was in flight.
        if m.resolved {
            return Err(GameError::AlreadyResolved(match_id));
        }
        m.resolved = true;

        let movement = end_price.cmp(&m.start_price);
        let (winner, direction) = match movement {
            Ordering::Greater => (Some(m.bull.clone()), "up"),
            Ordering::Less => (Some(m.bear.clone()), "down"),
            Ordering::Equal => (None, "flat"),
        };
        // Price move saturated into the score range.
        let delta = (i128::from(end_price) - i128::from(m.start_price))
            .clamp(i128::from(i64::MIN) + 1, i128::from(i64::MAX)) as i64;
        let scores: BTreeMap<Address, i64> =
            [(m.bull.clone(), delta), (m.bear.clone(), -delta)].into_iter().collect();
        let result = json!({
            "symbol": m.symbol,
            "bull": m.bull,
            "bear": m.bear,
            "start_price": m.start_price,
            "end_price": end_price,
            "direction": direction,
            "bull_wins": u64::from(movement == Ordering::Greater),
            "bear_wins": u64::from(movement == Ordering::Less),
            "elapsed_ms": now - m.started_at,
        });
        info!("oracle duel {match_id} settled {direction} ({} -> {end_price})", m.start_price);
        Ok(Outcome::new(winner, scores, result))
    }

    fn get_state(&self, match_id: MatchId) -> Option<serde_json::Value> {
        lock(&self.matches).get(&match_id).map(|m| {
            json!({
                "match_id": match_id,
                "game_type": GameType::OracleDuel,
                "bull": m.bull,
                "bear": m.bear,
                "symbol": m.symbol,
                "start_price": m.start_price,
                "started_at_ms": m.started_at,
                "ends_at_ms": m.ends_at,
                "resolved": m.resolved,
            })
        })
    }

    fn validate_parameters(&self, params: &GameParameters) -> bool {
        Settings::from_params(params).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ManualClock, PriceFeedError};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct StubFeed(AtomicU64);

    #[async_trait]
    impl PriceFeed for StubFeed {
        async fn current_price(&self, _symbol: &str) -> Result<u64, PriceFeedError> {
            match self.0.load(Ordering::SeqCst) {
                0 => Err(PriceFeedError("feed offline".into())),
                p => Ok(p),
            }
        }
    }

    async fn duel(price: u64) -> (OracleDuel, Arc<ManualClock>, Arc<StubFeed>) {
        let clock = Arc::new(ManualClock::new(0));
        let feed = Arc::new(StubFeed(AtomicU64::new(price)));
        let engine = OracleDuel::with_seed(clock.clone(), feed.clone(), 11);
        engine
            .init_match(1, &["0xaaaa".into(), "0xbbbb".into()], &GameParameters::default())
            .await
            .unwrap();
        (engine, clock, feed)
    }

    fn sides(engine: &OracleDuel) -> (String, String) {
        let state = engine.get_state(1).unwrap();
        (
            state["bull"].as_str().unwrap().to_string(),
            state["bear"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn bull_wins_on_a_rise() {
        let (engine, clock, feed) = duel(1_000).await;
        let (bull, _) = sides(&engine);
        assert!(!engine.is_resolvable(1));
        assert_eq!(engine.resolve(1).await, Err(GameError::NotResolvable(1)));

        clock.advance(Duration::from_secs(305));
        feed.0.store(1_100, Ordering::SeqCst);
        assert!(engine.is_resolvable(1));
        let outcome = engine.resolve(1).await.unwrap();
        assert_eq!(outcome.winner, Some(bull.clone()));
        assert_eq!(outcome.scores[&bull], 100);
        assert_eq!(outcome.result["bull_wins"], 1);
        assert_eq!(engine.resolve(1).await, Err(GameError::AlreadyResolved(1)));
    }

    #[tokio::test]
    async fn bear_wins_on_a_fall_and_flat_is_a_draw() {
        let (engine, clock, feed) = duel(1_000).await;
        let (_, bear) = sides(&engine);
        clock.advance(Duration::from_secs(400));
        feed.0.store(900, Ordering::SeqCst);
        assert_eq!(engine.resolve(1).await.unwrap().winner, Some(bear));

        let (engine, clock, _) = duel(1_000).await;
        clock.advance(Duration::from_secs(400));
        let outcome = engine.resolve(1).await.unwrap();
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.result["direction"], "flat");
    }

    #[tokio::test]
    async fn prices_beyond_i64_keep_the_right_winner() {
        let start = u64::MAX - 10;
        let (engine, clock, feed) = duel(start).await;
        let (bull, bear) = sides(&engine);
        clock.advance(Duration::from_secs(400));
        feed.0.store(u64::MAX, Ordering::SeqCst);
        let outcome = engine.resolve(1).await.unwrap();
        assert_eq!(outcome.winner, Some(bull.clone()));
        assert_eq!(outcome.scores[&bull], 10);
        assert_eq!(outcome.scores[&bear], -10);

        let (engine, clock, feed) = duel(u64::MAX).await;
        let (bull, bear) = sides(&engine);
        clock.advance(Duration::from_secs(400));
        feed.0.store(1, Ordering::SeqCst);
        let outcome = engine.resolve(1).await.unwrap();
        assert_eq!(outcome.winner, Some(bear));
        assert_eq!(outcome.scores[&bull], -i64::MAX);
        assert_eq!(outcome.result["bear_wins"], 1);
    }

    #[tokio::test]
    async fn feed_failure_leaves_match_unresolved() {
        let (engine, clock, feed) = duel(1_000).await;
        clock.advance(Duration::from_secs(400));
        feed.0.store(0, Ordering::SeqCst);
        assert!(matches!(engine.resolve(1).await, Err(GameError::PriceFeed(_))));
        feed.0.store(1_000, Ordering::SeqCst);
        assert!(engine.resolve(1).await.is_ok());
    }

    #[tokio::test]
    async fn actions_are_refused() {
        let (engine, _, _) = duel(1_000).await;
        let a = GameAction::Commit { hash: "0x00".into() };
        assert!(!engine.process_action(1, "0xaaaa", &a).is_accepted());
    }
}
