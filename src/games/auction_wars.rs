//! Auction Wars: sealed bids on mystery boxes whose value is only hinted at.
//!
//! Each round reveals a box's hints, takes a committed bid from each player and
//! scores how far the bid landed from the box's actual value.

use super::commit_reveal::Exchange;
use super::{
    leader, lock, score_map, seat_of, secs_to_ms, two_players, ActionOutcome, GameAction,
    GameEngine, GameError, Outcome,
};
use crate::models::{Address, GameParameters, GameType, MatchId};
use crate::ports::Clock;
use async_trait::async_trait;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Partial information about a box's value.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BoxHint {
    /// Which third of the configured value range the box falls in.
    Tier { tier: String },
    /// The value lies within `[low, high]`.
    Range { low: u64, high: u64 },
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MysteryBox {
    pub value: u64,
    pub hints: Vec<BoxHint>,
}

impl MysteryBox {
    fn generate(rng: &mut StdRng, min: u64, max: u64, hint_count: usize) -> Self {
        let value = rng.gen_range(min..=max);
        let span = max - min;
        let mut hints = Vec::with_capacity(hint_count);
        for i in 0..hint_count {
            if i == 0 {
                let third = span / 3;
                let tier = if value < min + third {
                    "low"
                } else if value < min + 2 * third {
                    "mid"
                } else {
                    "high"
                };
                hints.push(BoxHint::Tier { tier: tier.into() });
                continue;
            }
            // Each further hint narrows the window by half.
            let width = (span >> i.min(63)).max(1);
            let offset = rng.gen_range(0..=width);
            let low = value.saturating_sub(offset).max(min);
            let high = low.saturating_add(width).min(max).max(value);
            hints.push(BoxHint::Range { low, high });
        }
        Self { value, hints }
    }
}

#[derive(Clone, Copy, Debug)]
struct Settings {
    rounds: u32,
    commit_ms: i64,
    reveal_ms: i64,
    min_value: u64,
    max_value: u64,
    hint_count: usize,
    no_reveal_penalty: i64,
    score_scale: i64,
}

impl Settings {
    fn from_params(params: &GameParameters) -> Result<Self, GameError> {
        let p = params
            .clone()
            .merged_over(&GameParameters::defaults_for(GameType::AuctionWars));
        let invalid = |msg: &str| Err(GameError::InvalidParameters(msg.into()));
        let rounds = p.rounds.unwrap_or(0);
        let min = p.min_box_value.unwrap_or(0);
        let max = p.max_box_value.unwrap_or(0);
        let commit = p.commit_timeout_secs.unwrap_or(0);
        let reveal = p.reveal_timeout_secs.unwrap_or(0);
        let hints = p.hint_count.unwrap_or(0);
        let penalty = p.no_reveal_penalty.unwrap_or(0);
        let scale = p.score_scale.unwrap_or(0);
        if rounds < 1 {
            return invalid("rounds must be at least 1");
        }
        if min < 1 || max <= min {
            return invalid("box values need 1 <= min_box_value < max_box_value");
        }
        if commit < 1 || reveal < 1 {
            return invalid("timeouts must be positive");
        }
        if hints < 0 || penalty < 0 || scale < 1 {
            return invalid("hint_count and no_reveal_penalty must be >= 0, score_scale >= 1");
        }
        let grace = p.grace_period_secs.unwrap_or(0).max(0);
        Ok(Self {
            rounds: rounds as u32,
            commit_ms: secs_to_ms(commit + grace),
            reveal_ms: secs_to_ms(reveal + grace),
            min_value: min as u64,
            max_value: max as u64,
            hint_count: hints as usize,
            no_reveal_penalty: penalty,
            score_scale: scale,
        })
    }

    /// `-(|bid - value| * scale / value)`, saturating.
    fn score(&self, bid: u64, value: u64) -> i64 {
        let miss = bid.abs_diff(value) as i128;
        let scaled = miss * self.score_scale as i128 / value.max(1) as i128;
        -(scaled.min(i64::MAX as i128) as i64)
    }
}

#[derive(Clone, Debug, Serialize)]
struct RoundRecord {
    round: u32,
    mystery_box: MysteryBox,
    bids: [Option<u64>; 2],
    scores: [i64; 2],
    /// Seat with the closer bid; None on a tie or when nobody bid.
    winner: Option<usize>,
}

struct AuctionMatch {
    players: [Address; 2],
    settings: Settings,
    boxes: Vec<MysteryBox>,
    exchange: Exchange<u64>,
    history: Vec<RoundRecord>,
    scores: [i64; 2],
    rounds_won: [u32; 2],
    overbid_count: u64,
    underbid_count: u64,
    missed_reveals: u64,
    resolved: bool,
}

impl AuctionMatch {
    fn finished(&self) -> bool {
        self.history.len() as u32 >= self.settings.rounds
    }

    fn advance(&mut self, now: i64) {
        while !self.finished() && self.exchange.is_settled(now) {
            self.settle_round();
            if !self.finished() {
                self.exchange = Exchange::open(now, self.settings.commit_ms, self.settings.reveal_ms);
            }
        }
    }

    fn settle_round(&mut self) {
        let index = self.history.len();
        let Some(mystery_box) = self.boxes.get(index).cloned() else {
            return;
        };
        let value = mystery_box.value;
        let bids = [
            self.exchange.revealed(0).map(|r| r.value),
            self.exchange.revealed(1).map(|r| r.value),
        ];
        let mut scores = [0i64; 2];
        for seat in 0..2 {
            match bids[seat] {
                Some(bid) => {
                    scores[seat] = self.settings.score(bid, value);
                    if bid > value {
                        self.overbid_count += 1;
                    } else if bid < value {
                        self.underbid_count += 1;
                    }
                }
                None => {
                    scores[seat] = -self.settings.no_reveal_penalty;
                    self.missed_reveals += 1;
                }
            }
            self.scores[seat] = self.scores[seat].saturating_add(scores[seat]);
        }
        let winner = match bids {
            [Some(a), Some(b)] => {
                let (da, db) = (a.abs_diff(value), b.abs_diff(value));
                match da.cmp(&db) {
                    std::cmp::Ordering::Less => Some(0),
                    std::cmp::Ordering::Greater => Some(1),
                    std::cmp::Ordering::Equal => None,
                }
            }
            [Some(_), None] => Some(0),
            [None, Some(_)] => Some(1),
            [None, None] => None,
        };
        if let Some(seat) = winner {
            self.rounds_won[seat] += 1;
        }
        self.history.push(RoundRecord {
            round: index as u32 + 1,
            mystery_box,
            bids,
            scores,
            winner,
        });
    }

    fn view(&self, match_id: MatchId) -> serde_json::Value {
        let current = if self.finished() {
            serde_json::Value::Null
        } else {
            let hints = self
                .boxes
                .get(self.history.len())
                .map(|b| b.hints.clone())
                .unwrap_or_default();
            json!({ "hints": hints, "exchange": self.exchange.view() })
        };
        json!({
            "match_id": match_id,
            "game_type": GameType::AuctionWars,
            "players": self.players,
            "round": (self.history.len() as u32 + 1).min(self.settings.rounds),
            "total_rounds": self.settings.rounds,
            "value_range": [self.settings.min_value, self.settings.max_value],
            "scores": self.scores,
            "history": self.history,
            "current": current,
            "finished": self.finished(),
            "resolved": self.resolved,
        })
    }
}

pub struct AuctionWars {
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
    matches: Mutex<HashMap<MatchId, AuctionMatch>>,
}

impl AuctionWars {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(clock, StdRng::from_entropy())
    }

    /// Deterministic box contents.
    pub fn with_seed(clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self::with_rng(clock, StdRng::seed_from_u64(seed))
    }

    fn with_rng(clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        Self {
            clock,
            rng: Mutex::new(rng),
            matches: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl GameEngine for AuctionWars {
    fn game_type(&self) -> GameType {
        GameType::AuctionWars
    }

    async fn init_match(
        &self,
        match_id: MatchId,
        players: &[Address],
        params: &GameParameters,
    ) -> Result<(), GameError> {
        let players = two_players(players)?;
        let settings = Settings::from_params(params)?;
        let boxes: Vec<MysteryBox> = {
            let mut rng = lock(&self.rng);
            (0..settings.rounds)
                .map(|_| {
                    MysteryBox::generate(
                        &mut rng,
                        settings.min_value,
                        settings.max_value,
                        settings.hint_count,
                    )
                })
                .collect()
        };
        let now = self.clock.now_ms();
        let mut matches = lock(&self.matches);
        if matches.contains_key(&match_id) {
            return Err(GameError::DuplicateMatch(match_id));
        }
        matches.insert(
            match_id,
            AuctionMatch {
                players,
                settings,
                boxes,
                exchange: Exchange::open(now, settings.commit_ms, settings.reveal_ms),
                history: Vec::new(),
                scores: [0, 0],
                rounds_won: [0, 0],
                overbid_count: 0,
                underbid_count: 0,
                missed_reveals: 0,
                resolved: false,
            },
        );
        debug!("auction match {match_id} initialised with {} boxes", settings.rounds);
        Ok(())
    }

    fn process_action(&self, match_id: MatchId, player: &str, action: &GameAction) -> ActionOutcome {
        let now = self.clock.now_ms();
        let mut matches = lock(&self.matches);
        let Some(m) = matches.get_mut(&match_id) else {
            return ActionOutcome::rejected("unknown match");
        };
        if m.resolved {
            return ActionOutcome::rejected("match already resolved");
        }
        let Some(seat) = seat_of(&m.players, player) else {
            return ActionOutcome::rejected("not a player in this match");
        };
        m.advance(now);
        if m.finished() {
            return ActionOutcome::rejected("all rounds are over");
        }
        let outcome = match action {
            GameAction::Commit { hash } => m.exchange.commit(seat, hash, now),
            GameAction::RevealBid { bid, salt } => {
                m.exchange.reveal(seat, *bid, &bid.to_string(), salt, now)
            }
            _ => ActionOutcome::rejected("auction wars accepts only commit and reveal_bid"),
        };
        if outcome.is_accepted() {
            m.advance(now);
        }
        outcome
    }

    fn is_resolvable(&self, match_id: MatchId) -> bool {
        let now = self.clock.now_ms();
        let mut matches = lock(&self.matches);
        match matches.get_mut(&match_id) {
            Some(m) if !m.resolved => {
                m.advance(now);
                m.finished()
            }
            _ => false,
        }
    }

    async fn resolve(&self, match_id: MatchId) -> Result<Outcome, GameError> {
        let now = self.clock.now_ms();
        let mut matches = lock(&self.matches);
        let m = matches
            .get_mut(&match_id)
            .ok_or(GameError::UnknownMatch(match_id))?;
        if m.resolved {
            return Err(GameError::AlreadyResolved(match_id));
        }
        m.advance(now);
        if !m.finished() {
            return Err(GameError::NotResolvable(match_id));
        }
        m.resolved = true;
        let winner = leader(&m.scores).map(|seat| m.players[seat].clone());
        let result = json!({
            "rounds": m.history,
            "final_scores": m.scores,
            "rounds_won": m.rounds_won,
            "overbid_count": m.overbid_count,
            "underbid_count": m.underbid_count,
            "missed_reveals": m.missed_reveals,
        });
        Ok(Outcome::new(winner, score_map(&m.players, &m.scores), result))
    }

    fn get_state(&self, match_id: MatchId) -> Option<serde_json::Value> {
        lock(&self.matches).get(&match_id).map(|m| m.view(match_id))
    }

    fn validate_parameters(&self, params: &GameParameters) -> bool {
        Settings::from_params(params).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::commitment_hash;
    use crate::ports::ManualClock;
    use std::time::Duration;

    const P1: &str = "0xaaaa";
    const P2: &str = "0xbbbb";

    async fn auction(clock: Arc<ManualClock>, params: GameParameters) -> AuctionWars {
        let engine = AuctionWars::with_seed(clock, 7);
        engine
            .init_match(1, &[P1.into(), P2.into()], &params)
            .await
            .unwrap();
        engine
    }

    fn box_value(engine: &AuctionWars, round: usize) -> u64 {
        lock(&engine.matches)[&1].boxes[round].value
    }

    fn bid(engine: &AuctionWars, player: &str, amount: u64, salt: &str) {
        let commit = GameAction::Commit {
            hash: commitment_hash(&amount.to_string(), salt),
        };
        assert!(engine.process_action(1, player, &commit).is_accepted());
    }

    fn reveal(engine: &AuctionWars, player: &str, amount: u64, salt: &str) -> ActionOutcome {
        engine.process_action(
            1,
            player,
            &GameAction::RevealBid {
                bid: amount,
                salt: salt.into(),
            },
        )
    }

    #[test]
    fn hints_bracket_the_value() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let b = MysteryBox::generate(&mut rng, 1_000, 100_000, 4);
            assert!((1_000..=100_000).contains(&b.value));
            assert_eq!(b.hints.len(), 4);
            for hint in &b.hints {
                if let BoxHint::Range { low, high } = hint {
                    assert!(*low <= b.value && b.value <= *high);
                    assert!(*low >= 1_000 && *high <= 100_000);
                }
            }
        }
    }

    #[test]
    fn score_is_scaled_relative_miss() {
        let settings = Settings::from_params(&GameParameters::default()).unwrap();
        assert_eq!(settings.score(5_000, 5_000), 0);
        assert_eq!(settings.score(5_500, 5_000), -1_000);
        assert_eq!(settings.score(4_500, 5_000), -1_000);
        assert_eq!(settings.score(u64::MAX, 1), -i64::MAX);
    }

    #[tokio::test]
    async fn closest_bidder_wins() {
        let clock = Arc::new(ManualClock::new(0));
        let engine = auction(clock, GameParameters::default()).await;
        for round in 0..3 {
            let value = box_value(&engine, round);
            bid(&engine, P1, value, "a");
            bid(&engine, P2, value * 2, "b");
            assert!(reveal(&engine, P1, value, "a").is_accepted());
            assert!(reveal(&engine, P2, value * 2, "b").is_accepted());
        }
        let outcome = engine.resolve(1).await.unwrap();
        assert_eq!(outcome.winner.as_deref(), Some(P1));
        assert_eq!(outcome.scores[P1], 0);
        assert_eq!(outcome.scores[P2], -30_000);
        assert_eq!(outcome.result["rounds_won"], json!([3, 0]));
        assert_eq!(outcome.result["overbid_count"], 3);
    }

    #[tokio::test]
    async fn missing_reveal_costs_the_penalty() {
        let clock = Arc::new(ManualClock::new(0));
        let params = GameParameters {
            rounds: Some(1),
            ..GameParameters::default()
        };
        let engine = auction(clock.clone(), params).await;
        let value = box_value(&engine, 0);
        bid(&engine, P1, value, "a");
        bid(&engine, P2, value, "b");
        assert!(reveal(&engine, P1, value, "a").is_accepted());
        clock.advance(Duration::from_secs(66));
        assert!(engine.is_resolvable(1));
        let outcome = engine.resolve(1).await.unwrap();
        assert_eq!(outcome.scores[P2], -10_000);
        assert_eq!(outcome.winner.as_deref(), Some(P1));
        assert_eq!(outcome.result["missed_reveals"], 1);
    }

    #[tokio::test]
    async fn open_box_value_is_hidden() {
        let clock = Arc::new(ManualClock::new(0));
        let engine = auction(clock, GameParameters::default()).await;
        let state = engine.get_state(1).unwrap();
        assert!(state["current"]["hints"].is_array());
        assert!(state["current"].get("value").is_none());
        assert!(!state.to_string().contains("\"value\""));
    }

    #[tokio::test]
    async fn equal_bids_split_nothing() {
        let clock = Arc::new(ManualClock::new(0));
        let params = GameParameters {
            rounds: Some(1),
            ..GameParameters::default()
        };
        let engine = auction(clock, params).await;
        let value = box_value(&engine, 0);
        bid(&engine, P1, value + 10, "a");
        bid(&engine, P2, value - 10, "b");
        reveal(&engine, P1, value + 10, "a");
        reveal(&engine, P2, value - 10, "b");
        let outcome = engine.resolve(1).await.unwrap();
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.result["rounds"][0]["winner"], serde_json::Value::Null);
    }

    #[test]
    fn rejects_inverted_value_range() {
        let engine = AuctionWars::with_seed(Arc::new(ManualClock::new(0)), 1);
        assert!(engine.validate_parameters(&GameParameters::default()));
        let bad = GameParameters {
            min_box_value: Some(500),
            max_box_value: Some(100),
            ..GameParameters::default()
        };
        assert!(!engine.validate_parameters(&bad));
    }
}
