//! Strategy Arena: iterated prisoner's dilemma over commit/reveal rounds.

use super::commit_reveal::Exchange;
use super::{
    leader, lock, score_map, seat_of, secs_to_ms, two_players, ActionOutcome, GameAction,
    GameEngine, GameError, Outcome,
};
use crate::models::{Address, GameParameters, GameType, MatchId};
use crate::ports::Clock;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Move {
    Cooperate,
    Defect,
}

impl Move {
    /// The string committed to: `commitment_hash(move.as_str(), salt)`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Move::Cooperate => "cooperate",
            Move::Defect => "defect",
        }
    }
}

/// Payoff matrix from the row player's side: `dc` is what a defector earns
/// against a cooperator.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Payoffs {
    pub cc: i64,
    pub dc: i64,
    pub cd: i64,
    pub dd: i64,
}

impl Payoffs {
    fn from_params(params: &GameParameters) -> Option<Self> {
        Some(Self {
            cc: params.payoff_cc?,
            dc: params.payoff_dc?,
            cd: params.payoff_cd?,
            dd: params.payoff_dd?,
        })
    }

    /// `DC > CC > DD >= CD` and `2CC > DC + CD`.
    pub fn is_valid(&self) -> bool {
        self.dc > self.cc
            && self.cc > self.dd
            && self.dd >= self.cd
            && 2 * self.cc > self.dc + self.cd
    }

    pub fn score(&self, mine: Move, theirs: Move) -> i64 {
        match (mine, theirs) {
            (Move::Cooperate, Move::Cooperate) => self.cc,
            (Move::Defect, Move::Cooperate) => self.dc,
            (Move::Cooperate, Move::Defect) => self.cd,
            (Move::Defect, Move::Defect) => self.dd,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Settings {
    rounds: u32,
    commit_ms: i64,
    reveal_ms: i64,
    payoffs: Payoffs,
}

impl Settings {
    fn from_params(params: &GameParameters) -> Result<Self, GameError> {
        let p = params
            .clone()
            .merged_over(&GameParameters::defaults_for(GameType::StrategyArena));
        let payoffs = Payoffs::from_params(&p)
            .ok_or_else(|| GameError::InvalidParameters("payoff matrix incomplete".into()))?;
        if !payoffs.is_valid() {
            return Err(GameError::InvalidParameters(format!(
                "payoffs violate DC > CC > DD >= CD and 2CC > DC + CD: {payoffs:?}"
            )));
        }
        let rounds = p.rounds.unwrap_or(0);
        if rounds < 1 {
            return Err(GameError::InvalidParameters("rounds must be at least 1".into()));
        }
        let grace = p.grace_period_secs.unwrap_or(0).max(0);
        let commit = p.commit_timeout_secs.unwrap_or(0);
        let reveal = p.reveal_timeout_secs.unwrap_or(0);
        if commit < 1 || reveal < 1 {
            return Err(GameError::InvalidParameters("timeouts must be positive".into()));
        }
        Ok(Self {
            rounds: rounds as u32,
            commit_ms: secs_to_ms(commit + grace),
            reveal_ms: secs_to_ms(reveal + grace),
            payoffs,
        })
    }
}

#[derive(Clone, Debug, Serialize)]
struct RoundRecord {
    round: u32,
    /// None where a player failed to reveal.
    moves: [Option<Move>; 2],
    payoffs: [i64; 2],
}

struct StrategyMatch {
    players: [Address; 2],
    settings: Settings,
    exchange: Exchange<Move>,
    history: Vec<RoundRecord>,
    scores: [i64; 2],
    cooperate_count: u64,
    defect_count: u64,
    forfeits: u64,
    resolved: bool,
}

impl StrategyMatch {
    fn finished(&self) -> bool {
        self.history.len() as u32 >= self.settings.rounds
    }

    /// Settle every round whose window has run out, opening the next at `now`.
    fn advance(&mut self, now: i64) {
        while !self.finished() && self.exchange.is_settled(now) {
            self.settle_round();
            if !self.finished() {
                self.exchange = Exchange::open(now, self.settings.commit_ms, self.settings.reveal_ms);
            }
        }
    }

    fn settle_round(&mut self) {
        let p = self.settings.payoffs;
        let moves = [
            self.exchange.revealed(0).map(|r| r.value),
            self.exchange.revealed(1).map(|r| r.value),
        ];
        let gains = match moves {
            [Some(a), Some(b)] => [p.score(a, b), p.score(b, a)],
            [Some(_), None] => {
                self.forfeits += 1;
                [p.dc, p.cd]
            }
            [None, Some(_)] => {
                self.forfeits += 1;
                [p.cd, p.dc]
            }
            [None, None] => [0, 0],
        };
        for m in moves.iter().flatten() {
            match m {
                Move::Cooperate => self.cooperate_count += 1,
                Move::Defect => self.defect_count += 1,
            }
        }
        self.scores[0] += gains[0];
        self.scores[1] += gains[1];
        self.history.push(RoundRecord {
            round: self.history.len() as u32 + 1,
            moves,
            payoffs: gains,
        });
    }

    fn view(&self, match_id: MatchId) -> serde_json::Value {
        json!({
            "match_id": match_id,
            "game_type": GameType::StrategyArena,
            "players": self.players,
            "round": (self.history.len() as u32 + 1).min(self.settings.rounds),
            "total_rounds": self.settings.rounds,
            "scores": self.scores,
            "payoffs": self.settings.payoffs,
            "history": self.history,
            "current": if self.finished() { serde_json::Value::Null } else { self.exchange.view() },
            "finished": self.finished(),
            "resolved": self.resolved,
        })
    }
}

pub struct StrategyArena {
    clock: Arc<dyn Clock>,
    matches: Mutex<HashMap<MatchId, StrategyMatch>>,
}

impl StrategyArena {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            matches: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl GameEngine for StrategyArena {
    fn game_type(&self) -> GameType {
        GameType::StrategyArena
    }

    async fn init_match(
        &self,
        match_id: MatchId,
        players: &[Address],
        params: &GameParameters,
    ) -> Result<(), GameError> {
        let players = two_players(players)?;
        let settings = Settings::from_params(params)?;
        let now = self.clock.now_ms();
        let mut matches = lock(&self.matches);
        if matches.contains_key(&match_id) {
            return Err(GameError::DuplicateMatch(match_id));
        }
        matches.insert(
            match_id,
            StrategyMatch {
                players,
                settings,
                exchange: Exchange::open(now, settings.commit_ms, settings.reveal_ms),
                history: Vec::new(),
                scores: [0, 0],
                cooperate_count: 0,
                defect_count: 0,
                forfeits: 0,
                resolved: false,
            },
        );
        debug!("strategy match {match_id} initialised for {} rounds", settings.rounds);
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
            GameAction::RevealMove { choice, salt } => {
                m.exchange.reveal(seat, *choice, choice.as_str(), salt, now)
            }
            _ => ActionOutcome::rejected("strategy arena accepts only commit and reveal_move"),
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
            "cooperate_count": m.cooperate_count,
            "defect_count": m.defect_count,
            "forfeits": m.forfeits,
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

    async fn arena(clock: Arc<ManualClock>) -> StrategyArena {
        let arena = StrategyArena::new(clock);
        arena
            .init_match(1, &[P1.into(), P2.into()], &GameParameters::default())
            .await
            .unwrap();
        arena
    }

    fn play_round(arena: &StrategyArena, a: Move, b: Move) {
        let commit = |m: Move, salt: &str| GameAction::Commit {
            hash: commitment_hash(m.as_str(), salt),
        };
        assert!(arena.process_action(1, P1, &commit(a, "s1")).is_accepted());
        assert!(arena.process_action(1, P2, &commit(b, "s2")).is_accepted());
        let reveal = |m: Move, salt: &str| GameAction::RevealMove {
            choice: m,
            salt: salt.into(),
        };
        assert!(arena.process_action(1, P1, &reveal(a, "s1")).is_accepted());
        assert!(arena.process_action(1, P2, &reveal(b, "s2")).is_accepted());
    }

    #[tokio::test]
    async fn mutual_cooperation_is_a_draw() {
        let arena = arena(Arc::new(ManualClock::new(0))).await;
        for _ in 0..5 {
            play_round(&arena, Move::Cooperate, Move::Cooperate);
        }
        assert!(arena.is_resolvable(1));
        let outcome = arena.resolve(1).await.unwrap();
        assert_eq!(outcome.winner, None);
        assert_eq!(outcome.scores[P1], 30_000);
        assert_eq!(outcome.scores[P2], 30_000);
        assert_eq!(outcome.result["cooperate_count"], 10);
        assert!(outcome.verify());
    }

    #[tokio::test]
    async fn defector_beats_cooperator() {
        let arena = arena(Arc::new(ManualClock::new(0))).await;
        for _ in 0..5 {
            play_round(&arena, Move::Defect, Move::Cooperate);
        }
        let outcome = arena.resolve(1).await.unwrap();
        assert_eq!(outcome.scores[P1], 50_000);
        assert_eq!(outcome.scores[P2], 0);
        assert_eq!(outcome.winner.as_deref(), Some(P1));
    }

    #[tokio::test]
    async fn second_resolve_is_rejected() {
        let arena = arena(Arc::new(ManualClock::new(0))).await;
        for _ in 0..5 {
            play_round(&arena, Move::Cooperate, Move::Defect);
        }
        assert!(arena.resolve(1).await.is_ok());
        assert_eq!(arena.resolve(1).await, Err(GameError::AlreadyResolved(1)));
        assert!(!arena.is_resolvable(1));
    }

    #[tokio::test]
    async fn unfinished_match_cannot_resolve() {
        let arena = arena(Arc::new(ManualClock::new(0))).await;
        play_round(&arena, Move::Cooperate, Move::Cooperate);
        assert!(!arena.is_resolvable(1));
        assert_eq!(arena.resolve(1).await, Err(GameError::NotResolvable(1)));
    }

    #[tokio::test]
    async fn late_reveal_is_rejected_and_round_is_drawn() {
        let clock = Arc::new(ManualClock::new(0));
        let arena = arena(clock.clone()).await;
        let h = |m: Move, s: &str| GameAction::Commit {
            hash: commitment_hash(m.as_str(), s),
        };
        arena.process_action(1, P1, &h(Move::Defect, "x"));
        arena.process_action(1, P2, &h(Move::Defect, "y"));
        clock.advance(Duration::from_secs(66));
        let late = arena.process_action(
            1,
            P1,
            &GameAction::RevealMove {
                choice: Move::Defect,
                salt: "x".into(),
            },
        );
        assert!(!late.is_accepted());
        let state = arena.get_state(1).unwrap();
        assert_eq!(state["history"][0]["payoffs"], json!([0, 0]));
        assert_eq!(state["round"], 2);
    }

    #[tokio::test]
    async fn missing_reveal_forfeits_the_round() {
        let clock = Arc::new(ManualClock::new(0));
        let arena = arena(clock.clone()).await;
        arena.process_action(1, P1, &GameAction::Commit { hash: commitment_hash("cooperate", "a") });
        arena.process_action(1, P2, &GameAction::Commit { hash: commitment_hash("defect", "b") });
        arena.process_action(
            1,
            P1,
            &GameAction::RevealMove {
                choice: Move::Cooperate,
                salt: "a".into(),
            },
        );
        clock.advance(Duration::from_secs(70));
        assert!(!arena.is_resolvable(1));
        let state = arena.get_state(1).unwrap();
        assert_eq!(state["history"][0]["payoffs"], json!([10_000, 0]));
        assert_eq!(state["history"][0]["moves"], json!(["cooperate", null]));
    }

    #[tokio::test]
    async fn state_hides_committed_moves() {
        let arena = arena(Arc::new(ManualClock::new(0))).await;
        arena.process_action(1, P1, &GameAction::Commit { hash: commitment_hash("defect", "z") });
        let state = arena.get_state(1).unwrap().to_string();
        assert!(!state.contains("\"defect\""));
        assert!(state.contains("\"committed\":[true,false]"));
    }

    #[tokio::test]
    async fn outsiders_and_wrong_actions_are_rejected() {
        let arena = arena(Arc::new(ManualClock::new(0))).await;
        let commit = GameAction::Commit { hash: commitment_hash("defect", "z") };
        assert!(!arena.process_action(1, "0xcccc", &commit).is_accepted());
        assert!(!arena.process_action(9, P1, &commit).is_accepted());
        let bid = GameAction::RevealBid { bid: 1, salt: "z".into() };
        assert!(!arena.process_action(1, P1, &bid).is_accepted());
    }

    #[test]
    fn payoff_validation() {
        let arena = StrategyArena::new(Arc::new(ManualClock::new(0)));
        assert!(arena.validate_parameters(&GameParameters::default()));
        let with = |cc, dc, cd, dd| GameParameters {
            payoff_cc: Some(cc),
            payoff_dc: Some(dc),
            payoff_cd: Some(cd),
            payoff_dd: Some(dd),
            ..GameParameters::default()
        };
        assert!(arena.validate_parameters(&with(3, 5, 0, 1)));
        // DC not above CC
        assert!(!arena.validate_parameters(&with(6, 6, 0, 2)));
        // DD above CC
        assert!(!arena.validate_parameters(&with(3, 5, 0, 4)));
        // CD above DD
        assert!(!arena.validate_parameters(&with(3, 5, 2, 1)));
        // 2CC not above DC + CD
        assert!(!arena.validate_parameters(&with(5, 10, 0, 1)));
    }

    #[tokio::test]
    async fn duplicate_and_self_matches_are_refused() {
        let arena = arena(Arc::new(ManualClock::new(0))).await;
        let again = arena
            .init_match(1, &[P1.into(), P2.into()], &GameParameters::default())
            .await;
        assert_eq!(again, Err(GameError::DuplicateMatch(1)));
        let solo = arena
            .init_match(2, &[P1.into(), P1.into()], &GameParameters::default())
            .await;
        assert_eq!(solo, Err(GameError::PlayerCount(2)));
    }
}
