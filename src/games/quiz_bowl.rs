//! Quiz Bowl: trivia questions answered by commit/reveal, scored on difficulty
//! and on how early the answer was revealed.

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
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuestionBankError {
    #[error("question bank csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("question bank row {row}: {reason}")]
    Invalid { row: usize, reason: String },
    #[error("question bank is empty")]
    Empty,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub category: String,
    /// 1 (easiest) and up.
    pub difficulty: u8,
    pub prompt: String,
    pub choices: Vec<String>,
    /// Index into `choices`.
    pub answer: usize,
}

impl Question {
    fn public_view(&self, index: usize) -> serde_json::Value {
        json!({
            "index": index,
            "category": self.category,
            "difficulty": self.difficulty,
            "prompt": self.prompt,
            "choices": self.choices,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    category: String,
    difficulty: u8,
    prompt: String,
    choice_a: String,
    choice_b: String,
    choice_c: String,
    choice_d: String,
    answer: String,
}

/// Pool questions are drawn from.
#[derive(Clone, Debug)]
pub struct QuestionBank {
    questions: Vec<Question>,
}

fn q(category: &str, difficulty: u8, prompt: &str, choices: [&str; 4], answer: usize) -> Question {
    Question {
        category: category.into(),
        difficulty,
        prompt: prompt.into(),
        choices: choices.iter().map(|c| c.to_string()).collect(),
        answer,
    }
}

impl QuestionBank {
    pub fn new(questions: Vec<Question>) -> Result<Self, QuestionBankError> {
        if questions.is_empty() {
            return Err(QuestionBankError::Empty);
        }
        Ok(Self { questions })
    }

    pub fn builtin() -> Self {
        let questions = vec![
            q("crypto", 1, "What consensus mechanism does Ethereum use since the Merge?", ["Proof of Work", "Proof of Stake", "Proof of Authority", "Proof of History"], 1),
            q("crypto", 1, "What is the smallest denomination of ether called?", ["gwei", "szabo", "wei", "finney"], 2),
            q("crypto", 2, "Which hash function does Bitcoin use for block hashing?", ["Keccak-256", "SHA-256", "BLAKE2b", "MD5"], 1),
            q("crypto", 2, "What does an ERC-20 `approve` call grant?", ["Ownership of a contract", "A spending allowance", "Validator rights", "A token mint"], 1),
            q("crypto", 3, "How many gwei are in one ether?", ["10^6", "10^9", "10^12", "10^18"], 1),
            q("science", 1, "What is the chemical symbol for gold?", ["Ag", "Au", "Gd", "Go"], 1),
            q("science", 2, "What particle carries the electromagnetic force?", ["Gluon", "Photon", "W boson", "Graviton"], 1),
            q("science", 3, "What is the approximate speed of light in km/s?", ["150,000", "300,000", "450,000", "1,000,000"], 1),
            q("math", 1, "What is 7 multiplied by 8?", ["54", "56", "58", "64"], 1),
            q("math", 2, "What is the next prime after 31?", ["33", "35", "37", "39"], 2),
            q("math", 3, "What is the derivative of ln(x)?", ["x", "1/x", "e^x", "ln(x)/x"], 1),
            q("history", 2, "In what year was the Bitcoin whitepaper published?", ["2007", "2008", "2009", "2010"], 1),
            q("history", 1, "Which ancient wonder stood in Alexandria?", ["The Colossus", "The Lighthouse", "The Mausoleum", "The Hanging Gardens"], 1),
            q("computing", 2, "Which data structure gives O(1) average lookup by key?", ["Linked list", "Hash map", "Binary heap", "Stack"], 1),
            q("computing", 3, "What does the CAP theorem's P stand for?", ["Performance", "Persistence", "Partition tolerance", "Parallelism"], 2),
        ];
        Self { questions }
    }

    /// Parse `category,difficulty,prompt,choice_a,choice_b,choice_c,choice_d,answer`
    /// rows. `answer` is a letter `a`-`d` or a zero-based index.
    pub fn from_csv_reader<R: io::Read>(reader: R) -> Result<Self, QuestionBankError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut questions = Vec::new();
        for (i, row) in rdr.deserialize::<CsvRow>().enumerate() {
            let row = row?;
            let line = i + 1;
            let answer = match row.answer.to_ascii_lowercase().as_str() {
                "a" => 0,
                "b" => 1,
                "c" => 2,
                "d" => 3,
                other => other.parse::<usize>().map_err(|_| QuestionBankError::Invalid {
                    row: line,
                    reason: format!("answer {other:?} is not a-d or 0-3"),
                })?,
            };
            if answer > 3 {
                return Err(QuestionBankError::Invalid {
                    row: line,
                    reason: format!("answer index {answer} out of range"),
                });
            }
            if row.difficulty == 0 {
                return Err(QuestionBankError::Invalid {
                    row: line,
                    reason: "difficulty starts at 1".into(),
                });
            }
            if row.prompt.is_empty() {
                return Err(QuestionBankError::Invalid {
                    row: line,
                    reason: "empty prompt".into(),
                });
            }
            questions.push(Question {
                category: row.category,
                difficulty: row.difficulty,
                prompt: row.prompt,
                choices: vec![row.choice_a, row.choice_b, row.choice_c, row.choice_d],
                answer,
            });
        }
        Self::new(questions)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, QuestionBankError> {
        let rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
        Self::from_csv_reader(rdr.into_inner())
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// `count` questions with no repeated prompt until every distinct prompt
    /// has been used once; only then does the pool cycle.
    pub fn pick(&self, count: usize, rng: &mut StdRng) -> Vec<Question> {
        let mut seen = HashSet::new();
        let distinct: Vec<&Question> = self
            .questions
            .iter()
            .filter(|q| seen.insert(q.prompt.trim().to_lowercase()))
            .collect();
        let mut picked = Vec::with_capacity(count);
        if distinct.is_empty() {
            return picked;
        }
        while picked.len() < count {
            let mut pool = distinct.clone();
            pool.shuffle(rng);
            let need = count - picked.len();
            picked.extend(pool.into_iter().take(need).cloned());
        }
        picked
    }
}

impl Default for QuestionBank {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Clone, Copy, Debug)]
struct Settings {
    question_count: usize,
    commit_ms: i64,
    reveal_ms: i64,
    base_points: i64,
    speed_bonus_max: i64,
    difficulty_step_pct: i64,
}

impl Settings {
    fn from_params(params: &GameParameters) -> Result<Self, GameError> {
        let p = params
            .clone()
            .merged_over(&GameParameters::defaults_for(GameType::QuizBowl));
        let count = p.question_count.unwrap_or(0);
        let window = p.answer_window_secs.unwrap_or(0);
        let reveal = p.reveal_timeout_secs.unwrap_or(0);
        let base = p.base_points.unwrap_or(0);
        let speed = p.speed_bonus_max.unwrap_or(0);
        let step = p.difficulty_step_pct.unwrap_or(0);
        if count < 1 {
            return Err(GameError::InvalidParameters("question_count must be at least 1".into()));
        }
        if window < 1 || reveal < 1 {
            return Err(GameError::InvalidParameters("timeouts must be positive".into()));
        }
        if base < 1 || speed < 0 || step < 0 {
            return Err(GameError::InvalidParameters(
                "base_points must be positive, speed_bonus_max and difficulty_step_pct non-negative".into(),
            ));
        }
        let grace = p.grace_period_secs.unwrap_or(0).max(0);
        Ok(Self {
            question_count: count as usize,
            commit_ms: secs_to_ms(window + grace),
            reveal_ms: secs_to_ms(reveal + grace),
            base_points: base,
            speed_bonus_max: speed,
            difficulty_step_pct: step,
        })
    }

    /// Base value scaled up by `difficulty_step_pct` per level above 1.
    fn question_points(&self, difficulty: u8) -> i64 {
        let levels = i64::from(difficulty.max(1) - 1);
        self.base_points * (100 + levels * self.difficulty_step_pct) / 100
    }

    /// Linear in the time left before the reveal deadline.
    fn speed_bonus(&self, remaining_ms: i64, window_ms: i64) -> i64 {
        if window_ms <= 0 {
            return 0;
        }
        self.speed_bonus_max * remaining_ms.clamp(0, window_ms) / window_ms
    }
}

#[derive(Clone, Debug, Serialize)]
struct QuestionRecord {
    question: usize,
    prompt: String,
    correct_answer: usize,
    answers: [Option<usize>; 2],
    correct: [bool; 2],
    points: [i64; 2],
}

struct QuizMatch {
    players: [Address; 2],
    settings: Settings,
    questions: Vec<Question>,
    exchange: Exchange<usize>,
    history: Vec<QuestionRecord>,
    scores: [i64; 2],
    answered_count: u64,
    correct_count: u64,
    resolved: bool,
}

impl QuizMatch {
    fn finished(&self) -> bool {
        self.history.len() >= self.questions.len()
    }

    fn advance(&mut self, now: i64) {
        while !self.finished() && self.exchange.is_settled(now) {
            self.settle_question();
            if !self.finished() {
                self.exchange = Exchange::open(now, self.settings.commit_ms, self.settings.reveal_ms);
            }
        }
    }

    fn settle_question(&mut self) {
        let index = self.history.len();
        let Some(question) = self.questions.get(index) else {
            return;
        };
        let deadline = self.exchange.reveal_deadline().unwrap_or(0);
        let window = self.exchange.reveal_window_ms();
        let mut answers = [None; 2];
        let mut correct = [false; 2];
        let mut points = [0i64; 2];
        for seat in 0..2 {
            let Some(reveal) = self.exchange.revealed(seat) else {
                continue;
            };
            answers[seat] = Some(reveal.value);
            self.answered_count += 1;
            if reveal.value == question.answer {
                correct[seat] = true;
                self.correct_count += 1;
                points[seat] = self.settings.question_points(question.difficulty)
                    + self.settings.speed_bonus(deadline - reveal.at_ms, window);
            }
            self.scores[seat] += points[seat];
        }
        self.history.push(QuestionRecord {
            question: index,
            prompt: question.prompt.clone(),
            correct_answer: question.answer,
            answers,
            correct,
            points,
        });
    }

    fn view(&self, match_id: MatchId) -> serde_json::Value {
        let index = self.history.len();
        let current = match self.questions.get(index) {
            Some(question) if !self.finished() => json!({
                "question": question.public_view(index),
                "exchange": self.exchange.view(),
            }),
            _ => serde_json::Value::Null,
        };
        json!({
            "match_id": match_id,
            "game_type": GameType::QuizBowl,
            "players": self.players,
            "question_count": self.questions.len(),
            "scores": self.scores,
            "history": self.history,
            "current": current,
            "finished": self.finished(),
            "resolved": self.resolved,
        })
    }
}

pub struct QuizBowl {
    clock: Arc<dyn Clock>,
    bank: QuestionBank,
    rng: Mutex<StdRng>,
    matches: Mutex<HashMap<MatchId, QuizMatch>>,
}

impl QuizBowl {
    pub fn new(clock: Arc<dyn Clock>, bank: QuestionBank) -> Self {
        Self::with_rng(clock, bank, StdRng::from_entropy())
    }

    pub fn with_seed(clock: Arc<dyn Clock>, bank: QuestionBank, seed: u64) -> Self {
        Self::with_rng(clock, bank, StdRng::seed_from_u64(seed))
    }

    fn with_rng(clock: Arc<dyn Clock>, bank: QuestionBank, rng: StdRng) -> Self {
        Self {
            clock,
            bank,
            rng: Mutex::new(rng),
            matches: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl GameEngine for QuizBowl {
    fn game_type(&self) -> GameType {
        GameType::QuizBowl
    }

    async fn init_match(
        &self,
        match_id: MatchId,
        players: &[Address],
        params: &GameParameters,
    ) -> Result<(), GameError> {
        let players = two_players(players)?;
        let settings = Settings::from_params(params)?;
        let questions = self.bank.pick(settings.question_count, &mut lock(&self.rng));
        if questions.is_empty() {
            return Err(GameError::InvalidParameters("question bank is empty".into()));
        }
        let now = self.clock.now_ms();
        let mut matches = lock(&self.matches);
        if matches.contains_key(&match_id) {
            return Err(GameError::DuplicateMatch(match_id));
        }
        matches.insert(
            match_id,
            QuizMatch {
                players,
                settings,
                questions,
                exchange: Exchange::open(now, settings.commit_ms, settings.reveal_ms),
                history: Vec::new(),
                scores: [0, 0],
                answered_count: 0,
                correct_count: 0,
                resolved: false,
            },
        );
        debug!("quiz match {match_id} initialised with {} questions", settings.question_count);
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
            return ActionOutcome::rejected("all questions are over");
        }
        let outcome = match action {
            GameAction::Commit { hash } => m.exchange.commit(seat, hash, now),
            GameAction::RevealAnswer { answer, salt } => {
                let choices = m.questions.get(m.history.len()).map_or(0, |q| q.choices.len());
                if *answer >= choices {
                    return ActionOutcome::rejected("answer index out of range");
                }
                m.exchange.reveal(seat, *answer, &answer.to_string(), salt, now)
            }
            _ => ActionOutcome::rejected("quiz bowl accepts only commit and reveal_answer"),
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
            "questions": m.history,
            "final_scores": m.scores,
            "answered_count": m.answered_count,
            "correct_count": m.correct_count,
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
