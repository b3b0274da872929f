//! Game parameters, mutations and evolution records.

use crate::models::game::GameType;
use crate::models::tournament::TournamentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Sparse knob set. Each game type reads the fields it understands and ignores
/// the rest; unset fields fall back to the engine's defaults.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct GameParameters {
    // Oracle Duel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_symbol: Option<String>,

    // Shared commit-reveal timing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rounds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timeout_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reveal_timeout_secs: Option<i64>,
    /// Added to every deadline before it is enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_secs: Option<i64>,

    // Strategy Arena payoff matrix (row player's payoff)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payoff_cc: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payoff_dc: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payoff_cd: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payoff_dd: Option<i64>,

    // Auction Wars
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_box_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_box_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_reveal_penalty: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_scale: Option<i64>,

    // Quiz Bowl
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_window_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_points: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_bonus_max: Option<i64>,
    /// Extra percentage of `base_points` per difficulty level above 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty_step_pct: Option<i64>,
}

/// Names accepted by [`GameParameters::numeric`] and [`GameParameters::set_numeric`].
pub const NUMERIC_FIELDS: &[&str] = &[
    "duration_secs",
    "rounds",
    "commit_timeout_secs",
    "reveal_timeout_secs",
    "grace_period_secs",
    "payoff_cc",
    "payoff_dc",
    "payoff_cd",
    "payoff_dd",
    "min_box_value",
    "max_box_value",
    "hint_count",
    "no_reveal_penalty",
    "score_scale",
    "question_count",
    "answer_window_secs",
    "base_points",
    "speed_bonus_max",
    "difficulty_step_pct",
];

impl GameParameters {
    /// The full default knob set for a game type.
    pub fn defaults_for(game_type: GameType) -> Self {
        match game_type {
            GameType::OracleDuel => Self {
                duration_secs: Some(300),
                token_symbol: Some("ETH".to_string()),
                grace_period_secs: Some(5),
                ..Self::default()
            },
            GameType::StrategyArena => Self {
                rounds: Some(5),
                commit_timeout_secs: Some(60),
                reveal_timeout_secs: Some(60),
                grace_period_secs: Some(5),
                payoff_cc: Some(6000),
                payoff_dc: Some(10000),
                payoff_cd: Some(0),
                payoff_dd: Some(2000),
                ..Self::default()
            },
            GameType::AuctionWars => Self {
                rounds: Some(3),
                commit_timeout_secs: Some(60),
                reveal_timeout_secs: Some(60),
                grace_period_secs: Some(5),
                min_box_value: Some(1_000),
                max_box_value: Some(100_000),
                hint_count: Some(2),
                no_reveal_penalty: Some(10_000),
                score_scale: Some(10_000),
                ..Self::default()
            },
            GameType::QuizBowl => Self {
                question_count: Some(5),
                answer_window_secs: Some(30),
                reveal_timeout_secs: Some(30),
                grace_period_secs: Some(5),
                base_points: Some(100),
                speed_bonus_max: Some(50),
                difficulty_step_pct: Some(50),
                ..Self::default()
            },
        }
    }

    /// Fill every unset field from `defaults`.
    pub fn merged_over(mut self, defaults: &GameParameters) -> Self {
        for field in NUMERIC_FIELDS {
            if self.numeric(field).is_none() {
                if let Some(v) = defaults.numeric(field) {
                    self.set_numeric(field, v);
                }
            }
        }
        if self.token_symbol.is_none() {
            self.token_symbol = defaults.token_symbol.clone();
        }
        self
    }

    pub fn numeric(&self, field: &str) -> Option<i64> {
        match field {
            "duration_secs" => self.duration_secs,
            "rounds" => self.rounds,
            "commit_timeout_secs" => self.commit_timeout_secs,
            "reveal_timeout_secs" => self.reveal_timeout_secs,
            "grace_period_secs" => self.grace_period_secs,
            "payoff_cc" => self.payoff_cc,
            "payoff_dc" => self.payoff_dc,
            "payoff_cd" => self.payoff_cd,
            "payoff_dd" => self.payoff_dd,
            "min_box_value" => self.min_box_value,
            "max_box_value" => self.max_box_value,
            "hint_count" => self.hint_count,
            "no_reveal_penalty" => self.no_reveal_penalty,
            "score_scale" => self.score_scale,
            "question_count" => self.question_count,
            "answer_window_secs" => self.answer_window_secs,
            "base_points" => self.base_points,
            "speed_bonus_max" => self.speed_bonus_max,
            "difficulty_step_pct" => self.difficulty_step_pct,
            _ => None,
        }
    }

    /// Set a numeric field by name. Returns false for unknown names.
    pub fn set_numeric(&mut self, field: &str, value: i64) -> bool {
        let slot = match field {
            "duration_secs" => &mut self.duration_secs,
            "rounds" => &mut self.rounds,
            "commit_timeout_secs" => &mut self.commit_timeout_secs,
            "reveal_timeout_secs" => &mut self.reveal_timeout_secs,
            "grace_period_secs" => &mut self.grace_period_secs,
            "payoff_cc" => &mut self.payoff_cc,
            "payoff_dc" => &mut self.payoff_dc,
            "payoff_cd" => &mut self.payoff_cd,
            "payoff_dd" => &mut self.payoff_dd,
            "min_box_value" => &mut self.min_box_value,
            "max_box_value" => &mut self.max_box_value,
            "hint_count" => &mut self.hint_count,
            "no_reveal_penalty" => &mut self.no_reveal_penalty,
            "score_scale" => &mut self.score_scale,
            "question_count" => &mut self.question_count,
            "answer_window_secs" => &mut self.answer_window_secs,
            "base_points" => &mut self.base_points,
            "speed_bonus_max" => &mut self.speed_bonus_max,
            "difficulty_step_pct" => &mut self.difficulty_step_pct,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    /// Content hash over the canonical (sorted-key) JSON form, `0x`-prefixed hex.
    pub fn content_hash(&self) -> String {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        format!("0x{}", sha256_hex(canonical_json(&value).as_bytes()))
    }
}

/// Serialize a JSON value with object keys sorted at every level.
pub fn canonical_json(value: &serde_json::Value) -> String {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    let key = Value::String(k.clone()).to_string();
                    format!("{}:{}", key, canonical_json(&map[k]))
                })
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// How a mutation changes its target field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOp {
    /// Multiply by `magnitude`, rounded.
    Scale,
    /// Add `magnitude`, rounded.
    Increment,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub operation: MutationOp,
    pub target_field: String,
    pub magnitude: f64,
    pub reason: String,
}

impl Mutation {
    pub fn scale(field: &str, factor: f64, reason: impl Into<String>) -> Self {
        Self {
            operation: MutationOp::Scale,
            target_field: field.to_string(),
            magnitude: factor,
            reason: reason.into(),
        }
    }

    pub fn increment(field: &str, delta: f64, reason: impl Into<String>) -> Self {
        Self {
            operation: MutationOp::Increment,
            target_field: field.to_string(),
            magnitude: delta,
            reason: reason.into(),
        }
    }
}

/// Where a round's mutations came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationSource {
    Analysis,
    Rules,
}

/// Mutations applied after one round, with the parameter hashes either side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvolutionRecord {
    pub id: Uuid,
    pub tournament_id: TournamentId,
    pub round: u32,
    pub source: MutationSource,
    pub mutations: Vec<Mutation>,
    pub previous_hash: String,
    pub new_hash: String,
    pub created_at: DateTime<Utc>,
}
