//! Between-round parameter evolution: analyze a round, pick mutations, apply
//! them inside fixed bounds, and hash the result for on-chain commitment.

use crate::models::{
    canonical_json, sha256_hex, EvolutionRecord, GameParameters, GameType, MatchResult, Mutation,
    MutationOp, MutationSource, TournamentId,
};
use crate::ports::AnalysisService;
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Draw rate above which the rules push for more asymmetric payoffs.
pub const HIGH_DRAW_RATE: f64 = 0.3;

/// Matches shorter than this on average get more rounds/questions.
pub const SHORT_MATCH_MS: f64 = 60_000.0;

/// Static `[min, max]` per mutable field. Fields not listed are never mutated.
pub const PARAMETER_BOUNDS: &[(&str, i64, i64)] = &[
    ("duration_secs", 60, 3_600),
    ("rounds", 1, 20),
    ("commit_timeout_secs", 10, 600),
    ("reveal_timeout_secs", 10, 600),
    ("grace_period_secs", 0, 60),
    ("payoff_cc", 1, 100_000),
    ("payoff_dc", 1, 200_000),
    ("payoff_cd", 0, 50_000),
    ("payoff_dd", 0, 100_000),
    ("min_box_value", 1, 1_000_000),
    ("max_box_value", 10, 10_000_000),
    ("hint_count", 0, 5),
    ("no_reveal_penalty", 0, 100_000),
    ("score_scale", 1, 100_000),
    ("question_count", 1, 20),
    ("answer_window_secs", 5, 300),
    ("base_points", 10, 1_000),
    ("speed_bonus_max", 0, 500),
    ("difficulty_step_pct", 0, 200),
];

pub fn bounds_for(field: &str) -> Option<(i64, i64)> {
    PARAMETER_BOUNDS
        .iter()
        .find(|(name, _, _)| *name == field)
        .map(|&(_, lo, hi)| (lo, hi))
}

#[derive(Debug, Error)]
pub enum EvolutionError {
    #[error("no results to analyze")]
    NoResults,
    #[error("evolved parameters rejected: {0}")]
    InvalidResult(String),
    #[error("no mutation changed a parameter")]
    Unchanged,
}

/// Willingness to take risks, read off the draw rate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeBehavior {
    Conservative,
    Moderate,
    Aggressive,
}

impl StakeBehavior {
    pub fn from_draw_rate(draw_rate: f64) -> Self {
        if draw_rate > 0.4 {
            StakeBehavior::Conservative
        } else if draw_rate > 0.15 {
            StakeBehavior::Moderate
        } else {
            StakeBehavior::Aggressive
        }
    }
}

/// What one round of play looked like.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundMetrics {
    pub sample_size: usize,
    pub draw_rate: f64,
    pub avg_duration_ms: f64,
    /// Game-specific label for a strategy most matches converged on.
    pub dominant_strategy: Option<String>,
    pub stake_behavior: StakeBehavior,
}

fn stat(stats: &serde_json::Value, key: &str) -> u64 {
    stats.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
}

/// Label the dominant side of a two-way split, if one side reached 70%.
fn dominant_of(a: u64, b: u64, a_label: &str, b_label: &str) -> Option<String> {
    let total = a + b;
    if total == 0 {
        return None;
    }
    let ratio = a as f64 / total as f64;
    if ratio >= 0.7 {
        Some(a_label.to_string())
    } else if ratio <= 0.3 {
        Some(b_label.to_string())
    } else {
        None
    }
}

/// Summarize a completed round.
pub fn analyze_round(results: &[MatchResult], game_type: GameType) -> RoundMetrics {
    let n = results.len();
    let draws = results.iter().filter(|r| r.is_draw).count();
    let draw_rate = if n == 0 { 0.0 } else { draws as f64 / n as f64 };
    let avg_duration_ms = if n == 0 {
        0.0
    } else {
        results.iter().map(|r| r.duration_ms as f64).sum::<f64>() / n as f64
    };

    let sum = |key: &str| results.iter().map(|r| stat(&r.stats, key)).sum::<u64>();
    let dominant_strategy = match game_type {
        GameType::StrategyArena => dominant_of(
            sum("cooperate_count"),
            sum("defect_count"),
            "cooperate",
            "defect",
        ),
        GameType::AuctionWars => {
            dominant_of(sum("overbid_count"), sum("underbid_count"), "overbid", "underbid")
        }
        GameType::QuizBowl => {
            let answered = sum("answered_count");
            let correct = sum("correct_count");
            dominant_of(correct, answered.saturating_sub(correct), "accurate", "guessing")
        }
        GameType::OracleDuel => dominant_of(sum("bull_wins"), sum("bear_wins"), "bull", "bear"),
    };

    RoundMetrics {
        sample_size: n,
        draw_rate,
        avg_duration_ms,
        dominant_strategy,
        stake_behavior: StakeBehavior::from_draw_rate(draw_rate),
    }
}

/// Deterministic fallback rules. Each rule only fires for game types it applies to.
pub fn rule_mutations(metrics: &RoundMetrics, game_type: GameType) -> Vec<Mutation> {
    use GameType::*;
    let mut out = Vec::new();

    if metrics.draw_rate > HIGH_DRAW_RATE {
        let reason = format!("draw rate {:.2} too high", metrics.draw_rate);
        match game_type {
            StrategyArena => out.push(Mutation::scale("payoff_dc", 1.1, reason)),
            AuctionWars => out.push(Mutation::scale("score_scale", 1.2, reason)),
            QuizBowl => out.push(Mutation::increment("speed_bonus_max", 10.0, reason)),
            OracleDuel => out.push(Mutation::scale("duration_secs", 1.5, reason)),
        }
    }

    if game_type == StrategyArena {
        match metrics.dominant_strategy.as_deref() {
            Some("defect") => out.push(Mutation::scale(
                "payoff_dd",
                0.8,
                "defection dominant: cheapen mutual defection",
            )),
            Some("cooperate") => out.push(Mutation::scale(
                "payoff_cc",
                0.9,
                "cooperation dominant: cheapen mutual cooperation",
            )),
            _ => {}
        }
    }

    if metrics.sample_size > 0 && metrics.avg_duration_ms < SHORT_MATCH_MS {
        let reason = format!("matches too short ({:.0} ms)", metrics.avg_duration_ms);
        match game_type {
            StrategyArena | AuctionWars => out.push(Mutation::increment("rounds", 1.0, reason)),
            QuizBowl => out.push(Mutation::increment("question_count", 1.0, reason)),
            OracleDuel => {}
        }
    }

    match (metrics.stake_behavior, game_type) {
        (_, OracleDuel) => {}
        (StakeBehavior::Conservative, QuizBowl) => {
            out.push(Mutation::scale("answer_window_secs", 0.8, "conservative play: tighten timeouts"));
            out.push(Mutation::scale("reveal_timeout_secs", 0.8, "conservative play: tighten timeouts"));
        }
        (StakeBehavior::Conservative, _) => {
            out.push(Mutation::scale("commit_timeout_secs", 0.8, "conservative play: tighten timeouts"));
            out.push(Mutation::scale("reveal_timeout_secs", 0.8, "conservative play: tighten timeouts"));
        }
        (StakeBehavior::Aggressive, _) => {
            out.push(Mutation::increment("grace_period_secs", 2.0, "aggressive play: widen safety margin"));
        }
        (StakeBehavior::Moderate, _) => {}
    }

    out
}

/// Apply mutations in order, clamping each result into its bounds.
/// Mutations on unknown or unset fields are dropped, as are those that leave
/// the value where it was. Returns the new set and the mutations that took
/// effect.
pub fn apply_mutations(
    params: &GameParameters,
    mutations: &[Mutation],
) -> (GameParameters, Vec<Mutation>) {
    let mut next = params.clone();
    let mut applied = Vec::new();
    for m in mutations {
        let Some((lo, hi)) = bounds_for(&m.target_field) else {
            debug!("ignoring mutation on unknown field {}", m.target_field);
            continue;
        };
        let Some(current) = next.numeric(&m.target_field) else {
            continue;
        };
        if !m.magnitude.is_finite() {
            continue;
        }
        let raw = match m.operation {
            MutationOp::Scale => (current as f64 * m.magnitude).round(),
            MutationOp::Increment => (current as f64 + m.magnitude).round(),
        };
        let value = (raw.clamp(i64::MIN as f64, i64::MAX as f64) as i64).clamp(lo, hi);
        if value == current {
            continue;
        }
        next.set_numeric(&m.target_field, value);
        applied.push(m.clone());
    }
    (next, applied)
}

/// Cache + circuit breaker in front of the optional analysis service.
#[derive(Debug)]
pub struct AnalysisGate {
    cache: HashMap<String, Vec<Mutation>>,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl AnalysisGate {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            cache: HashMap::new(),
            consecutive_failures: 0,
            open_until: None,
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    /// True while the breaker is open.
    pub fn is_open(&self) -> bool {
        self.open_until.is_some_and(|t| Instant::now() < t)
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.failure_threshold {
            warn!(
                "analysis service failed {} times in a row, pausing for {:?}",
                self.consecutive_failures, self.cooldown
            );
            self.open_until = Some(Instant::now() + self.cooldown);
            self.consecutive_failures = 0;
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.open_until = None;
    }
}

fn cache_key(metrics: &RoundMetrics, game_type: GameType, round: u32) -> String {
    let value = serde_json::json!({
        "game_type": game_type,
        "round": round,
        "metrics": metrics,
    });
    sha256_hex(canonical_json(&value).as_bytes())
}

/// Parameters produced by one evolution step.
#[derive(Clone, Debug)]
pub struct EvolutionOutcome {
    pub params: GameParameters,
    pub hash: String,
    pub record: EvolutionRecord,
}

/// Stateful side of evolution: the analysis gate and per-tournament history.
pub struct EvolutionEngine {
    analysis: Option<Arc<dyn AnalysisService>>,
    gate: AnalysisGate,
    history: HashMap<TournamentId, Vec<EvolutionRecord>>,
}

impl EvolutionEngine {
    pub fn new(analysis: Option<Arc<dyn AnalysisService>>, gate: AnalysisGate) -> Self {
        Self {
            analysis,
            gate,
            history: HashMap::new(),
        }
    }

    pub fn gate(&self) -> &AnalysisGate {
        &self.gate
    }

    pub fn history(&self, tournament_id: TournamentId) -> &[EvolutionRecord] {
        self.history
            .get(&tournament_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Ask the analysis service first; fall back to the rule set on any failure,
    /// an open breaker, or an empty answer.
    pub async fn determine_mutations(
        &mut self,
        metrics: &RoundMetrics,
        game_type: GameType,
        params: &GameParameters,
        recent_results: &[MatchResult],
        round: u32,
    ) -> (Vec<Mutation>, MutationSource) {
        if let Some(service) = self.analysis.clone() {
            if self.gate.is_open() {
                debug!("analysis breaker open, using rules");
            } else {
                let key = cache_key(metrics, game_type, round);
                if let Some(cached) = self.gate.cache.get(&key) {
                    return (cached.clone(), MutationSource::Analysis);
                }
                match service
                    .analyze_evolution(metrics, game_type, params, recent_results, round)
                    .await
                {
                    Ok(Some(mutations)) if !mutations.is_empty() => {
                        self.gate.record_success();
                        self.gate.cache.insert(key, mutations.clone());
                        return (mutations, MutationSource::Analysis);
                    }
                    Ok(_) => {
                        self.gate.record_success();
                        debug!("analysis service had no suggestion, using rules");
                    }
                    Err(e) => {
                        warn!("analysis service failed: {e}");
                        self.gate.record_failure();
                    }
                }
            }
        }
        (rule_mutations(metrics, game_type), MutationSource::Rules)
    }

    /// analyze → determine → apply → hash, then append the record to history.
    ///
    /// Mutations land on `params` filled out with the game type's defaults, so
    /// the result is always a complete set. `accept` gets that set; if it
    /// refuses, or no mutation changed anything, nothing is recorded and the
    /// caller keeps its current parameters.
    pub async fn evolve(
        &mut self,
        tournament_id: TournamentId,
        round: u32,
        results: &[MatchResult],
        game_type: GameType,
        params: &GameParameters,
        accept: impl Fn(&GameParameters) -> bool,
    ) -> Result<EvolutionOutcome, EvolutionError> {
        if results.is_empty() {
            return Err(EvolutionError::NoResults);
        }
        let metrics = analyze_round(results, game_type);
        let (proposed, source) = self
            .determine_mutations(&metrics, game_type, params, results, round)
            .await;
        let full = params
            .clone()
            .merged_over(&GameParameters::defaults_for(game_type));
        let (next, applied) = apply_mutations(&full, &proposed);
        if applied.is_empty() {
            debug!(
                "tournament {tournament_id} round {round}: {} proposed mutation(s) changed nothing",
                proposed.len()
            );
            return Err(EvolutionError::Unchanged);
        }
        if !accept(&next) {
            return Err(EvolutionError::InvalidResult(format!(
                "{} mutation(s) from {:?} produced an invalid {} parameter set",
                applied.len(),
                source,
                game_type
            )));
        }

        let record = EvolutionRecord {
            id: Uuid::new_v4(),
            tournament_id,
            round,
            source,
            mutations: applied,
            previous_hash: params.content_hash(),
            new_hash: next.content_hash(),
            created_at: Utc::now(),
        };
        info!(
            "tournament {} round {}: {} mutation(s) via {:?}",
            tournament_id,
            round,
            record.mutations.len(),
            source
        );
        self.history
            .entry(tournament_id)
            .or_default()
            .push(record.clone());
        Ok(EvolutionOutcome {
            hash: record.new_hash.clone(),
            params: next,
            record,
        })
    }
}
