//! Pure tournament logic: pairing and rating, parameter evolution, prize split.

pub mod evolution;
pub mod pairing;
pub mod prizes;

pub use evolution::{
    analyze_round, apply_mutations, bounds_for, rule_mutations, AnalysisGate, EvolutionEngine,
    EvolutionError, EvolutionOutcome, RoundMetrics, StakeBehavior, PARAMETER_BOUNDS,
};
pub use pairing::{
    calculate_elo, expected_score, generate_pairings, have_met, is_upset, update_standings,
    EloOutcome, PairingPlan, DEFAULT_UPSET_THRESHOLD, K_FACTOR,
};
pub use prizes::{compute_payouts, distributable_pool, DEFAULT_FEE_BPS, PODIUM_SHARES_BPS};
