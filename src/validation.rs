//! Tournament config checks and name sanitisation.

use crate::games::GameRegistry;
use crate::models::TournamentConfig;
use crate::ports::Validator;
use std::sync::Arc;

pub const MAX_NAME_LEN: usize = 64;
pub const MIN_PARTICIPANTS: u32 = 2;
pub const MAX_PARTICIPANTS: u32 = 256;
pub const MAX_ROUNDS: u32 = 50;

/// Bounds checks on the config, plus parameter checks through the engine
/// registry when one is attached.
#[derive(Clone, Default)]
pub struct DefaultValidator {
    registry: Option<Arc<GameRegistry>>,
}

impl DefaultValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: Arc<GameRegistry>) -> Self {
        Self {
            registry: Some(registry),
        }
    }
}

impl Validator for DefaultValidator {
    fn validate_config(&self, config: &TournamentConfig) -> Vec<String> {
        let mut errors = Vec::new();
        let name_len = config.name.chars().count();
        if config.name.trim().is_empty() {
            errors.push("name must not be empty".to_string());
        } else if name_len > MAX_NAME_LEN {
            errors.push(format!("name is longer than {MAX_NAME_LEN} characters"));
        }
        if !(MIN_PARTICIPANTS..=MAX_PARTICIPANTS).contains(&config.max_participants) {
            errors.push(format!(
                "max_participants must be between {MIN_PARTICIPANTS} and {MAX_PARTICIPANTS}"
            ));
        }
        if !(1..=MAX_ROUNDS).contains(&config.round_count) {
            errors.push(format!("round_count must be between 1 and {MAX_ROUNDS}"));
        }
        if let Some(registry) = &self.registry {
            match registry.get(config.game_type) {
                None => errors.push(format!("no engine for {}", config.game_type)),
                Some(engine) if !engine.validate_parameters(&config.game_parameters) => {
                    errors.push(format!("invalid {} parameters", config.game_type));
                }
                Some(_) => {}
            }
        }
        errors
    }

    /// Trim, collapse inner whitespace, drop anything outside a conservative
    /// charset and cap the length.
    fn sanitize_name(&self, name: &str) -> String {
        let cleaned: String = name
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace() || "-_.:'#&()!".contains(*c))
            .collect();
        cleaned
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(MAX_NAME_LEN)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::QuestionBank;
    use crate::memory::FixedPriceFeed;
    use crate::models::{GameParameters, GameType, TournamentFormat};
    use crate::ports::SystemClock;

    fn config() -> TournamentConfig {
        TournamentConfig {
            name: "Friday Night Duels".into(),
            game_type: GameType::StrategyArena,
            format: TournamentFormat::Swiss,
            entry_stake: 10,
            max_participants: 8,
            round_count: 3,
            game_parameters: GameParameters::default(),
        }
    }

    #[test]
    fn sanitizes_names() {
        let v = DefaultValidator::new();
        assert_eq!(v.sanitize_name("  Spring   <b>Open</b>  "), "Spring bOpenb");
        assert_eq!(v.sanitize_name(&"x".repeat(100)).len(), MAX_NAME_LEN);
        assert_eq!(v.sanitize_name("Cup #3: Finals!"), "Cup #3: Finals!");
    }

    #[test]
    fn accepts_a_sane_config() {
        assert!(DefaultValidator::new().validate_config(&config()).is_empty());
    }

    #[test]
    fn reports_every_problem() {
        let mut c = config();
        c.name = "   ".into();
        c.max_participants = 1;
        c.round_count = 0;
        assert_eq!(DefaultValidator::new().validate_config(&c).len(), 3);
    }

    #[test]
    fn checks_parameters_through_the_registry() {
        let registry = GameRegistry::standard(
            Arc::new(SystemClock),
            Arc::new(FixedPriceFeed::new()),
            QuestionBank::builtin(),
        );
        let v = DefaultValidator::with_registry(Arc::new(registry));
        let mut c = config();
        assert!(v.validate_config(&c).is_empty());
        c.game_parameters.payoff_cc = Some(20_000);
        assert_eq!(v.validate_config(&c), vec!["invalid strategy_arena parameters".to_string()]);
    }
}
