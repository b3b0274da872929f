//! Rating and pairing: Swiss / elimination / round-robin pairing, Elo, upsets, standings.
//!
//! Everything here is a pure function of its inputs.

use crate::models::{Address, AgentStanding, MatchResult, Pairing, RoundData, TournamentFormat};

/// K-factor for Elo updates.
pub const K_FACTOR: f64 = 32.0;

/// Rating gap at which a win counts as an upset.
pub const DEFAULT_UPSET_THRESHOLD: i32 = 100;

/// Pairings for one round plus the player left over, if any.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PairingPlan {
    pub pairings: Vec<Pairing>,
    pub bye: Option<Address>,
}

/// Outcome of a game from player A's point of view.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EloOutcome {
    Win,
    Loss,
    Draw,
}

impl EloOutcome {
    fn score(&self) -> f64 {
        match self {
            EloOutcome::Win => 1.0,
            EloOutcome::Loss => 0.0,
            EloOutcome::Draw => 0.5,
        }
    }
}

/// Generate the pairings for `round_number`.
///
/// - Elimination formats: round 1 seeds rank `i` against rank `n-1-i`; later
///   rounds pair survivors in bracket order.
/// - Round robin: circle method over the standings order.
/// - Everything else: Swiss.
pub fn generate_pairings(
    format: TournamentFormat,
    standings: &[AgentStanding],
    past_rounds: &[RoundData],
    round_number: u32,
) -> PairingPlan {
    match format {
        TournamentFormat::SingleElimination | TournamentFormat::DoubleElimination => {
            let has_history = past_rounds.iter().any(|r| !r.pairings.is_empty());
            if round_number <= 1 || !has_history {
                seed_elimination(standings)
            } else {
                bracket_elimination(standings, past_rounds)
            }
        }
        TournamentFormat::RoundRobin => round_robin(standings, round_number),
        TournamentFormat::Swiss
        | TournamentFormat::BestOfN
        | TournamentFormat::RoyalRumble
        | TournamentFormat::Pentathlon => swiss(standings, past_rounds),
    }
}

/// Active players ordered by points desc, Elo desc, address asc.
fn ranked_active(standings: &[AgentStanding]) -> Vec<&AgentStanding> {
    let mut active: Vec<&AgentStanding> = standings.iter().filter(|s| !s.eliminated).collect();
    active.sort_by(|a, b| {
        b.points
            .cmp(&a.points)
            .then(b.elo.cmp(&a.elo))
            .then(a.address.cmp(&b.address))
    });
    active
}

/// True if `a` and `b` met in any earlier round.
pub fn have_met(a: &str, b: &str, past_rounds: &[RoundData]) -> bool {
    past_rounds
        .iter()
        .flat_map(|r| r.pairings.iter())
        .any(|p| p.is_between(a, b))
}

fn swiss(standings: &[AgentStanding], past_rounds: &[RoundData]) -> PairingPlan {
    let mut pool: Vec<Address> = ranked_active(standings)
        .into_iter()
        .map(|s| s.address.clone())
        .collect();
    let mut plan = PairingPlan::default();

    while pool.len() >= 2 {
        let first = pool.remove(0);
        // Nearest fresh opponent; rematch with the nearest player only when none is left.
        let idx = pool
            .iter()
            .position(|candidate| !have_met(&first, candidate, past_rounds))
            .unwrap_or(0);
        let second = pool.remove(idx);
        plan.pairings.push(Pairing::new(first, second));
    }
    plan.bye = pool.pop();
    plan
}

fn seed_elimination(standings: &[AgentStanding]) -> PairingPlan {
    let ranked: Vec<Address> = ranked_active(standings)
        .into_iter()
        .map(|s| s.address.clone())
        .collect();
    let n = ranked.len();
    let mut plan = PairingPlan::default();
    for i in 0..n / 2 {
        plan.pairings
            .push(Pairing::new(ranked[i].clone(), ranked[n - 1 - i].clone()));
    }
    if n % 2 == 1 {
        plan.bye = Some(ranked[n / 2].clone());
    }
    plan
}

fn bracket_elimination(standings: &[AgentStanding], past_rounds: &[RoundData]) -> PairingPlan {
    let alive = |addr: &str| standings.iter().any(|s| s.address == addr && !s.eliminated);
    let mut order: Vec<Address> = Vec::new();
    let push = |addr: &str, order: &mut Vec<Address>| {
        if alive(addr) && !order.iter().any(|a| a == addr) {
            order.push(addr.to_string());
        }
    };

    if let Some(last) = past_rounds.iter().rev().find(|r| !r.pairings.is_empty()) {
        for p in &last.pairings {
            push(&p.player1, &mut order);
            push(&p.player2, &mut order);
        }
        if let Some(bye) = &last.bye {
            push(bye, &mut order);
        }
    }
    for s in ranked_active(standings) {
        push(&s.address, &mut order);
    }

    let mut plan = PairingPlan::default();
    let mut chunks = order.chunks_exact(2);
    for pair in &mut chunks {
        plan.pairings.push(Pairing::new(pair[0].clone(), pair[1].clone()));
    }
    plan.bye = chunks.remainder().first().cloned();
    plan
}

fn round_robin(standings: &[AgentStanding], round_number: u32) -> PairingPlan {
    let mut slots: Vec<Option<Address>> = standings
        .iter()
        .filter(|s| !s.eliminated)
        .map(|s| Some(s.address.clone()))
        .collect();
    if slots.len() < 2 {
        return PairingPlan {
            pairings: Vec::new(),
            bye: slots.into_iter().flatten().next(),
        };
    }
    if slots.len() % 2 == 1 {
        slots.push(None);
    }
    let n = slots.len();
    let shift = (round_number.saturating_sub(1) as usize) % (n - 1);
    slots[1..].rotate_right(shift);

    let mut plan = PairingPlan::default();
    for i in 0..n / 2 {
        match (&slots[i], &slots[n - 1 - i]) {
            (Some(a), Some(b)) => plan.pairings.push(Pairing::new(a.clone(), b.clone())),
            (Some(a), None) | (None, Some(a)) => plan.bye = Some(a.clone()),
            (None, None) => {}
        }
    }
    plan
}

/// Apply a round's results: winners gain a point, draws and losses are counted,
/// and in elimination formats a player reaching the loss limit is flagged.
pub fn update_standings(
    standings: &mut [AgentStanding],
    results: &[MatchResult],
    format: TournamentFormat,
) {
    let limit = format.losses_to_eliminate();
    for result in results {
        match (&result.winner, &result.loser) {
            (Some(winner), Some(loser)) => {
                if let Some(s) = standings.iter_mut().find(|s| &s.address == winner) {
                    s.add_win();
                }
                if let Some(s) = standings.iter_mut().find(|s| &s.address == loser) {
                    s.add_loss();
                    if limit.is_some_and(|l| s.losses >= l) {
                        s.eliminate();
                    }
                }
            }
            _ => {
                for player in result.players() {
                    if let Some(s) = standings.iter_mut().find(|s| s.address == player) {
                        s.add_draw();
                    }
                }
            }
        }
    }
}

/// Expected score of A against B.
pub fn expected_score(rating_a: i32, rating_b: i32) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((rating_b - rating_a) as f64 / 400.0))
}

/// New ratings for A and B after one game, each rounded to the nearest integer.
pub fn calculate_elo(rating_a: i32, rating_b: i32, outcome: EloOutcome) -> (i32, i32) {
    let expected_a = expected_score(rating_a, rating_b);
    let actual_a = outcome.score();
    let new_a = rating_a as f64 + K_FACTOR * (actual_a - expected_a);
    let new_b = rating_b as f64 + K_FACTOR * ((1.0 - actual_a) - (1.0 - expected_a));
    (new_a.round() as i32, new_b.round() as i32)
}

/// A win is an upset when the loser out-rated the winner by at least `threshold`.
pub fn is_upset(winner_elo: i32, loser_elo: i32, threshold: i32) -> bool {
    loser_elo - winner_elo >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GameType;
    use chrono::Utc;

    fn players(n: usize) -> Vec<AgentStanding> {
        (0..n)
            .map(|i| AgentStanding::new(format!("p{i}")).with_elo(1600 - 10 * i as i32))
            .collect()
    }

    fn decided(winner: &str, loser: &str) -> MatchResult {
        MatchResult {
            match_id: 0,
            tournament_id: 0,
            round: 1,
            player1: winner.into(),
            player2: loser.into(),
            winner: Some(winner.into()),
            loser: Some(loser.into()),
            is_draw: false,
            is_upset: false,
            game_type: GameType::StrategyArena,
            stats: serde_json::Value::Null,
            duration_ms: 0,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn elo_equal_ratings_win() {
        assert_eq!(calculate_elo(1200, 1200, EloOutcome::Win), (1216, 1184));
        assert_eq!(calculate_elo(1200, 1200, EloOutcome::Loss), (1184, 1216));
        assert_eq!(calculate_elo(1200, 1200, EloOutcome::Draw), (1200, 1200));
    }

    #[test]
    fn elo_favourite_gains_less() {
        let (a, b) = calculate_elo(1600, 1200, EloOutcome::Win);
        assert!(a - 1600 < 16);
        assert!(1200 - b < 16);
        let (a, _) = calculate_elo(1200, 1600, EloOutcome::Win);
        assert!(a - 1200 > 16);
    }

    #[test]
    fn upset_threshold() {
        assert!(is_upset(1000, 1300, DEFAULT_UPSET_THRESHOLD));
        assert!(!is_upset(1250, 1300, DEFAULT_UPSET_THRESHOLD));
        assert!(is_upset(1200, 1300, DEFAULT_UPSET_THRESHOLD));
    }

    #[test]
    fn elimination_round_one_seeds_top_against_bottom() {
        for n in [2usize, 4, 7, 8, 16] {
            let standings = players(n);
            let plan = generate_pairings(TournamentFormat::SingleElimination, &standings, &[], 1);
            for (i, p) in plan.pairings.iter().enumerate() {
                assert_eq!(p.player1, format!("p{i}"));
                assert_eq!(p.player2, format!("p{}", n - 1 - i));
            }
            assert_eq!(plan.bye.is_some(), n % 2 == 1);
        }
    }

    #[test]
    fn elimination_later_round_pairs_survivors_in_bracket_order() {
        let mut standings = players(8);
        let r1 = generate_pairings(TournamentFormat::SingleElimination, &standings, &[], 1);
        let mut round = RoundData::new(1, r1.pairings.clone(), None);
        // Lower seeds win matches 1 and 3.
        let results = vec![
            decided("p0", "p7"),
            decided("p6", "p1"),
            decided("p2", "p5"),
            decided("p4", "p3"),
        ];
        update_standings(&mut standings, &results, TournamentFormat::SingleElimination);
        round.results = results;
        let plan =
            generate_pairings(TournamentFormat::SingleElimination, &standings, &[round], 2);
        assert_eq!(
            plan.pairings,
            vec![Pairing::new("p0", "p6"), Pairing::new("p2", "p4")]
        );
        assert_eq!(plan.bye, None);
    }

    #[test]
    fn swiss_avoids_rematch_when_alternative_exists() {
        let standings = players(4);
        let r1 = generate_pairings(TournamentFormat::Swiss, &standings, &[], 1);
        assert_eq!(
            r1.pairings,
            vec![Pairing::new("p0", "p1"), Pairing::new("p2", "p3")]
        );
        let past = vec![RoundData::new(1, r1.pairings, None)];
        let r2 = generate_pairings(TournamentFormat::Swiss, &standings, &past, 2);
        for p in &r2.pairings {
            assert!(!have_met(&p.player1, &p.player2, &past));
        }
    }

    #[test]
    fn swiss_falls_back_to_rematch() {
        let standings = players(2);
        let past = vec![RoundData::new(1, vec![Pairing::new("p0", "p1")], None)];
        let plan = generate_pairings(TournamentFormat::Swiss, &standings, &past, 2);
        assert_eq!(plan.pairings, vec![Pairing::new("p0", "p1")]);
    }

    #[test]
    fn swiss_odd_count_leaves_bye() {
        let plan = generate_pairings(TournamentFormat::Swiss, &players(5), &[], 1);
        assert_eq!(plan.pairings.len(), 2);
        assert_eq!(plan.bye.as_deref(), Some("p4"));
    }

    #[test]
    fn swiss_never_repeats_over_many_rounds() {
        let standings = players(8);
        let mut past: Vec<RoundData> = Vec::new();
        for round in 1..=7 {
            let plan = generate_pairings(TournamentFormat::Swiss, &standings, &past, round);
            let mut paired: Vec<&str> = Vec::new();
            for p in &plan.pairings {
                paired.push(&p.player1);
                // A rematch is only allowed when every still-unpaired player was met before.
                if have_met(&p.player1, &p.player2, &past) {
                    assert!(standings
                        .iter()
                        .map(|s| s.address.as_str())
                        .filter(|a| !paired.contains(a))
                        .all(|a| have_met(&p.player1, a, &past)));
                }
                paired.push(&p.player2);
            }
            past.push(RoundData::new(round, plan.pairings, plan.bye));
        }
    }

    #[test]
    fn round_robin_meets_everyone_once() {
        let standings = players(6);
        let mut seen = std::collections::HashSet::new();
        for round in 1..=5 {
            let plan = generate_pairings(TournamentFormat::RoundRobin, &standings, &[], round);
            assert_eq!(plan.pairings.len(), 3);
            for p in plan.pairings {
                let mut key = [p.player1, p.player2];
                key.sort();
                assert!(seen.insert(key), "pair repeated in round {round}");
            }
        }
        assert_eq!(seen.len(), 15);
    }

    #[test]
    fn round_robin_odd_gives_bye() {
        let plan = generate_pairings(TournamentFormat::RoundRobin, &players(5), &[], 2);
        assert_eq!(plan.pairings.len(), 2);
        assert!(plan.bye.is_some());
    }

    #[test]
    fn standings_eliminate_by_format() {
        let mut single = players(2);
        update_standings(&mut single, &[decided("p0", "p1")], TournamentFormat::SingleElimination);
        assert_eq!(single[0].points, 1);
        assert!(single[1].eliminated);

        let mut double = players(2);
        update_standings(&mut double, &[decided("p0", "p1")], TournamentFormat::DoubleElimination);
        assert!(!double[1].eliminated);
        update_standings(&mut double, &[decided("p0", "p1")], TournamentFormat::DoubleElimination);
        assert!(double[1].eliminated);

        let mut swiss = players(2);
        update_standings(&mut swiss, &[decided("p0", "p1")], TournamentFormat::Swiss);
        assert!(!swiss[1].eliminated);
    }

    #[test]
    fn draws_award_no_points() {
        let mut standings = players(2);
        let mut draw = decided("p0", "p1");
        draw.winner = None;
        draw.loser = None;
        draw.is_draw = true;
        update_standings(&mut standings, &[draw], TournamentFormat::Swiss);
        assert_eq!(standings[0].points, 0);
        assert_eq!(standings[0].draws, 1);
        assert_eq!(standings[1].draws, 1);
    }
}
