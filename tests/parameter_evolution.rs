//! Integration tests for between-round parameter evolution across game types.

mod common;

use arena_orchestrator::{GameParameters, GameType, TournamentId};
use common::Harness;

/// Two agents, two tournament rounds, default parameters; nobody acts in
/// round 1 so every match is a draw.
async fn unplayed_first_round(h: &mut Harness, game_type: GameType, turns: usize) -> (TournamentId, String) {
    let id = h.create(game_type, 2, 2).await;
    let hash = h.orchestrator.tournament(id).unwrap().params_hash.clone();
    h.join(id, 2);
    h.orchestrator.tick().await;
    assert_eq!(h.orchestrator.active_match_ids().len(), 1);

    h.let_turns_lapse(turns).await;
    let t = h.orchestrator.tournament(id).unwrap();
    assert!(t.round_data(1).unwrap().results[0].is_draw);
    assert_eq!(t.current_round, 2);
    (id, hash)
}

fn evolved(h: &Harness, id: TournamentId, before: &str) -> GameParameters {
    let t = h.orchestrator.tournament(id).unwrap();
    assert_ne!(t.params_hash, before);
    assert_eq!(h.ledger.tournament(id).unwrap().params_hash, t.params_hash);
    assert_eq!(h.orchestrator.evolution().history(id).len(), 1);
    assert_eq!(h.count_events("parameters:evolved"), 1);
    t.config.game_parameters.clone()
}

#[tokio::test]
async fn strategy_arena_draws_raise_the_temptation_payoff() {
    let mut h = Harness::new();
    let (id, before) = unplayed_first_round(&mut h, GameType::StrategyArena, 5).await;

    let params = evolved(&h, id, &before);
    assert_eq!(params.payoff_dc, Some(11_000));
    assert_eq!(params.payoff_cc, Some(6_000));
    assert_eq!(params.commit_timeout_secs, Some(48));
    assert_eq!(params.reveal_timeout_secs, Some(48));
    let record = &h.orchestrator.evolution().history(id)[0];
    assert!(record.mutations.iter().any(|m| m.target_field == "payoff_dc"));

    // Round 2 is played under the new matrix.
    let next = h.orchestrator.active_match_ids()[0];
    let view = h.orchestrator.match_state(next).unwrap();
    assert_eq!(view["payoffs"]["dc"], 11_000);
}

#[tokio::test]
async fn auction_wars_draws_sharpen_scoring() {
    let mut h = Harness::new();
    let (id, before) = unplayed_first_round(&mut h, GameType::AuctionWars, 3).await;

    let params = evolved(&h, id, &before);
    assert_eq!(params.score_scale, Some(12_000));
    assert_eq!(params.commit_timeout_secs, Some(48));
    assert_eq!(params.min_box_value, Some(1_000));
    assert_eq!(h.orchestrator.active_match_ids().len(), 1);
}

#[tokio::test]
async fn quiz_bowl_draws_reward_speed_and_shorten_windows() {
    let mut h = Harness::new();
    let (id, before) = unplayed_first_round(&mut h, GameType::QuizBowl, 5).await;

    let params = evolved(&h, id, &before);
    assert_eq!(params.speed_bonus_max, Some(60));
    assert_eq!(params.answer_window_secs, Some(24));
    assert_eq!(params.reveal_timeout_secs, Some(24));
    assert_eq!(params.question_count, Some(5));
    assert_eq!(h.orchestrator.active_match_ids().len(), 1);
}

#[tokio::test]
async fn decisive_round_leaves_parameters_alone() {
    let mut h = Harness::new();
    let id = h.create(GameType::OracleDuel, 2, 2).await;
    let before = h.orchestrator.tournament(id).unwrap().clone();
    h.join(id, 2);
    h.orchestrator.tick().await;
    h.finish_duels(3_100).await;

    let t = h.orchestrator.tournament(id).unwrap();
    assert_eq!(t.current_round, 2);
    assert_eq!(t.params_hash, before.params_hash);
    assert_eq!(t.config.game_parameters, before.config.game_parameters);
    assert!(h.orchestrator.evolution().history(id).is_empty());
    assert_eq!(h.count_events("parameters:evolved"), 0);
    assert_eq!(h.ledger.call_count("evolve_parameters"), 0);
}
