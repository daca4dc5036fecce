use chrono::{TimeZone, Utc};

use arena_client::api::{ApiError, BattleList, RunOutput, SubmitOutcome};
use arena_client::battle::{Battle, BattleAction, BattleStatus, ChallengeRef, Participant};
use arena_client::leaderboard::{
    EntryStats, InstitutionFilter, LeaderboardEntry, LeaderboardKind, SortDirection, SortKey,
};
use arena_client::state::{ArenaState, Delta, Screen, apply_delta};

fn battle(id: &str, status: BattleStatus) -> Battle {
    Battle {
        id: id.to_string(),
        title: format!("Battle {id}"),
        challenge: ChallengeRef {
            id: "c1".to_string(),
            title: None,
            difficulty: None,
        },
        creator: Participant {
            username: "ada".to_string(),
            rating: None,
        },
        opponent: Some(Participant {
            username: "grace".to_string(),
            rating: None,
        }),
        status,
        duration_minutes: 30,
        started_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()),
        completed_at: None,
        prize_points: 0,
        winner: None,
        submissions: Vec::new(),
    }
}

fn entry(id: &str, points: f64) -> LeaderboardEntry {
    LeaderboardEntry {
        id: id.to_string(),
        server_rank: None,
        username: id.to_string(),
        full_name: None,
        institution: None,
        total_points: points,
        raw_points: None,
        stats: EntryStats::default(),
    }
}

#[test]
fn set_battles_fills_one_list_and_clamps_selection() {
    let mut state = ArenaState::new();
    state.screen = Screen::Battles;
    state.battles_selected = 5;

    apply_delta(
        &mut state,
        Delta::SetBattles {
            list: BattleList::Waiting,
            battles: vec![battle("a", BattleStatus::Waiting), battle("b", BattleStatus::Waiting)],
        },
    );

    assert_eq!(state.current_battles().len(), 2);
    assert_eq!(state.battles_selected, 1);
    assert_eq!(state.selected_battle().map(|b| b.id.as_str()), Some("b"));
    assert!(state.battles.get(&BattleList::Active).is_none());
}

#[test]
fn set_battle_updates_list_rows_and_open_battle() {
    let mut state = ArenaState::new();
    apply_delta(
        &mut state,
        Delta::SetBattles {
            list: BattleList::Active,
            battles: vec![battle("a", BattleStatus::Invited)],
        },
    );
    state.watch_battle("a");
    assert_eq!(state.screen, Screen::Battle);

    apply_delta(&mut state, Delta::SetBattle(battle("a", BattleStatus::InProgress)));

    assert_eq!(
        state.battles[&BattleList::Active][0].status,
        BattleStatus::InProgress
    );
    assert_eq!(
        state.open_battle.as_ref().map(|b| b.status),
        Some(BattleStatus::InProgress)
    );
}

#[test]
fn set_battle_for_another_id_does_not_replace_open_battle() {
    let mut state = ArenaState::new();
    state.watch_battle("a");
    apply_delta(&mut state, Delta::SetBattle(battle("a", BattleStatus::Waiting)));
    apply_delta(&mut state, Delta::SetBattle(battle("z", BattleStatus::Completed)));
    assert_eq!(state.open_battle.as_ref().map(|b| b.id.as_str()), Some("a"));
}

#[test]
fn status_change_on_open_battle_is_logged() {
    let mut state = ArenaState::new();
    state.watch_battle("a");
    apply_delta(&mut state, Delta::SetBattle(battle("a", BattleStatus::InProgress)));
    let before = state.logs.len();
    apply_delta(&mut state, Delta::SetBattle(battle("a", BattleStatus::Completed)));
    assert_eq!(state.logs.len(), before + 1);
    assert!(state.logs.back().unwrap().contains("completed"));
}

#[test]
fn closing_a_battle_drops_late_updates() {
    let mut state = ArenaState::new();
    state.watch_battle("a");
    state.close_battle();
    apply_delta(&mut state, Delta::SetBattle(battle("a", BattleStatus::InProgress)));
    assert!(state.open_battle.is_none());
    assert_eq!(state.screen, Screen::Battles);
}

#[test]
fn battle_closed_by_server_returns_to_list() {
    let mut state = ArenaState::new();
    state.watch_battle("gone");
    apply_delta(&mut state, Delta::BattleClosed { id: "gone".to_string() });
    assert!(state.open_battle_id.is_none());
    assert_eq!(state.screen, Screen::Battles);
}

#[test]
fn open_battle_timing_and_actions() {
    let mut state = ArenaState::new();
    state.viewer = Some("grace".to_string());
    state.watch_battle("a");
    apply_delta(&mut state, Delta::SetBattle(battle("a", BattleStatus::InProgress)));

    let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 29, 30).unwrap();
    let timing = state.open_battle_timing(now).expect("live battle has timing");
    assert_eq!(timing.label, "0:30");
    assert_eq!(
        state.open_battle_actions(),
        vec![BattleAction::Run, BattleAction::Submit]
    );
}

#[test]
fn leaderboard_for_another_kind_is_ignored() {
    let mut state = ArenaState::new();
    state.leaderboard_kind = LeaderboardKind::Weekly;
    apply_delta(
        &mut state,
        Delta::SetLeaderboard {
            kind: LeaderboardKind::Overall,
            entries: vec![entry("stale", 1.0)],
        },
    );
    assert!(state.leaderboard.is_empty());
    assert!(state.leaderboard_loading);

    apply_delta(
        &mut state,
        Delta::SetLeaderboard {
            kind: LeaderboardKind::Weekly,
            entries: vec![entry("x", 1.0), entry("y", 3.0)],
        },
    );
    assert!(!state.leaderboard_loading);
    let view = state.leaderboard_view();
    assert_eq!(view[0].entry.id, "y");
    assert_eq!(view[0].display_rank, 1);
}

#[test]
fn query_controls_reset_selection() {
    let mut state = ArenaState::new();
    apply_delta(
        &mut state,
        Delta::SetLeaderboard {
            kind: LeaderboardKind::Overall,
            entries: vec![entry("a", 1.0), entry("b", 2.0), entry("c", 3.0)],
        },
    );
    state.select_next();
    state.select_next();
    state.select_next();
    assert_eq!(state.leaderboard_selected, 2);

    state.flip_sort_direction();
    assert_eq!(state.leaderboard_query.direction, SortDirection::Ascending);
    assert_eq!(state.leaderboard_selected, 0);
    assert_eq!(state.leaderboard_view()[0].entry.id, "a");

    state.cycle_sort_key();
    assert_eq!(state.leaderboard_query.sort_key, SortKey::ChallengesSolved);

    state.set_search("b");
    assert_eq!(state.leaderboard_view().len(), 1);
}

#[test]
fn institution_presets_cycle_from_all() {
    let mut state = ArenaState::new();
    assert_eq!(state.leaderboard_query.institution, InstitutionFilter::All);
    state.cycle_institution();
    assert_ne!(state.leaderboard_query.institution, InstitutionFilter::All);
    for _ in 1..state.institution_presets.len() {
        state.cycle_institution();
    }
    assert_eq!(state.leaderboard_query.institution, InstitutionFilter::All);
}

#[test]
fn failed_action_clears_pending_and_records_error() {
    let mut state = ArenaState::new();
    state.pending_action = Some(BattleAction::Join);
    apply_delta(
        &mut state,
        Delta::ActionFinished {
            action: BattleAction::Join,
            battle_id: "a".to_string(),
            outcome: Err(ApiError::Http {
                status: 409,
                message: "Battle already started".to_string(),
            }),
        },
    );
    assert!(state.pending_action.is_none());
    assert_eq!(state.last_error.as_deref(), Some("Battle already started"));
    assert!(state.logs.back().unwrap().starts_with("[WARN]"));
}

#[test]
fn transport_errors_show_a_friendly_message() {
    let mut state = ArenaState::new();
    state.pending_action = Some(BattleAction::Run);
    apply_delta(
        &mut state,
        Delta::RunFinished(Err(ApiError::Transport("connection refused".to_string()))),
    );
    assert!(state.pending_action.is_none());
    assert_eq!(
        state.last_error.as_deref(),
        Some("Could not reach the server. Check your connection.")
    );
}

#[test]
fn run_and_submit_results_are_kept() {
    let mut state = ArenaState::new();
    apply_delta(
        &mut state,
        Delta::RunFinished(Ok(RunOutput {
            stdout: "42\n".to_string(),
            ..RunOutput::default()
        })),
    );
    assert_eq!(state.last_run.as_ref().map(|r| r.stdout.as_str()), Some("42\n"));

    state.pending_action = Some(BattleAction::Submit);
    apply_delta(
        &mut state,
        Delta::SubmitFinished(Ok(SubmitOutcome {
            battle: None,
            passed: Some(8),
            total: Some(10),
            score: None,
            verdict: None,
            message: None,
        })),
    );
    assert!(state.pending_action.is_none());
    assert_eq!(state.last_submit.as_deref(), Some("8/10 tests passed"));
}

#[test]
fn log_ring_is_bounded() {
    let mut state = ArenaState::new();
    for i in 0..500 {
        apply_delta(&mut state, Delta::Log(format!("[INFO] line {i}")));
    }
    assert_eq!(state.logs.len(), 200);
    assert_eq!(state.logs.back().map(String::as_str), Some("[INFO] line 499"));
}
