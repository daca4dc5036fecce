use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};

use arena_client::api::{ApiError, ArenaApi, CreateBattle};
use arena_client::battle::{
    Battle, BattleAction, BattleSession, BattleStatus, ChallengeRef, Participant, legal_actions,
};
use arena_client::fetch::{RequestDescriptor, ResilientFetcher};
use arena_client::session::SessionStore;
use arena_client::transport::{RawResponse, Transport};

/// Replays canned responses in order and records every request.
struct ScriptedServer {
    replies: Mutex<Vec<(u16, Value)>>,
    calls: Mutex<Vec<RequestDescriptor>>,
}

impl ScriptedServer {
    fn new(replies: Vec<(u16, Value)>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().rev().collect()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<RequestDescriptor> {
        self.calls.lock().unwrap().clone()
    }
}

impl Transport for ScriptedServer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn send(&self, req: &RequestDescriptor) -> Result<RawResponse> {
        self.calls.lock().unwrap().push(req.clone());
        match self.replies.lock().unwrap().pop() {
            Some((status, body)) => Ok(RawResponse::json(status, &body)),
            None => Err(anyhow!("no scripted reply left")),
        }
    }
}

struct Unused;

impl Transport for Unused {
    fn name(&self) -> &'static str {
        "unused"
    }

    fn send(&self, _req: &RequestDescriptor) -> Result<RawResponse> {
        Err(anyhow!("secondary should not be needed"))
    }
}

fn api_for(server: &Arc<ScriptedServer>) -> ArenaApi {
    let primary: Arc<dyn Transport> = server.clone();
    let fetcher = ResilientFetcher::with_transports(primary, Arc::new(Unused), SessionStore::new())
        .with_retry_backoff(Duration::from_millis(1));
    ArenaApi::with_fetcher(
        fetcher,
        "http://arena.test".to_string(),
        Duration::from_secs(2),
    )
}

fn battle(status: BattleStatus, opponent: Option<&str>) -> Battle {
    Battle {
        id: "b1".to_string(),
        title: "Two Sum Duel".to_string(),
        challenge: ChallengeRef {
            id: "c1".to_string(),
            title: Some("Two Sum".to_string()),
            difficulty: None,
        },
        creator: Participant {
            username: "ada".to_string(),
            rating: None,
        },
        opponent: opponent.map(|name| Participant {
            username: name.to_string(),
            rating: None,
        }),
        status,
        duration_minutes: 30,
        started_at: match status {
            BattleStatus::InProgress | BattleStatus::Completed => {
                Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
            }
            _ => None,
        },
        completed_at: None,
        prize_points: 50,
        winner: None,
        submissions: Vec::new(),
    }
}

fn battle_json(status: &str, opponent: Option<&str>) -> Value {
    let mut v = json!({
        "_id": "b1",
        "title": "Two Sum Duel",
        "challenge": {"_id": "c1", "title": "Two Sum"},
        "creator": {"username": "ada"},
        "status": status,
        "duration": 30,
        "startedAt": "2024-05-01T10:00:00Z",
        "prizePoints": 50
    });
    if let Some(name) = opponent {
        v["opponent"] = json!({"username": name});
    }
    v
}

#[test]
fn joining_a_started_battle_is_rejected_without_local_change() {
    let server = ScriptedServer::new(vec![(
        409,
        json!({"success": false, "message": "Battle already started"}),
    )]);
    let api = api_for(&server);
    let original = battle(BattleStatus::InProgress, Some("grace"));
    let mut session = BattleSession::new(original.clone(), Some("linus".to_string()));

    let err = session.join(&api).unwrap_err();

    assert_eq!(
        err,
        ApiError::Http {
            status: 409,
            message: "Battle already started".to_string()
        }
    );
    assert_eq!(err.user_message(), "Battle already started");
    assert_eq!(server.calls().len(), 1);
    assert_eq!(session.battle(), &original);
}

#[test]
fn join_applies_the_server_battle() {
    let server = ScriptedServer::new(vec![(
        200,
        json!({"success": true, "data": {"battle": battle_json("in_progress", Some("linus"))}}),
    )]);
    let api = api_for(&server);
    let mut session = BattleSession::new(battle(BattleStatus::Waiting, None), Some("linus".to_string()));
    assert_eq!(session.legal_actions(), vec![BattleAction::Join]);

    session.join(&api).expect("join succeeds");

    let calls = server.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].url(), "http://arena.test/api/battles/join");
    assert_eq!(calls[0].body, Some(json!({"id": "b1"})));
    assert_eq!(session.battle().status, BattleStatus::InProgress);
    assert_eq!(
        session.battle().opponent.as_ref().map(|o| o.username.as_str()),
        Some("linus")
    );
    assert_eq!(
        session.legal_actions(),
        vec![BattleAction::Run, BattleAction::Submit]
    );
}

#[test]
fn accept_without_battle_in_reply_reloads() {
    let server = ScriptedServer::new(vec![
        (200, json!({"success": true, "message": "Invite accepted"})),
        (
            200,
            json!({"success": true, "data": battle_json("in_progress", Some("grace"))}),
        ),
    ]);
    let api = api_for(&server);
    let mut session = BattleSession::new(
        battle(BattleStatus::Invited, Some("grace")),
        Some("grace".to_string()),
    );

    session.accept(&api).expect("accept succeeds");

    let urls: Vec<String> = server.calls().iter().map(RequestDescriptor::url).collect();
    assert_eq!(
        urls,
        vec![
            "http://arena.test/api/battles/accept".to_string(),
            "http://arena.test/api/battles/b1".to_string(),
        ]
    );
    assert_eq!(session.battle().status, BattleStatus::InProgress);
    assert!(session.timing(Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap()).is_some());
}

#[test]
fn decline_without_battle_marks_it_cancelled() {
    let server = ScriptedServer::new(vec![(200, json!({"success": true}))]);
    let api = api_for(&server);
    let mut session = BattleSession::new(
        battle(BattleStatus::Invited, Some("grace")),
        Some("grace".to_string()),
    );

    session.decline(&api).expect("decline succeeds");

    assert_eq!(server.calls().len(), 1);
    assert_eq!(session.battle().status, BattleStatus::Cancelled);
    assert!(session.legal_actions().is_empty());
}

#[test]
fn envelope_failure_on_2xx_is_a_rejection() {
    let server = ScriptedServer::new(vec![(
        200,
        json!({"success": false, "message": "You cannot join your own battle"}),
    )]);
    let api = api_for(&server);
    let mut session = BattleSession::new(battle(BattleStatus::Waiting, None), Some("ada".to_string()));

    let err = session.join(&api).unwrap_err();

    assert_eq!(
        err,
        ApiError::Rejected {
            message: "You cannot join your own battle".to_string()
        }
    );
    assert_eq!(session.battle().status, BattleStatus::Waiting);
}

#[test]
fn submit_reports_test_counts_and_updates_battle() {
    let mut done = battle_json("completed", Some("grace"));
    done["winner"] = json!("ada");
    let server = ScriptedServer::new(vec![(
        200,
        json!({"success": true, "data": {"passedTests": 10, "totalTests": 10, "score": 100, "battle": done}}),
    )]);
    let api = api_for(&server);
    let mut session = BattleSession::new(
        battle(BattleStatus::InProgress, Some("grace")),
        Some("ada".to_string()),
    );

    let outcome = session.submit(&api, "python", "print(1)").expect("submit succeeds");

    assert_eq!(outcome.passed, Some(10));
    assert_eq!(outcome.total, Some(10));
    assert_eq!(outcome.score, Some(100.0));
    assert_eq!(session.battle().status, BattleStatus::Completed);
    assert_eq!(session.battle().winner.as_deref(), Some("ada"));
    assert_eq!(session.legal_actions(), vec![BattleAction::ViewResult]);
}

#[test]
fn scored_submit_survives_a_failed_reload() {
    let server = ScriptedServer::new(vec![
        (200, json!({"success": true, "data": {"passed": 5, "total": 5}})),
        (500, json!({"success": false, "message": "db hiccup"})),
    ]);
    let api = api_for(&server);
    let original = battle(BattleStatus::InProgress, Some("grace"));
    let mut session = BattleSession::new(original.clone(), Some("ada".to_string()));

    let outcome = session
        .submit(&api, "python", "print(1)")
        .expect("a scored submission is reported as such");

    assert_eq!(outcome.passed, Some(5));
    assert_eq!(outcome.total, Some(5));
    assert!(outcome.battle.is_none());
    let urls: Vec<String> = server.calls().iter().map(RequestDescriptor::url).collect();
    assert_eq!(
        urls,
        vec![
            "http://arena.test/api/battles/submit".to_string(),
            "http://arena.test/api/battles/b1".to_string(),
        ]
    );
    assert_eq!(session.battle(), &original);
}

#[test]
fn confirmed_join_survives_a_failed_reload() {
    let server = ScriptedServer::new(vec![
        (200, json!({"success": true, "message": "Joined"})),
        (503, json!({"success": false, "message": "try later"})),
    ]);
    let api = api_for(&server);
    let mut session = BattleSession::new(battle(BattleStatus::Waiting, None), Some("linus".to_string()));

    session.join(&api).expect("join was confirmed by the server");

    assert_eq!(server.calls().len(), 2);
    assert_eq!(session.battle().status, BattleStatus::Waiting);
}

#[test]
fn create_battle_posts_the_request_and_parses_the_reply() {
    let mut created = battle_json("invited", Some("grace"));
    created["title"] = json!("Friday duel");
    let server = ScriptedServer::new(vec![(
        201,
        json!({"success": true, "data": {"battle": created}}),
    )]);
    let api = api_for(&server);

    let battle = api
        .create_battle(&CreateBattle {
            challenge_id: "c1".to_string(),
            duration_minutes: 45,
            title: Some("Friday duel".to_string()),
            prize_points: None,
            opponent: Some("grace".to_string()),
        })
        .expect("create succeeds");

    let calls = server.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, reqwest::Method::POST);
    assert_eq!(calls[0].url(), "http://arena.test/api/battles/create");
    assert_eq!(
        calls[0].body,
        Some(json!({
            "challengeId": "c1",
            "duration": 45,
            "title": "Friday duel",
            "opponentUsername": "grace"
        }))
    );
    assert_eq!(battle.id, "b1");
    assert_eq!(battle.title, "Friday duel");
    assert_eq!(battle.status, BattleStatus::Invited);
    assert_eq!(battle.opponent.map(|o| o.username), Some("grace".to_string()));
}

#[test]
fn battle_id_is_encoded_into_one_path_segment() {
    let mut reply = battle_json("waiting", None);
    reply["_id"] = json!("a/b?c#d");
    let server = ScriptedServer::new(vec![(200, json!({"success": true, "data": reply}))]);
    let api = api_for(&server);

    let battle = api.fetch_battle("a/b?c#d").expect("fetch succeeds");

    assert_eq!(battle.id, "a/b?c#d");
    assert_eq!(
        server.calls()[0].url(),
        "http://arena.test/api/battles/a%2Fb%3Fc%23d"
    );
}

#[test]
fn dot_battle_ids_never_reach_the_server() {
    let server = ScriptedServer::new(Vec::new());
    let api = api_for(&server);

    assert!(matches!(api.fetch_battle(".."), Err(ApiError::Rejected { .. })));
    assert!(matches!(api.fetch_battle(""), Err(ApiError::Rejected { .. })));
    assert!(server.calls().is_empty());
}

#[test]
fn run_never_touches_the_battle() {
    let server = ScriptedServer::new(vec![(
        200,
        json!({"success": true, "data": {"output": {"stdout": "3\n", "stderr": "", "time": 12}}}),
    )]);
    let api = api_for(&server);
    let session = BattleSession::new(
        battle(BattleStatus::InProgress, Some("grace")),
        Some("ada".to_string()),
    );
    let before = session.battle().clone();

    let output = session.run(&api, "python", "print(1+2)", "").expect("run succeeds");

    assert_eq!(output.stdout, "3\n");
    assert_eq!(output.time_ms, Some(12.0));
    assert_eq!(session.battle(), &before);
}

#[test]
fn server_copy_for_another_battle_is_ignored() {
    let mut session = BattleSession::new(battle(BattleStatus::Waiting, None), None);
    let mut other = battle(BattleStatus::InProgress, Some("grace"));
    other.id = "b2".to_string();
    assert!(!session.apply_server_battle(other));
    assert_eq!(session.battle().id, "b1");
}

#[test]
fn unexpected_transition_is_still_applied() {
    let mut session = BattleSession::new(battle(BattleStatus::Completed, Some("grace")), None);
    let reopened = battle(BattleStatus::Waiting, None);
    assert!(session.apply_server_battle(reopened));
    assert_eq!(session.battle().status, BattleStatus::Waiting);
    assert!(!session.apply_server_battle(battle(BattleStatus::Waiting, None)));
}

#[test]
fn legal_actions_by_status_and_viewer() {
    let waiting = battle(BattleStatus::Waiting, None);
    assert_eq!(legal_actions(&waiting, Some("grace")), vec![BattleAction::Join]);
    assert!(legal_actions(&waiting, Some("ada")).is_empty());
    assert!(legal_actions(&waiting, None).is_empty());

    let invited = battle(BattleStatus::Invited, Some("grace"));
    assert_eq!(
        legal_actions(&invited, Some("Grace")),
        vec![BattleAction::Accept, BattleAction::Decline]
    );
    assert!(legal_actions(&invited, Some("ada")).is_empty());
    assert!(legal_actions(&invited, Some("linus")).is_empty());

    let live = battle(BattleStatus::InProgress, Some("grace"));
    assert_eq!(
        legal_actions(&live, Some("ada")),
        vec![BattleAction::Run, BattleAction::Submit]
    );
    assert_eq!(legal_actions(&live, Some("linus")), vec![BattleAction::Run]);
    assert!(legal_actions(&live, None).is_empty());

    let done = battle(BattleStatus::Completed, Some("grace"));
    assert_eq!(legal_actions(&done, None), vec![BattleAction::ViewResult]);

    let cancelled = battle(BattleStatus::Cancelled, Some("grace"));
    assert!(legal_actions(&cancelled, Some("grace")).is_empty());
}

#[test]
fn timing_only_for_battles_in_progress() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap();
    let live = battle(BattleStatus::InProgress, Some("grace"));
    let timing = live.timing(now).expect("live battle has a clock");
    assert_eq!(timing.remaining_sec, 900);
    assert_eq!(timing.progress_pct, 50);

    let mut done = battle(BattleStatus::Completed, Some("grace"));
    done.started_at = live.started_at;
    assert!(done.timing(now).is_none());
    assert!(battle(BattleStatus::Waiting, None).timing(now).is_none());
}
