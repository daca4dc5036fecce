use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{ApiError, ArenaApi, RunOutput, SubmitOutcome};
use crate::match_clock::{MatchTiming, compute_match_timing};
use crate::payload::{pick, pick_str, pick_time, pick_u64, unwrap_data};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    Waiting,
    Invited,
    InProgress,
    Completed,
    Cancelled,
}

impl BattleStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match s.as_str() {
            "waiting" | "open" => Some(Self::Waiting),
            "invited" | "pending" => Some(Self::Invited),
            "in_progress" | "inprogress" | "active" | "ongoing" | "started" => {
                Some(Self::InProgress)
            }
            "completed" | "finished" | "ended" => Some(Self::Completed),
            "cancelled" | "canceled" | "declined" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Invited => "invited",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(self, next: BattleStatus) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::InProgress)
                | (Self::Invited, Self::InProgress)
                | (Self::Invited, Self::Cancelled)
                | (Self::InProgress, Self::Completed)
        )
    }

    fn has_started(self) -> bool {
        matches!(self, Self::InProgress | Self::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub username: String,
    pub rating: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRef {
    pub id: String,
    pub title: Option<String>,
    pub difficulty: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionSummary {
    pub username: String,
    pub passed: Option<u32>,
    pub total: Option<u32>,
    pub score: Option<f64>,
    pub submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battle {
    pub id: String,
    pub title: String,
    pub challenge: ChallengeRef,
    pub creator: Participant,
    /// Opponent once matched; for `Invited` the pending invite target.
    pub opponent: Option<Participant>,
    pub status: BattleStatus,
    pub duration_minutes: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub prize_points: u64,
    pub winner: Option<String>,
    pub submissions: Vec<SubmissionSummary>,
}

impl Battle {
    pub fn timing(&self, now: DateTime<Utc>) -> Option<MatchTiming> {
        if self.status != BattleStatus::InProgress {
            return None;
        }
        compute_match_timing(self.started_at, Some(self.duration_minutes), now)
    }

    pub fn is_participant(&self, username: &str) -> bool {
        self.creator.username.eq_ignore_ascii_case(username)
            || self
                .opponent
                .as_ref()
                .is_some_and(|o| o.username.eq_ignore_ascii_case(username))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BattleAction {
    Join,
    Accept,
    Decline,
    Run,
    Submit,
    ViewResult,
}

impl BattleAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Accept => "accept",
            Self::Decline => "decline",
            Self::Run => "run",
            Self::Submit => "submit",
            Self::ViewResult => "view result",
        }
    }
}

/// Actions the client should offer `viewer` for `battle`. The server is the
/// authority; this only decides what to present.
pub fn legal_actions(battle: &Battle, viewer: Option<&str>) -> Vec<BattleAction> {
    match battle.status {
        BattleStatus::Waiting => match viewer {
            Some(user) if !battle.creator.username.eq_ignore_ascii_case(user) => {
                vec![BattleAction::Join]
            }
            _ => Vec::new(),
        },
        BattleStatus::Invited => {
            let invited = battle.opponent.as_ref().map(|o| o.username.as_str());
            match (viewer, invited) {
                (Some(user), Some(target)) if user.eq_ignore_ascii_case(target) => {
                    vec![BattleAction::Accept, BattleAction::Decline]
                }
                _ => Vec::new(),
            }
        }
        BattleStatus::InProgress => match viewer {
            Some(user) if battle.is_participant(user) => {
                vec![BattleAction::Run, BattleAction::Submit]
            }
            Some(_) => vec![BattleAction::Run],
            None => Vec::new(),
        },
        BattleStatus::Completed => vec![BattleAction::ViewResult],
        BattleStatus::Cancelled => Vec::new(),
    }
}

pub fn parse_battle_json(raw: &str) -> Result<Battle> {
    let root: Value = serde_json::from_str(raw.trim()).context("invalid battle json")?;
    let data = unwrap_data(&root);
    let battle = data.get("battle").unwrap_or(data);
    parse_battle_value(battle)
}

pub fn parse_battle_list_json(raw: &str) -> Result<Vec<Battle>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let root: Value = serde_json::from_str(trimmed).context("invalid battles json")?;
    parse_battle_list_value(unwrap_data(&root))
}

pub fn parse_battle_list_value(data: &Value) -> Result<Vec<Battle>> {
    let items = match data {
        Value::Array(items) => items,
        Value::Object(_) => match pick(data, &["battles", "items", "results"]) {
            Some(Value::Array(items)) => items,
            _ => return Err(anyhow!("battle list missing")),
        },
        Value::Null => return Ok(Vec::new()),
        _ => return Err(anyhow!("unexpected battle list shape")),
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match parse_battle_value(item) {
            Ok(battle) => out.push(battle),
            Err(err) => tracing::debug!(error = %err, "skipping malformed battle"),
        }
    }
    Ok(out)
}

pub fn parse_battle_value(v: &Value) -> Result<Battle> {
    if !v.is_object() {
        return Err(anyhow!("battle is not an object"));
    }
    let id = pick_str(v, &["id", "_id", "battleId"]).context("battle without id")?;
    let status_raw = pick_str(v, &["status", "state"]).context("battle without status")?;
    let status = BattleStatus::parse(&status_raw)
        .ok_or_else(|| anyhow!("unknown battle status {status_raw:?}"))?;
    let duration_minutes = pick_u64(v, &["duration_minutes", "durationMinutes", "duration"])
        .filter(|d| *d > 0)
        .context("battle without duration")?;
    let duration_minutes = u32::try_from(duration_minutes).context("battle duration out of range")?;

    let challenge = parse_challenge(v).unwrap_or_else(|| ChallengeRef {
        id: String::new(),
        title: None,
        difficulty: None,
    });
    let creator = pick(v, &["creator", "createdBy", "host"])
        .and_then(parse_participant)
        .context("battle without creator")?;
    let opponent = match status {
        BattleStatus::Waiting => None,
        _ => pick(v, &["opponent", "invitee", "invitedUser"]).and_then(parse_participant),
    };
    let started_at = if status.has_started() {
        pick_time(v, &["started_at", "startedAt", "startTime"])
    } else {
        None
    };
    let completed_at = if status == BattleStatus::Completed {
        pick_time(v, &["completed_at", "completedAt", "endedAt", "endTime"])
    } else {
        None
    };
    let title = pick_str(v, &["title", "name"])
        .or_else(|| challenge.title.clone())
        .unwrap_or_else(|| "Untitled battle".to_string());
    let winner = pick(v, &["winner"]).and_then(|w| match w {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(_) => pick_str(w, &["username", "name"]),
        _ => None,
    });
    let submissions = match pick(v, &["submissions", "results"]) {
        Some(Value::Array(items)) => items.iter().filter_map(parse_submission).collect(),
        _ => Vec::new(),
    };

    Ok(Battle {
        id,
        title,
        challenge,
        creator,
        opponent,
        status,
        duration_minutes,
        started_at,
        completed_at,
        prize_points: pick_u64(v, &["prize_points", "prizePoints", "prize"]).unwrap_or(0),
        winner,
        submissions,
    })
}

fn parse_challenge(v: &Value) -> Option<ChallengeRef> {
    match pick(v, &["challenge"]) {
        Some(c @ Value::Object(_)) => {
            Some(ChallengeRef {
                id: pick_str(c, &["id", "_id", "slug"])?,
                title: pick_str(c, &["title", "name"]),
                difficulty: pick_str(c, &["difficulty", "level"]),
            })
        }
        Some(Value::String(id)) => Some(ChallengeRef {
            id: id.clone(),
            title: pick_str(v, &["challengeTitle", "challenge_title"]),
            difficulty: pick_str(v, &["difficulty"]),
        }),
        _ => pick_str(v, &["challengeId", "challenge_id"]).map(|id| ChallengeRef {
            id,
            title: pick_str(v, &["challengeTitle", "challenge_title"]),
            difficulty: pick_str(v, &["difficulty"]),
        }),
    }
}

fn parse_participant(v: &Value) -> Option<Participant> {
    match v {
        Value::String(name) if !name.trim().is_empty() => Some(Participant {
            username: name.trim().to_string(),
            rating: None,
        }),
        Value::Object(_) => {
            let user = v.get("user").filter(|u| u.is_object()).unwrap_or(v);
            Some(Participant {
                username: pick_str(user, &["username", "handle", "name"])?,
                rating: pick_u64(user, &["rating", "elo"])
                    .or_else(|| pick_u64(v, &["rating"]))
                    .and_then(|r| u32::try_from(r).ok()),
            })
        }
        _ => None,
    }
}

fn parse_submission(v: &Value) -> Option<SubmissionSummary> {
    let username = pick(v, &["user"])
        .and_then(|u| match u {
            Value::Object(_) => pick_str(u, &["username", "name"]),
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
        .or_else(|| pick_str(v, &["username"]))?;
    let as_u32 = |keys: &[&str]| pick_u64(v, keys).and_then(|n| u32::try_from(n).ok());
    Some(SubmissionSummary {
        username,
        passed: as_u32(&["passed", "passedTests", "testsPassed"]),
        total: as_u32(&["total", "totalTests", "testsTotal"]),
        score: crate::payload::pick_f64(v, &["score", "points"]),
        submitted_at: pick_time(v, &["submitted_at", "submittedAt", "createdAt"]),
    })
}

#[derive(Debug, Clone)]
pub struct BattleSession {
    battle: Battle,
    viewer: Option<String>,
}

impl BattleSession {
    pub fn new(battle: Battle, viewer: Option<String>) -> Self {
        Self { battle, viewer }
    }

    pub fn open(api: &ArenaApi, id: &str) -> Result<Self, ApiError> {
        let battle = api.fetch_battle(id)?;
        Ok(Self::new(battle, api.session().username()))
    }

    pub fn battle(&self) -> &Battle {
        &self.battle
    }

    pub fn legal_actions(&self) -> Vec<BattleAction> {
        legal_actions(&self.battle, self.viewer.as_deref())
    }

    pub fn timing(&self, now: DateTime<Utc>) -> Option<MatchTiming> {
        self.battle.timing(now)
    }

    /// Unexpected transitions are applied anyway and logged.
    pub fn apply_server_battle(&mut self, next: Battle) -> bool {
        if next.id != self.battle.id {
            tracing::warn!(current = %self.battle.id, incoming = %next.id, "ignoring battle for another id");
            return false;
        }
        let from = self.battle.status;
        if from != next.status && !from.can_transition_to(next.status) {
            tracing::warn!(
                battle = %next.id,
                from = from.as_str(),
                to = next.status.as_str(),
                "server reported an unexpected battle transition"
            );
        }
        if self.battle == next {
            return false;
        }
        self.battle = next;
        true
    }

    pub fn reload(&mut self, api: &ArenaApi) -> Result<bool, ApiError> {
        let battle = api.fetch_battle(&self.battle.id)?;
        Ok(self.apply_server_battle(battle))
    }

    pub fn join(&mut self, api: &ArenaApi) -> Result<(), ApiError> {
        let returned = api.join_battle(&self.battle.id)?;
        self.settle(api, returned, "join");
        Ok(())
    }

    pub fn accept(&mut self, api: &ArenaApi) -> Result<(), ApiError> {
        let returned = api.accept_invite(&self.battle.id)?;
        self.settle(api, returned, "accept");
        Ok(())
    }

    pub fn decline(&mut self, api: &ArenaApi) -> Result<(), ApiError> {
        match api.decline_invite(&self.battle.id)? {
            Some(battle) => {
                self.apply_server_battle(battle);
            }
            None => {
                // Confirmed by the server; declined battles may no longer be fetchable.
                self.battle.status = BattleStatus::Cancelled;
            }
        }
        Ok(())
    }

    pub fn run(
        &self,
        api: &ArenaApi,
        language: &str,
        code: &str,
        input: &str,
    ) -> Result<RunOutput, ApiError> {
        api.run_code(language, code, input)
    }

    pub fn submit(
        &mut self,
        api: &ArenaApi,
        language: &str,
        code: &str,
    ) -> Result<SubmitOutcome, ApiError> {
        let mut outcome = api.submit_code(&self.battle.id, language, code)?;
        if let Some(battle) = outcome.battle.take() {
            self.apply_server_battle(battle.clone());
            outcome.battle = Some(battle);
        } else {
            self.reload_after_confirm(api, "submit");
        }
        Ok(outcome)
    }

    fn settle(&mut self, api: &ArenaApi, returned: Option<Battle>, action: &str) {
        match returned {
            Some(battle) => {
                self.apply_server_battle(battle);
            }
            None => self.reload_after_confirm(api, action),
        }
    }

    // The action already happened on the server, so a failed re-read must not
    // turn it into an error; the battle poller catches up later.
    fn reload_after_confirm(&mut self, api: &ArenaApi, action: &str) {
        if let Err(err) = self.reload(api) {
            tracing::warn!(
                battle = %self.battle.id,
                action,
                error = %err,
                "reload after confirmed action failed"
            );
        }
    }
}
