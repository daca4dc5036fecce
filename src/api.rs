use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};

use crate::battle::{Battle, parse_battle_list_value, parse_battle_value};
use crate::config::ClientConfig;
use crate::fetch::{FetchResult, RequestDescriptor, ResilientFetcher};
use crate::leaderboard::{LeaderboardEntry, LeaderboardKind, parse_leaderboard_value};
use crate::payload::{Envelope, pick, pick_f64, pick_str, pick_u64};
use crate::session::SessionStore;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Transport(String),
    #[error("request failed ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("malformed response: {0}")]
    Parse(String),
    /// 2xx response whose envelope says `success: false`.
    #[error("{message}")]
    Rejected { message: String },
}

impl ApiError {
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Transport(_) => "Could not reach the server. Check your connection.".to_string(),
            ApiError::Http { message, .. } | ApiError::Rejected { message } => message.clone(),
            ApiError::Parse(_) => "The server sent an unexpected response.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BattleList {
    Waiting,
    Active,
    History,
}

impl BattleList {
    pub const ALL: [BattleList; 3] = [BattleList::Waiting, BattleList::Active, BattleList::History];

    pub fn as_str(self) -> &'static str {
        match self {
            BattleList::Waiting => "waiting",
            BattleList::Active => "active",
            BattleList::History => "history",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBattle {
    pub challenge_id: String,
    #[serde(rename = "duration")]
    pub duration_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prize_points: Option<u64>,
    #[serde(rename = "opponentUsername", skip_serializing_if = "Option::is_none")]
    pub opponent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub time_ms: Option<f64>,
    pub verdict: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub battle: Option<Battle>,
    pub passed: Option<u32>,
    pub total: Option<u32>,
    pub score: Option<f64>,
    pub verdict: Option<String>,
    pub message: Option<String>,
}

#[derive(Clone)]
pub struct ArenaApi {
    fetcher: ResilientFetcher,
    base_url: String,
    timeout: Duration,
}

impl ArenaApi {
    pub fn new(config: &ClientConfig, session: SessionStore) -> Self {
        let fetcher =
            ResilientFetcher::new(session).with_fallback_origin(config.fallback_origin.clone());
        Self::with_fetcher(fetcher, config.api_base_url.clone(), config.request_timeout)
    }

    pub fn with_fetcher(fetcher: ResilientFetcher, base_url: String, timeout: Duration) -> Self {
        Self {
            fetcher,
            base_url,
            timeout,
        }
    }

    pub fn session(&self) -> &SessionStore {
        self.fetcher.session()
    }

    pub fn create_battle(&self, req: &CreateBattle) -> Result<Battle, ApiError> {
        let body = serde_json::to_value(req).map_err(|err| ApiError::Parse(err.to_string()))?;
        let env = self.call(self.post("/api/battles/create", body))?;
        battle_from_data(&env.data)?.ok_or_else(|| ApiError::Parse("battle missing".to_string()))
    }

    pub fn join_battle(&self, id: &str) -> Result<Option<Battle>, ApiError> {
        let env = self.call(self.post("/api/battles/join", json!({ "id": id })))?;
        battle_from_data(&env.data)
    }

    pub fn accept_invite(&self, id: &str) -> Result<Option<Battle>, ApiError> {
        let env = self.call(self.post("/api/battles/accept", json!({ "id": id })))?;
        battle_from_data(&env.data)
    }

    pub fn decline_invite(&self, id: &str) -> Result<Option<Battle>, ApiError> {
        let env = self.call(self.post("/api/battles/decline", json!({ "id": id })))?;
        battle_from_data(&env.data)
    }

    pub fn fetch_battle(&self, id: &str) -> Result<Battle, ApiError> {
        let segment = path_segment(id)?;
        let env = self.call(self.get(&format!("/api/battles/{segment}")))?;
        battle_from_data(&env.data)?.ok_or_else(|| ApiError::Parse("battle missing".to_string()))
    }

    pub fn list_battles(&self, list: BattleList) -> Result<Vec<Battle>, ApiError> {
        let env = self.call(self.get(&format!("/api/battles?status={}", list.as_str())))?;
        parse_battle_list_value(&env.data).map_err(|err| ApiError::Parse(format!("{err:#}")))
    }

    pub fn run_code(&self, language: &str, code: &str, input: &str) -> Result<RunOutput, ApiError> {
        let env = self.call(self.post(
            "/api/challenges/run",
            json!({ "language": language, "code": code, "input": input }),
        ))?;
        Ok(run_output_from_data(&env.data))
    }

    pub fn submit_code(&self, id: &str, language: &str, code: &str) -> Result<SubmitOutcome, ApiError> {
        let env = self.call(self.post(
            "/api/battles/submit",
            json!({ "id": id, "language": language, "code": code }),
        ))?;
        let data = &env.data;
        let as_u32 = |keys: &[&str]| pick_u64(data, keys).and_then(|n| u32::try_from(n).ok());
        Ok(SubmitOutcome {
            battle: battle_from_data(data)?,
            passed: as_u32(&["passed", "passedTests", "testsPassed"]),
            total: as_u32(&["total", "totalTests", "testsTotal"]),
            score: pick_f64(data, &["score", "points"]),
            verdict: pick_str(data, &["verdict", "status", "result"]),
            message: env.message.clone(),
        })
    }

    pub fn fetch_leaderboard(
        &self,
        kind: LeaderboardKind,
        per_page: usize,
    ) -> Result<Vec<LeaderboardEntry>, ApiError> {
        let path = format!("/api/leaderboard?type={}&per_page={per_page}", kind.as_str());
        let env = self.call(self.get(&path))?;
        parse_leaderboard_value(&env.data).map_err(|err| ApiError::Parse(format!("{err:#}")))
    }

    fn get(&self, path: &str) -> RequestDescriptor {
        RequestDescriptor::get(path)
            .with_base(self.base_url.clone())
            .with_timeout(self.timeout)
    }

    fn post(&self, path: &str, body: Value) -> RequestDescriptor {
        RequestDescriptor::post_json(path, body)
            .with_base(self.base_url.clone())
            .with_timeout(self.timeout)
    }

    fn call(&self, req: RequestDescriptor) -> Result<Envelope, ApiError> {
        let result = self.fetcher.attempt_request(&req);
        decode_envelope(&result)
    }
}

/// Map a fetch result onto the error taxonomy. Only a 2xx envelope that does
/// not say `success: false` comes back as `Ok`.
pub fn decode_envelope(result: &FetchResult) -> Result<Envelope, ApiError> {
    let body = result.json();
    if result.is_transport_failure() {
        let detail = pick_str(body, &["error", "message"]).unwrap_or_else(|| "unreachable".to_string());
        return Err(ApiError::Transport(detail));
    }
    let env = Envelope::from_value(body);
    let invalid_json = env.success == Some(false)
        && env.message.as_deref() == Some("Invalid JSON")
        && body.get("error").is_some();

    if !result.ok {
        let message = if invalid_json {
            None
        } else {
            env.message.clone()
        };
        return Err(ApiError::Http {
            status: result.status,
            message: message.unwrap_or_else(|| default_reason(result.status)),
        });
    }
    if invalid_json {
        let detail = pick_str(body, &["error"]).unwrap_or_default();
        return Err(ApiError::Parse(detail));
    }
    if env.success == Some(false) {
        return Err(ApiError::Rejected {
            message: env
                .message
                .clone()
                .unwrap_or_else(|| "Request was rejected".to_string()),
        });
    }
    Ok(env)
}

fn default_reason(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"))
}

/// Percent-encode one path segment so `/`, `?` and `#` stay inside it.
fn path_segment(raw: &str) -> Result<String, ApiError> {
    let invalid = || ApiError::Rejected {
        message: format!("Invalid battle id {raw:?}"),
    };
    if matches!(raw.trim(), "" | "." | "..") {
        return Err(invalid());
    }
    let mut url = reqwest::Url::parse("http://segment.invalid/").map_err(|_| invalid())?;
    url.path_segments_mut().map_err(|_| invalid())?.clear().push(raw);
    Ok(url.path().trim_start_matches('/').to_string())
}

fn battle_from_data(data: &Value) -> Result<Option<Battle>, ApiError> {
    let candidate = match pick(data, &["battle"]) {
        Some(battle) => battle,
        None if data.is_object() && pick(data, &["id", "_id"]).is_some() => data,
        None => return Ok(None),
    };
    parse_battle_value(candidate)
        .map(Some)
        .map_err(|err| ApiError::Parse(format!("{err:#}")))
}

fn run_output_from_data(data: &Value) -> RunOutput {
    let src = pick(data, &["result", "output"])
        .filter(|v| v.is_object())
        .unwrap_or(data);
    RunOutput {
        stdout: untrimmed(src, &["stdout", "output"]),
        stderr: untrimmed(src, &["stderr", "error", "compileOutput"]),
        exit_code: pick_f64(src, &["exitCode", "exit_code", "code"]).map(|c| c as i64),
        time_ms: pick_f64(src, &["time", "timeMs", "runtime"]),
        verdict: pick_str(src, &["verdict", "status"]),
    }
}

fn untrimmed(src: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| src.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}
