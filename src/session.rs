use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SESSION_DIR: &str = "arena_client";
const SESSION_FILE: &str = "session.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl Session {
    // JWT claims are read without verification.
    pub fn from_token(token: impl Into<String>) -> Self {
        let token = token.into();
        let claims = decode_jwt_claims(&token);
        let username = claims.as_ref().and_then(|c| {
            ["username", "name", "preferred_username"]
                .iter()
                .find_map(|key| c.get(*key).and_then(Value::as_str))
                .map(str::to_string)
        });
        let expires_at = claims.as_ref().and_then(|c| c.get("exp")).and_then(Value::as_i64);
        Self {
            token,
            username,
            expires_at,
        }
    }

    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now_unix)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(session))),
        }
    }

    pub fn login(&self, token: impl Into<String>) -> Session {
        let session = Session::from_token(token);
        let mut guard = self.inner.write().expect("session lock poisoned");
        *guard = Some(session.clone());
        session
    }

    pub fn logout(&self) {
        let mut guard = self.inner.write().expect("session lock poisoned");
        *guard = None;
    }

    pub fn current(&self) -> Option<Session> {
        self.inner.read().expect("session lock poisoned").clone()
    }

    pub fn token(&self) -> Option<String> {
        self.inner
            .read()
            .expect("session lock poisoned")
            .as_ref()
            .map(|s| s.token.clone())
    }

    pub fn username(&self) -> Option<String> {
        self.inner
            .read()
            .expect("session lock poisoned")
            .as_ref()
            .and_then(|s| s.username.clone())
    }

    pub fn load(path: &Path) -> Self {
        let Ok(raw) = fs::read_to_string(path) else {
            return Self::new();
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Self::with_session(session),
            Err(_) => Self::new(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let Some(session) = self.current() else {
            if path.exists() {
                fs::remove_file(path).context("remove session file")?;
            }
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).ok();
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string(&session).context("serialize session")?;
        fs::write(&tmp, json).context("write session")?;
        fs::rename(&tmp, path).context("swap session")?;
        Ok(())
    }
}

pub fn default_session_path() -> Option<PathBuf> {
    if let Ok(base) = std::env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(SESSION_DIR).join(SESSION_FILE));
        }
    }
    let home = std::env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(
        PathBuf::from(home)
            .join(".cache")
            .join(SESSION_DIR)
            .join(SESSION_FILE),
    )
}

fn decode_jwt_claims(token: &str) -> Option<Value> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}
