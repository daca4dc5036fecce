use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use once_cell::sync::OnceCell;
use rand::Rng;
use reqwest::Method;
use serde_json::{Value, json};

use crate::session::SessionStore;
use crate::transport::{PrimaryTransport, RawResponse, SecondaryTransport, Transport};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const RETRY_BACKOFF: Duration = Duration::from_millis(300);
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    pub base: Option<String>,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            base: None,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        let mut req = Self::new(Method::POST, path);
        req.body = Some(body);
        req
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_absolute(&self) -> bool {
        let p = self.path.trim_start();
        p.starts_with("http://") || p.starts_with("https://")
    }

    pub fn url(&self) -> String {
        match self.base.as_deref() {
            Some(base) if !self.is_absolute() => join_url(base, &self.path),
            _ => self.path.clone(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Only requests built by joining a base URL have a root-relative form.
    pub fn root_relative(&self, origin: Option<&str>) -> Option<RequestDescriptor> {
        if self.is_absolute() || self.base.is_none() {
            return None;
        }
        let mut relative = self.clone();
        relative.base = origin.map(str::to_string);
        if relative.base.is_none() && !relative.path.starts_with('/') {
            relative.path = format!("/{}", relative.path);
        }
        Some(relative)
    }

    fn is_idempotent(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD || self.method == Method::OPTIONS
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout,
    Unreachable(String),
}

impl TransportFailure {
    pub fn label(&self) -> &'static str {
        match self {
            TransportFailure::Timeout => "timeout",
            TransportFailure::Unreachable(_) => "unreachable",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            TransportFailure::Timeout => "Request timed out",
            TransportFailure::Unreachable(_) => "Network error",
        }
    }

    fn detail(&self) -> String {
        match self {
            TransportFailure::Timeout => "timeout".to_string(),
            TransportFailure::Unreachable(reason) => reason.clone(),
        }
    }
}

/// Response body, decoded on first access. Decoding never fails: bodies that
/// are not JSON come back as a synthesized failure envelope.
#[derive(Debug, Clone, Default)]
pub struct LazyBody {
    raw: Vec<u8>,
    synthesized: Option<Value>,
    parsed: OnceCell<Value>,
}

impl LazyBody {
    pub fn from_bytes(raw: Vec<u8>) -> Self {
        Self {
            raw,
            synthesized: None,
            parsed: OnceCell::new(),
        }
    }

    fn synthesized(value: Value) -> Self {
        Self {
            raw: Vec::new(),
            synthesized: Some(value),
            parsed: OnceCell::new(),
        }
    }

    pub fn json(&self) -> &Value {
        self.parsed.get_or_init(|| {
            if let Some(value) = self.synthesized.as_ref() {
                return value.clone();
            }
            match serde_json::from_slice::<Value>(&self.raw) {
                Ok(value) => value,
                Err(err) => json!({
                    "success": false,
                    "message": "Invalid JSON",
                    "error": err.to_string(),
                }),
            }
        })
    }

    pub fn text(&self) -> String {
        match self.synthesized.as_ref() {
            Some(value) if self.raw.is_empty() => value.to_string(),
            _ => String::from_utf8_lossy(&self.raw).into_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub ok: bool,
    /// HTTP status, or 0 when no HTTP response was obtained.
    pub status: u16,
    pub url: String,
    pub attempts: u32,
    pub failure: Option<TransportFailure>,
    pub headers: Vec<(String, String)>,
    body: LazyBody,
}

impl FetchResult {
    pub fn from_response(url: impl Into<String>, raw: RawResponse) -> Self {
        if raw.status == 0 {
            return Self::failed(url, TransportFailure::Unreachable("status 0".to_string()));
        }
        Self {
            ok: (200..300).contains(&raw.status),
            status: raw.status,
            url: url.into(),
            attempts: 1,
            failure: None,
            headers: raw.headers,
            body: LazyBody::from_bytes(raw.body),
        }
    }

    pub fn failed(url: impl Into<String>, failure: TransportFailure) -> Self {
        let body = LazyBody::synthesized(json!({
            "success": false,
            "message": failure.message(),
            "error": failure.detail(),
        }));
        Self {
            ok: false,
            status: 0,
            url: url.into(),
            attempts: 1,
            failure: Some(failure),
            headers: Vec::new(),
            body,
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status == 0
    }

    pub fn json(&self) -> &Value {
        self.body.json()
    }

    pub fn text(&self) -> String {
        self.body.text()
    }
}

enum Raced {
    Response(RawResponse),
    TimedOut,
    Failed(anyhow::Error),
}

#[derive(Clone)]
pub struct ResilientFetcher {
    primary: Arc<dyn Transport>,
    secondary: Arc<dyn Transport>,
    session: SessionStore,
    fallback_origin: Option<String>,
    retry_backoff: Duration,
}

impl ResilientFetcher {
    pub fn new(session: SessionStore) -> Self {
        Self::with_transports(
            Arc::new(PrimaryTransport),
            Arc::new(SecondaryTransport),
            session,
        )
    }

    pub fn with_transports(
        primary: Arc<dyn Transport>,
        secondary: Arc<dyn Transport>,
        session: SessionStore,
    ) -> Self {
        Self {
            primary,
            secondary,
            session,
            fallback_origin: None,
            retry_backoff: RETRY_BACKOFF,
        }
    }

    pub fn with_fallback_origin(mut self, origin: Option<String>) -> Self {
        self.fallback_origin = origin;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn attempt_request(&self, descriptor: &RequestDescriptor) -> FetchResult {
        let req = self.prepare(descriptor);
        let mut attempts = 0;

        let first = self.attempt_once(&req, &mut attempts);
        if !first.is_transport_failure() {
            return first;
        }

        thread::sleep(self.retry_backoff);
        let second = self.attempt_once(&req, &mut attempts);
        if !second.is_transport_failure() {
            return second;
        }

        let Some(relative) = req.root_relative(self.fallback_origin.as_deref()) else {
            log_exhausted(&second);
            return second;
        };
        tracing::debug!(url = %relative.url(), "trying root-relative path");
        let last = self.attempt_once(&relative, &mut attempts);
        if last.is_transport_failure() {
            log_exhausted(&last);
        }
        last
    }

    fn prepare(&self, descriptor: &RequestDescriptor) -> RequestDescriptor {
        let mut req = descriptor.clone();
        if req.header("authorization").is_none() {
            if let Some(token) = self.session.token() {
                req.headers
                    .push(("Authorization".to_string(), format!("Bearer {token}")));
            }
        }
        if !req.is_idempotent() && req.header(IDEMPOTENCY_HEADER).is_none() {
            req.headers
                .push((IDEMPOTENCY_HEADER.to_string(), new_idempotency_key()));
        }
        req
    }

    fn attempt_once(&self, req: &RequestDescriptor, attempts: &mut u32) -> FetchResult {
        *attempts += 1;
        let url = req.url();
        let started = Instant::now();
        let mut result = match race(&self.primary, req, req.timeout) {
            Raced::Response(raw) => FetchResult::from_response(url, raw),
            Raced::TimedOut => {
                tracing::debug!(%url, attempt = *attempts, "primary transport timed out");
                FetchResult::failed(url, TransportFailure::Timeout)
            }
            Raced::Failed(primary_err) => {
                tracing::debug!(%url, error = %primary_err, "primary transport failed, using secondary");
                // The secondary only gets what is left of this attempt's budget.
                let left = req.timeout.saturating_sub(started.elapsed());
                match race(&self.secondary, req, left) {
                    Raced::Response(raw) => FetchResult::from_response(url, raw),
                    Raced::TimedOut => FetchResult::failed(url, TransportFailure::Timeout),
                    Raced::Failed(secondary_err) => FetchResult::failed(
                        url,
                        TransportFailure::Unreachable(format!(
                            "{primary_err:#}; {secondary_err:#}"
                        )),
                    ),
                }
            }
        };
        result.attempts = *attempts;
        result
    }
}

// A call that loses the race keeps running on its thread; its result is dropped.
fn race(transport: &Arc<dyn Transport>, req: &RequestDescriptor, budget: Duration) -> Raced {
    if budget.is_zero() {
        return Raced::TimedOut;
    }
    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(transport);
    let owned = req.clone();
    let spawned = thread::Builder::new()
        .name(format!("fetch-{}", transport.name()))
        .spawn(move || {
            let _ = tx.send(worker.send(&owned));
        });
    if let Err(err) = spawned {
        return Raced::Failed(anyhow!("could not start transport thread: {err}"));
    }
    match rx.recv_timeout(budget) {
        Ok(Ok(raw)) => Raced::Response(raw),
        Ok(Err(err)) => Raced::Failed(err),
        Err(RecvTimeoutError::Timeout) => Raced::TimedOut,
        Err(RecvTimeoutError::Disconnected) => {
            Raced::Failed(anyhow!("{} transport aborted", transport.name()))
        }
    }
}

fn log_exhausted(result: &FetchResult) {
    tracing::warn!(
        url = %result.url,
        attempts = result.attempts,
        failure = result.failure.as_ref().map(TransportFailure::label).unwrap_or("unknown"),
        "request failed on every transport path"
    );
}

fn new_idempotency_key() -> String {
    let value: u128 = rand::thread_rng().r#gen();
    format!("{value:032x}")
}
