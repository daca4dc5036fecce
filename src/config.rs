use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub fallback_origin: Option<String>,
    pub request_timeout: Duration,
    pub battle_poll: Duration,
    pub battles_list_poll: Duration,
    pub leaderboard_poll: Duration,
    pub leaderboard_page_size: usize,
    pub fetch_parallelism: usize,
    pub session_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            fallback_origin: None,
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            battle_poll: Duration::from_secs(5),
            battles_list_poll: Duration::from_secs(15),
            leaderboard_poll: Duration::from_secs(30),
            leaderboard_page_size: 50,
            fetch_parallelism: 4,
            session_file: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let api_base_url = opt_string_env("ARENA_API_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_base_url);
        let fallback_origin = opt_string_env("ARENA_FALLBACK_ORIGIN")
            .map(|url| url.trim_end_matches('/').to_string());
        let request_timeout = Duration::from_millis(
            env::var("ARENA_API_TIMEOUT_MS")
                .ok()
                .and_then(|val| val.parse::<u64>().ok())
                .unwrap_or(DEFAULT_TIMEOUT_MS)
                .clamp(500, 120_000),
        );
        let battle_poll = Duration::from_secs(
            env::var("BATTLE_POLL_SECS")
                .ok()
                .and_then(|val| val.parse::<u64>().ok())
                .unwrap_or(5)
                .max(1),
        );
        let battles_list_poll = Duration::from_secs(
            env::var("BATTLES_LIST_POLL_SECS")
                .ok()
                .and_then(|val| val.parse::<u64>().ok())
                .unwrap_or(15)
                .max(2),
        );
        let leaderboard_poll = Duration::from_secs(
            env::var("LEADERBOARD_POLL_SECS")
                .ok()
                .and_then(|val| val.parse::<u64>().ok())
                .unwrap_or(30)
                .max(5),
        );
        let leaderboard_page_size = env::var("LEADERBOARD_PAGE_SIZE")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(50)
            .clamp(1, 500);
        let fetch_parallelism = env::var("FETCH_PARALLELISM")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(4)
            .clamp(1, 32);
        let session_file = opt_string_env("ARENA_SESSION_FILE").map(PathBuf::from);

        Self {
            api_base_url,
            fallback_origin,
            request_timeout,
            battle_poll,
            battles_list_poll,
            leaderboard_poll,
            leaderboard_page_size,
            fetch_parallelism,
            session_file,
        }
    }

    pub fn session_path(&self) -> Option<PathBuf> {
        self.session_file
            .clone()
            .or_else(crate::session::default_session_path)
    }
}

fn opt_string_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|val| {
        let trimmed = val.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
