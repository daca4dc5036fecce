use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use reqwest::blocking::Client;

// Only bounds how long a detached request thread can linger.
const REQUEST_CEILING_SECS: u64 = 120;
const USER_AGENT: &str = concat!("arena_client/", env!("CARGO_PKG_VERSION"));

static PRIMARY: OnceCell<Client> = OnceCell::new();
static SECONDARY: OnceCell<Client> = OnceCell::new();

pub fn http_client() -> Result<&'static Client> {
    PRIMARY.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_CEILING_SECS))
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build http client")
    })
}

pub fn fallback_http_client() -> Result<&'static Client> {
    SECONDARY.get_or_try_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(REQUEST_CEILING_SECS))
            .user_agent(USER_AGENT)
            .http1_only()
            .pool_max_idle_per_host(0)
            .build()
            .context("failed to build fallback http client")
    })
}
