use std::io::Read;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{ACCEPT, HeaderMap};

use crate::fetch::RequestDescriptor;
use crate::http_client::{fallback_http_client, http_client};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }
}

/// One mechanism for issuing an HTTP request. `Err` means no HTTP response
/// was produced at all (connectivity, TLS, invalid URL, body read failure).
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    fn send(&self, req: &RequestDescriptor) -> Result<RawResponse>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PrimaryTransport;

impl Transport for PrimaryTransport {
    fn name(&self) -> &'static str {
        "primary"
    }

    fn send(&self, req: &RequestDescriptor) -> Result<RawResponse> {
        let client = http_client()?;
        let url = req.url();
        let resp = build_request(client, req)
            .send()
            .with_context(|| format!("{} {url} failed", req.method))?;
        let status = resp.status().as_u16();
        let headers = collect_headers(resp.headers());
        let body = resp.text().context("failed reading body")?;
        Ok(RawResponse {
            status,
            headers,
            body: body.into_bytes(),
        })
    }
}

/// Lower-level fallback: fresh HTTP/1 connection, body read as raw bytes.
/// A body that breaks off mid-stream is returned as far as it was read.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecondaryTransport;

impl Transport for SecondaryTransport {
    fn name(&self) -> &'static str {
        "secondary"
    }

    fn send(&self, req: &RequestDescriptor) -> Result<RawResponse> {
        let client = fallback_http_client()?;
        let url = req.url();
        let mut resp = build_request(client, req)
            .send()
            .with_context(|| format!("{} {url} failed", req.method))?;
        let status = resp.status().as_u16();
        let headers = collect_headers(resp.headers());
        let mut body = Vec::new();
        if let Err(err) = resp.read_to_end(&mut body) {
            tracing::debug!(%url, error = %err, bytes = body.len(), "partial body kept");
        }
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

fn build_request(client: &Client, req: &RequestDescriptor) -> RequestBuilder {
    let mut builder = client
        .request(req.method.clone(), req.url())
        .header(ACCEPT, "application/json");
    for (name, value) in &req.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = req.body.as_ref() {
        builder = builder.json(body);
    }
    builder
}

fn collect_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}
