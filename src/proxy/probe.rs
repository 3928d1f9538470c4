//! Single probe: one GET through one proxy against one test endpoint
//!
//! The transport is a trait so the validator and batch runner can be driven
//! without real network access.

use crate::proxy::models::{excerpt, ProbeKind, ProbeOutcome};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header::CONTENT_TYPE, Client, Proxy as ReqwestProxy};
use serde_json::Value;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::debug;

/// Fields that IP-echo services report the caller's address in, by priority
const IDENTITY_FIELDS: [&str; 3] = ["origin", "ip", "query"];

static PROXY_FAILURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)tunnel|proxy").expect("Invalid proxy failure regex"));

static AUTH_FAILURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)407|authenticat|authoriz").expect("Invalid auth regex"));

static FORBIDDEN_FAILURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)403|forbidden").expect("Invalid forbidden regex"));

static DNS_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)dns error|failed to lookup address|name or service not known|nodename nor servname|no such host",
    )
    .expect("Invalid dns regex")
});

static TLS_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\btls\b|\bssl\b|certificate|handshake").expect("Invalid tls regex")
});

static REFUSED_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)connection refused|actively refused").expect("Invalid refused regex")
});

static CONNECTION_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)connection (reset|closed|aborted)|broken pipe|connect error")
        .expect("Invalid connection regex")
});

/// Raw HTTP response as seen by the probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ProbeResponse {
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            body: body.into(),
        }
    }
}

/// A request that never produced a response, already classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub kind: ProbeKind,
    pub detail: String,
}

impl TransportFailure {
    pub fn new(kind: ProbeKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Capability to issue one GET through a proxy
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn get(
        &self,
        proxy_url: &str,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<ProbeResponse, TransportFailure>;
}

/// Production transport using reqwest
///
/// A client is built per request because the proxy is a client-level setting.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport;

impl ReqwestTransport {
    pub fn new() -> Self {
        Self
    }

    fn create_client(proxy_url: &str, timeout: Duration) -> Result<Client, TransportFailure> {
        let proxy = ReqwestProxy::all(proxy_url).map_err(|e| {
            TransportFailure::new(ProbeKind::ConnectionError, error_chain_text(&e))
        })?;

        Client::builder()
            .no_proxy()
            .proxy(proxy)
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(classify_reqwest_error)
    }
}

#[async_trait]
impl ProbeTransport for ReqwestTransport {
    async fn get(
        &self,
        proxy_url: &str,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<ProbeResponse, TransportFailure> {
        let client = Self::create_client(proxy_url, timeout)?;

        let request = async {
            let response = client.get(endpoint).send().await?;
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.bytes().await?.to_vec();
            Ok::<_, reqwest::Error>(ProbeResponse {
                status,
                content_type,
                body,
            })
        };

        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(classify_reqwest_error(e)),
            Err(_) => Err(TransportFailure::new(
                ProbeKind::Timeout,
                format!("no response within {}s", timeout.as_secs_f64()),
            )),
        }
    }
}

/// Join an error and all of its sources into one line
fn error_chain_text(error: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(err) = source {
        let text = err.to_string();
        if !parts.iter().any(|p| p.contains(&text)) {
            parts.push(text);
        }
        source = err.source();
    }
    parts.join(": ")
}

/// Message of the innermost error in the chain
fn root_cause_text(error: &(dyn StdError + 'static)) -> String {
    let mut current = error;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

fn chain_has_io_kind(error: &(dyn StdError + 'static), kind: std::io::ErrorKind) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == kind {
                return true;
            }
        }
        current = err.source();
    }
    false
}

/// Map a reqwest error into a probe classification
///
/// The endpoint URL is stripped before anything is matched, so only the
/// error chain decides the kind. The detail is the innermost cause.
///
/// Every client is routed through the proxy, so a failure in the connect
/// phase means the proxy itself could not be reached.
pub fn classify_reqwest_error(error: reqwest::Error) -> TransportFailure {
    let timeout = error.is_timeout();
    let proxy_unreachable = error.is_connect();
    let error = error.without_url();

    let text = error_chain_text(&error);
    let refused = chain_has_io_kind(&error, std::io::ErrorKind::ConnectionRefused);
    let kind = classify_failure(&text, timeout, proxy_unreachable, refused);
    debug!(kind = %kind, cause = %text, "request failed");
    TransportFailure::new(kind, root_cause_text(&error))
}

/// Classify a transport failure from its error text and flags
///
/// Proxy-level failures are checked first, then timeouts and TLS, then a
/// proxy that could not be reached, then the connection family from most
/// to least specific.
pub fn classify_failure(
    text: &str,
    timeout: bool,
    proxy_unreachable: bool,
    refused: bool,
) -> ProbeKind {
    if PROXY_FAILURE.is_match(text) {
        proxy_failure_kind(text)
    } else if timeout {
        ProbeKind::Timeout
    } else if TLS_FAILURE.is_match(text) {
        ProbeKind::TlsError
    } else if proxy_unreachable {
        proxy_failure_kind(text)
    } else if DNS_FAILURE.is_match(text) {
        ProbeKind::DnsError
    } else if refused || REFUSED_FAILURE.is_match(text) {
        ProbeKind::ConnectionRefused
    } else if CONNECTION_FAILURE.is_match(text) {
        ProbeKind::ConnectionError
    } else {
        ProbeKind::UnknownError
    }
}

fn proxy_failure_kind(text: &str) -> ProbeKind {
    if AUTH_FAILURE.is_match(text) {
        ProbeKind::ProxyAuthError
    } else if FORBIDDEN_FAILURE.is_match(text) {
        ProbeKind::ProxyForbidden
    } else {
        ProbeKind::ProxyError
    }
}

/// Interpret a completed HTTP response
pub fn interpret_response(
    endpoint: &str,
    response: &ProbeResponse,
    host_identity: Option<&str>,
    elapsed_seconds: f64,
) -> ProbeOutcome {
    if response.status != 200 {
        return ProbeOutcome::new(endpoint, ProbeKind::BadStatus, elapsed_seconds)
            .with_status(response.status)
            .with_excerpt(&format!("HTTP status: {}", response.status));
    }

    let is_json = response
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
    if !is_json {
        return ProbeOutcome::new(endpoint, ProbeKind::NonJsonSuccess, elapsed_seconds)
            .with_status(200);
    }

    let value: Value = match serde_json::from_slice(&response.body) {
        Ok(value) => value,
        Err(e) => {
            return ProbeOutcome::new(endpoint, ProbeKind::InvalidJson, elapsed_seconds)
                .with_status(200)
                .with_excerpt(&e.to_string());
        }
    };

    let Some(reported) = reported_identity(&value) else {
        return ProbeOutcome::new(endpoint, ProbeKind::MissingIp, elapsed_seconds)
            .with_status(200)
            .with_excerpt(&String::from_utf8_lossy(&response.body));
    };

    let observed: Vec<String> = reported
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let kind = match host_identity {
        Some(expected) if observed.iter().any(|ip| ip == expected) => ProbeKind::IpMatched,
        Some(_) => ProbeKind::IpMismatch,
        None => ProbeKind::SuccessNoIp,
    };

    ProbeOutcome::new(endpoint, kind, elapsed_seconds)
        .with_status(200)
        .with_excerpt(&reported)
        .with_observed(observed)
        .with_expected(host_identity.map(str::to_string))
}

/// Extract the reported caller address; the first present field wins
fn reported_identity(value: &Value) -> Option<String> {
    let object = value.as_object()?;
    let field = IDENTITY_FIELDS.iter().find_map(|name| object.get(*name))?;
    match field {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Turn a transport failure into an outcome
pub fn failure_outcome(
    endpoint: &str,
    failure: &TransportFailure,
    elapsed_seconds: f64,
) -> ProbeOutcome {
    ProbeOutcome {
        excerpt: excerpt(&failure.detail),
        ..ProbeOutcome::new(endpoint, failure.kind, elapsed_seconds)
    }
}
