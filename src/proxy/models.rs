//! Proxy data models

use crate::proxy::parser::ProxyParser;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A proxy as read from the source column
///
/// `raw` is the join key with previous runs. The normalized URL is derived on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub raw: String,
    pub host_identity: Option<String>,
}

impl ProxyRecord {
    pub fn new(raw: &str) -> Self {
        let raw = raw.trim().to_string();
        let host_identity = ProxyParser::host_identity(&raw);
        Self { raw, host_identity }
    }

    /// Canonical `scheme://[user:pass@]host:port` form
    pub fn normalized(&self) -> String {
        ProxyParser::normalize(&self.raw)
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Classification of a single probe attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    IpMatched,
    IpMismatch,
    SuccessNoIp,
    NonJsonSuccess,
    /// JSON body without a usable `origin`, `ip` or `query` field
    MissingIp,
    InvalidJson,
    BadStatus,
    ProxyAuthError,
    ProxyForbidden,
    ProxyError,
    Timeout,
    DnsError,
    ConnectionRefused,
    ConnectionError,
    TlsError,
    UnknownError,
}

impl ProbeKind {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ProbeKind::IpMatched | ProbeKind::SuccessNoIp | ProbeKind::NonJsonSuccess
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            ProbeKind::IpMatched => "ip_matched",
            ProbeKind::IpMismatch => "ip_mismatch",
            ProbeKind::SuccessNoIp => "success_no_ip",
            ProbeKind::NonJsonSuccess => "non_json_success",
            ProbeKind::MissingIp => "missing_ip",
            ProbeKind::InvalidJson => "invalid_json",
            ProbeKind::BadStatus => "bad_status",
            ProbeKind::ProxyAuthError => "proxy_auth_error",
            ProbeKind::ProxyForbidden => "proxy_forbidden",
            ProbeKind::ProxyError => "proxy_error",
            ProbeKind::Timeout => "timeout",
            ProbeKind::DnsError => "dns_error",
            ProbeKind::ConnectionRefused => "connection_refused",
            ProbeKind::ConnectionError => "connection_error",
            ProbeKind::TlsError => "tls_error",
            ProbeKind::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Outcome of one GET through one proxy against one test endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub endpoint: String,
    pub kind: ProbeKind,
    /// Identities reported by the endpoint, split on commas
    pub observed_identity: Vec<String>,
    pub expected_identity: Option<String>,
    pub status_code: Option<u16>,
    /// Short diagnostic text (at most 50 characters)
    pub excerpt: String,
    pub elapsed_seconds: f64,
}

impl ProbeOutcome {
    pub fn new(endpoint: &str, kind: ProbeKind, elapsed_seconds: f64) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            kind,
            observed_identity: Vec::new(),
            expected_identity: None,
            status_code: None,
            excerpt: String::new(),
            elapsed_seconds,
        }
    }

    pub fn with_observed(mut self, observed: Vec<String>) -> Self {
        self.observed_identity = observed;
        self
    }

    pub fn with_expected(mut self, expected: Option<String>) -> Self {
        self.expected_identity = expected;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_excerpt(mut self, text: &str) -> Self {
        self.excerpt = excerpt(text);
        self
    }

    pub fn succeeded(&self) -> bool {
        self.kind.is_success()
    }

    /// One-line description used inside the verdict message
    pub fn describe(&self) -> String {
        let observed = self.observed_identity.join(", ");
        let t = self.elapsed_seconds;
        let detail = match self.kind {
            ProbeKind::IpMatched => format!("ip matched ({}, {:.2}s)", observed, t),
            ProbeKind::IpMismatch => format!(
                "ip mismatch (expected: {}, actual: {}, {:.2}s)",
                self.expected_identity.as_deref().unwrap_or("-"),
                observed,
                t
            ),
            ProbeKind::SuccessNoIp => format!("success ({}, {:.2}s)", observed, t),
            ProbeKind::NonJsonSuccess => format!("non-json response (status 200, {:.2}s)", t),
            ProbeKind::MissingIp => format!("unexpected response (no ip field, {:.2}s)", t),
            ProbeKind::InvalidJson => format!("json parse error ({}, {:.2}s)", self.excerpt, t),
            ProbeKind::BadStatus => format!(
                "status code {} ({:.2}s)",
                self.status_code.map_or_else(|| "?".to_string(), |c| c.to_string()),
                t
            ),
            ProbeKind::ProxyAuthError => format!("proxy authentication error ({:.2}s)", t),
            ProbeKind::ProxyForbidden => format!("proxy access forbidden ({:.2}s)", t),
            ProbeKind::ProxyError => format!("proxy error ({}, {:.2}s)", self.excerpt, t),
            ProbeKind::Timeout => format!("timeout ({:.2}s)", t),
            ProbeKind::DnsError => format!("dns resolution error ({:.2}s)", t),
            ProbeKind::ConnectionRefused => format!("connection refused ({:.2}s)", t),
            ProbeKind::ConnectionError => {
                format!("connection error ({}, {:.2}s)", self.excerpt, t)
            }
            ProbeKind::TlsError => format!("tls error ({}, {:.2}s)", self.excerpt, t),
            ProbeKind::UnknownError => format!("error ({}, {:.2}s)", self.excerpt, t),
        };
        format!("{}: {}", self.endpoint, detail)
    }
}

/// Maximum length of a diagnostic excerpt, in characters
pub const EXCERPT_LEN: usize = 50;

/// Truncate failure text to [`EXCERPT_LEN`] characters
pub fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_LEN).collect()
}

/// Persisted verdict label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStatus {
    Valid,
    Invalid,
}

impl ProxyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyStatus::Valid => "valid",
            ProxyStatus::Invalid => "invalid",
        }
    }

    /// Parse a stored status cell; anything unrecognised has no status
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "valid" => Some(ProxyStatus::Valid),
            "invalid" => Some(ProxyStatus::Invalid),
            _ => None,
        }
    }
}

impl From<bool> for ProxyStatus {
    fn from(is_valid: bool) -> Self {
        if is_valid {
            ProxyStatus::Valid
        } else {
            ProxyStatus::Invalid
        }
    }
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final valid/invalid determination for one proxy in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    /// The raw proxy string, used as the join key with prior runs
    pub proxy: String,
    pub is_valid: bool,
    pub message: String,
    pub succeeded: usize,
    pub attempted: usize,
    pub success_rate: f64,
    pub average_elapsed_seconds: f64,
}

impl VerdictRecord {
    pub fn status(&self) -> ProxyStatus {
        ProxyStatus::from(self.is_valid)
    }
}

/// A proxy's status in the previous run and in this one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTransition {
    pub proxy: String,
    /// Raw previous status cell, `None` when the proxy has no history
    pub previous: Option<String>,
    pub current: ProxyStatus,
}

impl RunTransition {
    pub fn became_invalid(&self) -> bool {
        self.previous.as_deref().and_then(ProxyStatus::parse) == Some(ProxyStatus::Valid)
            && self.current == ProxyStatus::Invalid
    }
}
