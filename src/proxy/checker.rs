//! Proxy checker: runs every test endpoint against one proxy and reduces the
//! outcomes into a verdict

use crate::error::SetupError;
use crate::proxy::models::{ProbeOutcome, ProxyRecord, VerdictRecord};
use crate::proxy::probe::{failure_outcome, interpret_response, ProbeTransport, ReqwestTransport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default timeout for each probe in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default delay between two proxies in milliseconds
const DEFAULT_PACING_MS: u64 = 1000;

/// Minimum share of successful probes in strict mode
const DEFAULT_SUCCESS_RATE_THRESHOLD: f64 = 0.8;

/// Maximum mean probe time in strict mode, in seconds
const DEFAULT_MAX_AVERAGE_LATENCY_SECS: f64 = 10.0;

/// Endpoint used when strict mode is off
pub const DEFAULT_TEST_URL: &str = "http://httpbin.org/ip";

/// Independent IP-echo services used in strict mode
pub const STRICT_TEST_URLS: [&str; 3] = [
    "http://httpbin.org/ip",
    "http://api.ipify.org?format=json",
    "http://ip-api.com/json",
];

/// Configuration for proxy checker
///
/// Built once per run and passed by value; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckerConfig {
    /// Timeout for each probe
    pub timeout: Duration,
    /// Require consensus and a latency ceiling instead of any single success
    pub strict: bool,
    /// Explicit endpoints; `None` picks the mode's default list
    pub test_urls: Option<Vec<String>>,
    pub success_rate_threshold: f64,
    /// Maximum mean probe time in strict mode
    pub max_average_latency: Duration,
    /// Delay between two proxies, not applied after the last one
    pub pacing_delay: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            strict: true,
            test_urls: None,
            success_rate_threshold: DEFAULT_SUCCESS_RATE_THRESHOLD,
            max_average_latency: Duration::from_secs_f64(DEFAULT_MAX_AVERAGE_LATENCY_SECS),
            pacing_delay: Duration::from_millis(DEFAULT_PACING_MS),
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_test_urls(mut self, urls: Vec<String>) -> Self {
        self.test_urls = Some(urls);
        self
    }

    pub fn with_success_rate_threshold(mut self, threshold: f64) -> Self {
        self.success_rate_threshold = threshold;
        self
    }

    pub fn with_max_average_latency(mut self, latency: Duration) -> Self {
        self.max_average_latency = latency;
        self
    }

    pub fn with_pacing_delay(mut self, delay: Duration) -> Self {
        self.pacing_delay = delay;
        self
    }

    /// Endpoints probed for every proxy, in order
    ///
    /// Strict mode always uses [`STRICT_TEST_URLS`]; explicit test URLs only
    /// apply in lenient mode.
    pub fn endpoints(&self) -> Vec<String> {
        if self.strict {
            return STRICT_TEST_URLS.iter().map(|s| s.to_string()).collect();
        }
        match &self.test_urls {
            Some(urls) => urls.clone(),
            None => vec![DEFAULT_TEST_URL.to_string()],
        }
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        if self.test_urls.as_ref().is_some_and(Vec::is_empty) {
            return Err(SetupError::InvalidSetting(
                "at least one test URL is required".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(SetupError::InvalidSetting(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.success_rate_threshold) {
            return Err(SetupError::InvalidSetting(format!(
                "success rate threshold {} is outside 0..=1",
                self.success_rate_threshold
            )));
        }
        Ok(())
    }
}

/// Proxy checker for validating proxies
#[derive(Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
    transport: Arc<dyn ProbeTransport>,
}

impl ProxyChecker {
    /// Create a new proxy checker with default configuration
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    pub fn with_transport(config: CheckerConfig, transport: Arc<dyn ProbeTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Probe one endpoint through the proxy
    pub async fn probe(&self, proxy: &ProxyRecord, endpoint: &str) -> ProbeOutcome {
        let proxy_url = proxy.normalized();
        let start = Instant::now();
        let result = self
            .transport
            .get(&proxy_url, endpoint, self.config.timeout)
            .await;
        let elapsed = start.elapsed().as_secs_f64();

        let outcome = match result {
            Ok(response) => {
                interpret_response(endpoint, &response, proxy.host_identity.as_deref(), elapsed)
            }
            Err(failure) => failure_outcome(endpoint, &failure, elapsed),
        };
        debug!(proxy = %proxy.raw, endpoint, kind = %outcome.kind, elapsed, "probe finished");
        outcome
    }

    /// Check a single proxy against every configured endpoint, sequentially
    pub async fn check_proxy(&self, proxy: &ProxyRecord) -> VerdictRecord {
        let mut outcomes = Vec::new();
        for endpoint in self.config.endpoints() {
            outcomes.push(self.probe(proxy, &endpoint).await);
        }
        reduce_outcomes(&proxy.raw, &outcomes, &self.config)
    }
}

impl Default for ProxyChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold probe outcomes into a verdict under the configured policy
pub fn reduce_outcomes(
    proxy: &str,
    outcomes: &[ProbeOutcome],
    config: &CheckerConfig,
) -> VerdictRecord {
    let attempted = outcomes.len();
    let succeeded = outcomes.iter().filter(|o| o.succeeded()).count();
    let success_rate = if attempted > 0 {
        succeeded as f64 / attempted as f64
    } else {
        0.0
    };
    let average_elapsed_seconds = if attempted > 0 {
        outcomes.iter().map(|o| o.elapsed_seconds).sum::<f64>() / attempted as f64
    } else {
        0.0
    };

    let details = outcomes
        .iter()
        .map(ProbeOutcome::describe)
        .collect::<Vec<_>>()
        .join("; ");

    let (is_valid, summary) = if config.strict {
        let is_valid = success_rate >= config.success_rate_threshold
            && average_elapsed_seconds <= config.max_average_latency.as_secs_f64();
        let label = if is_valid { "valid" } else { "invalid" };
        (
            is_valid,
            format!(
                "{} (success rate: {:.1}%, avg: {:.2}s)",
                label,
                success_rate * 100.0,
                average_elapsed_seconds
            ),
        )
    } else {
        let is_valid = succeeded > 0;
        let label = if is_valid { "success" } else { "failed" };
        (
            is_valid,
            format!(
                "{} ({}/{}, avg: {:.2}s)",
                label, succeeded, attempted, average_elapsed_seconds
            ),
        )
    };

    let message = if details.is_empty() {
        summary
    } else {
        format!("{} - {}", summary, details)
    };

    VerdictRecord {
        proxy: proxy.to_string(),
        is_valid,
        message,
        succeeded,
        attempted,
        success_rate,
        average_elapsed_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::models::ProbeKind;
    use crate::proxy::probe::{ProbeResponse, TransportFailure};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn outcome(kind: ProbeKind, elapsed: f64) -> ProbeOutcome {
        ProbeOutcome::new("http://echo.test/ip", kind, elapsed)
    }

    #[test]
    fn test_checker_config_default() {
        let config = CheckerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(config.strict);
        assert_eq!(config.endpoints().len(), 3);
        assert_eq!(config.success_rate_threshold, 0.8);
        assert_eq!(config.max_average_latency, Duration::from_secs(10));
    }

    #[test]
    fn test_checker_config_builder() {
        let config = CheckerConfig::new()
            .with_timeout(Duration::from_secs(30))
            .with_strict(false)
            .with_pacing_delay(Duration::ZERO);

        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.endpoints(), vec![DEFAULT_TEST_URL.to_string()]);
        assert!(config.pacing_delay.is_zero());

        let config = config.with_test_urls(vec!["http://example.com".to_string()]);
        assert_eq!(config.endpoints(), vec!["http://example.com".to_string()]);
    }

    #[test]
    fn test_strict_mode_ignores_explicit_urls() {
        let config = CheckerConfig::new().with_test_urls(vec!["http://example.com".to_string()]);
        assert!(config.strict);
        assert_eq!(config.endpoints(), STRICT_TEST_URLS.map(String::from).to_vec());

        let config = config.with_strict(false);
        assert_eq!(config.endpoints(), vec!["http://example.com".to_string()]);
    }

    #[test]
    fn test_config_validation() {
        assert!(CheckerConfig::default().validate().is_ok());
        assert!(CheckerConfig::new().with_test_urls(vec![]).validate().is_err());
        assert!(CheckerConfig::new().with_timeout(Duration::ZERO).validate().is_err());
        assert!(CheckerConfig::new()
            .with_success_rate_threshold(1.5)
            .validate()
            .is_err());
    }

    #[test]
    fn test_strict_two_of_three_is_invalid() {
        let outcomes = [
            outcome(ProbeKind::IpMatched, 0.1),
            outcome(ProbeKind::IpMatched, 0.1),
            outcome(ProbeKind::Timeout, 0.1),
        ];
        let verdict = reduce_outcomes("p", &outcomes, &CheckerConfig::default());
        assert!(!verdict.is_valid);
        assert!((verdict.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!(verdict.message.starts_with("invalid (success rate: 66.7%"));
    }

    #[test]
    fn test_strict_latency_gate() {
        let outcomes = [
            outcome(ProbeKind::IpMatched, 11.0),
            outcome(ProbeKind::IpMatched, 11.0),
            outcome(ProbeKind::IpMatched, 11.0),
        ];
        let verdict = reduce_outcomes("p", &outcomes, &CheckerConfig::default());
        assert_eq!(verdict.success_rate, 1.0);
        assert!(!verdict.is_valid);
        assert_eq!(verdict.average_elapsed_seconds, 11.0);
    }

    #[test]
    fn test_strict_all_pass() {
        let outcomes = [
            outcome(ProbeKind::IpMatched, 0.5),
            outcome(ProbeKind::SuccessNoIp, 1.0),
            outcome(ProbeKind::NonJsonSuccess, 1.5),
        ];
        let verdict = reduce_outcomes("p", &outcomes, &CheckerConfig::default());
        assert!(verdict.is_valid);
        assert_eq!(verdict.average_elapsed_seconds, 1.0);
        assert!(verdict.message.starts_with("valid (success rate: 100.0%, avg: 1.00s) - "));
    }

    #[test]
    fn test_average_includes_failed_attempts() {
        let outcomes = [
            outcome(ProbeKind::IpMatched, 1.0),
            outcome(ProbeKind::Timeout, 10.0),
        ];
        let verdict = reduce_outcomes("p", &outcomes, &CheckerConfig::default());
        assert_eq!(verdict.average_elapsed_seconds, 5.5);
    }

    #[test]
    fn test_lenient_one_of_three_is_valid() {
        let config = CheckerConfig::new().with_strict(false);
        let outcomes = [
            outcome(ProbeKind::Timeout, 10.0),
            outcome(ProbeKind::IpMismatch, 0.2),
            outcome(ProbeKind::SuccessNoIp, 30.0),
        ];
        let verdict = reduce_outcomes("p", &outcomes, &config);
        assert!(verdict.is_valid);
        assert!(verdict.message.starts_with("success (1/3"));
    }

    #[test]
    fn test_lenient_no_success_is_invalid() {
        let config = CheckerConfig::new().with_strict(false);
        let verdict = reduce_outcomes("p", &[outcome(ProbeKind::DnsError, 0.1)], &config);
        assert!(!verdict.is_valid);
        assert!(verdict.message.starts_with("failed (0/1"));
    }

    #[test]
    fn test_message_joins_in_endpoint_order() {
        let outcomes = [
            ProbeOutcome::new("http://a/", ProbeKind::Timeout, 1.0),
            ProbeOutcome::new("http://b/", ProbeKind::ConnectionRefused, 1.0),
        ];
        let verdict = reduce_outcomes("p", &outcomes, &CheckerConfig::default());
        let a = verdict.message.find("http://a/").unwrap();
        let b = verdict.message.find("http://b/").unwrap();
        assert!(a < b);
        assert!(verdict.message.contains("; "));
    }

    #[test]
    fn test_message_never_empty() {
        let verdict = reduce_outcomes("p", &[], &CheckerConfig::default());
        assert!(!verdict.message.is_empty());
        assert!(!verdict.is_valid);
    }

    /// Replies from a queue and records what it was asked
    struct ScriptedTransport {
        replies: Mutex<Vec<Result<ProbeResponse, TransportFailure>>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ProbeTransport for ScriptedTransport {
        async fn get(
            &self,
            proxy_url: &str,
            endpoint: &str,
            _timeout: Duration,
        ) -> Result<ProbeResponse, TransportFailure> {
            self.calls
                .lock()
                .unwrap()
                .push((proxy_url.to_string(), endpoint.to_string()));
            self.replies.lock().unwrap().remove(0)
        }
    }

    #[tokio::test]
    async fn test_check_proxy_probes_each_endpoint() {
        let transport = Arc::new(ScriptedTransport {
            replies: Mutex::new(vec![
                Ok(ProbeResponse::new(200, Some("application/json"), r#"{"origin":"5.6.7.8"}"#)),
                Ok(ProbeResponse::new(200, Some("application/json"), r#"{"ip":"5.6.7.8"}"#)),
                Err(TransportFailure::new(ProbeKind::Timeout, "timed out")),
            ]),
            calls: Mutex::new(Vec::new()),
        });
        let checker = ProxyChecker::with_transport(CheckerConfig::default(), transport.clone());
        let verdict = checker.check_proxy(&ProxyRecord::new("5.6.7.8:3128")).await;

        let calls = transport.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|(proxy, _)| proxy == "http://5.6.7.8:3128"));
        assert_eq!(calls[1].1, STRICT_TEST_URLS[1]);
        assert_eq!(verdict.succeeded, 2);
        assert!(!verdict.is_valid);
        assert!(verdict.message.contains("timeout"));
    }
}
