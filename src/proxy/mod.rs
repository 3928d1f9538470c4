//! Proxy validation engine
//!
//! This module provides functionality for:
//! - Normalizing proxies from various formats (IP:PORT, IP:PORT:USER:PASS, URLs)
//! - Probing a proxy against IP-echo services and classifying the outcome
//! - Reducing probe outcomes into a strict or lenient verdict
//! - Running a whole list sequentially with pacing and cancellation
//! - Detecting proxies that went from valid to invalid since the last run

pub mod batch;
pub mod changes;
pub mod checker;
pub mod models;
pub mod parser;
pub mod probe;

pub use batch::{BatchReport, BatchRunner, NullSink, ProgressEvent, ProgressSink};
pub use changes::{baseline_statuses, detect_transitions, transitions};
pub use checker::{reduce_outcomes, CheckerConfig, ProxyChecker, DEFAULT_TEST_URL, STRICT_TEST_URLS};
pub use models::{ProbeKind, ProbeOutcome, ProxyRecord, ProxyStatus, RunTransition, VerdictRecord};
pub use parser::ProxyParser;
pub use probe::{ProbeResponse, ProbeTransport, ReqwestTransport, TransportFailure};
