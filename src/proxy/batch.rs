//! Sequential batch runner with pacing, progress reporting and cooperative
//! cancellation

use crate::proxy::checker::ProxyChecker;
use crate::proxy::models::{ProxyRecord, VerdictRecord};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Receives progress while a batch runs
///
/// `index` is zero-based; `total` is the number of input proxies.
pub trait ProgressSink: Send {
    fn on_start(&mut self, _index: usize, _total: usize, _proxy: &str) {}

    fn on_verdict(&mut self, index: usize, total: usize, verdict: &VerdictRecord);
}

/// Sink that ignores progress
#[derive(Debug, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_verdict(&mut self, _index: usize, _total: usize, _verdict: &VerdictRecord) {}
}

/// Progress message for channel-based consumers such as the TUI
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        index: usize,
        total: usize,
        proxy: String,
    },
    Finished {
        index: usize,
        total: usize,
        verdict: VerdictRecord,
    },
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn on_start(&mut self, index: usize, total: usize, proxy: &str) {
        // A closed receiver only means nobody is watching any more
        let _ = self.send(ProgressEvent::Started {
            index,
            total,
            proxy: proxy.to_string(),
        });
    }

    fn on_verdict(&mut self, index: usize, total: usize, verdict: &VerdictRecord) {
        let _ = self.send(ProgressEvent::Finished {
            index,
            total,
            verdict: verdict.clone(),
        });
    }
}

/// Result of one batch run
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// One verdict per processed proxy, in input order
    pub verdicts: Vec<VerdictRecord>,
    /// Number of input proxies
    pub total: usize,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn valid_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.is_valid).count()
    }

    pub fn invalid_count(&self) -> usize {
        self.verdicts.len() - self.valid_count()
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.verdicts.len() == self.total
    }
}

/// Runs the checker over a list of proxies, one at a time
#[derive(Clone)]
pub struct BatchRunner {
    checker: ProxyChecker,
}

impl BatchRunner {
    pub fn new(checker: ProxyChecker) -> Self {
        Self { checker }
    }

    pub fn checker(&self) -> &ProxyChecker {
        &self.checker
    }

    /// Validate every proxy in order
    ///
    /// Cancellation is observed between proxies only; an in-flight check runs
    /// to completion and its verdict is kept.
    pub async fn run<S>(
        &self,
        proxies: &[String],
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> BatchReport
    where
        S: ProgressSink + ?Sized,
    {
        let total = proxies.len();
        let pacing = self.checker.config().pacing_delay;
        let mut report = BatchReport {
            verdicts: Vec::with_capacity(total),
            total,
            cancelled: false,
        };

        for (index, raw) in proxies.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let record = ProxyRecord::new(raw);
            sink.on_start(index, total, &record.raw);
            debug!(index, total, proxy = %record.raw, "checking proxy");

            let verdict = self.checker.check_proxy(&record).await;
            info!(
                proxy = %verdict.proxy,
                status = %verdict.status(),
                success_rate = verdict.success_rate,
                "proxy checked"
            );
            sink.on_verdict(index, total, &verdict);
            report.verdicts.push(verdict);

            if index + 1 < total && !pacing.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(pacing) => {}
                }
            }
        }

        if !report.cancelled && cancel.is_cancelled() && report.verdicts.len() < total {
            report.cancelled = true;
        }
        report
    }
}
