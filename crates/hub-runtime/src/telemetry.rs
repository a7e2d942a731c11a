//! Per-call timing for session inference.
//!
//! An [`InferenceTimer`] lives for one call. It is told about every text
//! fragment the call produces and reports a [`CallMetrics`] summary to a
//! [`TelemetryHook`] when the call ends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Timing summary of one inference call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallMetrics {
    pub session_id: String,
    /// Time until the first fragment, zero when there was none.
    pub ttft_ms: f64,
    pub fragments: usize,
    /// Fragment rate after the first fragment.
    pub fragments_per_sec: f64,
    pub elapsed_ms: f64,
    pub cancelled: bool,
}

/// Receives call events. Every method defaults to doing nothing.
pub trait TelemetryHook: Send + Sync {
    fn on_first_fragment(&self, _session_id: &str, _ttft_ms: f64) {}

    fn on_fragment(&self, _session_id: &str, _index: usize) {}

    fn on_call_complete(&self, _metrics: &CallMetrics) {}
}

impl<T: TelemetryHook + ?Sized> TelemetryHook for Arc<T> {
    fn on_first_fragment(&self, session_id: &str, ttft_ms: f64) {
        (**self).on_first_fragment(session_id, ttft_ms);
    }

    fn on_fragment(&self, session_id: &str, index: usize) {
        (**self).on_fragment(session_id, index);
    }

    fn on_call_complete(&self, metrics: &CallMetrics) {
        (**self).on_call_complete(metrics);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Keeps the summary of the most recent call.
#[derive(Debug, Clone, Default)]
pub struct LogTelemetry {
    last: Arc<Mutex<Option<CallMetrics>>>,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_metrics(&self) -> Option<CallMetrics> {
        self.last.lock().clone()
    }
}

impl TelemetryHook for LogTelemetry {
    fn on_call_complete(&self, metrics: &CallMetrics) {
        *self.last.lock() = Some(metrics.clone());
    }
}

/// Logs one `info` event per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetryHook for TracingTelemetry {
    fn on_call_complete(&self, m: &CallMetrics) {
        tracing::info!(
            session = %m.session_id,
            fragments = m.fragments,
            ttft_ms = m.ttft_ms,
            fragments_per_sec = m.fragments_per_sec,
            elapsed_ms = m.elapsed_ms,
            cancelled = m.cancelled,
            "inference call finished"
        );
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

pub struct InferenceTimer {
    session_id: String,
    started: Instant,
    first_fragment: Option<Duration>,
    fragments: usize,
    hook: Box<dyn TelemetryHook>,
}

impl InferenceTimer {
    /// Start timing a call on `session_id`.
    pub fn new(session_id: impl Into<String>, hook: Box<dyn TelemetryHook>) -> Self {
        Self {
            session_id: session_id.into(),
            started: Instant::now(),
            first_fragment: None,
            fragments: 0,
            hook,
        }
    }

    pub fn mark_fragment(&mut self) {
        if self.first_fragment.is_none() {
            let ttft = self.started.elapsed();
            self.first_fragment = Some(ttft);
            self.hook.on_first_fragment(&self.session_id, millis(ttft));
        }
        self.fragments += 1;
        self.hook.on_fragment(&self.session_id, self.fragments);
    }

    /// End the call and report it to the hook.
    pub fn finish(self, cancelled: bool) -> CallMetrics {
        let elapsed = self.started.elapsed();
        let ttft = self.first_fragment.unwrap_or_default();
        let streaming = elapsed.saturating_sub(ttft).as_secs_f64();
        let fragments_per_sec = match self.fragments {
            0 => 0.0,
            _ if streaming <= 0.0 => 0.0,
            n => n as f64 / streaming,
        };

        let metrics = CallMetrics {
            session_id: self.session_id,
            ttft_ms: millis(ttft),
            fragments: self.fragments,
            fragments_per_sec,
            elapsed_ms: millis(elapsed),
            cancelled,
        };
        self.hook.on_call_complete(&metrics);
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counting {
        firsts: Mutex<usize>,
        fragments: Mutex<Vec<usize>>,
    }

    impl TelemetryHook for Counting {
        fn on_first_fragment(&self, _: &str, _: f64) {
            *self.firsts.lock() += 1;
        }

        fn on_fragment(&self, _: &str, index: usize) {
            self.fragments.lock().push(index);
        }
    }

    #[test]
    fn first_fragment_fires_once() {
        let hook = Arc::new(Counting::default());
        let mut timer = InferenceTimer::new("s1", Box::new(Arc::clone(&hook)));
        timer.mark_fragment();
        timer.mark_fragment();
        timer.mark_fragment();
        let metrics = timer.finish(false);

        assert_eq!(*hook.firsts.lock(), 1);
        assert_eq!(*hook.fragments.lock(), vec![1, 2, 3]);
        assert_eq!(metrics.fragments, 3);
        assert!(metrics.elapsed_ms >= metrics.ttft_ms);
    }

    #[test]
    fn log_hook_keeps_last_call() {
        let log = LogTelemetry::new();
        assert!(log.last_metrics().is_none());

        let mut timer = InferenceTimer::new("s2", Box::new(log.clone()));
        timer.mark_fragment();
        timer.finish(true);

        let last = log.last_metrics().unwrap();
        assert_eq!(last.session_id, "s2");
        assert_eq!(last.fragments, 1);
        assert!(last.cancelled);
    }

    #[test]
    fn empty_call_reports_zero_rates() {
        let metrics = InferenceTimer::new("s3", Box::new(NoopTelemetry)).finish(false);
        assert_eq!(metrics.ttft_ms, 0.0);
        assert_eq!(metrics.fragments, 0);
        assert_eq!(metrics.fragments_per_sec, 0.0);
    }
}
