//! Run event callbacks
//!
//! Callbacks observe a run as it happens: the run starting, each host
//! starting and settling, an empty host match, and the final report. They
//! are invoked from the dispatching tasks, so implementations must be
//! `Send + Sync` and should not block.
//!
//! # Available Plugins
//!
//! - [`DefaultCallback`] - one colored line (or block) per host, plus a recap
//! - [`NullCallback`] - no output
//!
//! Several callbacks can be combined with [`CompositeCallback`].

pub mod plugins;

use std::sync::Arc;

use async_trait::async_trait;

use crate::executor::result::{HostResult, HostStatus, RunReport};
use crate::executor::task::Task;
use crate::inventory::Host;

pub use plugins::{DefaultCallback, NullCallback};

/// Receiver of run events. Every method defaults to a no-op.
#[async_trait]
pub trait RunCallback: Send + Sync {
    /// Called once the target set is known, before any host is dispatched
    async fn on_run_start(&self, task: &Task, hosts: &[Arc<Host>]) {
        let _ = (task, hosts);
    }

    /// Called when a host gets a fork slot
    async fn on_host_start(&self, host: &Host) {
        let _ = host;
    }

    async fn on_host_ok(&self, result: &HostResult) {
        let _ = result;
    }

    async fn on_host_failed(&self, result: &HostResult) {
        let _ = result;
    }

    async fn on_host_unreachable(&self, result: &HostResult) {
        let _ = result;
    }

    async fn on_host_skipped(&self, result: &HostResult) {
        let _ = result;
    }

    /// Called when a host settles; routes to the per-status method
    async fn on_host_result(&self, result: &HostResult) {
        match result.status {
            HostStatus::Ok => self.on_host_ok(result).await,
            HostStatus::Failed => self.on_host_failed(result).await,
            HostStatus::Unreachable => self.on_host_unreachable(result).await,
            HostStatus::Skipped => self.on_host_skipped(result).await,
        }
    }

    /// Called when the pattern selected no hosts and that is not fatal
    async fn on_no_hosts_matched(&self, pattern: &str) {
        let _ = pattern;
    }

    /// Called with the finalized report
    async fn on_run_end(&self, report: &RunReport) {
        let _ = report;
    }
}

/// Fans every event out to a list of callbacks, in order
#[derive(Default)]
pub struct CompositeCallback {
    callbacks: Vec<Arc<dyn RunCallback>>,
}

impl std::fmt::Debug for CompositeCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeCallback")
            .field("callbacks_count", &self.callbacks.len())
            .finish()
    }
}

impl CompositeCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a callback to the composite.
    pub fn with_callback(mut self, callback: Arc<dyn RunCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn add_callback(&mut self, callback: Arc<dyn RunCallback>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

#[async_trait]
impl RunCallback for CompositeCallback {
    async fn on_run_start(&self, task: &Task, hosts: &[Arc<Host>]) {
        for callback in &self.callbacks {
            callback.on_run_start(task, hosts).await;
        }
    }

    async fn on_host_start(&self, host: &Host) {
        for callback in &self.callbacks {
            callback.on_host_start(host).await;
        }
    }

    async fn on_host_result(&self, result: &HostResult) {
        for callback in &self.callbacks {
            callback.on_host_result(result).await;
        }
    }

    async fn on_no_hosts_matched(&self, pattern: &str) {
        for callback in &self.callbacks {
            callback.on_no_hosts_matched(pattern).await;
        }
    }

    async fn on_run_end(&self, report: &RunReport) {
        for callback in &self.callbacks {
            callback.on_run_end(report).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RunCallback for Recorder {
        async fn on_host_ok(&self, result: &HostResult) {
            self.events.lock().push(format!("ok:{}", result.host));
        }

        async fn on_host_unreachable(&self, result: &HostResult) {
            self.events.lock().push(format!("unreachable:{}", result.host));
        }

        async fn on_no_hosts_matched(&self, pattern: &str) {
            self.events.lock().push(format!("none:{}", pattern));
        }
    }

    #[tokio::test]
    async fn test_host_result_routing() {
        let recorder = Recorder::default();
        recorder.on_host_result(&HostResult::ok("h1", json!({}))).await;
        recorder
            .on_host_result(&HostResult::unreachable("h2", "refused"))
            .await;
        // No override: default no-op
        recorder.on_host_result(&HostResult::failed("h3", "x")).await;

        assert_eq!(
            *recorder.events.lock(),
            vec!["ok:h1".to_string(), "unreachable:h2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_composite_fans_out() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let composite = CompositeCallback::new()
            .with_callback(first.clone())
            .with_callback(second.clone())
            .with_callback(Arc::new(NullCallback));
        assert_eq!(composite.len(), 3);

        composite.on_host_result(&HostResult::ok("h1", json!({}))).await;
        composite.on_no_hosts_matched("db").await;

        for recorder in [first, second] {
            assert_eq!(
                *recorder.events.lock(),
                vec!["ok:h1".to_string(), "none:db".to_string()]
            );
        }
    }
}
