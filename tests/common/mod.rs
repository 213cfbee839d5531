//! Shared test utilities and fixtures for the Fanout test suite.
//!
//! This module provides:
//! - A mock [`Connector`] whose connections echo `printf` payloads, so the
//!   ping module succeeds without a real shell
//! - Failure injection (unreachable hosts) and per-host latency
//! - Concurrency tracking to check fork limits
//! - A recording callback
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use fanout::callback::RunCallback;
use fanout::connection::{
    CommandResult, Connection, ConnectionError, ConnectionResult, Connector, ExecuteOptions,
};
use fanout::executor::{HostResult, RunReport, Task};
use fanout::inventory::{Host, InventoryDefinition, InventoryResolver};

// ============================================================================
// Concurrency tracking
// ============================================================================

/// Counts commands currently executing and the highest count observed
#[derive(Debug, Default)]
pub struct Concurrency {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Concurrency {
    fn enter(self: &Arc<Self>) -> ActiveGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(Arc::clone(self))
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Leaves on drop so timed-out or cancelled commands are counted out too
struct ActiveGuard(Arc<Concurrency>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Mock Connector
// ============================================================================

/// Connector producing in-memory connections
#[derive(Debug, Default)]
pub struct MockConnector {
    unreachable: HashSet<String>,
    latency: HashMap<String, Duration>,
    default_latency: Duration,
    pub concurrency: Arc<Concurrency>,
    connects: AtomicUsize,
    closes: Arc<AtomicUsize>,
    workdirs: Mutex<Vec<PathBuf>>,
    commands: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connecting to `host` fails
    pub fn with_unreachable(mut self, host: &str) -> Self {
        self.unreachable.insert(host.to_string());
        self
    }

    /// Every command on `host` takes `latency`
    pub fn with_latency(mut self, host: &str, latency: Duration) -> Self {
        self.latency.insert(host.to_string(), latency);
        self
    }

    /// Every command on hosts without their own latency takes `latency`
    pub fn with_default_latency(mut self, latency: Duration) -> Self {
        self.default_latency = latency;
        self
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Workspaces handed to `connect`
    pub fn workdirs(&self) -> Vec<PathBuf> {
        self.workdirs.lock().clone()
    }

    /// `(host, command)` pairs in execution order
    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, host: &Host, workdir: &Path) -> ConnectionResult<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.workdirs.lock().push(workdir.to_path_buf());

        if self.unreachable.contains(host.name()) {
            return Err(ConnectionError::ConnectionFailed {
                host: host.name().to_string(),
                message: "No route to host".to_string(),
            });
        }

        Ok(Arc::new(MockConnection {
            host: host.name().to_string(),
            latency: self
                .latency
                .get(host.name())
                .copied()
                .unwrap_or(self.default_latency),
            concurrency: Arc::clone(&self.concurrency),
            closes: Arc::clone(&self.closes),
            commands: Arc::clone(&self.commands),
        }))
    }
}

/// Connection that answers `printf '%s' <data>` with `<data>` and succeeds
/// on anything else
pub struct MockConnection {
    host: String,
    latency: Duration,
    concurrency: Arc<Concurrency>,
    closes: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl Connection for MockConnection {
    fn identifier(&self) -> &str {
        &self.host
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        command: &str,
        _options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let _active = self.concurrency.enter();
        self.commands
            .lock()
            .push((self.host.clone(), command.to_string()));

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let stdout = match shell_words::split(command) {
            Ok(words) if words.first().map(String::as_str) == Some("printf") => {
                words.last().cloned().unwrap_or_default()
            }
            _ => String::new(),
        };
        Ok(CommandResult::success(stdout, String::new()))
    }

    async fn close(&self) -> ConnectionResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Recording callback
// ============================================================================

/// Callback keeping every event it receives
#[derive(Debug, Default)]
pub struct RecordingCallback {
    /// Sleep inside `on_run_start`
    pub run_start_delay: Duration,
    pub started: Mutex<Vec<String>>,
    pub results: Mutex<Vec<HostResult>>,
    pub no_hosts: Mutex<Vec<String>>,
    pub run_starts: AtomicUsize,
    pub run_ends: AtomicUsize,
}

impl RecordingCallback {
    pub fn result_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.results.lock().iter().map(|r| r.host.clone()).collect();
        hosts.sort();
        hosts
    }
}

#[async_trait]
impl RunCallback for RecordingCallback {
    async fn on_run_start(&self, _task: &Task, _hosts: &[Arc<Host>]) {
        self.run_starts.fetch_add(1, Ordering::SeqCst);
        if !self.run_start_delay.is_zero() {
            tokio::time::sleep(self.run_start_delay).await;
        }
    }

    async fn on_host_start(&self, host: &Host) {
        self.started.lock().push(host.name().to_string());
    }

    async fn on_host_result(&self, result: &HostResult) {
        self.results.lock().push(result.clone());
    }

    async fn on_no_hosts_matched(&self, pattern: &str) {
        self.no_hosts.lock().push(pattern.to_string());
    }

    async fn on_run_end(&self, _report: &RunReport) {
        self.run_ends.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Resolver over a single group named `group` holding `count` hosts
/// `<prefix>1..=<prefix><count>`
pub fn numbered_hosts(group: &str, prefix: &str, count: usize) -> InventoryResolver {
    let hosts: Vec<String> = (1..=count).map(|i| format!("{}{}", prefix, i)).collect();
    InventoryResolver::new().with_source(InventoryDefinition::new().group(group, hosts))
}

/// Resolver over `{web: [h1, h2], db: [h3]}`
pub fn web_and_db() -> InventoryResolver {
    InventoryResolver::new().with_source(
        InventoryDefinition::new()
            .group("web", ["h1", "h2"])
            .group("db", ["h3"]),
    )
}
