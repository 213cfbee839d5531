//! Result aggregation.
//!
//! The aggregator knows the resolved target set up front and accepts exactly
//! one result per host, from any number of concurrent dispatches. Once every
//! host has settled it produces the [`RunReport`]; the report is computed
//! once and handed out unchanged on later calls.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tracing::{debug, trace};
use uuid::Uuid;

use super::result::{HostResult, RunReport, RunSummary};
use super::task::Task;
use crate::error::{Error, Result};
use crate::inventory::Host;

#[derive(Debug, Default)]
struct AggregatorState {
    results: HashMap<String, HostResult>,
    report: Option<RunReport>,
}

/// Thread-safe collector of host results for one run
#[derive(Debug)]
pub struct ResultAggregator {
    run_id: Uuid,
    module: String,
    pattern: String,
    started_at: DateTime<Utc>,
    expected: IndexSet<String>,
    state: Mutex<AggregatorState>,
}

impl ResultAggregator {
    /// Create an aggregator expecting one result per host in `hosts`
    pub fn new(run_id: Uuid, task: &Task, hosts: &[Arc<Host>]) -> Self {
        Self::with_hosts(
            run_id,
            task,
            hosts.iter().map(|h| h.name().to_string()),
        )
    }

    /// Create an aggregator from host names
    pub fn with_hosts(
        run_id: Uuid,
        task: &Task,
        hosts: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            run_id,
            module: task.module.clone(),
            pattern: task.pattern.clone(),
            started_at: Utc::now(),
            expected: hosts.into_iter().collect(),
            state: Mutex::new(AggregatorState::default()),
        }
    }

    /// Record the result of one host
    pub fn record(&self, result: HostResult) -> Result<()> {
        if !self.expected.contains(&result.host) {
            return Err(Error::UnexpectedHost(result.host));
        }

        let mut state = self.state.lock();
        if state.report.is_some() {
            return Err(Error::Internal(format!(
                "result for '{}' arrived after the run was finalized",
                result.host
            )));
        }
        if state.results.contains_key(&result.host) {
            return Err(Error::DuplicateResult(result.host));
        }

        trace!(host = %result.host, status = %result.status, "Recorded host result");
        state.results.insert(result.host.clone(), result);
        Ok(())
    }

    /// Hosts that have not settled yet, in resolution order
    pub fn pending(&self) -> Vec<String> {
        let state = self.state.lock();
        self.expected
            .iter()
            .filter(|host| !state.results.contains_key(*host))
            .cloned()
            .collect()
    }

    /// Number of recorded results
    pub fn recorded(&self) -> usize {
        self.state.lock().results.len()
    }

    /// Number of hosts in the target set
    pub fn expected(&self) -> usize {
        self.expected.len()
    }

    pub fn is_complete(&self) -> bool {
        self.recorded() == self.expected.len()
    }

    /// Produce the run report.
    ///
    /// Fails with [`Error::IncompleteRun`] while any host lacks a result.
    /// After the first success the same report is returned every time.
    pub fn finalize(&self) -> Result<RunReport> {
        let mut state = self.state.lock();
        if let Some(report) = &state.report {
            return Ok(report.clone());
        }

        let missing: Vec<&String> = self
            .expected
            .iter()
            .filter(|host| !state.results.contains_key(*host))
            .collect();
        if !missing.is_empty() {
            return Err(Error::incomplete_run(missing.into_iter().cloned()));
        }

        let mut results = IndexMap::with_capacity(self.expected.len());
        for host in &self.expected {
            if let Some(result) = state.results.get(host) {
                results.insert(host.clone(), result.clone());
            }
        }

        let report = RunReport {
            run_id: self.run_id,
            module: self.module.clone(),
            pattern: self.pattern.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            summary: RunSummary::from_results(results.values()),
            results,
        };
        debug!(run_id = %self.run_id, summary = %report.summary, "Run report finalized");

        state.report = Some(report.clone());
        Ok(report)
    }
}
