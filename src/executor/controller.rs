//! Execution controller.
//!
//! Drives one run from inventory resolution to the finalized report:
//!
//! ```text
//! Pending -> Resolving -> Dispatching -> Collecting -> Complete
//!                 \______________\____________\______> Failed
//! ```
//!
//! The controller owns the run's transient resources: the local workspace
//! and the connection pool. Both are released on every exit path,
//! including errors, cancellation and the global timeout.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::aggregator::ResultAggregator;
use super::dispatcher::{DispatchStats, Dispatcher};
use super::result::RunReport;
use super::task::Task;
use super::workspace::RunWorkspace;
use crate::callback::{NullCallback, RunCallback};
use crate::connection::{ConnectionConfig, ConnectionPool, Connector, PoolConfig, TransportConnector};
use crate::error::{Error, RunError};
use crate::inventory::{Host, InventoryError, InventoryResolver};
use crate::modules::ModuleRegistry;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Resolving,
    Dispatching,
    Collecting,
    Complete,
    Failed,
}

impl RunState {
    /// Whether the run has ended
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Complete | RunState::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Resolving => write!(f, "resolving"),
            RunState::Dispatching => write!(f, "dispatching"),
            RunState::Collecting => write!(f, "collecting"),
            RunState::Complete => write!(f, "complete"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// Settings for a controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Connection pool sizing; an unset capacity follows the task's fork limit
    pub pool: PoolConfig,
    /// Transport settings for the default connector
    pub connection: ConnectionConfig,
    /// Parent directory of the run workspace; system temp dir when unset
    pub local_tmp: Option<PathBuf>,
    /// Fail the run when the pattern matches no hosts
    pub fatal_on_empty: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            connection: ConnectionConfig::default(),
            local_tmp: None,
            fatal_on_empty: true,
        }
    }
}

impl ControllerConfig {
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_local_tmp(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_tmp = Some(path.into());
        self
    }

    pub fn with_fatal_on_empty(mut self, fatal: bool) -> Self {
        self.fatal_on_empty = fatal;
        self
    }
}

/// Runs one task against an inventory. Single use.
pub struct ExecutionController {
    run_id: Uuid,
    config: ControllerConfig,
    resolver: InventoryResolver,
    registry: Arc<ModuleRegistry>,
    connector: Arc<dyn Connector>,
    callback: Arc<dyn RunCallback>,
    state: Mutex<RunState>,
    cancel: CancellationToken,
    last_dispatch: Mutex<Option<DispatchStats>>,
}

impl fmt::Debug for ExecutionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionController")
            .field("run_id", &self.run_id)
            .field("state", &self.state())
            .field("config", &self.config)
            .field("sources", &self.resolver.sources().len())
            .finish()
    }
}

impl ExecutionController {
    /// Create a controller over `resolver`, using the built-in modules and
    /// the local/ssh transports.
    pub fn new(resolver: InventoryResolver, config: ControllerConfig) -> Self {
        let connector = Arc::new(TransportConnector::new(config.connection.clone()));
        Self {
            run_id: Uuid::new_v4(),
            config,
            resolver,
            registry: Arc::new(ModuleRegistry::with_builtins()),
            connector,
            callback: Arc::new(NullCallback),
            state: Mutex::new(RunState::Pending),
            cancel: CancellationToken::new(),
            last_dispatch: Mutex::new(None),
        }
    }

    /// Replace the transport
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_registry(mut self, registry: Arc<ModuleRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn RunCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Dispatch counters of the run, once dispatch has finished
    pub fn dispatch_stats(&self) -> Option<DispatchStats> {
        *self.last_dispatch.lock()
    }

    /// Cancel the run. Hosts still running or waiting settle as failed.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            info!(run_id = %self.run_id, "Cancelling run");
        }
        self.cancel.cancel();
    }

    /// Token observed by every dispatch of this run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn transition(&self, next: RunState) {
        let mut state = self.state.lock();
        debug!(run_id = %self.run_id, from = %*state, to = %next, "Run state change");
        *state = next;
    }

    fn fail(&self, source: impl Into<Error>) -> RunError {
        let mut state = self.state.lock();
        let failed_in = *state;
        *state = RunState::Failed;
        let err = RunError::new(self.run_id, failed_in, source);
        warn!(run_id = %self.run_id, error = %err, "Run failed");
        err
    }

    /// Execute `task` and return the finalized report.
    #[instrument(skip_all, fields(run_id = %self.run_id, module = %task.module, pattern = %task.pattern))]
    pub async fn run(&self, task: &Task) -> Result<RunReport, RunError> {
        {
            let mut state = self.state.lock();
            if *state != RunState::Pending {
                return Err(RunError::new(
                    self.run_id,
                    *state,
                    Error::AlreadyStarted(*state),
                ));
            }
            *state = RunState::Resolving;
        }
        let deadline = task.global_timeout.map(|limit| Instant::now() + limit);

        task.validate().map_err(|e| self.fail(e))?;
        let hosts = self.resolve(task).await?;
        let aggregator = Arc::new(ResultAggregator::new(self.run_id, task, &hosts));

        if !hosts.is_empty() {
            self.transition(RunState::Dispatching);
            let stats = self.dispatch(task, &hosts, Arc::clone(&aggregator), deadline).await?;
            *self.last_dispatch.lock() = Some(stats);
        }

        self.transition(RunState::Collecting);
        let report = aggregator.finalize().map_err(|e| self.fail(e))?;
        self.transition(RunState::Complete);

        info!(summary = %report.summary, "Run complete");
        self.callback.on_run_end(&report).await;
        Ok(report)
    }

    async fn resolve(&self, task: &Task) -> Result<Vec<Arc<Host>>, RunError> {
        let inventory = self.resolver.load().map_err(|e| self.fail(e))?;
        match InventoryResolver::select(&inventory, &task.pattern) {
            Ok(hosts) => {
                debug!(count = hosts.len(), "Resolved target hosts");
                Ok(hosts)
            }
            Err(InventoryError::NoHostsMatched(pattern)) if !self.config.fatal_on_empty => {
                warn!(pattern = %pattern, "No hosts matched");
                self.callback.on_no_hosts_matched(&pattern).await;
                Ok(Vec::new())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Create the workspace and pool, dispatch, and tear both down whatever
    /// the dispatch returned.
    async fn dispatch(
        &self,
        task: &Task,
        hosts: &[Arc<Host>],
        aggregator: Arc<ResultAggregator>,
        deadline: Option<Instant>,
    ) -> Result<DispatchStats, RunError> {
        let workspace = RunWorkspace::create(self.config.local_tmp.as_deref(), self.run_id)
            .map_err(|e| self.fail(e))?;
        let pool = ConnectionPool::new(
            self.config.pool.clone().sized_for(task.forks),
            Arc::clone(&self.connector),
            workspace.path(),
        );
        let dispatcher = Dispatcher::new(
            pool.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.callback),
            self.cancel.clone(),
        );

        self.callback.on_run_start(task, hosts).await;

        let task = Arc::new(task.clone());
        let dispatched = {
            let dispatch = dispatcher.dispatch(Arc::clone(&task), hosts, aggregator);
            match deadline {
                Some(deadline) => {
                    tokio::pin!(dispatch);
                    tokio::select! {
                        result = &mut dispatch => result,
                        _ = tokio::time::sleep_until(deadline) => {
                            warn!(timeout = ?task.global_timeout, "Global timeout reached, cancelling remaining hosts");
                            self.cancel.cancel();
                            dispatch.await
                        }
                    }
                }
                None => dispatch.await,
            }
        };

        pool.close_all().await;
        debug!(stats = ?pool.stats(), "Connection pool closed");
        if let Err(e) = workspace.close() {
            warn!(error = %e, "Failed to remove run workspace");
        }

        dispatched.map_err(|e| self.fail(e))
    }
}
