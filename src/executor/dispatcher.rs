//! Task dispatcher.
//!
//! One tokio task per host. A fork semaphore bounds how many hosts are in
//! flight; inside a fork slot the host leases a connection from the pool,
//! runs the module under the per-host timeout and hands the connection
//! back. Every host produces exactly one result, whether it completed,
//! failed to connect, timed out or was cancelled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::aggregator::ResultAggregator;
use super::outcome::HostOutcome;
use super::result::HostStatus;
use super::task::Task;
use crate::callback::RunCallback;
use crate::connection::ConnectionPool;
use crate::error::{Error, Result};
use crate::inventory::Host;
use crate::modules::{ModuleContext, ModuleRegistry};

/// Counters collected during one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Hosts dispatched
    pub dispatched: usize,
    /// Most hosts executing at the same time
    pub peak_in_flight: usize,
    /// Hosts settled by cancellation
    pub cancelled: usize,
}

#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
    cancelled: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Schedules one module execution per host against a connection pool
#[derive(Clone)]
pub struct Dispatcher {
    pool: ConnectionPool,
    registry: Arc<ModuleRegistry>,
    callback: Arc<dyn RunCallback>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pool", &self.pool)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        pool: ConnectionPool,
        registry: Arc<ModuleRegistry>,
        callback: Arc<dyn RunCallback>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            registry,
            callback,
            cancel,
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Run `task` on every host, recording each result in `aggregator`.
    ///
    /// Returns once every host has settled. A host result the aggregator
    /// rejects cancels the remaining hosts and is returned as the error.
    #[instrument(skip_all, fields(module = %task.module, hosts = hosts.len(), forks = task.forks))]
    pub async fn dispatch(
        &self,
        task: Arc<Task>,
        hosts: &[Arc<Host>],
        aggregator: Arc<ResultAggregator>,
    ) -> Result<DispatchStats> {
        let forks = Arc::new(Semaphore::new(task.forks.max(1)));
        let in_flight = Arc::new(InFlight::default());
        // Spawned hosts outlive a dropped dispatch future unless told to stop
        let scope = self.cancel.child_token();
        let _stop_on_drop = scope.clone().drop_guard();

        info!("Dispatching to {} host(s)", hosts.len());

        let handles: Vec<_> = hosts
            .iter()
            .map(|host| {
                let this = self.clone();
                let task = Arc::clone(&task);
                let host = Arc::clone(host);
                let forks = Arc::clone(&forks);
                let in_flight = Arc::clone(&in_flight);
                let aggregator = Arc::clone(&aggregator);
                let scope = scope.clone();

                tokio::spawn(async move {
                    this.dispatch_host(scope, task, host, forks, in_flight, aggregator)
                        .await
                })
            })
            .collect();

        let mut first_error = None;
        for (joined, host) in join_all(handles).await.into_iter().zip(hosts) {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    error!(host = %host.name(), error = %join_error, "Host dispatch aborted");
                    Err(Error::Internal(format!(
                        "dispatch for '{}' aborted: {}",
                        host.name(),
                        join_error
                    )))
                }
            };
            if let Err(e) = outcome {
                if first_error.is_none() {
                    scope.cancel();
                    first_error = Some(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let stats = DispatchStats {
            dispatched: hosts.len(),
            peak_in_flight: in_flight.peak.load(Ordering::SeqCst),
            cancelled: in_flight.cancelled.load(Ordering::SeqCst),
        };
        debug!(?stats, "Dispatch finished");
        Ok(stats)
    }

    async fn dispatch_host(
        &self,
        cancel: CancellationToken,
        task: Arc<Task>,
        host: Arc<Host>,
        forks: Arc<Semaphore>,
        in_flight: Arc<InFlight>,
        aggregator: Arc<ResultAggregator>,
    ) -> Result<()> {
        let started = Instant::now();

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = forks.acquire_owned() => permit.ok(),
        };

        let outcome = match permit {
            Some(_permit) => {
                in_flight.enter();
                self.callback.on_host_start(&host).await;
                let outcome = self.execute_host(&cancel, &task, &host).await;
                in_flight.leave();
                outcome
            }
            None => HostOutcome::Cancelled,
        };

        if matches!(outcome, HostOutcome::Cancelled) {
            in_flight.cancelled.fetch_add(1, Ordering::SeqCst);
        }

        let result = outcome.into_result(host.name(), started.elapsed());
        match result.status {
            HostStatus::Ok | HostStatus::Skipped => {
                debug!(host = %host.name(), status = %result.status, "Host settled")
            }
            HostStatus::Failed | HostStatus::Unreachable => warn!(
                host = %host.name(),
                status = %result.status,
                error = result.error.as_deref().unwrap_or_default(),
                "Host settled"
            ),
        }

        aggregator.record(result.clone())?;
        self.callback.on_host_result(&result).await;
        Ok(())
    }

    /// Lease, execute, release. Runs inside a fork slot.
    async fn execute_host(
        &self,
        cancel: &CancellationToken,
        task: &Task,
        host: &Host,
    ) -> HostOutcome {
        let module = match self.registry.resolve(&task.module, &task.args) {
            Ok(module) => module,
            Err(e) => return HostOutcome::Module(e),
        };

        let lease = tokio::select! {
            biased;
            _ = cancel.cancelled() => return HostOutcome::Cancelled,
            lease = self.pool.acquire(host) => match lease {
                Ok(lease) => lease,
                Err(e) => return HostOutcome::Connection(e),
            },
        };

        let context = ModuleContext::new(host.name()).with_options(task.execute_options());
        let outcome = {
            let execution = module.execute(&task.args, lease.connection(), &context);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => HostOutcome::Cancelled,
                finished = tokio::time::timeout(task.timeout, execution) => match finished {
                    Ok(Ok(output)) => HostOutcome::Completed(output),
                    Ok(Err(e)) => HostOutcome::Module(e),
                    Err(_) => HostOutcome::TimedOut(task.timeout),
                },
            }
        };

        self.pool.release(lease, outcome.connection_healthy()).await;
        outcome
    }
}
