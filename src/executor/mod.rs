//! Core execution engine for Fanout
//!
//! This module provides:
//! - [`Task`]: what to run, where, and within which limits
//! - [`Dispatcher`]: bounded parallel fan-out of one task over many hosts
//! - [`ResultAggregator`]: exactly-once collection of per-host results
//! - [`ExecutionController`]: one run from resolution to the final report,
//!   with cancellation and cleanup

pub mod aggregator;
pub mod controller;
pub mod dispatcher;
pub mod outcome;
pub mod result;
pub mod task;
pub mod workspace;

pub use aggregator::ResultAggregator;
pub use controller::{ControllerConfig, ExecutionController, RunState};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use outcome::HostOutcome;
pub use result::{HostResult, HostStatus, RunReport, RunSummary};
pub use task::{parse_module_args, Task};
pub use workspace::RunWorkspace;
