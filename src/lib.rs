//! # Fanout - run one module across many hosts
//!
//! Fanout resolves a host pattern against an inventory, executes a single
//! module on every matching host with bounded parallelism over pooled
//! connections, and collects exactly one result per host into a report.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     ExecutionController                       │
//! │     (resolve → dispatch → collect, cancellation, cleanup)     │
//! └──────────────────────────────────────────────────────────────┘
//!          │                      │                      │
//!          ▼                      ▼                      ▼
//! ┌─────────────────┐  ┌─────────────────────┐  ┌─────────────────┐
//! │    Inventory    │  │     Dispatcher      │  │ ResultAggregator│
//! │ (hosts, groups, │  │ (forks semaphore,   │  │ (one result per │
//! │    patterns)    │  │  per-host timeout)  │  │   host, report) │
//! └─────────────────┘  └─────────────────────┘  └─────────────────┘
//!                                 │
//!                    ┌────────────┴────────────┐
//!                    ▼                         ▼
//!          ┌─────────────────┐       ┌─────────────────┐
//!          │ Module Registry │       │ Connection Pool │
//!          │ (ping, command, │       │  (local, ssh)   │
//!          │   shell, raw)   │       │                 │
//!          └─────────────────┘       └─────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use fanout::prelude::*;
//!
//! # async fn example() -> std::result::Result<(), RunError> {
//! let inventory = InventoryDefinition::new().group("web", ["web1", "web2"]);
//! let resolver = InventoryResolver::new().with_source(inventory);
//!
//! let controller = ExecutionController::new(resolver, ControllerConfig::default());
//! let report = controller
//!     .run(&Task::new("ping").with_pattern("web").with_forks(2))
//!     .await?;
//!
//! println!("{}", report.summary);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Callbacks
    pub use crate::callback::{CompositeCallback, DefaultCallback, NullCallback, RunCallback};

    // Connections
    pub use crate::connection::{
        CommandResult, Connection, ConnectionConfig, ConnectionError, ConnectionPool,
        Connector, ExecuteOptions, PoolConfig, TransportConnector,
    };

    // Error handling
    pub use crate::error::{Error, Result, RunError};

    // Execution engine
    pub use crate::executor::{
        ControllerConfig, ExecutionController, HostResult, HostStatus, RunReport, RunState,
        RunSummary, Task,
    };

    // Inventory
    pub use crate::inventory::{
        Group, Host, Inventory, InventoryDefinition, InventoryResolver, InventorySource,
    };

    // Module system
    pub use crate::modules::{Module, ModuleOutput, ModuleParams, ModuleRegistry};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases.
pub mod error;

/// Layered configuration: files, environment and defaults.
pub mod config;

// ============================================================================
// Execution
// ============================================================================

/// Inventory model, loaders and host pattern resolution.
pub mod inventory;

/// Transports and the connection pool.
///
/// Commands run either on the control node ([`connection::LocalConnection`])
/// or through the system OpenSSH client with multiplexed control sockets.
pub mod connection;

/// Modules executed on each host.
pub mod modules;

/// Task, dispatcher, aggregator and the run controller.
pub mod executor;

/// Run lifecycle hooks and terminal output.
pub mod callback;

pub use error::{Error, Result, RunError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
