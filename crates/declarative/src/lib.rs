//! # Declarative
//!
//! A reconciler for declarative resource graphs.
//!
//! Declarations name resources by `type.name` and wire them together through
//! references to each other's outputs. The crate turns those declarations
//! into a dependency graph, diffs it against the last-applied state, and
//! applies the resulting change set through a pluggable provider.
//!
//! ## Core Concepts
//!
//! - **Graph**: validated declarations in dependency order
//! - **Planner**: computes a [`ChangeSet`] of create/update/replace/destroy entries
//! - **Applier**: runs a change set in parallel where the graph allows,
//!   committing one [`StateRecord`] per successful entry
//! - **StateStore**: durable last-applied records, with a single-writer lock
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{Expr, Graph, MemoryStore, Planner, Resource, StateStore, execute_simple};
//!
//! let vpc = Resource::new("aws_vpc", "main").attr("cidr_block", "10.0.0.0/16");
//! let subnet = Resource::new("aws_subnet", "a")
//!     .attr("vpc_id", Expr::reference(vpc.id.clone(), "id"));
//!
//! let graph = Graph::build(vec![vpc, subnet])?;
//! let store = MemoryStore::new();
//! let changes = Planner::new(&graph, &store.snapshot()?).plan()?;
//! let report = execute_simple(&changes, &my_provider, &store, Default::default())?;
//! assert!(report.is_success());
//! ```
//!
//! ## Extension Traits
//!
//! - [`Provider`]: creates, updates and destroys real resources
//! - [`StateStore`]: persists state records
//! - [`ProgressCallback`]: receives progress updates
//! - [`ConfirmCallback`]: handles user confirmations
//!
//! This allows the crate to be used without hard dependencies on
//! specific UI frameworks or backends.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod retry;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use context::{AutoConfirm, AutoDecline, CancelToken, ConfirmCallback, NoProgress, ProgressCallback};
pub use diff::AttributeDiff;
pub use error::{Error, ProviderError, Result};
pub use executor::{ApplyReport, Applier, execute_simple};
pub use graph::Graph;
pub use planner::{ChangeAction, ChangeEntry, ChangeSet, PlanSummary, Planner, Target, plan_destroy};
pub use provider::{Provider, ProviderOutput, ProviderResult};
pub use retry::{LogCallback, RetryCallback, with_retry};
pub use state::{FileStore, MemoryStore, Snapshot, StateLock, StateRecord, StateStore};
pub use types::{
    ApplyResult, Attributes, ExecuteOptions, ExecuteSummary, Expr, FailurePolicy, Lifecycle,
    Planned, Reference, Resource, ResourceId, RetryConfig, Segment,
};
