//! gridop Operator Library
//!
//! The operator keeps data-grid clusters converged to the state declared in
//! `ClusterResource`s. Each cluster is split into roles; every role becomes a
//! `RoleResource` backed by a workload whose size the operator steps towards
//! the declared replica count.
//!
//! ## Architecture
//!
//! ```text
//! Dispatcher (work queue, owner index, retry backoff)
//! ├── ClusterReconciler  (role-set diff, start quorum, discovery service)
//! └── RoleReconciler     (upgrade / scale decision table)
//!     └── ScalingEngine  (Safe / Parallel / ParallelUpSafeDown)
//! ```
//!
//! ## Modules
//!
//! - `controller`: the reconcilers and their pure decision helpers
//! - `dispatcher`: level-triggered work queue and cascade deletion
//! - `store`: declarative store interface and in-memory implementation
//! - `health`: StatusHA checks against the management REST endpoint
//! - `events`: event recording

pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod health;
pub mod operator;
pub mod runtime;
pub mod store;

pub use config::Config;
pub use error::ControllerError;
pub use operator::Operator;
