//! # gridop-api
//!
//! Resource model for the gridop data-grid operator.
//!
//! ## Resources
//!
//! - `ClusterResource`: a data-grid cluster with an ordered list of roles
//! - `RoleResource`: one homogeneous group of members (`<cluster>-<role>`)
//! - `WorkloadResource`: the runtime workload that backs a role
//! - `DiscoveryService`: the headless well-known-address service
//!
//! ## Design Principles
//!
//! - Field names and enum strings match the declarative store's wire form
//! - Nullable spec fields resolve through explicit default helpers
//! - Every resource carries `ObjectMeta` with optimistic `resource_version`

mod cluster;
mod error;
mod meta;
mod role;
mod types;
mod workload;

pub use cluster::*;
pub use error::ApiError;
pub use meta::*;
pub use role::*;
pub use types::*;
pub use workload::*;
