//! kubelink — cluster connection and accessibility management for a
//! desktop Kubernetes client.
//!
//! One [`Cluster`] per managed cluster owns its connectivity lifecycle:
//! activation, reachability classification, bounded-concurrency
//! authorization probing, and periodic refresh. Observers consume state
//! snapshots and the broadcast [`events::EventBus`]; no error from the
//! lifecycle surface ever reaches a caller as a raised fault.

pub mod authz;
pub mod cluster;
pub mod deps;
pub mod detectors;
pub mod error;
pub mod events;
pub mod kubeconfig;
pub mod kubectl;
pub mod models;
pub mod proxy;
pub mod remote;
pub mod session;
pub mod status;

pub use cluster::Cluster;
pub use deps::{ClusterDependencies, RefreshIntervals};
pub use error::Error;
pub use events::{ClusterEvent, EventBus};
pub use models::cluster::{ClusterId, ClusterModel, ClusterState, UpdateClusterModel};
pub use status::ClusterStatus;
