//! Reconciliation engine of the fleet orchestrator
//!
//! This library provides:
//! - Per-kind resource controllers built on the readiness waiter
//! - The replica bundle (boot volume, server, NICs, firewall rules) and its
//!   ordered ensure and teardown
//! - Create-before-destroy replacement of drifted replicas
//! - The replica set reconciler and its stateful extension
//! - Prometheus metrics for passes, rollouts and provider operations

pub mod builders;
pub mod config;
pub mod context;
pub mod controller;
pub mod drift;
pub mod metrics;
pub mod reconciler;
pub mod replica;
pub mod stateful;
pub mod status;
pub mod updater;

pub use config::EngineConfig;
pub use context::{FleetContext, FleetStores};
pub use controller::{RecordBuilder, ResourceController};
pub use metrics::FleetMetrics;
pub use reconciler::{Observation, ReplicaSetReconciler};
pub use replica::{FleetSnapshot, ReplicaBundle, ReplicaControllers};
pub use stateful::{StatefulFleet, StatefulObservation, StatefulReconciler};
pub use status::ActiveReplica;
pub use updater::CreateBeforeDestroy;
