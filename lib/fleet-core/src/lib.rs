//! Core building blocks of the fleet orchestrator
//!
//! This library provides:
//! - Deterministic naming and label indexing of dependent resources
//! - The readiness waiter every controller blocks in
//! - Zone placement strategies
//! - The object store seam, with in-memory and Kubernetes implementations
//! - The identity accessor used for replica role resolution

pub mod error;
pub mod hash;
pub mod identity;
pub mod kube_store;
pub mod naming;
pub mod store;
pub mod validation;
pub mod waiter;
pub mod zone;

pub use error::{FleetError, Result};
pub use identity::{ActiveReplicaSource, StaticIdentity};
pub use kube_store::{ConfigMapIdentity, KubeStore};
pub use naming::{ReplicaSlot, ResourceKind};
pub use store::{Journal, JournalOp, LabelSelector, MemoryStore, ObjectStore};
pub use waiter::{wait_until, WaitConfig};
pub use zone::{strategy_for, ZoneStrategy};
