//! Cloud provider integration
//!
//! This library provides:
//! - The provider API seam and a REST client for it
//! - An in-memory provider for tests and local runs
//! - The sync driver reconciling dependent records against the provider

pub mod client;
pub mod memory;
pub mod sync;

pub use client::{
    CloudProvider, ProviderContext, ProviderError, ProviderObject, ProviderResult, RestProvider,
};
pub use memory::InMemoryCloud;
pub use sync::{KindSync, SyncDriver, SyncPass, SyncStats};
