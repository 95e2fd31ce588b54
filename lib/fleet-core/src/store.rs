//! Desired-state object store
//!
//! The store is the single source of truth for dependent records: both the
//! desired spec the engine writes and the status the provider sync writes
//! back. `MemoryStore` keeps records in process and follows the same
//! finalizer semantics as the Kubernetes API server.

use async_trait::async_trait;
use chrono::Utc;
use fleet_api::resources::{Managed, EXTERNAL_RESOURCE_FINALIZER};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{FleetError, Result};

/// Equality-based label selector
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }

    pub fn to_labels(&self) -> BTreeMap<String, String> {
        self.requirements.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .requirements
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// Typed record store
#[async_trait]
pub trait ObjectStore<K: Managed>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>>;

    /// List across every namespace
    async fn list_all(&self, selector: &LabelSelector) -> Result<Vec<K>>;

    async fn create(&self, record: &K) -> Result<K>;

    /// Replace spec and metadata; status is left untouched
    async fn update(&self, record: &K) -> Result<K>;

    /// Replace status only
    async fn update_status(&self, record: &K) -> Result<K>;

    /// Request deletion; records holding finalizers linger until released
    async fn delete(&self, record: &K) -> Result<()>;

    async fn delete_all_matching(&self, namespace: &str, selector: &LabelSelector) -> Result<()>;

    /// Drop the external-resource finalizer once the provider object is gone
    async fn release(&self, record: &K) -> Result<()>;
}

/// Operation recorded by a [`Journal`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalOp {
    Created,
    DeleteRequested,
    Removed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalEntry {
    pub op: JournalOp,
    pub kind: String,
    pub name: String,
}

/// Ordered log of record operations, shareable between stores of
/// different kinds
#[derive(Clone, Debug, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, op: JournalOp, kind: &str, name: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(JournalEntry {
                op,
                kind: kind.to_string(),
                name: name.to_string(),
            });
        }
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Position of the first entry matching op and name
    pub fn position(&self, op: JournalOp, name: &str) -> Option<usize> {
        self.entries()
            .iter()
            .position(|e| e.op == op && e.name == name)
    }

    pub fn count(&self, op: JournalOp, kind: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.op == op && e.kind == kind)
            .count()
    }
}

/// In-process object store
pub struct MemoryStore<K: Managed> {
    // Map of (namespace, name) to record
    records: Arc<RwLock<HashMap<(String, String), K>>>,
    revision: Arc<AtomicU64>,
    journal: Journal,
}

impl<K: Managed> MemoryStore<K> {
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            revision: Arc::new(AtomicU64::new(0)),
            journal,
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Get count of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// All records, sorted by name
    pub async fn snapshot(&self) -> Vec<K> {
        let records = self.records.read().await;
        let mut all: Vec<K> = records.values().cloned().collect();
        all.sort_by_key(|r| r.name_any());
        all
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn key(record: &K) -> (String, String) {
        (record.namespace().unwrap_or_default(), record.name_any())
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }

    fn request_delete(
        &self,
        records: &mut HashMap<(String, String), K>,
        key: &(String, String),
    ) {
        let Some(existing) = records.get_mut(key) else {
            return;
        };
        self.journal
            .push(JournalOp::DeleteRequested, &Self::kind(), &key.1);

        if existing.finalizers().is_empty() {
            records.remove(key);
            self.journal.push(JournalOp::Removed, &Self::kind(), &key.1);
            debug!("Removed {} {}/{}", Self::kind(), key.0, key.1);
        } else if existing.meta().deletion_timestamp.is_none() {
            existing.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
            debug!("Marked {} {}/{} for deletion", Self::kind(), key.0, key.1);
        }
    }
}

impl<K: Managed> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Managed> Clone for MemoryStore<K> {
    fn clone(&self) -> Self {
        // Clones share the same records
        Self {
            records: self.records.clone(),
            revision: self.revision.clone(),
            journal: self.journal.clone(),
        }
    }
}

#[async_trait]
impl<K: Managed> ObjectStore<K> for MemoryStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>> {
        let records = self.records.read().await;
        let mut matching: Vec<K> = records
            .iter()
            .filter(|((ns, _), r)| ns == namespace && selector.matches(r.labels()))
            .map(|(_, r)| r.clone())
            .collect();
        matching.sort_by_key(|r| r.name_any());
        Ok(matching)
    }

    async fn list_all(&self, selector: &LabelSelector) -> Result<Vec<K>> {
        let records = self.records.read().await;
        let mut matching: Vec<K> = records
            .values()
            .filter(|r| selector.matches(r.labels()))
            .cloned()
            .collect();
        matching.sort_by_key(|r| (r.namespace(), r.name_any()));
        Ok(matching)
    }

    async fn create(&self, record: &K) -> Result<K> {
        let key = Self::key(record);
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(FleetError::Store(format!(
                "{} {}/{} already exists",
                Self::kind(),
                key.0,
                key.1
            )));
        }

        let mut stored = record.clone();
        let revision = self.next_revision();
        let meta = stored.meta_mut();
        meta.uid = Some(format!("uid-{}", revision));
        meta.resource_version = Some(revision);
        meta.creation_timestamp = Some(Time(Utc::now()));
        meta.deletion_timestamp = None;

        records.insert(key.clone(), stored.clone());
        self.journal.push(JournalOp::Created, &Self::kind(), &key.1);
        debug!("Created {} {}/{}", Self::kind(), key.0, key.1);
        Ok(stored)
    }

    async fn update(&self, record: &K) -> Result<K> {
        let key = Self::key(record);
        let revision = self.next_revision();
        let mut records = self.records.write().await;
        let existing = records
            .get(&key)
            .ok_or_else(|| FleetError::not_found(Self::kind(), &key.1))?;

        // Status is owned by update_status; carry over the stored one
        let mut stored: K = with_status(serde_json::to_value(record)?, existing)?;
        let meta = stored.meta_mut();
        meta.uid = existing.meta().uid.clone();
        meta.creation_timestamp = existing.meta().creation_timestamp.clone();
        meta.deletion_timestamp = existing.meta().deletion_timestamp.clone();
        meta.resource_version = Some(revision);

        records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update_status(&self, record: &K) -> Result<K> {
        let key = Self::key(record);
        let revision = self.next_revision();
        let mut records = self.records.write().await;
        let existing = records
            .get_mut(&key)
            .ok_or_else(|| FleetError::not_found(Self::kind(), &key.1))?;

        // Keep the stored spec and metadata, take only the status
        let mut stored: K = with_status(serde_json::to_value(&*existing)?, record)?;
        stored.meta_mut().resource_version = Some(revision);
        *existing = stored.clone();
        Ok(stored)
    }

    async fn delete(&self, record: &K) -> Result<()> {
        let key = Self::key(record);
        let mut records = self.records.write().await;
        self.request_delete(&mut records, &key);
        Ok(())
    }

    async fn delete_all_matching(&self, namespace: &str, selector: &LabelSelector) -> Result<()> {
        let mut records = self.records.write().await;
        let keys: Vec<(String, String)> = records
            .iter()
            .filter(|((ns, _), r)| ns == namespace && selector.matches(r.labels()))
            .map(|(k, _)| k.clone())
            .collect();
        for key in keys {
            self.request_delete(&mut records, &key);
        }
        Ok(())
    }

    async fn release(&self, record: &K) -> Result<()> {
        let key = Self::key(record);
        let mut records = self.records.write().await;
        let Some(existing) = records.get_mut(&key) else {
            return Ok(());
        };

        existing
            .meta_mut()
            .finalizers
            .get_or_insert_with(Vec::new)
            .retain(|f| f != EXTERNAL_RESOURCE_FINALIZER);

        if existing.meta().deletion_timestamp.is_some() && existing.finalizers().is_empty() {
            records.remove(&key);
            self.journal.push(JournalOp::Removed, &Self::kind(), &key.1);
            debug!("Released and removed {} {}/{}", Self::kind(), key.0, key.1);
        }
        Ok(())
    }
}

/// `document` with its status replaced by the status of `source`
fn with_status<K: Managed>(mut document: serde_json::Value, source: &K) -> Result<K> {
    let status = serde_json::to_value(source)?
        .get("status")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    if let Some(object) = document.as_object_mut() {
        object.insert("status".to_string(), status);
    }
    Ok(serde_json::from_value(document)?)
}
