//! Provider synchronization of dependent records
//!
//! Each pass walks every record of a kind and moves the provider object
//! one step toward the record's spec: create, observe, push spec changes,
//! or tear down records marked for deletion. Results land in the record
//! status, which is all the engine ever looks at.

use async_trait::async_trait;
use fleet_api::resources::{Managed, ResourceState};
use fleet_core::hash::spec_hash;
use fleet_core::{LabelSelector, ObjectStore, Result};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{CloudProvider, ProviderContext, ProviderError};

/// Counts from one sync pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub observed: usize,
    pub failed: usize,
}

impl SyncStats {
    fn merge(&mut self, other: SyncStats) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.observed += other.observed;
        self.failed += other.failed;
    }
}

enum Outcome {
    Created,
    Updated,
    Deleted,
    Observed,
}

/// One sync pass over a record kind
#[async_trait]
pub trait SyncPass: Send + Sync {
    fn kind(&self) -> String;

    async fn sync_once(&self) -> Result<SyncStats>;
}

/// Sync of a single record kind
pub struct KindSync<K: Managed> {
    store: Arc<dyn ObjectStore<K>>,
    provider: Arc<dyn CloudProvider>,
}

impl<K: Managed> KindSync<K> {
    pub fn new(store: Arc<dyn ObjectStore<K>>, provider: Arc<dyn CloudProvider>) -> Self {
        Self { store, provider }
    }

    fn provider_kind() -> String {
        K::kind(&()).to_string()
    }

    async fn sync_record(&self, mut record: K) -> Result<Outcome> {
        let kind = Self::provider_kind();
        let name = record.name_any();
        let ctx = ProviderContext::new(record.datacenter_id());

        if record.meta().deletion_timestamp.is_some() {
            return self.sync_deletion(record, &kind, &ctx).await;
        }

        let params = record.provider_params();
        let hash = spec_hash(&params);

        let Some(id) = record.external_id().map(str::to_string) else {
            // A previous pass may have created the object without recording its id
            let adopted = self
                .provider
                .list(&kind, &ctx)
                .await?
                .into_iter()
                .find(|o| o.name == name && o.state != ResourceState::Destroying);

            let id = match adopted {
                Some(object) => {
                    debug!("Adopting {} {} as {}", kind, name, object.id);
                    object.id
                }
                None => match self.provider.create(&kind, &ctx, &name, &params).await {
                    Ok(id) => id,
                    Err(ProviderError::Rejected(message)) => {
                        warn!("Provider rejected {} {}: {}", kind, name, message);
                        let observed = record.observed_mut();
                        observed.state = ResourceState::Error;
                        observed.message = Some(message);
                        self.store.update_status(&record).await?;
                        return Ok(Outcome::Observed);
                    }
                    Err(e) => return Err(e.into()),
                },
            };

            let observed = record.observed_mut();
            observed.external_id = Some(id);
            observed.state = ResourceState::Busy;
            observed.synced_hash = Some(hash);
            observed.message = None;
            self.store.update_status(&record).await?;
            return Ok(Outcome::Created);
        };

        let Some(object) = self.provider.get(&kind, &ctx, &id).await? else {
            warn!("{} {} vanished at the provider", kind, name);
            let observed = record.observed_mut();
            observed.external_id = None;
            observed.state = ResourceState::Unknown;
            observed.synced_hash = None;
            self.store.update_status(&record).await?;
            return Ok(Outcome::Observed);
        };

        let before = serde_json::to_value(&record)?;
        record.apply_provider_fields(&object.fields);

        let stale = record.observed().and_then(|o| o.synced_hash.as_deref()) != Some(hash.as_str());
        if object.state == ResourceState::Available && stale {
            let outcome = match self.provider.update(&kind, &ctx, &id, &params).await {
                Ok(()) => {
                    let observed = record.observed_mut();
                    observed.state = ResourceState::Busy;
                    observed.synced_hash = Some(hash);
                    observed.message = None;
                    Outcome::Updated
                }
                Err(ProviderError::Rejected(message)) => {
                    warn!("Provider rejected update of {} {}: {}", kind, name, message);
                    let observed = record.observed_mut();
                    observed.state = ResourceState::Error;
                    observed.message = Some(message);
                    Outcome::Observed
                }
                Err(e) => return Err(e.into()),
            };
            self.store.update_status(&record).await?;
            return Ok(outcome);
        }

        let observed = record.observed_mut();
        observed.state = object.state;
        if object.state == ResourceState::Available {
            observed.message = None;
        }
        if serde_json::to_value(&record)? != before {
            self.store.update_status(&record).await?;
        }
        Ok(Outcome::Observed)
    }

    async fn sync_deletion(&self, record: K, kind: &str, ctx: &ProviderContext) -> Result<Outcome> {
        let name = record.name_any();
        let id = match record.external_id() {
            Some(id) => Some(id.to_string()),
            None => self
                .provider
                .list(kind, ctx)
                .await?
                .into_iter()
                .find(|o| o.name == name)
                .map(|o| o.id),
        };

        let Some(id) = id else {
            self.store.release(&record).await?;
            debug!("Released {} {}", kind, name);
            return Ok(Outcome::Deleted);
        };

        match self.provider.get(kind, ctx, &id).await? {
            None => {
                self.store.release(&record).await?;
                debug!("Released {} {}", kind, name);
                Ok(Outcome::Deleted)
            }
            Some(object) => {
                if object.state != ResourceState::Destroying {
                    self.provider.delete(kind, ctx, &id).await?;
                    info!("Deleting {} {} ({}) at the provider", kind, name, id);
                }
                if record.state() != ResourceState::Destroying {
                    let mut record = record;
                    record.observed_mut().state = ResourceState::Destroying;
                    self.store.update_status(&record).await?;
                }
                Ok(Outcome::Observed)
            }
        }
    }
}

#[async_trait]
impl<K: Managed> SyncPass for KindSync<K> {
    fn kind(&self) -> String {
        Self::provider_kind()
    }

    async fn sync_once(&self) -> Result<SyncStats> {
        let records = self.store.list_all(&LabelSelector::new()).await?;
        let mut stats = SyncStats::default();

        for record in records {
            let name = record.name_any();
            match self.sync_record(record).await {
                Ok(Outcome::Created) => stats.created += 1,
                Ok(Outcome::Updated) => stats.updated += 1,
                Ok(Outcome::Deleted) => stats.deleted += 1,
                Ok(Outcome::Observed) => stats.observed += 1,
                Err(e) => {
                    warn!("Failed to sync {} {}: {}", Self::provider_kind(), name, e);
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }
}

/// Runs sync passes for every registered kind on an interval
pub struct SyncDriver {
    passes: Vec<Box<dyn SyncPass>>,
}

impl SyncDriver {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn with_kind<K: Managed>(
        mut self,
        store: Arc<dyn ObjectStore<K>>,
        provider: Arc<dyn CloudProvider>,
    ) -> Self {
        self.passes.push(Box::new(KindSync::new(store, provider)));
        self
    }

    /// One pass over every kind
    pub async fn sync_all(&self) -> SyncStats {
        let mut total = SyncStats::default();
        for pass in &self.passes {
            match pass.sync_once().await {
                Ok(stats) => total.merge(stats),
                Err(e) => {
                    warn!("Sync of {} failed: {}", pass.kind(), e);
                    total.failed += 1;
                }
            }
        }
        total
    }

    /// Sync until cancelled
    pub async fn run(self, cancel: CancellationToken, interval: Duration) {
        info!("Starting provider sync every {:?}", interval);
        loop {
            let stats = self.sync_all().await;
            if stats != SyncStats::default() {
                debug!("Sync pass: {:?}", stats);
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("Provider sync stopped");
    }
}

impl Default for SyncDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCloud;
    use fleet_api::resources::{Volume, VolumeSpec, EXTERNAL_RESOURCE_FINALIZER};
    use fleet_core::MemoryStore;

    fn volume(name: &str, size: u32) -> Volume {
        let mut volume = Volume::new(
            name,
            VolumeSpec {
                datacenter_id: "dc-1".to_string(),
                name: name.to_string(),
                size,
                volume_type: "SSD".to_string(),
                ..Default::default()
            },
        );
        volume.metadata.namespace = Some("default".to_string());
        volume.metadata.finalizers = Some(vec![EXTERNAL_RESOURCE_FINALIZER.to_string()]);
        volume
    }

    fn setup() -> (MemoryStore<Volume>, InMemoryCloud, KindSync<Volume>) {
        let store = MemoryStore::<Volume>::new();
        let cloud = InMemoryCloud::new(1);
        let sync = KindSync::new(
            Arc::new(store.clone()) as Arc<dyn ObjectStore<Volume>>,
            Arc::new(cloud.clone()) as Arc<dyn CloudProvider>,
        );
        (store, cloud, sync)
    }

    async fn fetch(store: &MemoryStore<Volume>, name: &str) -> Option<Volume> {
        store.get("default", name).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_then_available() {
        let (store, cloud, sync) = setup();
        store.create(&volume("vol-a", 10)).await.unwrap();

        let stats = sync.sync_once().await.unwrap();
        assert_eq!(stats.created, 1);
        let record = fetch(&store, "vol-a").await.unwrap();
        assert_eq!(record.state(), ResourceState::Busy);
        assert!(record.external_id().is_some());

        sync.sync_once().await.unwrap();
        let record = fetch(&store, "vol-a").await.unwrap();
        assert!(record.is_available());
        assert_eq!(cloud.create_count("Volume"), 1);
    }

    #[tokio::test]
    async fn test_spec_change_pushes_update() {
        let (store, cloud, sync) = setup();
        store.create(&volume("vol-a", 10)).await.unwrap();
        sync.sync_once().await.unwrap();
        sync.sync_once().await.unwrap();

        let mut record = fetch(&store, "vol-a").await.unwrap();
        record.spec.size = 20;
        store.update(&record).await.unwrap();

        let stats = sync.sync_once().await.unwrap();
        assert_eq!(stats.updated, 1);
        assert_eq!(cloud.update_count("Volume"), 1);
        assert_eq!(cloud.params_of("vol-a").unwrap()["size"], 20);

        sync.sync_once().await.unwrap();
        assert!(fetch(&store, "vol-a").await.unwrap().is_available());
    }

    #[tokio::test]
    async fn test_rejected_create_marks_error() {
        let (store, cloud, sync) = setup();
        cloud.reject("Volume", "image not found");
        store.create(&volume("vol-a", 10)).await.unwrap();

        sync.sync_once().await.unwrap();
        let record = fetch(&store, "vol-a").await.unwrap();
        assert_eq!(record.state(), ResourceState::Error);
        assert_eq!(record.failure_message(), Some("image not found"));
    }

    #[tokio::test]
    async fn test_deletion_releases_after_provider_delete() {
        let (store, cloud, sync) = setup();
        store.create(&volume("vol-a", 10)).await.unwrap();
        sync.sync_once().await.unwrap();
        sync.sync_once().await.unwrap();

        let record = fetch(&store, "vol-a").await.unwrap();
        store.delete(&record).await.unwrap();
        assert!(fetch(&store, "vol-a").await.is_some());

        sync.sync_once().await.unwrap();
        assert_eq!(cloud.delete_count("Volume"), 1);
        assert_eq!(
            fetch(&store, "vol-a").await.unwrap().state(),
            ResourceState::Destroying
        );

        sync.sync_once().await.unwrap();
        assert!(fetch(&store, "vol-a").await.is_none());
        assert!(cloud.names("Volume").is_empty());
    }

    #[tokio::test]
    async fn test_adopts_unrecorded_object() {
        let (store, cloud, sync) = setup();
        let ctx = ProviderContext::new("dc-1");
        let id = cloud
            .create("Volume", &ctx, "vol-a", &serde_json::json!({}))
            .await
            .unwrap();
        store.create(&volume("vol-a", 10)).await.unwrap();

        sync.sync_once().await.unwrap();
        let record = fetch(&store, "vol-a").await.unwrap();
        assert_eq!(record.external_id(), Some(id.as_str()));
        assert_eq!(cloud.create_count("Volume"), 1);
    }
}
