//! Generic per-kind resource controller
//!
//! A [`RecordBuilder`] knows how one dependent kind is named, labelled and
//! parameterized. [`ResourceController`] layers the shared lifecycle on top:
//! create and wait, ensure by label identity, in-place update, delete and
//! wait until gone.

use async_trait::async_trait;
use fleet_api::resources::{Managed, ResourceState};
use fleet_core::hash::spec_hash;
use fleet_core::{
    wait_until, FleetError, LabelSelector, ObjectStore, ReplicaSlot, ResourceKind, Result,
    WaitConfig,
};
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::FleetContext;
use crate::metrics::FleetMetrics;

/// Per-kind knowledge used by [`ResourceController`]
#[async_trait]
pub trait RecordBuilder: Send + Sync {
    type Record: Managed;
    type Input: Send + Sync;

    fn kind(&self) -> ResourceKind;

    /// Replica slot the input belongs to; fleet-wide kinds use slot 0@0
    fn slot(&self, input: &Self::Input) -> ReplicaSlot;

    /// Labels identifying the unique record for `input`
    fn identity(&self, fleet: &FleetContext, input: &Self::Input) -> LabelSelector;

    /// The record that should exist for `input`. May read other records,
    /// never writes.
    async fn build_desired(&self, fleet: &FleetContext, input: &Self::Input)
        -> Result<Self::Record>;

    /// Reject changes to fields that cannot be updated in place
    fn check_mutable(&self, _current: &Self::Record, _desired: &Self::Record) -> Result<()> {
        Ok(())
    }
}

/// Lifecycle operations for one dependent kind
pub struct ResourceController<B: RecordBuilder> {
    builder: B,
    store: Arc<dyn ObjectStore<B::Record>>,
    wait: WaitConfig,
    cancel: CancellationToken,
    metrics: FleetMetrics,
}

impl<B: RecordBuilder> ResourceController<B> {
    pub fn new(
        builder: B,
        store: Arc<dyn ObjectStore<B::Record>>,
        wait: WaitConfig,
        cancel: CancellationToken,
        metrics: FleetMetrics,
    ) -> Self {
        Self {
            builder,
            store,
            wait,
            cancel,
            metrics,
        }
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    pub fn kind(&self) -> ResourceKind {
        self.builder.kind()
    }

    pub async fn build_desired(
        &self,
        fleet: &FleetContext,
        input: &B::Input,
    ) -> Result<B::Record> {
        self.builder.build_desired(fleet, input).await
    }

    /// Submit the desired record and wait until the provider reports it
    /// available. A record the provider refuses is deleted again before
    /// the failure is returned.
    pub async fn create(&self, fleet: &FleetContext, input: &B::Input) -> Result<B::Record> {
        let desired = self.builder.build_desired(fleet, input).await?;
        let name = desired.name_any();
        let namespace = fleet.namespace.clone();

        self.store.create(&desired).await?;
        self.metrics.record_operation(self.kind().as_str(), "create");
        info!(kind = %self.kind(), name = %name, "Created record");

        match self.wait_available(&namespace, &name).await {
            Ok(()) => {}
            Err(e @ FleetError::Provisioning { .. }) => {
                self.discard_failed(&desired).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        }

        self.store
            .get(&namespace, &name)
            .await?
            .ok_or_else(|| FleetError::not_found(self.kind().as_str(), &name))
    }

    /// Return the unique record for `input`, creating it when none exists
    pub async fn ensure(&self, fleet: &FleetContext, input: &B::Input) -> Result<B::Record> {
        let selector = self.builder.identity(fleet, input);
        let mut existing = self.store.list(&fleet.namespace, &selector).await?;

        match existing.len() {
            0 => self.create(fleet, input).await,
            1 => {
                let record = existing.remove(0);
                match self.check_ready(&record) {
                    Ok(()) => Ok(record),
                    Err(e @ FleetError::Provisioning { .. }) => {
                        self.discard_failed(&record).await;
                        Err(e)
                    }
                    Err(e) => Err(e),
                }
            }
            count => {
                let slot = self.builder.slot(input);
                Err(FleetError::DuplicateResources {
                    kind: self.kind().to_string(),
                    index: slot.index,
                    generation: slot.generation,
                    count,
                })
            }
        }
    }

    /// Ready records pass; anything else is deferred or failed
    fn check_ready(&self, record: &B::Record) -> Result<()> {
        if record.meta().deletion_timestamp.is_some() {
            return Err(FleetError::busy(
                self.kind().as_str(),
                record.name_any(),
                ResourceState::Destroying,
            ));
        }
        if record.is_available() {
            return Ok(());
        }
        if record.state() == ResourceState::Error {
            return Err(self.provisioning_error(record));
        }
        Err(FleetError::busy(
            self.kind().as_str(),
            record.name_any(),
            record.state(),
        ))
    }

    /// Best-effort removal of a record the provider failed, so the next
    /// pass can create it again
    async fn discard_failed(&self, record: &B::Record) {
        let name = record.name_any();
        warn!(kind = %self.kind(), name = %name, "Removing record left in ERROR");
        match self.store.delete(record).await {
            Ok(()) => self.metrics.record_operation(self.kind().as_str(), "delete"),
            Err(e) => warn!(kind = %self.kind(), name = %name, "Cleanup of failed record: {}", e),
        }
    }

    fn provisioning_error(&self, record: &B::Record) -> FleetError {
        FleetError::Provisioning {
            kind: self.kind().to_string(),
            name: record.name_any(),
            message: record
                .failure_message()
                .unwrap_or("provider reported ERROR")
                .to_string(),
        }
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Result<Option<B::Record>> {
        self.store.get(namespace, name).await
    }

    pub async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<B::Record>> {
        self.store.list(namespace, selector).await
    }

    /// Push a changed spec and wait until the provider has applied it
    pub async fn update_in_place(&self, desired: &B::Record) -> Result<B::Record> {
        let name = desired.name_any();
        let namespace = desired.namespace().unwrap_or_default();
        let current = self
            .store
            .get(&namespace, &name)
            .await?
            .ok_or_else(|| FleetError::not_found(self.kind().as_str(), &name))?;
        self.builder.check_mutable(&current, desired)?;

        let updated = self.store.update(desired).await?;
        self.metrics.record_operation(self.kind().as_str(), "update");
        info!(kind = %self.kind(), name = %name, "Updated record in place");

        self.wait_synced(&namespace, &name, &spec_hash(&updated.provider_params()))
            .await
    }

    /// Have the provider apply the unchanged spec again, for records whose
    /// provider object was changed behind the record's back
    pub async fn resync(&self, record: &B::Record) -> Result<B::Record> {
        let name = record.name_any();
        let namespace = record.namespace().unwrap_or_default();

        let mut stale = record.clone();
        stale.observed_mut().synced_hash = None;
        self.store.update_status(&stale).await?;
        self.metrics.record_operation(self.kind().as_str(), "resync");
        info!(kind = %self.kind(), name = %name, "Re-applying spec at the provider");

        self.wait_synced(&namespace, &name, &spec_hash(&record.provider_params()))
            .await
    }

    /// Wait until the provider reports the record available with `target`
    /// as its synced spec hash, then return the fresh record
    async fn wait_synced(&self, namespace: &str, name: &str, target: &str) -> Result<B::Record> {
        let what = format!("{} {} update", self.kind(), name);
        wait_until(&self.cancel, self.wait, &what, || async move {
            let Some(record) = self.store.get(namespace, name).await? else {
                return Err(FleetError::not_found(self.kind().as_str(), name));
            };
            if record.state() == ResourceState::Error {
                return Err(self.provisioning_error(&record));
            }
            let synced = record.observed().and_then(|o| o.synced_hash.as_deref());
            Ok(record.is_available() && synced == Some(target))
        })
        .await?;

        self.store
            .get(namespace, name)
            .await?
            .ok_or_else(|| FleetError::not_found(self.kind().as_str(), name))
    }

    /// Delete a record and wait until it is gone. Absent is success.
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let Some(record) = self.store.get(namespace, name).await? else {
            return Ok(());
        };
        if record.meta().deletion_timestamp.is_none() {
            self.store.delete(&record).await?;
            self.metrics.record_operation(self.kind().as_str(), "delete");
            info!(kind = %self.kind(), name = %name, "Deleting record");
        }
        self.wait_gone(namespace, name).await
    }

    /// Delete every record matching `selector`, one after another
    pub async fn delete_matching(&self, namespace: &str, selector: &LabelSelector) -> Result<()> {
        for record in self.store.list(namespace, selector).await? {
            self.delete(namespace, &record.name_any()).await?;
        }
        Ok(())
    }

    async fn wait_available(&self, namespace: &str, name: &str) -> Result<()> {
        let what = format!("{} {} to become available", self.kind(), name);
        wait_until(&self.cancel, self.wait, &what, || async move {
            let Some(record) = self.store.get(namespace, name).await? else {
                return Err(FleetError::not_found(self.kind().as_str(), name));
            };
            if record.state() == ResourceState::Error {
                return Err(self.provisioning_error(&record));
            }
            Ok(record.is_available())
        })
        .await
    }

    async fn wait_gone(&self, namespace: &str, name: &str) -> Result<()> {
        let what = format!("{} {} to be deleted", self.kind(), name);
        wait_until(&self.cancel, self.wait, &what, || async move {
            let gone = self.store.get(namespace, name).await?.is_none();
            if !gone {
                debug!(kind = %self.kind(), name = %name, "Waiting for deletion");
            }
            Ok(gone)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_api::resources::{Volume, VolumeSpec};
    use fleet_api::v1alpha1::ServerSetSpec;
    use fleet_core::naming::label_selector;
    use fleet_core::MemoryStore;
    use std::time::Duration;

    struct TestVolumes;

    #[async_trait]
    impl RecordBuilder for TestVolumes {
        type Record = Volume;
        type Input = ReplicaSlot;

        fn kind(&self) -> ResourceKind {
            ResourceKind::BootVolume
        }

        fn slot(&self, input: &ReplicaSlot) -> ReplicaSlot {
            *input
        }

        fn identity(&self, fleet: &FleetContext, input: &ReplicaSlot) -> LabelSelector {
            label_selector(&fleet.name, ResourceKind::BootVolume, *input)
        }

        async fn build_desired(&self, fleet: &FleetContext, input: &ReplicaSlot) -> Result<Volume> {
            let name = format!("{}-bootvolume-{}-{}", fleet.name, input.index, input.generation);
            let mut volume = Volume::new(&name, VolumeSpec {
                datacenter_id: "dc-1".to_string(),
                name: name.clone(),
                size: 10,
                ..Default::default()
            });
            volume.metadata = fleet.record_meta(&name, &self.identity(fleet, input));
            Ok(volume)
        }
    }

    fn controller(store: &MemoryStore<Volume>) -> ResourceController<TestVolumes> {
        ResourceController::new(
            TestVolumes,
            Arc::new(store.clone()),
            WaitConfig::new(Duration::from_secs(60), Duration::from_secs(1)),
            CancellationToken::new(),
            FleetMetrics::new().unwrap(),
        )
    }

    fn fleet() -> FleetContext {
        FleetContext::new("web", "default", ServerSetSpec::default())
    }

    async fn mark(store: &MemoryStore<Volume>, name: &str, state: ResourceState, message: Option<&str>) {
        let mut record = store.get("default", name).await.unwrap().unwrap();
        let observed = record.observed_mut();
        observed.state = state;
        observed.external_id = Some(format!("id-{}", name));
        observed.message = message.map(str::to_string);
        store.update_status(&record).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_defers_busy_record() {
        let store = MemoryStore::new();
        let controller = controller(&store);
        let slot = ReplicaSlot::new(0, 0);
        store
            .create(&TestVolumes.build_desired(&fleet(), &slot).await.unwrap())
            .await
            .unwrap();

        let result = controller.ensure(&fleet(), &slot).await;
        assert!(matches!(result, Err(ref e) if e.is_transitional()));

        mark(&store, "web-bootvolume-0-0", ResourceState::Available, None).await;
        let record = controller.ensure(&fleet(), &slot).await.unwrap();
        assert_eq!(record.name_any(), "web-bootvolume-0-0");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_reports_duplicates() {
        let store = MemoryStore::new();
        let controller = controller(&store);
        let slot = ReplicaSlot::new(0, 0);
        let mut first = TestVolumes.build_desired(&fleet(), &slot).await.unwrap();
        store.create(&first).await.unwrap();
        first.metadata.name = Some("stray".to_string());
        store.create(&first).await.unwrap();

        let result = controller.ensure(&fleet(), &slot).await;
        assert!(matches!(
            result,
            Err(FleetError::DuplicateResources { count: 2, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_times_out_without_provider() {
        let store = MemoryStore::new();
        let controller = controller(&store);

        let result = controller.create(&fleet(), &ReplicaSlot::new(0, 0)).await;
        assert!(matches!(result, Err(FleetError::Timeout { .. })));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_cleans_up_failed_record() {
        let store = MemoryStore::new();
        let controller = controller(&store);

        let failing = store.clone();
        let reporter = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                if failing.get("default", "web-bootvolume-0-0").await.unwrap().is_some() {
                    mark(&failing, "web-bootvolume-0-0", ResourceState::Error, Some("quota exceeded")).await;
                    break;
                }
            }
        });

        let result = controller.create(&fleet(), &ReplicaSlot::new(0, 0)).await;
        reporter.await.unwrap();
        assert!(matches!(result, Err(FleetError::Provisioning { ref message, .. }) if message == "quota exceeded"));

        let lingering = store.get("default", "web-bootvolume-0-0").await.unwrap().unwrap();
        assert!(lingering.metadata.deletion_timestamp.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_removes_record_left_in_error() {
        let store = MemoryStore::new();
        let controller = controller(&store);
        let slot = ReplicaSlot::new(0, 0);

        // A create that timed out, after which the provider failed the record
        let result = controller.create(&fleet(), &slot).await;
        assert!(matches!(result, Err(FleetError::Timeout { .. })));
        mark(&store, "web-bootvolume-0-0", ResourceState::Error, Some("disk failure")).await;

        let result = controller.ensure(&fleet(), &slot).await;
        assert!(matches!(result, Err(FleetError::Provisioning { ref message, .. }) if message == "disk failure"));

        let lingering = store.get("default", "web-bootvolume-0-0").await.unwrap().unwrap();
        assert!(lingering.metadata.deletion_timestamp.is_some());

        // While the deletion is pending the record only defers the pass
        let result = controller.ensure(&fleet(), &slot).await;
        assert!(matches!(result, Err(ref e) if e.is_transitional()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_absent_is_ok() {
        let store = MemoryStore::new();
        let controller = controller(&store);
        assert!(controller.delete("default", "missing").await.is_ok());
    }
}
