//! Kubernetes-backed object store and identity record

use async_trait::async_trait;
use fleet_api::resources::{Managed, EXTERNAL_RESOURCE_FINALIZER};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use std::marker::PhantomData;
use tracing::debug;

use crate::identity::ActiveReplicaSource;
use crate::store::{LabelSelector, ObjectStore};
use crate::Result;

/// ObjectStore over the Kubernetes API for one record kind
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K: Managed> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn namespace_of(record: &K) -> String {
        record.namespace().unwrap_or_else(|| "default".to_string())
    }
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            _kind: PhantomData,
        }
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl<K: Managed> ObjectStore<K> for KubeStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<K>> {
        let params = ListParams::default().labels(&selector.to_string());
        Ok(self.api(namespace).list(&params).await?.items)
    }

    async fn list_all(&self, selector: &LabelSelector) -> Result<Vec<K>> {
        let api: Api<K> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&selector.to_string());
        Ok(api.list(&params).await?.items)
    }

    async fn create(&self, record: &K) -> Result<K> {
        let api = self.api(&Self::namespace_of(record));
        let created = api.create(&PostParams::default(), record).await?;
        debug!("Created {} {}", K::kind(&()), created.name_any());
        Ok(created)
    }

    async fn update(&self, record: &K) -> Result<K> {
        let api = self.api(&Self::namespace_of(record));
        Ok(api
            .replace(&record.name_any(), &PostParams::default(), record)
            .await?)
    }

    async fn update_status(&self, record: &K) -> Result<K> {
        let api = self.api(&Self::namespace_of(record));
        let body = serde_json::to_vec(record)?;
        Ok(api
            .replace_status(&record.name_any(), &PostParams::default(), body)
            .await?)
    }

    async fn delete(&self, record: &K) -> Result<()> {
        let api = self.api(&Self::namespace_of(record));
        match api.delete(&record.name_any(), &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_all_matching(&self, namespace: &str, selector: &LabelSelector) -> Result<()> {
        let params = ListParams::default().labels(&selector.to_string());
        self.api(namespace)
            .delete_collection(&DeleteParams::default(), &params)
            .await?;
        Ok(())
    }

    async fn release(&self, record: &K) -> Result<()> {
        let api = self.api(&Self::namespace_of(record));
        let remaining: Vec<String> = record
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != EXTERNAL_RESOURCE_FINALIZER)
            .cloned()
            .collect();
        let patch = serde_json::json!({ "metadata": { "finalizers": remaining } });
        match api
            .patch(&record.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Active replica read from one key of a ConfigMap
pub struct ConfigMapIdentity {
    client: Client,
    namespace: String,
    name: String,
    key: String,
}

impl ConfigMapIdentity {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            name: name.into(),
            key: key.into(),
        }
    }
}

#[async_trait]
impl ActiveReplicaSource for ConfigMapIdentity {
    async fn active_replica(&self) -> Result<Option<String>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        let Some(config_map) = api.get_opt(&self.name).await? else {
            debug!(
                "Identity ConfigMap {}/{} not found",
                self.namespace, self.name
            );
            return Ok(None);
        };

        Ok(config_map
            .data
            .and_then(|data| data.get(&self.key).cloned())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()))
    }
}
