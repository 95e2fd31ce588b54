//! Cloud provider API seam and its REST client

use async_trait::async_trait;
use fleet_api::resources::ResourceState;
use fleet_core::FleetError;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

#[derive(Error, Debug)]
pub enum ProviderError {
    /// The request was refused and resubmitting it will not help
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<ProviderError> for FleetError {
    fn from(err: ProviderError) -> Self {
        FleetError::Provider(err.to_string())
    }
}

/// Where a provider object lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderContext {
    pub datacenter_id: String,
}

impl ProviderContext {
    pub fn new(datacenter_id: impl Into<String>) -> Self {
        Self {
            datacenter_id: datacenter_id.into(),
        }
    }
}

/// An object as the provider reports it
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderObject {
    pub id: String,
    pub name: String,
    pub state: ResourceState,
    /// Kind-specific fields (vmState, ipv6CidrBlock, ips, ...)
    pub fields: serde_json::Value,
}

/// Per-kind Create/Get/Update/Delete against the cloud provider
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn create(
        &self,
        kind: &str,
        ctx: &ProviderContext,
        name: &str,
        params: &serde_json::Value,
    ) -> ProviderResult<String>;

    async fn get(
        &self,
        kind: &str,
        ctx: &ProviderContext,
        id: &str,
    ) -> ProviderResult<Option<ProviderObject>>;

    async fn update(
        &self,
        kind: &str,
        ctx: &ProviderContext,
        id: &str,
        params: &serde_json::Value,
    ) -> ProviderResult<()>;

    async fn delete(&self, kind: &str, ctx: &ProviderContext, id: &str) -> ProviderResult<()>;

    async fn list(&self, kind: &str, ctx: &ProviderContext) -> ProviderResult<Vec<ProviderObject>>;
}

#[derive(Deserialize)]
struct CreatedBody {
    id: String,
}

#[derive(Deserialize)]
struct ObjectBody {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    properties: serde_json::Value,
}

impl From<ObjectBody> for ProviderObject {
    fn from(body: ObjectBody) -> Self {
        Self {
            id: body.id,
            name: body.name,
            state: ResourceState::from_provider(&body.state),
            fields: body.properties,
        }
    }
}

#[derive(Deserialize)]
struct ListBody {
    #[serde(default)]
    items: Vec<ObjectBody>,
}

/// JSON-over-HTTP provider client.
///
/// Objects live under `{base}/datacenters/{datacenter}/{kind}s`.
#[derive(Clone)]
pub struct RestProvider {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RestProvider {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn collection_url(&self, kind: &str, ctx: &ProviderContext) -> String {
        format!(
            "{}/datacenters/{}/{}s",
            self.base_url,
            ctx.datacenter_id,
            kind.to_ascii_lowercase()
        )
    }

    fn object_url(&self, kind: &str, ctx: &ProviderContext, id: &str) -> String {
        format!("{}/{}", self.collection_url(kind, ctx), id)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn check(response: reqwest::Response) -> ProviderResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            Err(ProviderError::Rejected(body))
        } else {
            Err(ProviderError::Unavailable(format!("{}: {}", status, body)))
        }
    }
}

#[async_trait]
impl CloudProvider for RestProvider {
    async fn create(
        &self,
        kind: &str,
        ctx: &ProviderContext,
        name: &str,
        params: &serde_json::Value,
    ) -> ProviderResult<String> {
        let body = serde_json::json!({ "name": name, "properties": params });
        let request = self.http.post(self.collection_url(kind, ctx)).json(&body);
        let response = Self::check(self.authorize(request).send().await?).await?;
        let created: CreatedBody = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        debug!("Provider accepted {} {} as {}", kind, name, created.id);
        Ok(created.id)
    }

    async fn get(
        &self,
        kind: &str,
        ctx: &ProviderContext,
        id: &str,
    ) -> ProviderResult<Option<ProviderObject>> {
        let request = self.http.get(self.object_url(kind, ctx, id));
        let response = self.authorize(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: ObjectBody = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(Some(body.into()))
    }

    async fn update(
        &self,
        kind: &str,
        ctx: &ProviderContext,
        id: &str,
        params: &serde_json::Value,
    ) -> ProviderResult<()> {
        let body = serde_json::json!({ "properties": params });
        let request = self.http.put(self.object_url(kind, ctx, id)).json(&body);
        Self::check(self.authorize(request).send().await?).await?;
        Ok(())
    }

    async fn delete(&self, kind: &str, ctx: &ProviderContext, id: &str) -> ProviderResult<()> {
        let request = self.http.delete(self.object_url(kind, ctx, id));
        let response = self.authorize(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn list(&self, kind: &str, ctx: &ProviderContext) -> ProviderResult<Vec<ProviderObject>> {
        let request = self.http.get(self.collection_url(kind, ctx));
        let body: ListBody = Self::check(self.authorize(request).send().await?)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(body.items.into_iter().map(ProviderObject::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ctx() -> ProviderContext {
        ProviderContext::new("dc-1")
    }

    #[tokio::test]
    async fn test_create_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/datacenters/dc-1/volumes"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({"id": "vol-1"})))
            .mount(&server)
            .await;

        let provider = RestProvider::new(server.uri(), Some("secret".to_string()));
        let id = provider
            .create("Volume", &ctx(), "web-bootvolume-0-0", &serde_json::json!({"size": 10}))
            .await
            .unwrap();
        assert_eq!(id, "vol-1");
    }

    #[tokio::test]
    async fn test_create_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/datacenters/dc-1/firewallrules"))
            .respond_with(ResponseTemplate::new(422).set_body_string("portRangeStart out of range"))
            .mount(&server)
            .await;

        let provider = RestProvider::new(server.uri(), None);
        let result = provider
            .create("FirewallRule", &ctx(), "rule", &serde_json::json!({}))
            .await;
        assert!(matches!(result, Err(ProviderError::Rejected(msg)) if msg.contains("portRangeStart")));
    }

    #[tokio::test]
    async fn test_get_maps_state_and_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/datacenters/dc-1/servers/srv-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "srv-1",
                "name": "web-server-0-0",
                "state": "AVAILABLE",
                "properties": {"vmState": "RUNNING"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/datacenters/dc-1/servers/srv-2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = RestProvider::new(server.uri(), None);
        let found = provider.get("Server", &ctx(), "srv-1").await.unwrap().unwrap();
        assert_eq!(found.state, ResourceState::Available);
        assert_eq!(found.fields["vmState"], "RUNNING");

        assert!(provider.get("Server", &ctx(), "srv-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/datacenters/dc-1/nics/nic-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = RestProvider::new(server.uri(), None);
        assert!(provider.delete("Nic", &ctx(), "nic-1").await.is_ok());
    }
}
