//! In-process cloud provider
//!
//! Objects start BUSY and turn AVAILABLE after a configurable number of
//! reads, the way a real provider settles asynchronous requests. Failure
//! injection hooks let tests reject requests or break running objects.

use async_trait::async_trait;
use fleet_api::resources::ResourceState;
use fleet_api::v1alpha1::IPV6_CIDR_AUTO;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::client::{CloudProvider, ProviderContext, ProviderError, ProviderObject, ProviderResult};

#[derive(Clone, Debug)]
struct CloudObject {
    kind: String,
    datacenter_id: String,
    name: String,
    params: Value,
    state: ResourceState,
    // Reads left until the pending request settles
    settle_in: u32,
    fields: Value,
}

#[derive(Default)]
struct CloudState {
    objects: HashMap<String, CloudObject>,
    // Kind to rejection message
    rejections: HashMap<String, String>,
    // Objects forced into a state on their next settle
    broken: HashMap<String, String>,
    next_block: u32,
    next_address: u32,
    creates: HashMap<String, usize>,
    updates: HashMap<String, usize>,
    deletes: HashMap<String, usize>,
}

/// Provider double keeping every object in memory
#[derive(Clone)]
pub struct InMemoryCloud {
    state: Arc<Mutex<CloudState>>,
    settle_after: u32,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new(1)
    }
}

impl InMemoryCloud {
    /// Requests settle after `settle_after` reads
    pub fn new(settle_after: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(CloudState::default())),
            settle_after,
        }
    }

    fn lock(&self) -> ProviderResult<MutexGuard<'_, CloudState>> {
        self.state
            .lock()
            .map_err(|_| ProviderError::Unavailable("cloud state poisoned".to_string()))
    }

    /// Reject every create and update of `kind` with `message`
    pub fn reject(&self, kind: &str, message: &str) {
        if let Ok(mut state) = self.lock() {
            state.rejections.insert(kind.to_string(), message.to_string());
        }
    }

    pub fn clear_rejections(&self) {
        if let Ok(mut state) = self.lock() {
            state.rejections.clear();
        }
    }

    /// Put a named object into ERROR with `vm_state` (servers) reported
    pub fn break_object(&self, name: &str, vm_state: &str) {
        if let Ok(mut state) = self.lock() {
            state.broken.insert(name.to_string(), vm_state.to_string());
        }
    }

    /// Replace the provider-assigned fields of a named object, as a change
    /// made outside the orchestrator would
    pub fn alter_fields(&self, name: &str, fields: Value) {
        if let Ok(mut state) = self.lock() {
            if let Some(object) = state.objects.values_mut().find(|o| o.name == name) {
                object.fields = fields;
            }
        }
    }

    /// Live objects of a kind, sorted by name
    pub fn names(&self, kind: &str) -> Vec<String> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let mut names: Vec<String> = state
            .objects
            .values()
            .filter(|o| o.kind == kind && o.state != ResourceState::Destroying)
            .map(|o| o.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Submitted parameters of a named object
    pub fn params_of(&self, name: &str) -> Option<Value> {
        let state = self.lock().ok()?;
        state
            .objects
            .values()
            .find(|o| o.name == name)
            .map(|o| o.params.clone())
    }

    pub fn create_count(&self, kind: &str) -> usize {
        self.lock()
            .map(|s| s.creates.get(kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn update_count(&self, kind: &str) -> usize {
        self.lock()
            .map(|s| s.updates.get(kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn delete_count(&self, kind: &str) -> usize {
        self.lock()
            .map(|s| s.deletes.get(kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    fn check_rejected(state: &CloudState, kind: &str) -> ProviderResult<()> {
        match state.rejections.get(kind) {
            Some(message) => Err(ProviderError::Rejected(message.clone())),
            None => Ok(()),
        }
    }

    /// Provider-assigned fields for a kind, computed from its parameters
    fn assign_fields(state: &mut CloudState, kind: &str, params: &Value, previous: &Value) -> Value {
        match kind {
            "Lan" => {
                let requested = params.get("ipv6Cidr").and_then(Value::as_str).unwrap_or("");
                let block = if requested == IPV6_CIDR_AUTO {
                    match previous.get("ipv6CidrBlock").and_then(Value::as_str) {
                        Some(existing) => existing.to_string(),
                        None => {
                            state.next_block += 1;
                            format!("2001:db8:{:x}::/64", state.next_block)
                        }
                    }
                } else {
                    requested.to_string()
                };
                json!({ "ipv6CidrBlock": block })
            }
            "Nic" => {
                let ip = match params.get("ipv4").and_then(Value::as_str) {
                    Some(ip) => ip.to_string(),
                    None => match previous.get("ips").and_then(|ips| ips.get(0)).and_then(Value::as_str) {
                        Some(existing) => existing.to_string(),
                        None => {
                            state.next_address += 1;
                            format!("10.0.{}.{}", state.next_address / 250, state.next_address % 250 + 2)
                        }
                    },
                };
                json!({ "ips": [ip] })
            }
            "Server" => json!({ "vmState": "RUNNING" }),
            _ => json!({}),
        }
    }

    fn to_object(id: &str, object: &CloudObject) -> ProviderObject {
        ProviderObject {
            id: id.to_string(),
            name: object.name.clone(),
            state: object.state,
            fields: object.fields.clone(),
        }
    }
}

#[async_trait]
impl CloudProvider for InMemoryCloud {
    async fn create(
        &self,
        kind: &str,
        ctx: &ProviderContext,
        name: &str,
        params: &Value,
    ) -> ProviderResult<String> {
        let mut state = self.lock()?;
        Self::check_rejected(&state, kind)?;

        let id = uuid::Uuid::new_v4().to_string();
        let fields = Self::assign_fields(&mut state, kind, params, &Value::Null);
        state.objects.insert(
            id.clone(),
            CloudObject {
                kind: kind.to_string(),
                datacenter_id: ctx.datacenter_id.clone(),
                name: name.to_string(),
                params: params.clone(),
                state: ResourceState::Busy,
                settle_in: self.settle_after,
                fields,
            },
        );
        *state.creates.entry(kind.to_string()).or_default() += 1;
        debug!("Cloud created {} {} ({})", kind, name, id);
        Ok(id)
    }

    async fn get(
        &self,
        kind: &str,
        ctx: &ProviderContext,
        id: &str,
    ) -> ProviderResult<Option<ProviderObject>> {
        let mut state = self.lock()?;
        let broken = state.broken.clone();
        let Some(object) = state.objects.get_mut(id) else {
            return Ok(None);
        };
        if object.kind != kind || object.datacenter_id != ctx.datacenter_id {
            return Ok(None);
        }

        if object.settle_in > 0 {
            object.settle_in -= 1;
        }
        if object.settle_in == 0 {
            match object.state {
                ResourceState::Destroying => {
                    state.objects.remove(id);
                    return Ok(None);
                }
                ResourceState::Busy => object.state = ResourceState::Available,
                _ => {}
            }
        }
        if let Some(vm_state) = broken.get(&object.name) {
            object.state = ResourceState::Error;
            object.fields = json!({ "vmState": vm_state });
        }

        Ok(Some(Self::to_object(id, object)))
    }

    async fn update(
        &self,
        kind: &str,
        _ctx: &ProviderContext,
        id: &str,
        params: &Value,
    ) -> ProviderResult<()> {
        let mut state = self.lock()?;
        Self::check_rejected(&state, kind)?;

        let previous = match state.objects.get(id) {
            Some(object) => object.fields.clone(),
            None => return Err(ProviderError::Rejected(format!("{} {} does not exist", kind, id))),
        };
        let fields = Self::assign_fields(&mut state, kind, params, &previous);
        if let Some(object) = state.objects.get_mut(id) {
            object.params = params.clone();
            object.fields = fields;
            object.state = ResourceState::Busy;
            object.settle_in = self.settle_after;
        }
        *state.updates.entry(kind.to_string()).or_default() += 1;
        Ok(())
    }

    async fn delete(&self, kind: &str, _ctx: &ProviderContext, id: &str) -> ProviderResult<()> {
        let mut state = self.lock()?;
        let settle_after = self.settle_after;
        let Some(object) = state.objects.get_mut(id) else {
            return Ok(());
        };
        if object.state != ResourceState::Destroying {
            object.state = ResourceState::Destroying;
            object.settle_in = settle_after;
            *state.deletes.entry(kind.to_string()).or_default() += 1;
        }
        Ok(())
    }

    async fn list(&self, kind: &str, ctx: &ProviderContext) -> ProviderResult<Vec<ProviderObject>> {
        let state = self.lock()?;
        Ok(state
            .objects
            .iter()
            .filter(|(_, o)| o.kind == kind && o.datacenter_id == ctx.datacenter_id)
            .map(|(id, o)| Self::to_object(id, o))
            .collect())
    }
}
