//! istio-smi kubehub: API-server backed store adapter and source watchers.

#![forbid(unsafe_code)]

use std::sync::RwLock;

use istio_smi_store::{gvk_key, type_key, LabelSelector, ObjectStore, StoreError};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod watch;

pub use watch::{start_watcher, Change};

/// Field manager recorded on objects this controller creates.
pub const FIELD_MANAGER: &str = "istio-smi-controller";

/// Store adapter writing through the Kubernetes API.
///
/// Kinds must be registered before use; registration resolves the kind's
/// resource path and scope through discovery and caches the result.
pub struct KubeStore {
    client: Client,
    resources: RwLock<FxHashMap<String, (ApiResource, bool)>>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client, resources: RwLock::new(FxHashMap::default()) }
    }

    /// Build from the ambient kubeconfig / in-cluster config.
    pub async fn try_default() -> Result<Self, StoreError> {
        Ok(Self::new(Client::try_default().await?))
    }

    /// Seed a resolved kind, bypassing discovery.
    #[cfg(test)]
    fn with_resource(self, ar: ApiResource, namespaced: bool) -> Self {
        let key = gvk_key(&GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind));
        self.write_cache(key, (ar, namespaced));
        self
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn write_cache(&self, key: String, entry: (ApiResource, bool)) {
        let mut map = self.resources.write().unwrap_or_else(|e| e.into_inner());
        map.insert(key, entry);
    }

    fn lookup(&self, key: &str) -> Option<(ApiResource, bool)> {
        let map = self.resources.read().unwrap_or_else(|e| e.into_inner());
        map.get(key).cloned()
    }

    fn api_for(&self, obj: &DynamicObject) -> Result<Api<DynamicObject>, StoreError> {
        let key = type_key(obj)?;
        let (ar, namespaced) = self.lookup(&key).ok_or(StoreError::UnknownKind(key))?;
        let api = match (namespaced, obj.metadata.namespace.as_deref()) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            // Never widen a namespaced call to the whole cluster.
            (true, None) => return Err(StoreError::MissingField("metadata.namespace")),
            (false, _) => Api::all_with(self.client.clone(), &ar),
        };
        Ok(api)
    }
}

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool), StoreError> {
    let discovery = Discovery::new(client).filter(&[gvk.group.as_str()]).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(StoreError::Registration { kind: gvk_key(gvk), reason: "kind not served by the API server".into() })
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn register_kind(&self, gvk: &GroupVersionKind) -> Result<(), StoreError> {
        let key = gvk_key(gvk);
        if self.lookup(&key).is_some() {
            return Ok(());
        }
        let (ar, namespaced) = find_api_resource(self.client.clone(), gvk).await?;
        info!(kind = %key, plural = %ar.plural, namespaced, "kind registered");
        counter!("store_registrations_total", 1u64);
        self.write_cache(key, (ar, namespaced));
        Ok(())
    }

    async fn create(&self, obj: &DynamicObject, cancel: &CancellationToken) -> Result<(), StoreError> {
        let api = self.api_for(obj)?;
        let pp = PostParams { field_manager: Some(FIELD_MANAGER.to_string()), ..Default::default() };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
            res = api.create(&pp, obj) => {
                let created = res?;
                debug!(name = ?created.metadata.name, ns = ?created.metadata.namespace, rv = ?created.metadata.resource_version, "created");
                Ok(())
            }
        }
    }

    async fn delete(&self, obj: &DynamicObject, cancel: &CancellationToken) -> Result<(), StoreError> {
        let api = self.api_for(obj)?;
        let name = obj.metadata.name.as_deref().ok_or(StoreError::MissingField("metadata.name"))?;
        let dp = DeleteParams::default();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
            res = api.delete(name, &dp) => {
                res?;
                debug!(name = %name, ns = ?obj.metadata.namespace, "deleted");
                Ok(())
            }
        }
    }

    async fn delete_all_matching(
        &self,
        template: &DynamicObject,
        selector: &LabelSelector,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let api = self.api_for(template)?;
        let label_selector = selector.to_string();
        let lp = ListParams::default().labels(&label_selector);
        let dp = DeleteParams::default();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
            res = api.delete_collection(&dp, &lp) => {
                res?;
                debug!(selector = %label_selector, ns = ?template.metadata.namespace, "bulk delete issued");
                Ok(())
            }
        }
    }
}
