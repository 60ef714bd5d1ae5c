use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use kube::core::{DynamicObject, GroupVersionKind};
use rustc_hash::FxHashSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{gvk_key, object_name, type_key, LabelSelector, ObjectStore, StoreError};

/// (type key, namespace, name)
type ObjectKey = (String, String, String);

#[derive(Default)]
struct Inner {
    kinds: FxHashSet<String>,
    objects: BTreeMap<ObjectKey, DynamicObject>,
    selectors: Vec<LabelSelector>,
}

/// In-process store holding objects in a map.
///
/// Used by tests and by the offline `render` command. Mirrors the API server's
/// observable behaviour for the calls the controller makes: duplicate creates
/// fail, deleting a missing object fails, unregistered kinds are rejected.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    registrations: AtomicUsize,
    register_delay: Option<Duration>,
    register_failure: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep inside every `register_kind` call, widening the window for racing callers.
    pub fn with_registration_delay(mut self, delay: Duration) -> Self {
        self.register_delay = Some(delay);
        self
    }

    /// Make every `register_kind` call fail with `reason`.
    pub fn with_failing_registration(mut self, reason: impl Into<String>) -> Self {
        self.register_failure = Some(reason.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of `register_kind` calls received, successful or not.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub fn is_registered(&self, gvk: &GroupVersionKind) -> bool {
        self.lock().kinds.contains(&gvk_key(gvk))
    }

    /// All stored objects ordered by kind, namespace, name.
    pub fn objects(&self) -> Vec<DynamicObject> {
        self.lock().objects.values().cloned().collect()
    }

    pub fn get(&self, gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        let key = (gvk_key(gvk), namespace.unwrap_or_default().to_string(), name.to_string());
        self.lock().objects.get(&key).cloned()
    }

    /// Selectors passed to `delete_all_matching`, in call order.
    pub fn selectors(&self) -> Vec<LabelSelector> {
        self.lock().selectors.clone()
    }

    fn key_for(&self, obj: &DynamicObject) -> Result<ObjectKey, StoreError> {
        let kind = type_key(obj)?;
        let name = object_name(obj)?.to_string();
        let ns = obj.metadata.namespace.clone().unwrap_or_default();
        Ok((kind, ns, name))
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), StoreError> {
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    Ok(())
}

fn render_key(key: &ObjectKey) -> String {
    if key.1.is_empty() {
        key.2.clone()
    } else {
        format!("{}/{}", key.1, key.2)
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn register_kind(&self, gvk: &GroupVersionKind) -> Result<(), StoreError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.register_delay {
            tokio::time::sleep(delay).await;
        }
        let kind = gvk_key(gvk);
        if let Some(reason) = &self.register_failure {
            return Err(StoreError::Registration { kind, reason: reason.clone() });
        }
        debug!(kind = %kind, "kind registered");
        self.lock().kinds.insert(kind);
        Ok(())
    }

    async fn create(&self, obj: &DynamicObject, cancel: &CancellationToken) -> Result<(), StoreError> {
        ensure_live(cancel)?;
        let key = self.key_for(obj)?;
        let mut inner = self.lock();
        if !inner.kinds.contains(&key.0) {
            return Err(StoreError::UnknownKind(key.0));
        }
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { key: render_key(&key), kind: key.0 });
        }
        debug!(kind = %key.0, object = %render_key(&key), "created");
        inner.objects.insert(key, obj.clone());
        Ok(())
    }

    async fn delete(&self, obj: &DynamicObject, cancel: &CancellationToken) -> Result<(), StoreError> {
        ensure_live(cancel)?;
        let key = self.key_for(obj)?;
        let mut inner = self.lock();
        if !inner.kinds.contains(&key.0) {
            return Err(StoreError::UnknownKind(key.0));
        }
        match inner.objects.remove(&key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound { key: render_key(&key), kind: key.0 }),
        }
    }

    async fn delete_all_matching(
        &self,
        template: &DynamicObject,
        selector: &LabelSelector,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        ensure_live(cancel)?;
        let kind = type_key(template)?;
        let ns = template.metadata.namespace.as_deref();
        let mut inner = self.lock();
        if !inner.kinds.contains(&kind) {
            return Err(StoreError::UnknownKind(kind));
        }
        inner.selectors.push(selector.clone());
        let before = inner.objects.len();
        inner.objects.retain(|(k, obj_ns, _), obj| {
            let in_scope = *k == kind && ns.map_or(true, |n| n == obj_ns.as_str());
            !(in_scope && selector.matches(obj.metadata.labels.as_ref()))
        });
        debug!(kind = %kind, ns = ?ns, selector = %selector, removed = before - inner.objects.len(), "bulk delete");
        Ok(())
    }
}
