//! istio-smi store: the generic object store the translator writes through.
//!
//! The controller core only ever creates objects and deletes them, either by
//! name or in bulk by label selector. Everything else (optimistic concurrency,
//! retries, transport) is the adapter's business.

#![forbid(unsafe_code)]

use kube::core::{DynamicObject, GroupVersionKind};
use tokio_util::sync::CancellationToken;

mod memory;
mod selector;

pub use memory::MemoryStore;
pub use selector::LabelSelector;

/// Errors surfaced by a store adapter. The core passes these through untouched.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("kind {0} is not registered with the store")]
    UnknownKind(String),
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: String },
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: String },
    #[error("object is missing {0}")]
    MissingField(&'static str),
    #[error("operation cancelled")]
    Cancelled,
    #[error("registering kind {kind}: {reason}")]
    Registration { kind: String, reason: String },
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// Generic writer for cluster objects.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Make a kind known to the store. Must precede the first write of that kind.
    async fn register_kind(&self, gvk: &GroupVersionKind) -> Result<(), StoreError>;

    /// Create a new object. Existing objects are not overwritten.
    async fn create(&self, obj: &DynamicObject, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Delete a single object addressed by its kind, namespace and name.
    async fn delete(&self, obj: &DynamicObject, cancel: &CancellationToken) -> Result<(), StoreError>;

    /// Delete every object of the template's kind matching `selector`.
    ///
    /// Only the template's type and namespace are consulted; its name is ignored.
    async fn delete_all_matching(
        &self,
        template: &DynamicObject,
        selector: &LabelSelector,
        cancel: &CancellationToken,
    ) -> Result<(), StoreError>;
}

/// `group/version/Kind` (or `version/Kind` for the core group).
pub fn gvk_key(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}/{}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }
}

/// Same key as [`gvk_key`], derived from an object's `apiVersion`/`kind`.
pub fn type_key(obj: &DynamicObject) -> Result<String, StoreError> {
    let types = obj.types.as_ref().ok_or(StoreError::MissingField("apiVersion/kind"))?;
    if types.api_version.is_empty() || types.kind.is_empty() {
        return Err(StoreError::MissingField("apiVersion/kind"));
    }
    Ok(format!("{}/{}", types.api_version, types.kind))
}

pub(crate) fn object_name(obj: &DynamicObject) -> Result<&str, StoreError> {
    obj.metadata.name.as_deref().ok_or(StoreError::MissingField("metadata.name"))
}
