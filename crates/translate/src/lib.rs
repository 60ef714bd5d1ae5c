//! istio-smi translate: turns SMI sources into Istio objects and writes them
//! through an [`ObjectStore`].
//!
//! Each operation issues at most one store call. Generated objects are found
//! again only through the ownership labels, so deletes are label-selector bulk
//! deletes rather than name lookups.

#![forbid(unsafe_code)]

use std::sync::Arc;

use istio_smi_core::gvk_of;
use istio_smi_core::istio::{AuthorizationPolicy, VirtualService};
use istio_smi_core::smi::{TrafficSplit, TrafficTarget};
use istio_smi_store::{ObjectStore, StoreError};
use kube::core::DynamicObject;
use kube::ResourceExt;
use metrics::counter;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

mod labels;
mod latch;
mod mapping;

use latch::RegistrationLatch;

pub use labels::{ownership_labels, ownership_selector, CREATED_BY_LABEL, MANAGED_BY_LABEL, OWNER};
pub use mapping::{
    build_authorization_policy, build_virtual_service, name_only, service_account_principal, SERVICE_ACCOUNT_KIND,
    TRUST_DOMAIN,
};

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    /// The operation is known to be incomplete. Retrying will not help.
    #[error("{0}: not implemented")]
    NotImplemented(&'static str),
    #[error("registering {kind} with the store: {source}")]
    Registration {
        kind: String,
        #[source]
        source: Arc<StoreError>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("encoding {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl TranslateError {
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::NotImplemented(_))
    }
}

/// Mesh-specific realization of SMI objects.
#[async_trait::async_trait]
pub trait MeshTranslator: Send + Sync {
    async fn create_virtual_service(
        &self,
        store: &dyn ObjectStore,
        split: &TrafficSplit,
        cancel: &CancellationToken,
    ) -> Result<(), TranslateError>;

    async fn delete_virtual_service(
        &self,
        store: &dyn ObjectStore,
        split: &TrafficSplit,
        cancel: &CancellationToken,
    ) -> Result<(), TranslateError>;

    async fn create_authorization_policy(
        &self,
        store: &dyn ObjectStore,
        target: &TrafficTarget,
        cancel: &CancellationToken,
    ) -> Result<(), TranslateError>;

    async fn delete_authorization_policy(
        &self,
        store: &dyn ObjectStore,
        target: &TrafficTarget,
        cancel: &CancellationToken,
    ) -> Result<(), TranslateError>;
}

/// Istio implementation of [`MeshTranslator`].
///
/// Holds one registration latch per target kind. The first call touching a
/// kind registers it with the store; concurrent first callers wait on that
/// single attempt and share its outcome. A failed attempt leaves the latch
/// open for the next call.
#[derive(Default)]
pub struct IstioTranslator {
    virtual_services: RegistrationLatch,
    authorization_policies: RegistrationLatch,
}

impl IstioTranslator {
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_dynamic<K: Serialize>(obj: &K, kind: &'static str) -> Result<DynamicObject, TranslateError> {
    serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|source| TranslateError::Encode { kind, source })
}

fn record<T>(res: Result<T, StoreError>, metric: &'static str, kind: &'static str) -> Result<T, TranslateError> {
    match res {
        Ok(v) => {
            counter!(metric, 1u64, "kind" => kind);
            Ok(v)
        }
        Err(e) => {
            counter!("translate_errors_total", 1u64, "kind" => kind);
            Err(e.into())
        }
    }
}

const VIRTUAL_SERVICE: &str = "VirtualService";
const AUTHORIZATION_POLICY: &str = "AuthorizationPolicy";

#[async_trait::async_trait]
impl MeshTranslator for IstioTranslator {
    async fn create_virtual_service(
        &self,
        store: &dyn ObjectStore,
        split: &TrafficSplit,
        cancel: &CancellationToken,
    ) -> Result<(), TranslateError> {
        self.virtual_services.ensure(store, &gvk_of::<VirtualService>()).await?;
        let vs = build_virtual_service(split);
        let obj = to_dynamic(&vs, VIRTUAL_SERVICE)?;
        debug!(name = %vs.name_any(), ns = ?vs.namespace(), destinations = split.spec.backends.len(), "creating VirtualService");
        record(store.create(&obj, cancel).await, "translate_created_total", VIRTUAL_SERVICE)
    }

    async fn delete_virtual_service(
        &self,
        store: &dyn ObjectStore,
        split: &TrafficSplit,
        cancel: &CancellationToken,
    ) -> Result<(), TranslateError> {
        self.virtual_services.ensure(store, &gvk_of::<VirtualService>()).await?;
        let template = name_only::<VirtualService>(&split.name_any(), split.namespace());
        // Selects on ownership labels alone: every generated VirtualService in
        // the namespace goes, not only the one built from this split.
        let selector = ownership_selector();
        debug!(name = %split.name_any(), ns = ?split.namespace(), selector = %selector, "deleting VirtualServices");
        record(store.delete_all_matching(&template, &selector, cancel).await, "translate_deleted_total", VIRTUAL_SERVICE)
    }

    async fn create_authorization_policy(
        &self,
        _store: &dyn ObjectStore,
        target: &TrafficTarget,
        _cancel: &CancellationToken,
    ) -> Result<(), TranslateError> {
        // TODO: persist once a deny-by-default policy is generated per namespace;
        // ALLOW rules on their own do not restrict anything.
        let ap = build_authorization_policy(target);
        match to_dynamic(&ap, AUTHORIZATION_POLICY) {
            Ok(_) => debug!(
                name = %ap.name_any(),
                ns = ?ap.namespace(),
                principals = ap.spec.rules.first().and_then(|r| r.from.first()).map_or(0, |f| f.source.principals.len()),
                "AuthorizationPolicy built; not persisted"
            ),
            Err(e) => warn!(name = %ap.name_any(), error = %e, "AuthorizationPolicy failed to encode"),
        }
        Err(TranslateError::NotImplemented("AuthorizationPolicy create"))
    }

    async fn delete_authorization_policy(
        &self,
        store: &dyn ObjectStore,
        target: &TrafficTarget,
        cancel: &CancellationToken,
    ) -> Result<(), TranslateError> {
        self.authorization_policies.ensure(store, &gvk_of::<AuthorizationPolicy>()).await?;
        let template = name_only::<AuthorizationPolicy>(&target.name_any(), target.namespace());
        let selector = ownership_selector();
        debug!(name = %target.name_any(), ns = ?target.namespace(), selector = %selector, "deleting AuthorizationPolicies");
        record(
            store.delete_all_matching(&template, &selector, cancel).await,
            "translate_deleted_total",
            AUTHORIZATION_POLICY,
        )
    }
}
