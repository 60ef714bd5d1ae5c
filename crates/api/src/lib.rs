//! istio-smi dispatcher: the entry point the reconcile loop calls once per
//! source-object change.
//!
//! Every operation records the event, then hands translated kinds to the
//! [`MeshTranslator`]. Route-family kinds are recognized but not mapped yet, so
//! their operations only log. Nothing here retries; errors go back to the caller.

#![forbid(unsafe_code)]

use istio_smi_core::object_ref;
use istio_smi_core::smi::{HttpRouteGroup, TcpRoute, TrafficSplit, TrafficTarget, UdpRoute};
use istio_smi_store::ObjectStore;
use istio_smi_translate::{IstioTranslator, MeshTranslator, TranslateError};
use kube::runtime::controller::Action;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod source;

pub use source::{SourceEvent, SourceKind, SourceObject};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error("unsupported source kind {0}")]
    Unsupported(String),
    #[error("decoding source object: {0}")]
    Decode(#[from] serde_json::Error),
}

impl DispatchError {
    /// True for the known-incomplete AuthorizationPolicy path. Callers should
    /// not requeue on this.
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Self::Translate(e) if e.is_not_implemented())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Upsert,
    Delete,
}

impl Op {
    fn as_str(&self) -> &'static str {
        match self {
            Op::Upsert => "upsert",
            Op::Delete => "delete",
        }
    }
}

fn record_event(op: Op, kind: SourceKind, target: &str) {
    info!(
        op = op.as_str(),
        kind = kind.as_str(),
        api = kind.api_version(),
        translated = kind.is_translated(),
        target = %target,
        "source event"
    );
    counter!("dispatch_events_total", 1u64, "op" => op.as_str(), "kind" => kind.as_str());
}

/// Routes SMI events to a mesh translator.
pub struct Dispatcher<T = IstioTranslator> {
    translator: T,
}

impl Default for Dispatcher<IstioTranslator> {
    fn default() -> Self {
        Self::new(IstioTranslator::new())
    }
}

impl<T: MeshTranslator> Dispatcher<T> {
    pub fn new(translator: T) -> Self {
        Self { translator }
    }

    pub fn translator(&self) -> &T {
        &self.translator
    }

    /// Route an event to the matching per-kind operation.
    pub async fn dispatch(
        &self,
        event: &SourceEvent,
        store: &dyn ObjectStore,
        cancel: &CancellationToken,
    ) -> Result<Action, DispatchError> {
        match event {
            SourceEvent::Upsert(obj) => match obj {
                SourceObject::TrafficSplit(o) => self.upsert_traffic_split(o, store, cancel).await,
                SourceObject::TrafficTarget(o) => self.upsert_traffic_target(o, store, cancel).await,
                SourceObject::HttpRouteGroup(o) => self.upsert_http_route_group(o, store, cancel).await,
                SourceObject::TcpRoute(o) => self.upsert_tcp_route(o, store, cancel).await,
                SourceObject::UdpRoute(o) => self.upsert_udp_route(o, store, cancel).await,
            },
            SourceEvent::Delete(obj) => match obj {
                SourceObject::TrafficSplit(o) => self.delete_traffic_split(o, store, cancel).await,
                SourceObject::TrafficTarget(o) => self.delete_traffic_target(o, store, cancel).await,
                SourceObject::HttpRouteGroup(o) => self.delete_http_route_group(o, store, cancel).await,
                SourceObject::TcpRoute(o) => self.delete_tcp_route(o, store, cancel).await,
                SourceObject::UdpRoute(o) => self.delete_udp_route(o, store, cancel).await,
            },
        }
    }

    pub async fn upsert_traffic_split(
        &self,
        split: &TrafficSplit,
        store: &dyn ObjectStore,
        cancel: &CancellationToken,
    ) -> Result<Action, DispatchError> {
        record_event(Op::Upsert, SourceKind::TrafficSplit, &object_ref(split));
        self.translator.create_virtual_service(store, split, cancel).await?;
        Ok(Action::await_change())
    }

    pub async fn delete_traffic_split(
        &self,
        split: &TrafficSplit,
        store: &dyn ObjectStore,
        cancel: &CancellationToken,
    ) -> Result<Action, DispatchError> {
        record_event(Op::Delete, SourceKind::TrafficSplit, &object_ref(split));
        self.translator.delete_virtual_service(store, split, cancel).await?;
        Ok(Action::await_change())
    }

    pub async fn upsert_traffic_target(
        &self,
        target: &TrafficTarget,
        store: &dyn ObjectStore,
        cancel: &CancellationToken,
    ) -> Result<Action, DispatchError> {
        record_event(Op::Upsert, SourceKind::TrafficTarget, &object_ref(target));
        self.translator.create_authorization_policy(store, target, cancel).await?;
        Ok(Action::await_change())
    }

    pub async fn delete_traffic_target(
        &self,
        target: &TrafficTarget,
        store: &dyn ObjectStore,
        cancel: &CancellationToken,
    ) -> Result<Action, DispatchError> {
        record_event(Op::Delete, SourceKind::TrafficTarget, &object_ref(target));
        self.translator.delete_authorization_policy(store, target, cancel).await?;
        Ok(Action::await_change())
    }

    // Route-family kinds: recorded, not mapped.

    pub async fn upsert_http_route_group(
        &self,
        group: &HttpRouteGroup,
        _store: &dyn ObjectStore,
        _cancel: &CancellationToken,
    ) -> Result<Action, DispatchError> {
        record_event(Op::Upsert, SourceKind::HttpRouteGroup, &object_ref(group));
        Ok(Action::await_change())
    }

    pub async fn delete_http_route_group(
        &self,
        group: &HttpRouteGroup,
        _store: &dyn ObjectStore,
        _cancel: &CancellationToken,
    ) -> Result<Action, DispatchError> {
        record_event(Op::Delete, SourceKind::HttpRouteGroup, &object_ref(group));
        Ok(Action::await_change())
    }

    pub async fn upsert_tcp_route(
        &self,
        route: &TcpRoute,
        _store: &dyn ObjectStore,
        _cancel: &CancellationToken,
    ) -> Result<Action, DispatchError> {
        record_event(Op::Upsert, SourceKind::TcpRoute, &object_ref(route));
        Ok(Action::await_change())
    }

    pub async fn delete_tcp_route(
        &self,
        route: &TcpRoute,
        _store: &dyn ObjectStore,
        _cancel: &CancellationToken,
    ) -> Result<Action, DispatchError> {
        record_event(Op::Delete, SourceKind::TcpRoute, &object_ref(route));
        Ok(Action::await_change())
    }

    pub async fn upsert_udp_route(
        &self,
        route: &UdpRoute,
        _store: &dyn ObjectStore,
        _cancel: &CancellationToken,
    ) -> Result<Action, DispatchError> {
        record_event(Op::Upsert, SourceKind::UdpRoute, &object_ref(route));
        Ok(Action::await_change())
    }

    pub async fn delete_udp_route(
        &self,
        route: &UdpRoute,
        _store: &dyn ObjectStore,
        _cancel: &CancellationToken,
    ) -> Result<Action, DispatchError> {
        record_event(Op::Delete, SourceKind::UdpRoute, &object_ref(route));
        Ok(Action::await_change())
    }
}
