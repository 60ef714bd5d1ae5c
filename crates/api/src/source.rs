use istio_smi_core::object_ref;
use istio_smi_core::smi::{HttpRouteGroup, TcpRoute, TrafficSplit, TrafficTarget, UdpRoute};
use kube::core::ObjectMeta;
use serde_json::Value as Json;

use crate::DispatchError;

/// SMI kinds the dispatcher recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    TrafficSplit,
    TrafficTarget,
    HttpRouteGroup,
    TcpRoute,
    UdpRoute,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrafficSplit => "TrafficSplit",
            Self::TrafficTarget => "TrafficTarget",
            Self::HttpRouteGroup => "HTTPRouteGroup",
            Self::TcpRoute => "TCPRoute",
            Self::UdpRoute => "UDPRoute",
        }
    }

    pub fn api_version(&self) -> &'static str {
        match self {
            Self::TrafficSplit => "split.smi-spec.io/v1alpha4",
            Self::TrafficTarget => "access.smi-spec.io/v1alpha3",
            Self::HttpRouteGroup | Self::TcpRoute | Self::UdpRoute => "specs.smi-spec.io/v1alpha4",
        }
    }

    /// Whether events of this kind produce mesh objects. Route kinds are
    /// accepted but currently have no Istio mapping.
    pub fn is_translated(&self) -> bool {
        matches!(self, Self::TrafficSplit | Self::TrafficTarget)
    }
}

/// A typed SMI object.
#[derive(Debug, Clone)]
pub enum SourceObject {
    TrafficSplit(TrafficSplit),
    TrafficTarget(TrafficTarget),
    HttpRouteGroup(HttpRouteGroup),
    TcpRoute(TcpRoute),
    UdpRoute(UdpRoute),
}

impl SourceObject {
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::TrafficSplit(_) => SourceKind::TrafficSplit,
            Self::TrafficTarget(_) => SourceKind::TrafficTarget,
            Self::HttpRouteGroup(_) => SourceKind::HttpRouteGroup,
            Self::TcpRoute(_) => SourceKind::TcpRoute,
            Self::UdpRoute(_) => SourceKind::UdpRoute,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::TrafficSplit(o) => &o.metadata,
            Self::TrafficTarget(o) => &o.metadata,
            Self::HttpRouteGroup(o) => &o.metadata,
            Self::TcpRoute(o) => &o.metadata,
            Self::UdpRoute(o) => &o.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::TrafficSplit(o) => &mut o.metadata,
            Self::TrafficTarget(o) => &mut o.metadata,
            Self::HttpRouteGroup(o) => &mut o.metadata,
            Self::TcpRoute(o) => &mut o.metadata,
            Self::UdpRoute(o) => &mut o.metadata,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.meta().namespace.as_deref()
    }

    /// `namespace/name` for logs.
    pub fn object_ref(&self) -> String {
        match self {
            Self::TrafficSplit(o) => object_ref(o),
            Self::TrafficTarget(o) => object_ref(o),
            Self::HttpRouteGroup(o) => object_ref(o),
            Self::TcpRoute(o) => object_ref(o),
            Self::UdpRoute(o) => object_ref(o),
        }
    }

    /// Decode a raw manifest by its `apiVersion` and `kind`.
    pub fn from_json(value: Json) -> Result<Self, DispatchError> {
        let field = |key: &str| value.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let (api_version, kind) = (field("apiVersion"), field("kind"));
        let obj = match (api_version.as_str(), kind.as_str()) {
            ("split.smi-spec.io/v1alpha4", "TrafficSplit") => Self::TrafficSplit(serde_json::from_value(value)?),
            ("access.smi-spec.io/v1alpha3", "TrafficTarget") => Self::TrafficTarget(serde_json::from_value(value)?),
            ("specs.smi-spec.io/v1alpha4", "HTTPRouteGroup") => Self::HttpRouteGroup(serde_json::from_value(value)?),
            ("specs.smi-spec.io/v1alpha4", "TCPRoute") => Self::TcpRoute(serde_json::from_value(value)?),
            ("specs.smi-spec.io/v1alpha4", "UDPRoute") => Self::UdpRoute(serde_json::from_value(value)?),
            (av, k) => return Err(DispatchError::Unsupported(format!("{}/{}", av, k))),
        };
        Ok(obj)
    }
}

/// A change notification for one source object.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Upsert(SourceObject),
    Delete(SourceObject),
}

impl SourceEvent {
    pub fn object(&self) -> &SourceObject {
        match self {
            Self::Upsert(o) | Self::Delete(o) => o,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_by_api_version_and_kind() {
        let v = serde_json::json!({
            "apiVersion": "specs.smi-spec.io/v1alpha4",
            "kind": "TCPRoute",
            "metadata": { "name": "db", "namespace": "data" },
            "spec": { "matches": { "ports": [5432] } }
        });
        let obj = SourceObject::from_json(v).unwrap();
        assert_eq!(obj.kind(), SourceKind::TcpRoute);
        assert_eq!(obj.object_ref(), "data/db");
        assert_eq!(obj.namespace(), Some("data"));
        match obj {
            SourceObject::TcpRoute(r) => assert_eq!(r.spec.matches.unwrap().ports, vec![5432]),
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn rejects_unknown_kinds_and_versions() {
        let wrong_version = serde_json::json!({
            "apiVersion": "split.smi-spec.io/v1alpha1",
            "kind": "TrafficSplit",
            "metadata": { "name": "x" },
            "spec": { "service": "x" }
        });
        let err = SourceObject::from_json(wrong_version).unwrap_err();
        assert_eq!(err.to_string(), "unsupported source kind split.smi-spec.io/v1alpha1/TrafficSplit");

        let cm = serde_json::json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "x" } });
        assert!(matches!(SourceObject::from_json(cm), Err(DispatchError::Unsupported(_))));
    }

    #[test]
    fn kind_metadata() {
        assert_eq!(SourceKind::HttpRouteGroup.as_str(), "HTTPRouteGroup");
        assert_eq!(SourceKind::TrafficTarget.api_version(), "access.smi-spec.io/v1alpha3");
        assert!(SourceKind::TrafficSplit.is_translated());
        assert!(!SourceKind::UdpRoute.is_translated());
    }
}
