//! SMI (Service Mesh Interface) source resources.
//!
//! These are consumed read-only; the controller never writes them back.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::TypedLocalObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Weighted routing of one logical service across backend variants.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "split.smi-spec.io", version = "v1alpha4", kind = "TrafficSplit", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSplitSpec {
    /// Root service that clients address.
    pub service: String,
    /// Ordered backends; weights are relative and not required to sum to 100.
    #[serde(default)]
    pub backends: Vec<TrafficSplitBackend>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<TypedLocalObjectReference>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TrafficSplitBackend {
    pub service: String,
    #[serde(default)]
    pub weight: i32,
}

/// Access allow-list: which identities may reach a destination.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "access.smi-spec.io", version = "v1alpha3", kind = "TrafficTarget", namespaced)]
pub struct TrafficTargetSpec {
    pub destination: IdentityBindingSubject,
    #[serde(default)]
    pub sources: Vec<IdentityBindingSubject>,
    #[serde(default)]
    pub rules: Vec<TrafficTargetRule>,
}

/// A workload identity. Only `kind: ServiceAccount` maps onto Istio principals.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IdentityBindingSubject {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// Reference to a route-family object, optionally narrowed to named matches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TrafficTargetRule {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<String>,
}

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "specs.smi-spec.io", version = "v1alpha4", kind = "HTTPRouteGroup", namespaced)]
pub struct HttpRouteGroupSpec {
    #[serde(default)]
    pub matches: Vec<HttpMatch>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpMatch {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_regex: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "specs.smi-spec.io", version = "v1alpha4", kind = "TCPRoute", namespaced)]
pub struct TcpRouteSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<PortMatch>,
}

#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "specs.smi-spec.io", version = "v1alpha4", kind = "UDPRoute", namespaced)]
pub struct UdpRouteSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<PortMatch>,
}

pub type HttpRouteGroup = HTTPRouteGroup;
pub type TcpRoute = TCPRoute;
pub type UdpRoute = UDPRoute;

/// Port-level match shared by TCP and UDP routes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PortMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traffic_split_parses_from_yaml() {
        let y = r#"
apiVersion: split.smi-spec.io/v1alpha4
kind: TrafficSplit
metadata:
  name: web
  namespace: demo
spec:
  service: web
  backends:
  - service: v1
    weight: 25
  - service: v2
    weight: 75
"#;
        let ts: TrafficSplit = serde_yaml::from_str(y).unwrap();
        assert_eq!(ts.metadata.name.as_deref(), Some("web"));
        assert_eq!(ts.metadata.namespace.as_deref(), Some("demo"));
        assert_eq!(ts.spec.service, "web");
        assert_eq!(ts.spec.backends.len(), 2);
        assert_eq!(ts.spec.backends[1], TrafficSplitBackend { service: "v2".into(), weight: 75 });
        assert!(ts.spec.matches.is_empty());
    }

    #[test]
    fn traffic_split_matches_are_typed_local_references() {
        let v = serde_json::json!({
            "apiVersion": "split.smi-spec.io/v1alpha4",
            "kind": "TrafficSplit",
            "metadata": { "name": "web" },
            "spec": {
                "service": "web",
                "matches": [ { "apiGroup": "specs.smi-spec.io", "kind": "HTTPRouteGroup", "name": "canary" } ]
            }
        });
        let ts: TrafficSplit = serde_json::from_value(v).unwrap();
        assert_eq!(ts.spec.matches.len(), 1);
        assert_eq!(ts.spec.matches[0].api_group.as_deref(), Some("specs.smi-spec.io"));
        assert_eq!(ts.spec.matches[0].kind, "HTTPRouteGroup");
        assert_eq!(ts.spec.matches[0].name, "canary");
    }

    #[test]
    fn traffic_target_defaults_missing_lists() {
        let y = r#"
apiVersion: access.smi-spec.io/v1alpha3
kind: TrafficTarget
metadata:
  name: api
spec:
  destination:
    kind: ServiceAccount
    name: api
    namespace: default
"#;
        let tt: TrafficTarget = serde_yaml::from_str(y).unwrap();
        assert_eq!(tt.spec.destination.name, "api");
        assert!(tt.spec.sources.is_empty());
        assert!(tt.spec.rules.is_empty());
    }

    #[test]
    fn http_route_group_uses_camel_case_fields() {
        let v = serde_json::json!({
            "apiVersion": "specs.smi-spec.io/v1alpha4",
            "kind": "HTTPRouteGroup",
            "metadata": { "name": "routes" },
            "spec": { "matches": [ { "name": "metrics", "pathRegex": "/metrics", "methods": ["GET"] } ] }
        });
        let rg: HttpRouteGroup = serde_json::from_value(v).unwrap();
        assert_eq!(rg.spec.matches[0].path_regex.as_deref(), Some("/metrics"));
        assert_eq!(rg.spec.matches[0].methods, vec!["GET".to_string()]);
    }

    #[test]
    fn route_kinds_keep_their_wire_names() {
        use kube::Resource;
        assert_eq!(HttpRouteGroup::kind(&()), "HTTPRouteGroup");
        assert_eq!(TcpRoute::kind(&()), "TCPRoute");
        assert_eq!(UdpRoute::api_version(&()), "specs.smi-spec.io/v1alpha4");

        let r = TcpRoute::new("db", TcpRouteSpec::default());
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["kind"], "TCPRoute");
        assert_eq!(v["apiVersion"], "specs.smi-spec.io/v1alpha4");
    }
}
