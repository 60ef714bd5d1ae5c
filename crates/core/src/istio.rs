//! Istio target resources produced by the translator.
//!
//! Only the subset of the Istio API the translation emits is modelled here.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Istio routing rules for a host.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "networking.istio.io", version = "v1beta1", kind = "VirtualService", namespaced)]
pub struct VirtualServiceSpec {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpRoute>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HttpRoute {
    #[serde(default)]
    pub route: Vec<HttpRouteDestination>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HttpRouteDestination {
    pub destination: Destination,
    #[serde(default)]
    pub weight: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Destination {
    pub host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subset: String,
}

/// Istio L7 access control.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(group = "security.istio.io", version = "v1beta1", kind = "AuthorizationPolicy", namespaced)]
pub struct AuthorizationPolicySpec {
    #[serde(default)]
    pub action: PolicyAction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyAction {
    #[default]
    Allow,
    Deny,
    Audit,
    Custom,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<RuleFrom>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<RuleTo>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RuleFrom {
    pub source: Source,
}

/// Caller identity. Principals use the `<trust-domain>/ns/<ns>/sa/<name>` form.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Source {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RuleTo {
    pub operation: Operation,
}

/// Request properties to match. All-empty matches any operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Operation {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

impl Operation {
    pub fn is_unrestricted(&self) -> bool {
        self.hosts.is_empty() && self.ports.is_empty() && self.methods.is_empty() && self.paths.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_operation_serializes_as_empty_object() {
        let spec = AuthorizationPolicySpec {
            action: PolicyAction::Allow,
            rules: vec![Rule {
                from: vec![RuleFrom { source: Source { principals: vec!["cluster.local/ns/a/sa/b".into()] } }],
                to: vec![RuleTo { operation: Operation::default() }],
            }],
        };
        let v = serde_json::to_value(&spec).unwrap();
        assert_eq!(v["action"], "ALLOW");
        assert_eq!(v["rules"][0]["to"][0]["operation"], serde_json::json!({}));
        assert_eq!(v["rules"][0]["from"][0]["source"]["principals"][0], "cluster.local/ns/a/sa/b");
    }

    #[test]
    fn virtual_service_serializes_istio_shape() {
        let mut vs = VirtualService::new("web", VirtualServiceSpec {
            hosts: vec!["web".into()],
            http: vec![HttpRoute {
                route: vec![HttpRouteDestination {
                    destination: Destination { host: "web".into(), subset: "v1".into() },
                    weight: 100,
                }],
            }],
        });
        vs.metadata.namespace = Some("demo".into());
        let v = serde_json::to_value(&vs).unwrap();
        assert_eq!(v["apiVersion"], "networking.istio.io/v1beta1");
        assert_eq!(v["kind"], "VirtualService");
        assert_eq!(v["spec"]["http"][0]["route"][0]["destination"]["subset"], "v1");
        assert_eq!(v["spec"]["http"][0]["route"][0]["weight"], 100);
    }
}
