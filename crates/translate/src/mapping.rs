//! Pure SMI -> Istio mapping. No store access happens here.

use istio_smi_core::istio::{
    AuthorizationPolicy, AuthorizationPolicySpec, Destination, HttpRoute, HttpRouteDestination, Operation,
    PolicyAction, Rule, RuleFrom, RuleTo, Source, VirtualService, VirtualServiceSpec,
};
use istio_smi_core::smi::{TrafficSplit, TrafficTarget};
use kube::core::{ApiResource, DynamicObject};
use kube::{Resource, ResourceExt};

use crate::labels::ownership_labels;

pub const SERVICE_ACCOUNT_KIND: &str = "ServiceAccount";
pub const TRUST_DOMAIN: &str = "cluster.local";

/// Istio principal for a Kubernetes service account.
pub fn service_account_principal(namespace: &str, name: &str) -> String {
    format!("{}/ns/{}/sa/{}", TRUST_DOMAIN, namespace, name)
}

/// One VirtualService per split: the split's service is the only host and each
/// backend becomes a subset destination, order and weight untouched.
pub fn build_virtual_service(split: &TrafficSplit) -> VirtualService {
    let service = &split.spec.service;
    let route = split
        .spec
        .backends
        .iter()
        .map(|be| HttpRouteDestination {
            destination: Destination { host: service.clone(), subset: be.service.clone() },
            weight: be.weight,
        })
        .collect();

    let mut vs = VirtualService::new(
        &split.name_any(),
        VirtualServiceSpec { hosts: vec![service.clone()], http: vec![HttpRoute { route }] },
    );
    vs.metadata.namespace = split.namespace();
    // TODO: carry the split's own labels over once istio.io/* keys are filtered out
    vs.metadata.labels = Some(ownership_labels());
    vs
}

/// One ALLOW policy per target. Only ServiceAccount sources become principals;
/// the rule places no restriction on the operation.
pub fn build_authorization_policy(target: &TrafficTarget) -> AuthorizationPolicy {
    let principals: Vec<String> = target
        .spec
        .sources
        .iter()
        .filter(|s| s.kind == SERVICE_ACCOUNT_KIND)
        .map(|s| service_account_principal(&s.namespace, &s.name))
        .collect();

    let mut ap = AuthorizationPolicy::new(
        &target.name_any(),
        AuthorizationPolicySpec {
            action: PolicyAction::Allow,
            rules: vec![Rule {
                from: vec![RuleFrom { source: Source { principals } }],
                to: vec![RuleTo { operation: Operation::default() }],
            }],
        },
    );
    ap.metadata.namespace = target.namespace();
    ap.metadata.labels = Some(ownership_labels());
    ap
}

/// Bare object of kind `K` carrying only name and namespace.
pub fn name_only<K: Resource<DynamicType = ()>>(name: &str, namespace: Option<String>) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &ApiResource::erase::<K>(&()));
    obj.metadata.namespace = namespace;
    obj
}

#[cfg(test)]
mod tests {
    use super::*;
    use istio_smi_core::smi::{IdentityBindingSubject, TrafficSplitBackend, TrafficSplitSpec, TrafficTargetSpec};

    fn subject(kind: &str, name: &str, ns: &str) -> IdentityBindingSubject {
        IdentityBindingSubject { kind: kind.into(), name: name.into(), namespace: ns.into(), port: None }
    }

    #[test]
    fn principal_format_is_literal() {
        assert_eq!(service_account_principal("prod", "frontend"), "cluster.local/ns/prod/sa/frontend");
    }

    #[test]
    fn split_without_backends_yields_single_empty_route_block() {
        let split = TrafficSplit::new("web", TrafficSplitSpec { service: "web".into(), ..Default::default() });
        let vs = build_virtual_service(&split);
        assert_eq!(vs.spec.hosts, vec!["web".to_string()]);
        assert_eq!(vs.spec.http.len(), 1);
        assert!(vs.spec.http[0].route.is_empty());
        assert_eq!(vs.metadata.namespace, None);
    }

    #[test]
    fn weights_are_not_renormalized() {
        let split = TrafficSplit::new(
            "odd",
            TrafficSplitSpec {
                service: "svc".into(),
                backends: vec![
                    TrafficSplitBackend { service: "a".into(), weight: 1 },
                    TrafficSplitBackend { service: "b".into(), weight: 1 },
                    TrafficSplitBackend { service: "c".into(), weight: 500 },
                ],
                ..Default::default()
            },
        );
        let vs = build_virtual_service(&split);
        let weights: Vec<i32> = vs.spec.http[0].route.iter().map(|d| d.weight).collect();
        assert_eq!(weights, vec![1, 1, 500]);
    }

    #[test]
    fn only_service_accounts_become_principals() {
        let mut target = TrafficTarget::new(
            "api",
            TrafficTargetSpec {
                destination: subject("ServiceAccount", "api", "prod"),
                sources: vec![
                    subject("ServiceAccount", "frontend", "prod"),
                    subject("Group", "admins", "prod"),
                    subject("serviceaccount", "lowercase", "prod"),
                    subject("ServiceAccount", "batch", "jobs"),
                ],
                rules: vec![],
            },
        );
        target.metadata.namespace = Some("prod".into());
        let ap = build_authorization_policy(&target);

        assert_eq!(ap.spec.action, PolicyAction::Allow);
        assert_eq!(ap.spec.rules.len(), 1);
        let rule = &ap.spec.rules[0];
        assert_eq!(rule.from.len(), 1);
        assert_eq!(
            rule.from[0].source.principals,
            vec!["cluster.local/ns/prod/sa/frontend".to_string(), "cluster.local/ns/jobs/sa/batch".to_string()]
        );
        assert_eq!(rule.to.len(), 1);
        assert!(rule.to[0].operation.is_unrestricted());
        assert_eq!(ap.metadata.namespace.as_deref(), Some("prod"));
        assert_eq!(ap.metadata.labels, Some(ownership_labels()));
    }

    #[test]
    fn name_only_carries_type_name_and_namespace() {
        let obj = name_only::<VirtualService>("web", Some("demo".into()));
        let types = obj.types.unwrap();
        assert_eq!(types.api_version, "networking.istio.io/v1beta1");
        assert_eq!(types.kind, "VirtualService");
        assert_eq!(obj.metadata.name.as_deref(), Some("web"));
        assert_eq!(obj.metadata.namespace.as_deref(), Some("demo"));
        assert!(obj.metadata.labels.is_none());
    }
}
