//! istio-smi core types: SMI sources and the Istio objects they translate into.

#![forbid(unsafe_code)]

use kube::core::GroupVersionKind;
use kube::Resource;

pub mod istio;
pub mod smi;

pub mod prelude {
    pub use super::istio::{AuthorizationPolicy, AuthorizationPolicySpec, VirtualService, VirtualServiceSpec};
    pub use super::smi::{HttpRouteGroup, TcpRoute, TrafficSplit, TrafficTarget, UdpRoute};
    pub use super::{gvk_of, object_ref};
}

/// Group/version/kind descriptor of a statically typed resource.
pub fn gvk_of<K: Resource<DynamicType = ()>>() -> GroupVersionKind {
    GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
}

/// `namespace/name` rendering used in log fields.
pub fn object_ref<K: Resource>(obj: &K) -> String {
    let meta = obj.meta();
    match (meta.namespace.as_deref(), meta.name.as_deref()) {
        (Some(ns), Some(name)) => format!("{}/{}", ns, name),
        (None, Some(name)) => name.to_string(),
        (_, None) => "<unnamed>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;

    #[test]
    fn gvk_of_reports_crd_coordinates() {
        let vs = gvk_of::<VirtualService>();
        assert_eq!(vs.group, "networking.istio.io");
        assert_eq!(vs.version, "v1beta1");
        assert_eq!(vs.kind, "VirtualService");

        let ap = gvk_of::<AuthorizationPolicy>();
        assert_eq!(ap.group, "security.istio.io");
        assert_eq!(ap.kind, "AuthorizationPolicy");

        let rg = gvk_of::<HttpRouteGroup>();
        assert_eq!(rg.kind, "HTTPRouteGroup");
    }

    #[test]
    fn object_ref_renders_namespace_and_name() {
        let mut ts = TrafficSplit::new("web", Default::default());
        assert_eq!(object_ref(&ts), "web");
        ts.metadata.namespace = Some("demo".into());
        assert_eq!(object_ref(&ts), "demo/web");
    }
}
