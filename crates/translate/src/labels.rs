use std::collections::BTreeMap;

use istio_smi_store::LabelSelector;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const CREATED_BY_LABEL: &str = "app.kubernetes.io/created-by";
/// Value stamped under both ownership keys.
pub const OWNER: &str = "istio-smi-controller-sdk";

/// Labels stamped on every generated object.
pub fn ownership_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), OWNER.to_string()),
        (CREATED_BY_LABEL.to_string(), OWNER.to_string()),
    ])
}

/// Selector used for cleanup. Matches every generated object of a kind in the
/// namespace, not just the one derived from a particular source object.
pub fn ownership_selector() -> LabelSelector {
    LabelSelector::from(ownership_labels())
}
