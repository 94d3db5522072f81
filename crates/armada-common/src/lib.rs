//! Common types for Armada: the FederatedCluster CRD, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace holding federation system resources (member credentials)
pub const FED_SYSTEM_NAMESPACE: &str = "armada-system";

/// Label key marking objects that the federation control plane manages in member clusters
pub const MANAGED_LABEL_KEY: &str = "armada.dev/managed";

/// Label value for managed objects
pub const MANAGED_LABEL_VALUE: &str = "true";

/// Label selector for managed objects (for Kubernetes API queries)
pub const MANAGED_LABEL_SELECTOR: &str = "armada.dev/managed=true";

/// Returns true if the object carries the federation management label
///
/// Objects without the label exist in the member cluster but are not ours,
/// so readers treat them as absent.
pub fn has_managed_label<K: kube::Resource>(obj: &K) -> bool {
    obj.meta()
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_LABEL_KEY))
        .map(|value| value == MANAGED_LABEL_VALUE)
        .unwrap_or(false)
}
