//! FederatedCluster Custom Resource Definition
//!
//! A FederatedCluster registers one member cluster with the federation control
//! plane. The spec says how to reach the member; the status reports whether it
//! has joined and whether it is currently ready.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ClusterCondition, ClusterConditionType};

/// Specification for a FederatedCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.armada.dev",
    version = "v1alpha1",
    kind = "FederatedCluster",
    plural = "federatedclusters",
    shortname = "fcluster",
    status = "FederatedClusterStatus",
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".spec.apiEndpoint"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FederatedClusterSpec {
    /// URL of the member cluster's API server
    pub api_endpoint: String,

    /// Skip TLS verification of the member API server
    #[serde(default)]
    pub insecure: bool,

    /// Authenticate with the service account token stored in the credential secret
    /// instead of the client certificate pair
    #[serde(default)]
    pub use_service_account_token: bool,

    /// Secret in the federation system namespace holding the member credentials
    pub secret_ref: LocalSecretReference,
}

/// Reference to a Secret in a namespace known from context
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct LocalSecretReference {
    /// Name of the secret
    pub name: String,
}

/// Status for a FederatedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FederatedClusterStatus {
    /// Conditions representing the member state, in the order they were reported
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClusterCondition>,
}

impl FederatedClusterStatus {
    /// Get the first condition of the given type
    pub fn condition(&self, type_: ClusterConditionType) -> Option<&ClusterCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Returns true if any condition of the given type has status True
    pub fn is_condition_true(&self, type_: ClusterConditionType) -> bool {
        self.conditions
            .iter()
            .any(|c| c.type_ == type_ && c.is_true())
    }

    /// Replace the condition of the same type, or append it
    pub fn set_condition(&mut self, condition: ClusterCondition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }
}

/// Returns true if the status reports the member as ready
///
/// A missing status means the member has never been probed and is not ready.
pub fn is_cluster_ready(status: Option<&FederatedClusterStatus>) -> bool {
    status
        .map(|s| s.is_condition_true(ClusterConditionType::Ready))
        .unwrap_or(false)
}

/// Returns true if the status reports the member as joined
pub fn is_cluster_joined(status: Option<&FederatedClusterStatus>) -> bool {
    status
        .map(|s| s.is_condition_true(ClusterConditionType::Joined))
        .unwrap_or(false)
}

impl FederatedCluster {
    /// Returns true if the member is ready
    pub fn is_ready(&self) -> bool {
        is_cluster_ready(self.status.as_ref())
    }

    /// Returns true if the member has joined, independent of readiness
    pub fn is_joined(&self) -> bool {
        is_cluster_joined(self.status.as_ref())
    }

    /// Returns true if the object carries a deletion timestamp
    pub fn is_marked_for_deletion(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Returns true if the spec, labels or annotations differ from `other`
    ///
    /// These are the fields connection config and routing are derived from.
    pub fn connection_changed(&self, other: &FederatedCluster) -> bool {
        self.spec != other.spec
            || self.labels() != other.labels()
            || self.annotations() != other.annotations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ConditionStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::CustomResourceExt;

    fn spec() -> FederatedClusterSpec {
        FederatedClusterSpec {
            api_endpoint: "https://10.0.0.1:6443".to_string(),
            insecure: false,
            use_service_account_token: true,
            secret_ref: LocalSecretReference {
                name: "member-1-creds".to_string(),
            },
        }
    }

    fn cluster_with(conditions: Vec<(ClusterConditionType, ConditionStatus)>) -> FederatedCluster {
        let mut cluster = FederatedCluster::new("member-1", spec());
        let mut status = FederatedClusterStatus::default();
        for (type_, s) in conditions {
            status.conditions.push(ClusterCondition::new(type_, s));
        }
        cluster.status = Some(status);
        cluster
    }

    // =========================================================================
    // Readiness and Joined Classification
    // =========================================================================

    #[test]
    fn test_missing_status_is_neither_ready_nor_joined() {
        let cluster = FederatedCluster::new("member-1", spec());
        assert!(!cluster.is_ready());
        assert!(!cluster.is_joined());
    }

    #[test]
    fn test_joined_but_not_ready() {
        let cluster = cluster_with(vec![
            (ClusterConditionType::Joined, ConditionStatus::True),
            (ClusterConditionType::Ready, ConditionStatus::False),
        ]);
        assert!(cluster.is_joined());
        assert!(!cluster.is_ready());
    }

    #[test]
    fn test_ready_requires_true_status() {
        let cluster = cluster_with(vec![(ClusterConditionType::Ready, ConditionStatus::Unknown)]);
        assert!(!cluster.is_ready());

        let cluster = cluster_with(vec![(ClusterConditionType::Ready, ConditionStatus::True)]);
        assert!(cluster.is_ready());
    }

    #[test]
    fn test_set_condition_replaces_same_type() {
        let mut status = FederatedClusterStatus::default();
        status.set_condition(ClusterCondition::new(
            ClusterConditionType::Ready,
            ConditionStatus::False,
        ));
        status.set_condition(ClusterCondition::new(
            ClusterConditionType::Joined,
            ConditionStatus::True,
        ));
        status.set_condition(ClusterCondition::new(
            ClusterConditionType::Ready,
            ConditionStatus::True,
        ));

        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.conditions[0].type_, ClusterConditionType::Ready);
        assert!(status.is_condition_true(ClusterConditionType::Ready));
        assert!(status.condition(ClusterConditionType::Offline).is_none());
    }

    #[test]
    fn test_deletion_marker() {
        let mut cluster = FederatedCluster::new("member-1", spec());
        assert!(!cluster.is_marked_for_deletion());
        cluster.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(cluster.is_marked_for_deletion());
    }

    // =========================================================================
    // Connection Change Detection
    // =========================================================================

    #[test]
    fn test_connection_changed_on_spec() {
        let old = FederatedCluster::new("member-1", spec());
        let mut new = old.clone();
        assert!(!old.connection_changed(&new));

        new.spec.api_endpoint = "https://10.0.0.2:6443".to_string();
        assert!(old.connection_changed(&new));
    }

    #[test]
    fn test_connection_changed_on_labels_and_annotations() {
        let old = FederatedCluster::new("member-1", spec());

        let mut relabeled = old.clone();
        relabeled
            .labels_mut()
            .insert("region".to_string(), "eu-west".to_string());
        assert!(old.connection_changed(&relabeled));

        let mut annotated = old.clone();
        annotated
            .annotations_mut()
            .insert("armada.dev/proxy".to_string(), "socks5://proxy".to_string());
        assert!(old.connection_changed(&annotated));
    }

    #[test]
    fn test_status_change_is_not_connection_change() {
        let old = cluster_with(vec![(ClusterConditionType::Ready, ConditionStatus::True)]);
        let new = cluster_with(vec![(ClusterConditionType::Ready, ConditionStatus::False)]);
        assert!(!old.connection_changed(&new));
    }

    #[test]
    fn test_crd_is_cluster_scoped() {
        let crd = FederatedCluster::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "core.armada.dev");
        assert_eq!(crd.spec.names.kind, "FederatedCluster");
    }

    #[test]
    fn test_spec_roundtrips_camel_case() {
        let json = serde_json::to_value(spec()).unwrap();
        assert_eq!(json["apiEndpoint"], "https://10.0.0.1:6443");
        assert_eq!(json["useServiceAccountToken"], true);
        assert_eq!(json["secretRef"]["name"], "member-1-creds");
    }

    #[test]
    fn test_cluster_with_extra_condition_types_deserializes() {
        let cluster: FederatedCluster = serde_json::from_value(serde_json::json!({
            "apiVersion": "core.armada.dev/v1alpha1",
            "kind": "FederatedCluster",
            "metadata": { "name": "member-1" },
            "spec": {
                "apiEndpoint": "https://10.0.0.1:6443",
                "secretRef": { "name": "member-1-creds" }
            },
            "status": {
                "conditions": [
                    { "type": "Ready", "status": "True" },
                    { "type": "ClusterResourcesCollected", "status": "True" },
                    { "type": "Joined", "status": "True" }
                ]
            }
        }))
        .unwrap();

        assert!(cluster.is_ready());
        assert!(cluster.is_joined());
        let status = cluster.status.as_ref().unwrap();
        assert_eq!(status.conditions[1].type_, ClusterConditionType::Unknown);
    }
}
