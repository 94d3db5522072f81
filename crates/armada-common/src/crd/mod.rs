//! Custom Resource Definitions for Armada
//!
//! This module contains the CRDs the federation control plane watches.

mod cluster;
mod types;

pub use cluster::{
    is_cluster_joined, is_cluster_ready, FederatedCluster, FederatedClusterSpec,
    FederatedClusterStatus, LocalSecretReference,
};
pub use types::{ClusterCondition, ClusterConditionType, ConditionStatus};
