//! Informer configuration and member cluster connection resolution

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, ResourceExt};
use serde::Deserialize;
use tracing::debug;

use armada_common::crd::FederatedCluster;
use armada_common::kube_utils::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use armada_common::{Error, Result, FED_SYSTEM_NAMESPACE};

use crate::CLUSTER_SYNC_PERIOD;

/// Secret key holding the PEM CA bundle of the member API server
pub const CA_DATA_KEY: &str = "certificate-authority-data";
/// Secret key holding the PEM client certificate
pub const CERT_DATA_KEY: &str = "client-certificate-data";
/// Secret key holding the PEM client key
pub const KEY_DATA_KEY: &str = "client-key-data";
/// Secret key holding the service account bearer token
pub const SERVICE_ACCOUNT_TOKEN_KEY: &str = "service-account-token-data";
/// Secret key holding the CA bundle issued with the service account token
pub const SERVICE_ACCOUNT_CA_KEY: &str = "service-account-ca-data";

/// Runtime settings for a federated informer
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct InformerConfig {
    /// Namespace holding member credential secrets
    pub fed_system_namespace: String,
    /// Restrict member watches to this namespace; all namespaces if unset
    pub target_namespace: Option<String>,
    /// Interval at which the registry redelivers every cluster
    pub cluster_sync_period: Duration,
    /// Connect timeout for member clients
    pub connect_timeout: Duration,
    /// Read timeout for member clients
    pub read_timeout: Duration,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            fed_system_namespace: FED_SYSTEM_NAMESPACE.to_string(),
            target_namespace: None,
            cluster_sync_period: CLUSTER_SYNC_PERIOD,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl InformerConfig {
    /// Defaults overlaid with `ARMADA_FED_SYSTEM_NAMESPACE` and `ARMADA_TARGET_NAMESPACE`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(ns) = lookup("ARMADA_FED_SYSTEM_NAMESPACE").filter(|v| !v.is_empty()) {
            config.fed_system_namespace = ns;
        }
        config.target_namespace = lookup("ARMADA_TARGET_NAMESPACE").filter(|v| !v.is_empty());
        config
    }
}

/// Resolves how to connect to a member cluster
///
/// Failures are scoped to the one cluster; the informer logs them and leaves
/// that cluster without a watch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterConfigFactory: Send + Sync {
    /// Connection config for `cluster`
    async fn config_for(&self, cluster: &FederatedCluster) -> Result<kube::Config>;
}

/// Builds member configs from credential secrets in the federation system namespace
pub struct SecretConfigFactory {
    client: Client,
    namespace: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl SecretConfigFactory {
    /// Read secrets through `client` using the namespace and timeouts from `config`
    pub fn new(client: Client, config: &InformerConfig) -> Self {
        Self {
            client,
            namespace: config.fed_system_namespace.clone(),
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
        }
    }
}

#[async_trait]
impl ClusterConfigFactory for SecretConfigFactory {
    async fn config_for(&self, cluster: &FederatedCluster) -> Result<kube::Config> {
        let name = cluster.name_any();
        let secret_name = &cluster.spec.secret_ref.name;
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);

        let secret = secrets
            .get_opt(secret_name)
            .await
            .map_err(|e| {
                Error::cluster_config(
                    &name,
                    format!("failed to read secret {}/{}: {}", self.namespace, secret_name, e),
                )
            })?
            .ok_or_else(|| {
                Error::cluster_config(
                    &name,
                    format!("secret {}/{} not found", self.namespace, secret_name),
                )
            })?;
        let data: BTreeMap<String, Vec<u8>> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect();

        let kubeconfig = build_kubeconfig(cluster, &data)?;
        let mut config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::cluster_config(&name, e.to_string()))?;
        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);

        debug!(cluster = %name, endpoint = %cluster.spec.api_endpoint, "Resolved member config");
        Ok(config)
    }
}

/// Kubeconfig for `cluster` from its credential secret data
///
/// Token auth uses the service account CA when present; certificate auth
/// needs both halves of the client pair. TLS verification is skipped only
/// when the cluster is marked insecure, in which case no CA is attached.
pub fn build_kubeconfig(
    cluster: &FederatedCluster,
    data: &BTreeMap<String, Vec<u8>>,
) -> Result<Kubeconfig> {
    let name = cluster.name_any();

    let mut cluster_entry = serde_json::json!({ "server": cluster.spec.api_endpoint });
    let ca = if cluster.spec.use_service_account_token {
        data.get(SERVICE_ACCOUNT_CA_KEY).or_else(|| data.get(CA_DATA_KEY))
    } else {
        data.get(CA_DATA_KEY)
    };
    if cluster.spec.insecure {
        cluster_entry["insecure-skip-tls-verify"] = serde_json::Value::Bool(true);
    } else if let Some(ca) = ca.filter(|v| !v.is_empty()) {
        cluster_entry["certificate-authority-data"] = STANDARD.encode(ca).into();
    }

    let user_entry = if cluster.spec.use_service_account_token {
        let token = String::from_utf8(required(data, &name, SERVICE_ACCOUNT_TOKEN_KEY)?.to_vec())
            .map_err(|e| Error::cluster_config(&name, format!("token is not UTF-8: {}", e)))?;
        serde_json::json!({ "token": token.trim() })
    } else {
        serde_json::json!({
            "client-certificate-data": STANDARD.encode(required(data, &name, CERT_DATA_KEY)?),
            "client-key-data": STANDARD.encode(required(data, &name, KEY_DATA_KEY)?),
        })
    };

    let document = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": name, "cluster": cluster_entry }],
        "users": [{ "name": name, "user": user_entry }],
        "contexts": [{ "name": name, "context": { "cluster": name, "user": name } }],
        "current-context": name,
    });

    serde_json::from_value(document).map_err(|e| Error::cluster_config(&name, e.to_string()))
}

fn required<'a>(data: &'a BTreeMap<String, Vec<u8>>, cluster: &str, key: &str) -> Result<&'a [u8]> {
    data.get(key)
        .filter(|v| !v.is_empty())
        .map(Vec::as_slice)
        .ok_or_else(|| Error::cluster_config(cluster, format!("credential secret has no {}", key)))
}
