//! Per-cluster API clients

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use kube::{Api, Client};

use armada_common::{Error, Result};

use crate::key::QualifiedName;

/// Point reads against one member cluster
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch one object; a 404 is `Ok(None)`
    async fn get_object(
        &self,
        api_resource: &ApiResource,
        name: &QualifiedName,
    ) -> Result<Option<DynamicObject>>;
}

/// Constructs clients from resolved member configs
#[cfg_attr(test, mockall::automock)]
pub trait ClientFactory: Send + Sync {
    /// Build a client for `cluster`
    fn build(&self, cluster: &str, config: kube::Config) -> Result<Arc<dyn ClusterClient>>;
}

/// [`ClusterClient`] over a kube client
#[derive(Clone)]
pub struct KubeClusterClient {
    cluster: String,
    client: Client,
}

impl KubeClusterClient {
    /// Wrap `client`, which talks to member `cluster`
    pub fn new(cluster: impl Into<String>, client: Client) -> Self {
        Self {
            cluster: cluster.into(),
            client,
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_object(
        &self,
        api_resource: &ApiResource,
        name: &QualifiedName,
    ) -> Result<Option<DynamicObject>> {
        let api: Api<DynamicObject> = match &name.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, api_resource),
            None => Api::all_with(self.client.clone(), api_resource),
        };
        api.get_opt(&name.name)
            .await
            .map_err(|e| Error::fetch(&self.cluster, name.to_string(), e.to_string()))
    }
}

/// Builds [`KubeClusterClient`]s
#[derive(Clone, Copy, Debug, Default)]
pub struct KubeClientFactory;

impl ClientFactory for KubeClientFactory {
    fn build(&self, cluster: &str, config: kube::Config) -> Result<Arc<dyn ClusterClient>> {
        let client = Client::try_from(config)
            .map_err(|e| Error::client_creation(cluster, e.to_string()))?;
        Ok(Arc::new(KubeClusterClient::new(cluster, client)))
    }
}
