//! Cluster metadata lookups
//!
//! The injector only needs two reads from the cluster: the labels of a
//! namespace and the services in a namespace matching a label selector.
//! [`ClusterMetadata`] is that capability; [`KubeClusterMetadata`] backs it
//! with the API server and [`InMemoryClusterMetadata`] with fixed data.
//!
//! [`MetadataResolver`] wraps a backend with the request deadline and retry
//! policy. It never swallows failures; the orchestrator applies the
//! fail-open policy.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Service};
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// The parts of a cluster Service the resolver needs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Service name
    pub name: String,
    /// Service namespace
    pub namespace: String,
}

impl ServiceDescriptor {
    /// Create a descriptor
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// Read-only cluster capability used by the injector
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterMetadata: Send + Sync {
    /// Labels of `namespace`; a namespace without labels yields an empty map
    async fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>, Error>;

    /// Services in `namespace` matching `label_selector` (`"<key>=<value>"`)
    async fn list_services(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ServiceDescriptor>, Error>;
}

// =============================================================================
// Real Implementation
// =============================================================================

/// [`ClusterMetadata`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeClusterMetadata {
    client: Client,
}

impl KubeClusterMetadata {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterMetadata for KubeClusterMetadata {
    async fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = api
            .get(namespace)
            .await
            .map_err(|e| Error::cluster_unreachable("namespace_labels", e.to_string()))?;

        Ok(ns.metadata.labels.unwrap_or_default())
    }

    async fn list_services(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ServiceDescriptor>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let services = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| Error::cluster_unreachable("list_services", e.to_string()))?;

        Ok(services
            .items
            .into_iter()
            .filter_map(|svc| {
                let name = svc.metadata.name?;
                let ns = svc
                    .metadata
                    .namespace
                    .unwrap_or_else(|| namespace.to_string());
                Some(ServiceDescriptor::new(name, ns))
            })
            .collect())
    }
}

// =============================================================================
// In-memory Implementation
// =============================================================================

/// [`ClusterMetadata`] over fixed data, for tests and local runs
#[derive(Clone, Debug, Default)]
pub struct InMemoryClusterMetadata {
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    services: Vec<(ServiceDescriptor, BTreeMap<String, String>)>,
}

impl InMemoryClusterMetadata {
    /// Empty cluster: no labeled namespaces, no services
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label to a namespace
    pub fn with_namespace_label(
        mut self,
        namespace: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.namespaces
            .entry(namespace.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    /// Add a service carrying the given labels
    pub fn with_service(
        mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        labels: &[(&str, &str)],
    ) -> Self {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.services.push((ServiceDescriptor::new(name, namespace), labels));
        self
    }
}

#[async_trait]
impl ClusterMetadata for InMemoryClusterMetadata {
    async fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>, Error> {
        Ok(self.namespaces.get(namespace).cloned().unwrap_or_default())
    }

    async fn list_services(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<ServiceDescriptor>, Error> {
        // Only `key=value` selectors are built by the resolver
        let (key, value) = label_selector.split_once('=').ok_or_else(|| {
            Error::config(format!("unsupported label selector '{}'", label_selector))
        })?;

        Ok(self
            .services
            .iter()
            .filter(|(svc, labels)| {
                svc.namespace == namespace && labels.get(key).map(String::as_str) == Some(value)
            })
            .map(|(svc, _)| svc.clone())
            .collect())
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Deadline- and retry-bounded access to a [`ClusterMetadata`] backend
#[derive(Clone)]
pub struct MetadataResolver {
    backend: Arc<dyn ClusterMetadata>,
    timeout: Duration,
    retry: RetryConfig,
}

impl MetadataResolver {
    /// Create a resolver; every lookup (retries included) finishes within `timeout`
    pub fn new(backend: Arc<dyn ClusterMetadata>, timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            backend,
            timeout,
            retry,
        }
    }

    /// Labels of `namespace`
    ///
    /// An empty namespace name has no labels and is not looked up.
    pub async fn namespace_labels(
        &self,
        namespace: &str,
    ) -> Result<BTreeMap<String, String>, Error> {
        if namespace.is_empty() {
            return Ok(BTreeMap::new());
        }

        let labels = self
            .bounded("namespace_labels", || self.backend.namespace_labels(namespace))
            .await?;
        debug!(namespace = %namespace, labels = labels.len(), "Fetched namespace labels");
        Ok(labels)
    }

    /// Services in `namespace` labeled `key=value`
    pub async fn services_by_label(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<Vec<ServiceDescriptor>, Error> {
        let selector = format!("{}={}", key, value);
        let services = self
            .bounded("list_services", || {
                self.backend.list_services(namespace, &selector)
            })
            .await?;
        debug!(
            namespace = %namespace,
            selector = %selector,
            services = services.len(),
            "Listed services"
        );
        Ok(services)
    }

    async fn bounded<F, Fut, T>(&self, operation: &str, call: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        tokio::time::timeout(self.timeout, retry_with_backoff(&self.retry, operation, call))
            .await
            .map_err(|_| Error::timeout(operation, self.timeout))?
    }
}

/// Namespace labels fetched at most once per admission
///
/// The CA and registry paths both consult the namespace; sharing one of
/// these between them keeps a request to a single label lookup.
#[derive(Clone, Debug)]
pub struct NamespaceLabels {
    namespace: String,
    labels: Option<BTreeMap<String, String>>,
}

impl NamespaceLabels {
    /// Labels of `namespace`, not yet fetched
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            labels: None,
        }
    }

    /// Namespace these labels belong to
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Fetch through `metadata` on first use, then answer from memory.
    ///
    /// A failed lookup is not remembered.
    pub async fn get(
        &mut self,
        metadata: &MetadataResolver,
    ) -> Result<&BTreeMap<String, String>, Error> {
        if self.labels.is_none() {
            let labels = metadata.namespace_labels(&self.namespace).await?;
            self.labels = Some(labels);
        }
        Ok(self.labels.get_or_insert_with(BTreeMap::new))
    }
}
