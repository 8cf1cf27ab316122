//! Injection orchestration
//!
//! [`Injector`] is invoked once per admitted pod. Each entry point is
//! independent: it must not assume any other ran before it, it is safe to
//! call repeatedly, and it never mutates the input pod. What a pod already
//! contains is the only record of earlier passes.
//!
//! Cluster lookup failures follow [`InjectionConfig::fail_open`]: when set the
//! original pod is returned unchanged, otherwise the error is propagated so
//! the admission can be rejected.
//!
//! [`Injector::mutate_all`] is what the webhook runs. All of its lookups share
//! one deadline of [`InjectionConfig::lookup_timeout`], and the namespace
//! labels are fetched at most once.

pub mod decider;
pub mod patcher;
pub mod resolver;

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, info, warn};

use crate::config::InjectionConfig;
use crate::metadata::{ClusterMetadata, MetadataResolver, NamespaceLabels};
use crate::{Error, LABEL_VALUE_TRUE, METRICS_INJECT_LABEL};

pub use decider::should_inject_ca;
pub use resolver::{resolve_registry_address, RegistrySource, ResolvedRegistry};

/// Entry point for pod mutation
#[derive(Clone)]
pub struct Injector {
    config: Arc<InjectionConfig>,
    metadata: MetadataResolver,
}

impl Injector {
    /// Create an injector using the config's lookup deadline and retry policy
    pub fn new(config: Arc<InjectionConfig>, backend: Arc<dyn ClusterMetadata>) -> Self {
        let metadata =
            MetadataResolver::new(backend, config.lookup_timeout(), config.lookup_retry());
        Self { config, metadata }
    }

    /// Configuration in use
    pub fn config(&self) -> &InjectionConfig {
        &self.config
    }

    /// Inject CA identity material when the pod or its namespace opts in
    pub async fn mutate_pod(&self, pod: &Pod) -> Result<Pod, Error> {
        let mut ns_labels = NamespaceLabels::new(namespace_of(pod));
        let outcome = self.try_mutate_pod(pod, &mut ns_labels).await;
        self.apply_policy("ca", pod, outcome)
    }

    /// Inject the registry address when one resolves for the pod
    pub async fn mutate_pod_for_registry(&self, pod: &Pod) -> Result<Pod, Error> {
        let mut ns_labels = NamespaceLabels::new(namespace_of(pod));
        let outcome = self.try_mutate_pod_for_registry(pod, &mut ns_labels).await;
        self.apply_policy("registry", pod, outcome)
    }

    /// Add scrape annotations when the namespace runs a metrics collector
    pub async fn mutate_pod_for_metrics(&self, pod: &Pod) -> Result<Pod, Error> {
        let outcome = self.try_mutate_pod_for_metrics(pod).await;
        self.apply_policy("metrics", pod, outcome)
    }

    /// Run CA, registry and metrics injection in that order.
    ///
    /// The whole run is bounded by one lookup deadline. Under fail-open a
    /// lookup failure in any path admits the original pod unchanged.
    pub async fn mutate_all(&self, pod: &Pod) -> Result<Pod, Error> {
        let deadline = self.config.lookup_timeout();
        let outcome = tokio::time::timeout(deadline, self.try_mutate_all(pod))
            .await
            .unwrap_or_else(|_| Err(Error::timeout("mutate_all", deadline)));
        self.apply_policy("all", pod, outcome)
    }

    /// Resolve the registry address for `pod` without mutating anything
    pub async fn resolve_registry_address(
        &self,
        pod: &Pod,
    ) -> Result<Option<ResolvedRegistry>, Error> {
        resolver::resolve_registry_address(pod, &self.metadata).await
    }

    async fn try_mutate_all(&self, pod: &Pod) -> Result<Pod, Error> {
        let mut ns_labels = NamespaceLabels::new(namespace_of(pod));
        let pod = self.try_mutate_pod(pod, &mut ns_labels).await?;
        let pod = self.try_mutate_pod_for_registry(&pod, &mut ns_labels).await?;
        self.try_mutate_pod_for_metrics(&pod).await
    }

    async fn try_mutate_pod(
        &self,
        pod: &Pod,
        ns_labels: &mut NamespaceLabels,
    ) -> Result<Pod, Error> {
        let namespace = namespace_of(pod);
        let pod_labels = pod.metadata.labels.as_ref();

        // The pod's own opt-in is enough; skip the namespace round-trip
        let inject = if decider::opted_in(pod_labels) {
            true
        } else {
            should_inject_ca(pod_labels, ns_labels.get(&self.metadata).await?)
        };

        if !inject {
            debug!(namespace = %namespace, pod = ?pod.metadata.name, "CA injection not requested");
            return Ok(pod.clone());
        }

        let mut target = pod.clone();
        if patcher::inject_ca_material(&mut target, &self.config) {
            info!(
                namespace = %namespace,
                pod = ?pod.metadata.name,
                ca = %self.config.ca_address(),
                "Injected CA identity material"
            );
        } else {
            debug!(namespace = %namespace, pod = ?pod.metadata.name, "CA material already present");
        }
        Ok(target)
    }

    async fn try_mutate_pod_for_registry(
        &self,
        pod: &Pod,
        ns_labels: &mut NamespaceLabels,
    ) -> Result<Pod, Error> {
        let resolved = resolver::resolve_with_labels(pod, &self.metadata, ns_labels).await?;
        let Some(resolved) = resolved else {
            return Ok(pod.clone());
        };

        let RegistrySource::Discovered(kind) = resolved.source else {
            debug!(
                pod = ?pod.metadata.name,
                address = %resolved.address,
                "Keeping user-specified registry address"
            );
            return Ok(pod.clone());
        };

        let mut target = pod.clone();
        if patcher::inject_registry_address(&mut target, &resolved.address) {
            info!(
                namespace = %namespace_of(pod),
                pod = ?pod.metadata.name,
                kind = %kind,
                address = %resolved.address,
                "Injected registry address"
            );
        }
        Ok(target)
    }

    async fn try_mutate_pod_for_metrics(&self, pod: &Pod) -> Result<Pod, Error> {
        let namespace = namespace_of(pod);
        if namespace.is_empty() {
            return Ok(pod.clone());
        }

        let collectors = self
            .metadata
            .services_by_label(namespace, METRICS_INJECT_LABEL, LABEL_VALUE_TRUE)
            .await?;
        if collectors.is_empty() {
            debug!(namespace = %namespace, "No metrics collector in namespace");
            return Ok(pod.clone());
        }

        let mut target = pod.clone();
        if patcher::inject_scrape_annotations(
            &mut target,
            self.config.metrics_port,
            &self.config.metrics_path,
        ) {
            info!(
                namespace = %namespace,
                pod = ?pod.metadata.name,
                collector = %collectors[0].name,
                "Injected scrape annotations"
            );
        }
        Ok(target)
    }

    fn apply_policy(
        &self,
        path: &str,
        pod: &Pod,
        outcome: Result<Pod, Error>,
    ) -> Result<Pod, Error> {
        match outcome {
            Err(e) if e.is_cluster_failure() && self.config.fail_open => {
                warn!(
                    path = %path,
                    pod = ?pod.metadata.name,
                    error = %e,
                    "Cluster lookup failed, admitting pod unmodified"
                );
                Ok(pod.clone())
            }
            other => other,
        }
    }
}

fn namespace_of(pod: &Pod) -> &str {
    pod.metadata.namespace.as_deref().unwrap_or_default()
}
