//! Registry address resolution
//!
//! Order of precedence:
//! 1. a `REGISTRY_ADDRESS` already present on any container (user intent)
//! 2. the highest priority registry label on the pod
//! 3. the highest priority registry label on the namespace
//!
//! Only the first kind found in steps 2-3 is considered. If that kind needs a
//! discovered service and none exists, nothing is resolved; lower priority
//! kinds are not tried.

use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use crate::catalog::{first_labeled, AddressTemplate, RegistryKind};
use crate::inject::patcher::find_env_value;
use crate::metadata::{MetadataResolver, NamespaceLabels};
use crate::{Error, ENV_REGISTRY_ADDRESS, LABEL_VALUE_TRUE};

/// Where a resolved address came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrySource {
    /// Already set on a container; returned verbatim
    UserSpecified,
    /// Computed from the registry catalog
    Discovered(RegistryKind),
}

/// A resolved registry address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRegistry {
    /// Registry connection address
    pub address: String,
    /// Origin of the address
    pub source: RegistrySource,
}

/// Which label set selected the registry kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LabelScope {
    Pod,
    Namespace,
}

/// Resolve the registry address for `pod`.
///
/// `Ok(None)` means no registry applies and the pod should be left alone.
pub async fn resolve_registry_address(
    pod: &Pod,
    metadata: &MetadataResolver,
) -> Result<Option<ResolvedRegistry>, Error> {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let mut ns_labels = NamespaceLabels::new(namespace);
    resolve_with_labels(pod, metadata, &mut ns_labels).await
}

/// [`resolve_registry_address`] reusing namespace labels already fetched for
/// this admission
pub async fn resolve_with_labels(
    pod: &Pod,
    metadata: &MetadataResolver,
    ns_labels: &mut NamespaceLabels,
) -> Result<Option<ResolvedRegistry>, Error> {
    if let Some(address) = find_env_value(pod, ENV_REGISTRY_ADDRESS) {
        debug!(address = %address, "Registry address already set on pod");
        return Ok(Some(ResolvedRegistry {
            address,
            source: RegistrySource::UserSpecified,
        }));
    }

    let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
    let Some((kind, scope)) = select_kind(pod, metadata, ns_labels).await? else {
        debug!(namespace = %namespace, "No registry label on pod or namespace");
        return Ok(None);
    };

    let address = match kind.entry().address {
        AddressTemplate::Fixed(address) => address.to_string(),
        AddressTemplate::DiscoveredService => {
            if namespace.is_empty() {
                debug!(kind = %kind, "Pod has no namespace to search for a registry service");
                return Ok(None);
            }
            let services = metadata
                .services_by_label(namespace, kind.label(), LABEL_VALUE_TRUE)
                .await?;
            let Some(service) = services.first() else {
                debug!(
                    namespace = %namespace,
                    kind = %kind,
                    "No registry service found for selected kind"
                );
                return Ok(None);
            };
            let service_namespace = if service.namespace.is_empty() {
                namespace
            } else {
                service.namespace.as_str()
            };
            kind.address_for(&service.name, service_namespace)
        }
    };

    debug!(
        namespace = %namespace,
        kind = %kind,
        scope = ?scope,
        address = %address,
        "Resolved registry address"
    );
    Ok(Some(ResolvedRegistry {
        address,
        source: RegistrySource::Discovered(kind),
    }))
}

/// Pick the registry kind from pod labels, falling back to namespace labels
async fn select_kind(
    pod: &Pod,
    metadata: &MetadataResolver,
    ns_labels: &mut NamespaceLabels,
) -> Result<Option<(RegistryKind, LabelScope)>, Error> {
    if let Some(kind) = pod.metadata.labels.as_ref().and_then(first_labeled) {
        return Ok(Some((kind, LabelScope::Pod)));
    }

    let labels = ns_labels.get(metadata).await?;
    Ok(first_labeled(labels).map(|kind| (kind, LabelScope::Namespace)))
}
