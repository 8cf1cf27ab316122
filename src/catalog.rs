//! Registry catalog
//!
//! Static table of the registry backends a workload can be wired to. The
//! table is an ordered slice: resolution walks it front to back and the first
//! kind that matches wins, so the order here *is* the priority.

use std::collections::BTreeMap;
use std::fmt;

use crate::LABEL_VALUE_TRUE;

/// Address used for the kubernetes-native registry, independent of services
pub const DEFAULT_K8S_REGISTRY_ADDRESS: &str = "kubernetes://kubernetes.default.svc";

/// Supported registry backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegistryKind {
    /// Coordinate-service style registry
    Zookeeper,
    /// Key-value style registry
    Nacos,
    /// Orchestration-native registry
    Kubernetes,
}

/// How the address of a registry kind is computed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressTemplate {
    /// `<scheme>://<service>.<namespace>.svc` from a discovered service
    DiscoveredService,
    /// Constant address; no service lookup is performed
    Fixed(&'static str),
}

/// One row of the catalog
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Registry kind
    pub kind: RegistryKind,
    /// Discovery label key, set to `"true"` on pods, namespaces and services
    pub label: &'static str,
    /// URL scheme of the address
    pub scheme: &'static str,
    /// Address computation
    pub address: AddressTemplate,
}

/// All registry kinds in priority order (lowest rank first)
pub static REGISTRY_CATALOG: [RegistryEntry; 3] = [
    RegistryEntry {
        kind: RegistryKind::Zookeeper,
        label: "zookeeper.inject",
        scheme: "zookeeper",
        address: AddressTemplate::DiscoveredService,
    },
    RegistryEntry {
        kind: RegistryKind::Nacos,
        label: "nacos.inject",
        scheme: "nacos",
        address: AddressTemplate::DiscoveredService,
    },
    RegistryEntry {
        kind: RegistryKind::Kubernetes,
        label: "kubernetes.inject",
        scheme: "kubernetes",
        address: AddressTemplate::Fixed(DEFAULT_K8S_REGISTRY_ADDRESS),
    },
];

impl RegistryKind {
    /// Catalog row for this kind
    pub fn entry(&self) -> &'static RegistryEntry {
        // Catalog order matches declaration order
        &REGISTRY_CATALOG[self.rank()]
    }

    /// Priority rank; lower ranks are checked first
    pub fn rank(&self) -> usize {
        match self {
            RegistryKind::Zookeeper => 0,
            RegistryKind::Nacos => 1,
            RegistryKind::Kubernetes => 2,
        }
    }

    /// Discovery label key
    pub fn label(&self) -> &'static str {
        self.entry().label
    }

    /// URL scheme
    pub fn scheme(&self) -> &'static str {
        self.entry().scheme
    }

    /// Address for a discovered registry service
    ///
    /// Kinds with a fixed address ignore the service entirely.
    pub fn address_for(&self, service_name: &str, service_namespace: &str) -> String {
        match self.entry().address {
            AddressTemplate::Fixed(address) => address.to_string(),
            AddressTemplate::DiscoveredService => format!(
                "{}://{}.{}.svc",
                self.scheme(),
                service_name,
                service_namespace
            ),
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// First kind, in priority order, whose label is `"true"` in `labels`
pub fn first_labeled(labels: &BTreeMap<String, String>) -> Option<RegistryKind> {
    REGISTRY_CATALOG
        .iter()
        .find(|entry| labels.get(entry.label).map(String::as_str) == Some(LABEL_VALUE_TRUE))
        .map(|entry| entry.kind)
}
