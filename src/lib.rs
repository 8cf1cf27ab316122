//! mesh-injector - mutating admission engine for mesh workloads
//!
//! Rewrites newly admitted pods so they can obtain an mTLS identity from the
//! mesh certificate authority and locate the service registry used by their
//! RPC framework.
//!
//! # Modules
//!
//! - [`catalog`] - Supported registry kinds, their labels and priorities
//! - [`metadata`] - Cluster metadata capability (namespace labels, services)
//! - [`inject`] - Injection decisions, pod patching and the orchestrator
//! - [`config`] - Process-wide injection configuration
//! - [`webhook`] - Admission endpoint wrapping the injector
//! - [`retry`] - Backoff helper for cluster lookups
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod inject;
pub mod metadata;
pub mod retry;
pub mod telemetry;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Label and Environment Vocabulary
// =============================================================================
// These names are read by sidecars and SDKs that are already deployed, so
// they must stay byte-for-byte stable.

/// Value used by every boolean-style label
pub const LABEL_VALUE_TRUE: &str = "true";

/// Pod or namespace label opting workloads into CA identity injection
pub const CA_INJECT_LABEL: &str = "ca.inject";

/// Service label marking a metrics collector in the pod namespace
pub const METRICS_INJECT_LABEL: &str = "prometheus.inject";

/// Environment variable carrying the registry address
pub const ENV_REGISTRY_ADDRESS: &str = "REGISTRY_ADDRESS";

/// Environment variable carrying the CA gRPC endpoint
pub const ENV_CA_ADDRESS: &str = "REGISTRY_CA_ADDRESS";

/// Environment variable carrying the path of the CA certificate
pub const ENV_CA_CERT_PATH: &str = "CA_CERT_PATH";

/// Environment variable carrying the path of the projected OIDC token
pub const ENV_OIDC_TOKEN: &str = "OIDC_TOKEN";

/// Environment variable carrying the OIDC token type
pub const ENV_OIDC_TOKEN_TYPE: &str = "OIDC_TOKEN_TYPE";

/// Volume holding the projected service-account token
pub const CA_TOKEN_VOLUME: &str = "ca-token";

/// Volume holding the CA certificate config map
pub const CA_CERT_VOLUME: &str = "ca-cert";

/// Mount path of the token volume
pub const CA_TOKEN_MOUNT_PATH: &str = "/var/run/secrets/ca-token";

/// Mount path of the certificate volume
pub const CA_CERT_MOUNT_PATH: &str = "/var/run/secrets/ca-cert";

/// File name of the token inside the token volume
pub const CA_TOKEN_FILE: &str = "token";

/// Key (and file name) of the certificate inside the config map
pub const CA_CERT_FILE: &str = "ca.crt";

/// Lifetime requested for the projected token
pub const CA_TOKEN_EXPIRATION_SECONDS: i64 = 1800;

/// Pod annotation enabling metrics scraping
pub const SCRAPE_ANNOTATION: &str = "prometheus.io/scrape";

/// Pod annotation carrying the scrape port
pub const SCRAPE_PORT_ANNOTATION: &str = "prometheus.io/port";

/// Pod annotation carrying the scrape path
pub const SCRAPE_PATH_ANNOTATION: &str = "prometheus.io/path";
