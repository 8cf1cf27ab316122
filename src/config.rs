//! Injection configuration
//!
//! Loaded once at startup and shared read-only (behind an `Arc`) by every
//! admission request. The engine never mutates it.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryConfig;
use crate::Error;

/// Default name of the CA service (also the token audience)
pub const DEFAULT_CA_SERVICE_NAME: &str = "mesh-ca";

/// Default namespace of the CA service
pub const DEFAULT_CA_NAMESPACE: &str = "mesh-system";

/// Default port of the admission webhook
pub const DEFAULT_WEBHOOK_PORT: u16 = 30080;

/// Default plaintext gRPC port of the CA
pub const DEFAULT_GRPC_PLAIN_PORT: u16 = 30060;

/// Default TLS gRPC port of the CA, advertised to workloads
pub const DEFAULT_GRPC_SECURE_PORT: u16 = 30062;

/// Default debug port of the CA
pub const DEFAULT_GRPC_DEBUG_PORT: u16 = 30070;

/// Default port scraped for workload metrics
pub const DEFAULT_METRICS_PORT: u16 = 22222;

/// Default path scraped for workload metrics
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Process-wide injection settings
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct InjectionConfig {
    /// Name of the CA service; used as token audience and in the CA address
    pub ca_service_name: String,
    /// Namespace the CA service runs in
    pub ca_namespace: String,
    /// Validity of the CA certificate in milliseconds.
    ///
    /// Read by the CA service, which shares this file; the injector ignores it.
    pub ca_validity_ms: u64,
    /// Validity of issued workload certificates in milliseconds (CA service only)
    pub cert_validity_ms: u64,
    /// Port the admission webhook listens on
    pub webhook_port: u16,
    /// Admit pods unmodified when a cluster lookup fails
    pub fail_open: bool,
    /// Plaintext gRPC port of the CA (CA service only)
    pub grpc_plain_port: u16,
    /// TLS gRPC port of the CA; advertised to workloads in the CA address
    pub grpc_secure_port: u16,
    /// Debug port of the CA (CA service only)
    pub grpc_debug_port: u16,
    /// Deadline for a single cluster lookup, retries included, in milliseconds
    pub lookup_timeout_ms: u64,
    /// Attempts per cluster lookup before giving up
    pub lookup_attempts: u32,
    /// Port written into the scrape annotation
    pub metrics_port: u16,
    /// Path written into the scrape annotation
    pub metrics_path: String,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            ca_service_name: DEFAULT_CA_SERVICE_NAME.to_string(),
            ca_namespace: DEFAULT_CA_NAMESPACE.to_string(),
            ca_validity_ms: 30 * 24 * 60 * 60 * 1000, // 30 days
            cert_validity_ms: 60 * 60 * 1000,         // 1 hour
            webhook_port: DEFAULT_WEBHOOK_PORT,
            fail_open: false,
            grpc_plain_port: DEFAULT_GRPC_PLAIN_PORT,
            grpc_secure_port: DEFAULT_GRPC_SECURE_PORT,
            grpc_debug_port: DEFAULT_GRPC_DEBUG_PORT,
            lookup_timeout_ms: 5_000,
            lookup_attempts: 3,
            metrics_port: DEFAULT_METRICS_PORT,
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
        }
    }
}

impl InjectionConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("invalid injection config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<(), Error> {
        if self.ca_service_name.is_empty() {
            return Err(Error::config("caServiceName must not be empty"));
        }
        if self.ca_namespace.is_empty() {
            return Err(Error::config("caNamespace must not be empty"));
        }
        if self.grpc_secure_port == 0 {
            return Err(Error::config("grpcSecurePort must be non-zero"));
        }
        if self.lookup_timeout_ms == 0 {
            return Err(Error::config("lookupTimeoutMs must be non-zero"));
        }
        if self.lookup_attempts == 0 {
            return Err(Error::config("lookupAttempts must be at least 1"));
        }
        if !self.metrics_path.starts_with('/') {
            return Err(Error::config(format!(
                "metricsPath '{}' must start with '/'",
                self.metrics_path
            )));
        }
        Ok(())
    }

    /// In-cluster address of the CA's TLS gRPC endpoint
    pub fn ca_address(&self) -> String {
        format!(
            "{}.{}.svc:{}",
            self.ca_service_name, self.ca_namespace, self.grpc_secure_port
        )
    }

    /// Deadline for one cluster lookup
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    /// Retry policy for cluster lookups
    pub fn lookup_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.lookup_attempts,
            initial_delay: Duration::from_millis(50),
            max_delay: self.lookup_timeout(),
            backoff_multiplier: 2.0,
        }
    }
}
