//! mesh-injector - mutating admission webhook for mesh workloads

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use kube::Client;
use tracing::info;

use mesh_injector::config::InjectionConfig;
use mesh_injector::inject::Injector;
use mesh_injector::metadata::KubeClusterMetadata;
use mesh_injector::telemetry::{init_tracing, LogFormat};
use mesh_injector::webhook::{webhook_router, WebhookState};

/// Inject mesh CA identity, registry addresses and scrape annotations into pods
#[derive(Parser, Debug)]
#[command(name = "mesh-injector", version, about, long_about = None)]
struct Cli {
    /// Path to the injection config YAML; defaults apply when omitted
    #[arg(short = 'f', long = "config", env = "MESH_INJECTOR_CONFIG")]
    config_file: Option<PathBuf>,

    /// Admit pods unmodified when cluster lookups fail
    #[arg(long, env = "MESH_INJECTOR_FAIL_OPEN")]
    fail_open: Option<bool>,

    /// Listen port, overriding `webhookPort` from the config
    #[arg(long, env = "MESH_INJECTOR_PORT")]
    port: Option<u16>,

    /// PEM certificate chain for the webhook endpoint
    #[arg(long, env = "MESH_INJECTOR_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for the webhook endpoint
    #[arg(long, env = "MESH_INJECTOR_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "MESH_INJECTOR_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    init_tracing(LogFormat::from_flag(cli.log_json))?;

    let mut config = match &cli.config_file {
        Some(path) => InjectionConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => InjectionConfig::default(),
    };
    if let Some(fail_open) = cli.fail_open {
        config.fail_open = fail_open;
    }
    if let Some(port) = cli.port {
        config.webhook_port = port;
    }
    config.validate()?;

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.webhook_port));
    info!(
        addr = %addr,
        ca = %config.ca_address(),
        fail_open = config.fail_open,
        "Starting mesh injector"
    );

    let injector = Injector::new(
        Arc::new(config),
        Arc::new(KubeClusterMetadata::new(client)),
    );
    let router = webhook_router(Arc::new(WebhookState::new(injector)));

    match (cli.tls_cert, cli.tls_key) {
        (Some(cert), Some(key)) => {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&cert, &key)
                .await
                .with_context(|| format!("loading TLS material from {}", cert.display()))?;
            info!(addr = %addr, "Serving webhook over TLS");
            axum_server::bind_rustls(addr, tls)
                .serve(router.into_make_service())
                .await?;
        }
        _ => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {}", addr))?;
            info!(addr = %addr, "Serving webhook without TLS");
            axum::serve(listener, router).await?;
        }
    }

    Ok(())
}
