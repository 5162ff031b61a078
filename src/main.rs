//! Machine Approver - approves node serving certificates against cloud instance addresses

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};

use machine_approver::config::Config;
use machine_approver::controller::Controller;
use machine_approver::k8s::{create_client, KubeDispatcher, KubeEventSource};
use machine_approver::telemetry::{init_logging, LogFormat};

/// Machine Approver - automatic approval of kubelet serving certificate requests
#[derive(Parser, Debug)]
#[command(name = "machine-approver", version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short = 'c', long = "config", env = "MACHINE_APPROVER_CONFIG")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json, env = "MACHINE_APPROVER_LOG_FORMAT")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // aws-lc-rs backs both the kube client and the cloud API client
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    if let Err(e) = run(cli).await {
        error!(error = %format!("{:#}", e), "Machine approver failed");
        return Err(e);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)?;
    info!(
        config = %cli.config.display(),
        kubeconfig = ?config.kubeconfig_path,
        "Loaded configuration"
    );

    let extractor = config.identity_extractor()?;
    let resolver = config.build_resolver()?;

    let client = create_client(config.kubeconfig_path.as_deref()).await?;
    let source = Arc::new(KubeEventSource::new(client.clone()));
    let dispatcher = Arc::new(KubeDispatcher::new(client));

    let controller = Arc::new(
        Controller::new(source, resolver, dispatcher, extractor)
            .with_empty_address_policy(config.empty_address_policy),
    );
    let shutdown = controller.shutdown_handle();

    let mut task = tokio::spawn({
        let controller = controller.clone();
        async move { controller.start().await }
    });

    let result = tokio::select! {
        result = &mut task => result,
        _ = shutdown_signal() => {
            shutdown.stop();
            task.await
        }
    };

    result
        .context("controller task panicked")?
        .context("controller failed")?;

    info!("Machine approver stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
