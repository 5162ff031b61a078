//! Kubernetes side of the approver
//!
//! - [`KubeEventSource`] watches `CertificateSigningRequest` objects
//! - [`KubeDispatcher`] writes `Approved`/`Denied` conditions through the
//!   `approval` subresource
//! - [`WatchRegistry`] tracks open watches so shutdown can close all of them

mod dispatcher;
mod source;

pub use dispatcher::{approval_patch, patch_params, KubeDispatcher};
pub use source::{event_from_csr, KubeEventSource, WatchGuard, WatchRegistry};

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::{Error, Result};

/// Connect timeout for the Kubernetes API client
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a kube client from an optional kubeconfig path
///
/// Without a path the configuration is inferred (in-cluster service account,
/// then `KUBECONFIG` / `~/.kube/config`). Failures are [`Error::Connect`].
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::connect(format!(
                    "failed to read kubeconfig {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::connect(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::connect(format!("failed to infer kube config: {}", e)))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);

    Client::try_from(config)
        .map_err(|e| Error::connect(format!("failed to create kube client: {}", e)))
}
