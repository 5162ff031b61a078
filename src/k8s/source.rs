//! Watch-based event source for CertificateSigningRequests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::ready;
use futures::StreamExt;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use kube::api::{Api, ListParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::{EventSource, EventStream, RequestStatus, SigningRequestEvent};
use crate::{Error, Result};

/// Registry of open watches
///
/// Each watch gets a cancellation token; [`WatchRegistry::cancel_all`] ends
/// every stream opened so far, including ones from earlier reconnects.
#[derive(Default)]
pub struct WatchRegistry {
    active: DashMap<u64, CancellationToken>,
    next_id: AtomicU64,
}

impl WatchRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watch and return its id and cancellation token
    pub fn register(&self) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        debug!(watch_id = id, "Registering watch");
        self.active.insert(id, token.clone());
        (id, token)
    }

    /// Unregister a watch after its stream is dropped
    pub fn unregister(&self, id: u64) {
        self.active.remove(&id);
    }

    /// Cancel all active watches
    pub fn cancel_all(&self) {
        let count = self.active.len();
        if count > 0 {
            info!(count = count, "Cancelling all active watches");
            for entry in self.active.iter() {
                entry.value().cancel();
            }
            self.active.clear();
        }
    }

    /// Number of watches not yet cancelled or dropped
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Removes a watch from its registry when the owning stream is dropped
pub struct WatchGuard {
    id: u64,
    registry: Arc<WatchRegistry>,
}

impl WatchGuard {
    /// Register a new watch, returning the guard and the watch's token
    pub fn register(registry: &Arc<WatchRegistry>) -> (Self, CancellationToken) {
        let (id, token) = registry.register();
        (
            Self {
                id,
                registry: registry.clone(),
            },
            token,
        )
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

/// Convert a CertificateSigningRequest object into an event
///
/// Returns `None` for objects without a name.
pub fn event_from_csr(csr: CertificateSigningRequest) -> Option<SigningRequestEvent> {
    let id = csr.metadata.name?;
    let status = csr
        .status
        .and_then(|s| s.conditions)
        .map(|conditions| {
            let has = |kind: &str| {
                conditions
                    .iter()
                    .any(|c| c.type_ == kind && c.status != "False")
            };
            if has("Denied") {
                RequestStatus::Denied
            } else if has("Failed") {
                RequestStatus::Failed
            } else if has("Approved") {
                RequestStatus::Approved
            } else {
                RequestStatus::Pending
            }
        })
        .unwrap_or_default();

    Some(SigningRequestEvent {
        id,
        request: csr.spec.request.0,
        status,
    })
}

/// Event source backed by a kube-rs watcher over CertificateSigningRequests
pub struct KubeEventSource {
    api: Api<CertificateSigningRequest>,
    registry: Arc<WatchRegistry>,
}

impl KubeEventSource {
    /// Create a source watching all CertificateSigningRequests
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
            registry: Arc::new(WatchRegistry::new()),
        }
    }

    /// Registry of the watches this source has opened
    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }
}

#[async_trait]
impl EventSource for KubeEventSource {
    async fn event_stream(&self) -> Result<EventStream> {
        // The watcher retries forever; only this probe can fail the stream
        self.api
            .list(&ListParams::default().limit(1))
            .await
            .map_err(|e| {
                Error::connect(format!("failed to list certificate signing requests: {}", e))
            })?;

        let (guard, token) = WatchGuard::register(&self.registry);
        info!("Starting certificate signing request watch");

        let stream = watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .applied_objects()
            .take_until(token.cancelled_owned())
            .filter_map(move |result| {
                let _guard = &guard;
                ready(match result {
                    Ok(csr) => {
                        let event = event_from_csr(csr);
                        if event.is_none() {
                            warn!("Skipping certificate signing request without a name");
                        }
                        event
                    }
                    Err(e) => {
                        warn!(error = %e, "Certificate signing request watch error, retrying");
                        None
                    }
                })
            });

        Ok(stream.boxed())
    }

    fn stop_watching(&self) {
        self.registry.cancel_all();
    }
}
