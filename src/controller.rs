//! Certificate signing request approval controller
//!
//! Pulls one event at a time from an [`EventSource`] and drives it through
//! decode → identity extraction → address resolution → decision → dispatch
//! before pulling the next. Events are decided strictly in delivery order.
//!
//! Failures other than obtaining the initial stream are scoped to the event
//! that caused them: they are logged against the request name and the request
//! is left pending. No verdict is ever issued on incomplete information.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::csr::decode_request;
use crate::decision::{decide, Decision, EmptyAddressPolicy};
use crate::identity::IdentityExtractor;
use crate::{Error, Result};

/// Stream of certificate signing request events
pub type EventStream = BoxStream<'static, SigningRequestEvent>;

/// Approval state of a request at the time the event was observed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequestStatus {
    /// No verdict yet
    #[default]
    Pending,
    /// Already approved
    Approved,
    /// Already denied
    Denied,
    /// Signing failed
    Failed,
}

/// Snapshot of one certificate signing request
///
/// The same request may be delivered more than once (watch restarts).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SigningRequestEvent {
    /// Request name
    pub id: String,
    /// PEM or DER encoded PKCS#10 request
    pub request: Vec<u8>,
    /// Approval state
    pub status: RequestStatus,
}

/// Source of certificate signing request events
///
/// Implementations own every watch they open and must release all of them
/// on [`EventSource::stop_watching`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a new event stream
    ///
    /// Fails with [`Error::Connect`] when the stream cannot be established.
    async fn event_stream(&self) -> Result<EventStream>;

    /// Stop every open watch; their streams end
    fn stop_watching(&self);
}

/// Authoritative address lookup for compute instances
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AuthorityResolver: Send + Sync {
    /// Every address bound to the single instance with this name
    ///
    /// Fails with [`Error::NotFound`] when no instance matches and
    /// [`Error::Ambiguous`] when more than one does.
    async fn resolve_addresses(&self, instance_name: &str) -> Result<HashSet<IpAddr>>;
}

/// Commits verdicts to the orchestration API
///
/// Both calls must be safe to repeat for an already-decided request.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Approve the request
    async fn approve(&self, event: &SigningRequestEvent) -> Result<()>;

    /// Deny the request
    async fn deny(&self, event: &SigningRequestEvent) -> Result<()>;
}

/// What happened to a single event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Verdict dispatched
    Decided(Decision),
    /// Request already carried a verdict
    Skipped,
}

/// Cloneable handle that stops a running [`Controller`]
#[derive(Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
    source: Arc<dyn EventSource>,
}

impl ShutdownHandle {
    /// Stop pulling events and release every watch
    ///
    /// A decision already in progress runs to completion.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            info!("Stopping certificate signing request controller");
        }
        self.token.cancel();
        self.source.stop_watching();
    }

    /// Whether stop has been requested
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Sequential approval controller
pub struct Controller {
    source: Arc<dyn EventSource>,
    resolver: Arc<dyn AuthorityResolver>,
    dispatcher: Arc<dyn Dispatcher>,
    extractor: IdentityExtractor,
    empty_address_policy: EmptyAddressPolicy,
    shutdown: CancellationToken,
}

impl Controller {
    /// Create a controller over the given collaborators
    pub fn new(
        source: Arc<dyn EventSource>,
        resolver: Arc<dyn AuthorityResolver>,
        dispatcher: Arc<dyn Dispatcher>,
        extractor: IdentityExtractor,
    ) -> Self {
        Self {
            source,
            resolver,
            dispatcher,
            extractor,
            empty_address_policy: EmptyAddressPolicy::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Override how requests without IP SANs are handled
    pub fn with_empty_address_policy(mut self, policy: EmptyAddressPolicy) -> Self {
        self.empty_address_policy = policy;
        self
    }

    /// Handle for stopping the controller from another task
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
            source: self.source.clone(),
        }
    }

    /// Stop pulling events and release every watch
    pub fn stop(&self) {
        self.shutdown_handle().stop();
    }

    /// Consume events until the source closes or [`Controller::stop`] is called
    ///
    /// Only a failure to open the event stream is returned as an error.
    pub async fn start(&self) -> Result<()> {
        let mut events = self.source.event_stream().await?;
        info!(
            pattern = %self.extractor.pattern(),
            empty_address_policy = ?self.empty_address_policy,
            "Watching certificate signing requests"
        );

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!("Shutdown requested, no further events will be pulled");
                    break;
                }
                next = events.next() => match next {
                    Some(event) => event,
                    None => {
                        info!("Event stream closed");
                        break;
                    }
                },
            };

            match self.process(&event).await {
                Ok(Outcome::Decided(Decision::Approve)) => {
                    info!(request = %event.id, "Certificate signing request approved");
                }
                Ok(Outcome::Decided(Decision::Deny)) => {
                    info!(request = %event.id, "Certificate signing request denied");
                }
                Ok(Outcome::Skipped) => {}
                Err(e) => log_failure(&event, &e),
            }
        }

        self.source.stop_watching();
        Ok(())
    }

    /// Run one event through the full pipeline, dispatch included
    #[instrument(skip(self, event), fields(request = %event.id))]
    pub async fn process(&self, event: &SigningRequestEvent) -> Result<Outcome> {
        if event.status != RequestStatus::Pending {
            debug!(status = ?event.status, "Request already decided, skipping");
            return Ok(Outcome::Skipped);
        }

        let decision = self.evaluate(event).await?;
        match decision {
            Decision::Approve => self.dispatcher.approve(event).await?,
            Decision::Deny => self.dispatcher.deny(event).await?,
        }
        Ok(Outcome::Decided(decision))
    }

    /// Compute the verdict for an event without dispatching it
    pub async fn evaluate(&self, event: &SigningRequestEvent) -> Result<Decision> {
        let parsed = decode_request(&event.request)?;
        debug!(
            common_name = %parsed.common_name,
            addresses = ?parsed.requested_addresses,
            "Decoded certificate signing request"
        );

        let instance = self.extractor.extract(&parsed.common_name)?;

        if let Some(forced) = self
            .empty_address_policy
            .verdict_for(&parsed.requested_addresses)
        {
            debug!(instance = %instance, verdict = %forced, "Request has no IP addresses");
            return Ok(forced);
        }

        let authority = self.resolver.resolve_addresses(&instance).await?;
        let decision = decide(&parsed.requested_addresses, &authority);
        debug!(
            instance = %instance,
            requested = ?parsed.requested_addresses,
            authority = ?authority,
            verdict = %decision,
            "Compared requested addresses with instance addresses"
        );
        Ok(decision)
    }
}

/// Log a per-event failure; the request is left without a verdict
fn log_failure(event: &SigningRequestEvent, e: &Error) {
    match e {
        Error::Transport { .. } | Error::Apply { .. } => error!(
            request = %event.id,
            error_kind = e.kind(),
            error = %e,
            "Failed to process certificate signing request, leaving it pending"
        ),
        _ => warn!(
            request = %event.id,
            error_kind = e.kind(),
            error = %e,
            "Certificate signing request not verifiable, leaving it pending"
        ),
    }
}
