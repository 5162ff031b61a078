//! Verdict dispatch through the CSR `approval` subresource

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

use crate::controller::{Dispatcher, SigningRequestEvent};
use crate::decision::Decision;
use crate::{Error, Result, APPROVER_NAME};

/// Build the approval subresource patch for a verdict
///
/// `conditions` carries no merge key, so the patch replaces the whole list.
/// Only pending requests are patched, which have no conditions to lose.
pub fn approval_patch(decision: Decision, now: DateTime<Utc>) -> serde_json::Value {
    let (type_, reason, message) = match decision {
        Decision::Approve => (
            "Approved",
            "AutoApproved",
            "Requested IP addresses are bound to the cloud instance",
        ),
        Decision::Deny => (
            "Denied",
            "AddressMismatch",
            "Requested IP addresses are not bound to the cloud instance",
        ),
    };

    serde_json::json!({
        "status": {
            "conditions": [{
                "type": type_,
                "status": "True",
                "reason": reason,
                "message": format!("{} ({})", message, APPROVER_NAME),
                "lastUpdateTime": now.to_rfc3339_opts(SecondsFormat::Secs, true),
            }]
        }
    })
}

/// Patch parameters recording the approver as field manager
pub fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(APPROVER_NAME.to_string()),
        ..PatchParams::default()
    }
}

/// Writes verdicts to the Kubernetes API
pub struct KubeDispatcher {
    api: Api<CertificateSigningRequest>,
}

impl KubeDispatcher {
    /// Create a dispatcher for cluster-scoped CertificateSigningRequests
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    async fn apply(&self, event: &SigningRequestEvent, decision: Decision) -> Result<()> {
        let patch = approval_patch(decision, Utc::now());
        debug!(request = %event.id, verdict = %decision, "Patching approval subresource");

        self.api
            .patch_subresource(
                "approval",
                &event.id,
                &patch_params(),
                &Patch::Strategic(&patch),
            )
            .await
            .map_err(|e| Error::apply(&event.id, e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for KubeDispatcher {
    async fn approve(&self, event: &SigningRequestEvent) -> Result<()> {
        self.apply(event, Decision::Approve).await
    }

    async fn deny(&self, event: &SigningRequestEvent) -> Result<()> {
        self.apply(event, Decision::Deny).await
    }
}
