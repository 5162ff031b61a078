//! Approve/deny decision
//!
//! Pure comparison of the addresses a request claims against the addresses
//! the cloud provider reports for the instance. Exact address equality, no
//! subnet containment.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Verdict for one certificate signing request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Every requested address belongs to the instance
    Approve,
    /// At least one requested address does not belong to the instance
    Deny,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approve => write!(f, "approve"),
            Decision::Deny => write!(f, "deny"),
        }
    }
}

/// Approve iff `requested` is a subset of `authority`
///
/// An empty request approves vacuously; see [`EmptyAddressPolicy`] for the
/// operator override applied by the controller.
pub fn decide(requested: &HashSet<IpAddr>, authority: &HashSet<IpAddr>) -> Decision {
    if requested.is_subset(authority) {
        Decision::Approve
    } else {
        Decision::Deny
    }
}

/// What to do with a request that asks for no IP addresses at all
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyAddressPolicy {
    /// Approve (vacuous subset)
    #[default]
    Approve,
    /// Treat as malformed and deny
    Deny,
}

impl EmptyAddressPolicy {
    /// Verdict forced by the policy for an empty request, if any
    ///
    /// Returns `None` when the request has addresses and must go through
    /// resolution and [`decide`].
    pub fn verdict_for(&self, requested: &HashSet<IpAddr>) -> Option<Decision> {
        if !requested.is_empty() {
            return None;
        }
        match self {
            EmptyAddressPolicy::Approve => None,
            EmptyAddressPolicy::Deny => Some(Decision::Deny),
        }
    }
}
