//! Machine Approver - automatic approval of node serving certificate requests
//!
//! Kubelets joining a cluster request serving certificates bound to IP addresses.
//! Anyone holding a bootstrap credential can ask for any address, so each request
//! is cross-checked against the addresses the cloud provider reports for the
//! matching compute instance before a verdict is written back.
//!
//! # Pipeline
//!
//! Event source → [`controller`] → [`csr`] → [`identity`] → resolver → [`decision`] → dispatcher
//!
//! # Modules
//!
//! - [`controller`] - Capability traits and the sequential controller loop
//! - [`csr`] - PKCS#10 request decoding (subject CN and IP SANs)
//! - [`identity`] - Instance name extraction from the subject CN
//! - [`decision`] - Pure approve/deny comparison
//! - [`k8s`] - Kubernetes watch source and approval dispatcher
//! - [`cloud`] - Cloud address resolvers (Yandex Cloud, static inventory)
//! - [`config`] - Configuration file model
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cloud;
pub mod config;
pub mod controller;
pub mod csr;
pub mod decision;
pub mod error;
pub mod identity;
pub mod k8s;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default pattern capturing the instance name from a kubelet's subject CN
///
/// Kubelets request certificates as `system:node:<node-name>`; the node name
/// is expected to equal the compute instance name.
pub const DEFAULT_INSTANCE_NAME_PATTERN: &str = "system:node:(.[^ ]*)";

/// Field manager of verdict patches, also named in the condition message
pub const APPROVER_NAME: &str = "machine-approver";
