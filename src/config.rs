//! Configuration file
//!
//! ```yaml
//! kubeconfig_path: /etc/kubernetes/approver.kubeconfig   # optional, inferred otherwise
//! instance_name_layout: "system:node:(.[^ ]*)"           # optional
//! empty_address_policy: approve                          # approve | deny
//! cloud:
//!   provider: yandex
//!   folder_id: b1g0000000000000000
//!   service_account_key_path: /etc/approver/sa-key.json
//! ```
//!
//! For clusters without a cloud API the inventory can be given inline:
//!
//! ```yaml
//! cloud:
//!   provider: static
//!   instances:
//!     worker-1: ["10.0.0.11"]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::cloud::{
    IamTokenSource, ServiceAccountKey, StaticInventory, YandexResolver, DEFAULT_COMPUTE_ENDPOINT,
    DEFAULT_IAM_ENDPOINT,
};
use crate::controller::AuthorityResolver;
use crate::decision::EmptyAddressPolicy;
use crate::identity::IdentityExtractor;
use crate::{Error, Result, DEFAULT_INSTANCE_NAME_PATTERN};

/// Top-level approver configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Kubeconfig file; in-cluster / default config when absent
    #[serde(default)]
    pub kubeconfig_path: Option<PathBuf>,

    /// Pattern with one capture group extracting the instance name from the CN
    #[serde(default = "default_instance_name_layout")]
    pub instance_name_layout: String,

    /// Handling of requests without IP SANs
    #[serde(default)]
    pub empty_address_policy: EmptyAddressPolicy,

    /// Source of authoritative instance addresses
    pub cloud: CloudConfig,
}

fn default_instance_name_layout() -> String {
    DEFAULT_INSTANCE_NAME_PATTERN.to_string()
}

/// Cloud provider selection
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum CloudConfig {
    /// Yandex Cloud Compute
    Yandex(YandexConfig),
    /// Fixed inventory
    Static(StaticConfig),
}

/// Yandex Cloud settings
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YandexConfig {
    /// Folder the cluster's instances live in
    pub folder_id: String,
    /// Path to the service account authorized key JSON
    #[serde(default)]
    pub service_account_key_path: Option<PathBuf>,
    /// Authorized key JSON given inline
    #[serde(default)]
    pub service_account_key: Option<String>,
    /// Compute API endpoint
    #[serde(default = "default_compute_endpoint")]
    pub compute_endpoint: String,
    /// IAM API endpoint
    #[serde(default = "default_iam_endpoint")]
    pub iam_endpoint: String,
}

fn default_compute_endpoint() -> String {
    DEFAULT_COMPUTE_ENDPOINT.to_string()
}

fn default_iam_endpoint() -> String {
    DEFAULT_IAM_ENDPOINT.to_string()
}

impl fmt::Debug for YandexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YandexConfig")
            .field("folder_id", &self.folder_id)
            .field("service_account_key_path", &self.service_account_key_path)
            .field(
                "service_account_key",
                &self.service_account_key.as_ref().map(|_| "<redacted>"),
            )
            .field("compute_endpoint", &self.compute_endpoint)
            .field("iam_endpoint", &self.iam_endpoint)
            .finish()
    }
}

impl YandexConfig {
    /// Load the service account key from the inline value or the key file
    pub fn service_account_key(&self) -> Result<ServiceAccountKey> {
        match (&self.service_account_key, &self.service_account_key_path) {
            (Some(inline), None) => ServiceAccountKey::from_json(inline.as_bytes()),
            (None, Some(path)) => {
                let data = std::fs::read(path).map_err(|e| {
                    Error::config(format!(
                        "failed to read service account key {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                ServiceAccountKey::from_json(&data)
            }
            _ => Err(Error::config(
                "exactly one of service_account_key and service_account_key_path must be set",
            )),
        }
    }
}

/// Fixed inventory settings
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticConfig {
    /// Instance name → addresses
    pub instances: BTreeMap<String, Vec<IpAddr>>,
}

impl Config {
    /// Read, parse and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        IdentityExtractor::new(&self.instance_name_layout)?;

        match &self.cloud {
            CloudConfig::Yandex(yandex) => {
                if yandex.folder_id.trim().is_empty() {
                    return Err(Error::config("cloud.folder_id must not be empty"));
                }
                if yandex.service_account_key.is_some() == yandex.service_account_key_path.is_some()
                {
                    return Err(Error::config(
                        "exactly one of service_account_key and service_account_key_path must be set",
                    ));
                }
            }
            CloudConfig::Static(inventory) => {
                if inventory.instances.is_empty() {
                    return Err(Error::config("cloud.instances must not be empty"));
                }
            }
        }
        Ok(())
    }

    /// Compiled instance name extractor
    pub fn identity_extractor(&self) -> Result<IdentityExtractor> {
        IdentityExtractor::new(&self.instance_name_layout)
    }

    /// Build the configured address resolver
    pub fn build_resolver(&self) -> Result<Arc<dyn AuthorityResolver>> {
        match &self.cloud {
            CloudConfig::Yandex(yandex) => {
                let key = yandex.service_account_key()?;
                let tokens = IamTokenSource::new(&key, yandex.iam_endpoint.clone())?;
                Ok(Arc::new(YandexResolver::new(
                    yandex.folder_id.clone(),
                    yandex.compute_endpoint.clone(),
                    Arc::new(tokens),
                )))
            }
            CloudConfig::Static(inventory) => {
                Ok(Arc::new(StaticInventory::new(inventory.instances.clone())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PRIVATE_KEY: &str = include_str!("../testdata/sa-key.pem");

    #[test]
    fn minimal_yandex_config_gets_defaults() {
        let config = Config::from_yaml(
            r#"
cloud:
  provider: yandex
  folder_id: b1gfolder
  service_account_key_path: /etc/approver/sa-key.json
"#,
        )
        .unwrap();

        assert_eq!(config.kubeconfig_path, None);
        assert_eq!(config.instance_name_layout, DEFAULT_INSTANCE_NAME_PATTERN);
        assert_eq!(config.empty_address_policy, EmptyAddressPolicy::Approve);
        match config.cloud {
            CloudConfig::Yandex(y) => {
                assert_eq!(y.folder_id, "b1gfolder");
                assert_eq!(y.compute_endpoint, DEFAULT_COMPUTE_ENDPOINT);
                assert_eq!(y.iam_endpoint, DEFAULT_IAM_ENDPOINT);
            }
            other => panic!("expected yandex config, got {other:?}"),
        }
    }

    #[test]
    fn static_config_parses_addresses() {
        let config = Config::from_yaml(
            r#"
kubeconfig_path: /etc/kubernetes/admin.conf
instance_name_layout: "^system:node:(.+)$"
empty_address_policy: deny
cloud:
  provider: static
  instances:
    worker-1: ["10.0.0.11", "fd00::11"]
"#,
        )
        .unwrap();

        assert_eq!(
            config.kubeconfig_path.as_deref(),
            Some(Path::new("/etc/kubernetes/admin.conf"))
        );
        assert_eq!(config.empty_address_policy, EmptyAddressPolicy::Deny);
        assert_eq!(
            config.identity_extractor().unwrap().extract("system:node:worker-1").unwrap(),
            "worker-1"
        );
    }

    #[tokio::test]
    async fn static_config_builds_inventory_resolver() {
        let config = Config::from_yaml(
            r#"
cloud:
  provider: static
  instances:
    worker-1: ["10.0.0.11"]
"#,
        )
        .unwrap();

        let resolver = config.build_resolver().unwrap();
        let addresses = resolver.resolve_addresses("worker-1").await.unwrap();
        assert!(addresses.contains(&"10.0.0.11".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = Config::from_yaml(
            r#"
instance_name_layout: "system:node:.*"
cloud:
  provider: static
  instances:
    worker-1: ["10.0.0.11"]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn both_key_sources_are_rejected() {
        let err = Config::from_yaml(
            r#"
cloud:
  provider: yandex
  folder_id: b1gfolder
  service_account_key: "{}"
  service_account_key_path: /etc/approver/sa-key.json
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn empty_folder_is_rejected() {
        let err = Config::from_yaml(
            r#"
cloud:
  provider: yandex
  folder_id: ""
  service_account_key_path: /etc/approver/sa-key.json
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("folder_id"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = Config::from_yaml(
            r#"
cloud:
  provider: aws
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let err = Config::from_yaml(
            r#"
aim_json: "{}"
cloud:
  provider: static
  instances:
    worker-1: ["10.0.0.11"]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("aim_json"));
    }

    #[test]
    fn debug_output_redacts_inline_key() {
        let config = Config::from_yaml(&format!(
            "cloud:\n  provider: yandex\n  folder_id: b1gfolder\n  service_account_key: '{}'\n",
            serde_json::json!({
                "id": "ajekey123",
                "service_account_id": "ajesa456",
                "private_key": PRIVATE_KEY,
            })
        ))
        .unwrap();

        let debug = format!("{:?}", config);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("PRIVATE KEY"));
    }

    #[test]
    fn key_is_loaded_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "{}",
            serde_json::json!({
                "id": "ajekey123",
                "service_account_id": "ajesa456",
                "private_key": PRIVATE_KEY,
            })
        )
        .unwrap();

        let config = Config::from_yaml(&format!(
            "cloud:\n  provider: yandex\n  folder_id: b1gfolder\n  service_account_key_path: {}\n",
            file.path().display()
        ))
        .unwrap();

        let CloudConfig::Yandex(yandex) = &config.cloud else {
            panic!("expected yandex config");
        };
        assert_eq!(yandex.service_account_key().unwrap().id, "ajekey123");
        assert!(config.build_resolver().is_ok());
    }

    #[test]
    fn missing_config_file_is_config_error() {
        let err = Config::load(Path::new("/nonexistent/approver.yaml")).unwrap_err();
        assert!(err.is_fatal());
    }
}
