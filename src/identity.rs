//! Instance name extraction from a certificate subject
//!
//! The subject common name of a kubelet request carries the node name
//! (`system:node:<name>`). A configured pattern with a single capture group
//! pulls the compute instance name out of it.

use regex::Regex;

use crate::{Error, Result};

/// Extracts the instance name from a subject common name
#[derive(Clone, Debug)]
pub struct IdentityExtractor {
    pattern: Regex,
}

impl IdentityExtractor {
    /// Compile the extraction pattern
    ///
    /// The pattern must contain exactly one capture group.
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::config(format!("invalid instance name pattern: {}", e)))?;

        // captures_len counts the implicit whole-match group
        let groups = pattern.captures_len() - 1;
        if groups != 1 {
            return Err(Error::config(format!(
                "instance name pattern {:?} must have exactly one capture group, found {}",
                pattern.as_str(),
                groups
            )));
        }

        Ok(Self { pattern })
    }

    /// The compiled pattern source
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Extract the instance name from a common name
    ///
    /// Fails with [`Error::IdentityNotFound`] when the pattern does not match
    /// or captures an empty string.
    pub fn extract(&self, common_name: &str) -> Result<String> {
        self.pattern
            .captures(common_name)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::identity_not_found(common_name))
    }
}
