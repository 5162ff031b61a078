//! PKCS#10 certificate request decoding
//!
//! Extracts the two claims the approver checks: the subject common name and
//! the IP addresses requested as Subject Alternative Names. The request
//! signature is not verified here; the API server already did that on create.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

/// Identity claims carried by a certificate request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedRequest {
    /// Subject common name (empty when the subject has none)
    pub common_name: String,
    /// IP addresses requested as SANs
    pub requested_addresses: HashSet<IpAddr>,
}

/// Decode a certificate request, PEM-armored or raw DER
///
/// The first PEM block is used when the input parses as PEM; otherwise the
/// whole input is treated as DER.
pub fn decode_request(data: &[u8]) -> Result<ParsedRequest> {
    match ::pem::parse(data) {
        Ok(block) => parse_der(block.contents()),
        Err(_) => parse_der(data),
    }
}

fn parse_der(der: &[u8]) -> Result<ParsedRequest> {
    let (rest, csr) = X509CertificationRequest::from_der(der)
        .map_err(|e| Error::decode(format!("invalid PKCS#10 request: {}", e)))?;
    if !rest.is_empty() {
        return Err(Error::decode(format!(
            "{} trailing bytes after certificate request",
            rest.len()
        )));
    }

    // Kubernetes takes the last CN; more than one cannot name a single instance
    let mut common_names = csr.certification_request_info.subject.iter_common_name();
    let first = common_names.next();
    if common_names.next().is_some() {
        return Err(Error::decode("subject carries more than one common name"));
    }

    let common_name = first
        .map(|cn| {
            cn.as_str()
                .map(str::to_string)
                .map_err(|e| Error::decode(format!("common name is not a string: {}", e)))
        })
        .transpose()?
        .unwrap_or_default();

    let mut requested_addresses = HashSet::new();
    if let Some(extensions) = csr.requested_extensions() {
        for ext in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = ext {
                for name in &san.general_names {
                    if let GeneralName::IPAddress(raw) = name {
                        requested_addresses.insert(ip_from_bytes(raw)?);
                    }
                }
            }
        }
    }

    Ok(ParsedRequest {
        common_name,
        requested_addresses,
    })
}

/// Convert a SAN iPAddress octet string into a canonical address
///
/// IPv4-mapped IPv6 addresses collapse to IPv4 so that `::ffff:10.0.0.1`
/// and `10.0.0.1` compare equal.
fn ip_from_bytes(raw: &[u8]) -> Result<IpAddr> {
    match raw.len() {
        4 => {
            let octets: [u8; 4] = raw
                .try_into()
                .map_err(|_| Error::decode("invalid IPv4 SAN"))?;
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = raw
                .try_into()
                .map_err(|_| Error::decode("invalid IPv6 SAN"))?;
            Ok(IpAddr::V6(Ipv6Addr::from(octets)).to_canonical())
        }
        n => Err(Error::decode(format!("IP SAN has invalid length {}", n))),
    }
}
