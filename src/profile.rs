//! Authority profile and constraints documents.
//!
//! Profiles are YAML. A minimal one names the signing key and a subject:
//!
//! ```yaml
//! signer:
//!   keyid: projects/p/locations/global/keyRings/ca/cryptoKeys/root/cryptoKeyVersions/1
//! subject:
//!   CN: Example Root CA
//! constraints:
//!   usage: [keyCertSign, cRLSign]
//!   ca:
//!     issuer: true
//!     path-length: 1
//! ```

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::cert::Certificate;
use crate::cert::extensions::SubjectAltName;
use crate::cert::params::DistinguishedName;
use crate::error::{CloudPkiError, Result};
use crate::signer::SignatureAlgorithm;

fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        CloudPkiError::ConfigurationError(format!("reading {}: {e}", path.display()))
    })?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// A certificate authority profile.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityProfile {
    pub defaults: Defaults,
    pub signer: SignerConfig,
    pub subject: DistinguishedName,
    pub constraints: Constraints,
    pub names: Names,
    pub aia: AiaConfig,
    pub crl: CrlConfig,
    pub ssh: SshProfile,
}

impl AuthorityProfile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_document(path.as_ref())
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads the issuer certificate named by `signer.certificate`.
    pub fn issuer_certificate(&self) -> Result<Certificate> {
        let path = self.signer.certificate.as_ref().ok_or_else(|| {
            CloudPkiError::MissingIssuerCertificate(
                "No certificate specified for signer.".to_string(),
            )
        })?;
        let pem = std::fs::read_to_string(path).map_err(|e| {
            CloudPkiError::MissingIssuerCertificate(format!("reading {}: {e}", path.display()))
        })?;
        Certificate::from_pem(&pem)
    }

    /// URLs this profile contributes to the certificates it is the overlay source for.
    ///
    /// The `aia` and `crl` blocks win; the signer's own lists fill in when they are empty.
    pub fn distribution_points(&self) -> DistributionPoints {
        let pick = |primary: &Vec<String>, fallback: &Vec<String>| {
            if primary.is_empty() {
                fallback.clone()
            } else {
                primary.clone()
            }
        };
        DistributionPoints {
            issuing_certificate_urls: pick(&self.aia.urls, &self.signer.urls),
            ocsp_servers: pick(&self.aia.ocsp, &self.signer.ocsp),
            crl_urls: pick(&self.crl.urls, &self.signer.crls),
            cps_urls: self.signer.cps.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defaults {
    /// Default certificate lifetime in days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<u32>,
}

/// Which implementation holds the signing key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignerBackend {
    #[default]
    Kms,
    Local,
}

/// The `signer` block: key reference and the URLs published for it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Key version resource name at the key-management service.
    pub keyid: String,
    pub backend: SignerBackend,
    /// PEM private key, used by the local backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,
    /// The signer's own certificate, required for chained issuance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<PathBuf>,
    pub algorithm: SignatureAlgorithm,
    pub urls: Vec<String>,
    pub crls: Vec<String>,
    pub ocsp: Vec<String>,
    pub cps: Vec<String>,
    pub kms: KmsConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KmsConfig {
    pub endpoint: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Environment variable holding the OAuth bearer token.
    pub token_env: String,
    pub retry: RetryConfig,
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://cloudkms.googleapis.com".to_string(),
            timeout: Duration::from_secs(30),
            token_env: "CLOUDPKI_ACCESS_TOKEN".to_string(),
            retry: RetryConfig::default(),
        }
    }
}

/// Bounded retry settings for remote calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Policy constraints, either embedded in a profile or loaded as a standalone document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    #[serde(rename = "nbf", skip_serializing_if = "Option::is_none")]
    pub not_before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Vec<String>>,
    #[serde(rename = "extendedUsage", skip_serializing_if = "Option::is_none")]
    pub extended_usage: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<CaConstraints>,
}

impl Constraints {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_document(path.as_ref())
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Lays `overrides` over `self`; every field present in `overrides` wins.
    pub fn overlay(&self, overrides: &Constraints) -> Constraints {
        Constraints {
            not_before: overrides.not_before.clone().or_else(|| self.not_before.clone()),
            expires: overrides.expires.clone().or_else(|| self.expires.clone()),
            usage: overrides.usage.clone().or_else(|| self.usage.clone()),
            extended_usage: overrides
                .extended_usage
                .clone()
                .or_else(|| self.extended_usage.clone()),
            ca: overrides.ca.or(self.ca),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaConstraints {
    #[serde(default)]
    pub issuer: bool,
    /// Negative leaves the path length unset.
    #[serde(rename = "path-length", default = "unset_path_length")]
    pub path_length: i64,
}

fn unset_path_length() -> i64 {
    -1
}

/// Names placed into generated certificate requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Names {
    /// Untyped entries, classified by their shape.
    pub san: Vec<String>,
    pub dns: Vec<String>,
    pub email: Vec<String>,
}

impl Names {
    pub fn subject_alt_name(&self) -> SubjectAltName {
        let mut san = SubjectAltName {
            dns_names: self.dns.clone(),
            email_addresses: self.email.clone(),
            ..Default::default()
        };
        for entry in &self.san {
            if let Ok(ip) = entry.parse::<IpAddr>() {
                san.ip_addresses.push(ip);
            } else if entry.contains("://") {
                san.uris.push(entry.clone());
            } else if entry.contains('@') {
                san.email_addresses.push(entry.clone());
            } else {
                san.dns_names.push(entry.clone());
            }
        }
        san
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiaConfig {
    pub urls: Vec<String>,
    pub ocsp: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrlConfig {
    pub urls: Vec<String>,
}

/// URL lists written into a certificate's AIA, CRL and policy extensions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistributionPoints {
    pub issuing_certificate_urls: Vec<String>,
    pub ocsp_servers: Vec<String>,
    pub crl_urls: Vec<String>,
    pub cps_urls: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SshCertificateKind {
    #[default]
    User,
    Host,
}

/// The `ssh` block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshProfile {
    #[serde(rename = "type")]
    pub kind: SshCertificateKind,
    pub principals: Vec<String>,
    pub extensions: BTreeMap<String, String>,
    pub critical_options: BTreeMap<String, String>,
    /// Lifetime in seconds from the moment of signing; absent means forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}
