//! # SSH certificates
//!
//! Signs OpenSSH user and host certificates with the authority's key. The
//! key service signs the certificate body through [`SshCaSigner`], which pins
//! the signature algorithm the certificate declares.

use std::collections::BTreeMap;

use rsa::signature;
use ssh_key::certificate::{Builder, CertType};
use ssh_key::public::KeyData;
use ssh_key::rand_core::{OsRng, RngCore};
use ssh_key::{Algorithm, Certificate, PublicKey};
use time::OffsetDateTime;

use crate::error::{CloudPkiError, Result};
use crate::policy::parse_timestamp;
use crate::profile::{Constraints, SshCertificateKind, SshProfile};
use crate::signer::{SignatureAlgorithm, Signer};

/// `valid_before` of a certificate that never expires.
///
/// The largest timestamp `ssh-key` accepts; OpenSSH reads anything this far
/// out as no expiry.
pub const NEVER_EXPIRES: u64 = i64::MAX as u64;

/// What to certify and how.
#[derive(Clone, Debug)]
pub struct SshCertificateRequest {
    pub public_key: PublicKey,
    pub kind: SshCertificateKind,
    pub key_id: String,
    pub principals: Vec<String>,
    pub critical_options: BTreeMap<String, String>,
    pub extensions: BTreeMap<String, String>,
    pub valid_after: u64,
    pub valid_before: u64,
}

impl SshCertificateRequest {
    /// Parses an authorized-keys line.
    pub fn parse_public_key(line: &str) -> Result<PublicKey> {
        PublicKey::from_openssh(line.trim())
            .map_err(|e| CloudPkiError::InvalidInput(format!("SSH public key: {e}")))
    }

    pub fn from_profile(
        public_key: PublicKey,
        profile: &SshProfile,
        constraints: Option<&Constraints>,
    ) -> Result<Self> {
        Self::from_profile_at(public_key, profile, constraints, OffsetDateTime::now_utc())
    }

    /// Fills the request from the profile's `ssh` block.
    ///
    /// Without a `validity` the certificate is valid from the epoch on and
    /// never expires. `nbf`/`expires` in `constraints` override either bound.
    pub fn from_profile_at(
        public_key: PublicKey,
        profile: &SshProfile,
        constraints: Option<&Constraints>,
        now: OffsetDateTime,
    ) -> Result<Self> {
        let (mut valid_after, mut valid_before) = match profile.validity {
            Some(seconds) => {
                let start = unix_seconds(now)?;
                (start, start.saturating_add(seconds).min(NEVER_EXPIRES))
            }
            None => (0, NEVER_EXPIRES),
        };
        if let Some(constraints) = constraints {
            if let Some(start) = constraints.not_before.as_deref() {
                valid_after = unix_seconds(parse_timestamp(start)?)?;
            }
            if let Some(end) = constraints.expires.as_deref() {
                valid_before = unix_seconds(parse_timestamp(end)?)?.min(NEVER_EXPIRES);
            }
        }

        let key_id = profile
            .key_id
            .clone()
            .unwrap_or_else(|| public_key.comment().to_string());

        Ok(Self {
            public_key,
            kind: profile.kind,
            key_id,
            principals: profile.principals.clone(),
            critical_options: profile.critical_options.clone(),
            extensions: profile.extensions.clone(),
            valid_after,
            valid_before,
        })
    }
}

fn unix_seconds(at: OffsetDateTime) -> Result<u64> {
    u64::try_from(at.unix_timestamp())
        .map_err(|_| CloudPkiError::ConfigurationError(format!("{at} is before the Unix epoch")))
}

/// A certificate ready to be signed.
#[derive(Clone, Debug)]
pub struct SshCertificateTemplate {
    pub request: SshCertificateRequest,
    pub serial: u64,
}

impl SshCertificateTemplate {
    pub fn build(request: SshCertificateRequest) -> Result<Self> {
        if request.valid_after > request.valid_before {
            return Err(CloudPkiError::ConfigurationError(format!(
                "SSH validity starts ({}) after it ends ({})",
                request.valid_after, request.valid_before
            )));
        }
        Ok(Self {
            request,
            serial: OsRng.next_u64(),
        })
    }

    /// Signs the certificate with `signer` using `algorithm`.
    pub fn sign(&self, signer: &dyn Signer, algorithm: SignatureAlgorithm) -> Result<Certificate> {
        let ca = SshCaSigner::new(signer, algorithm)?;
        let request = &self.request;

        let mut builder = Builder::new_with_random_nonce(
            &mut OsRng,
            request.public_key.key_data().clone(),
            request.valid_after,
            request.valid_before,
        )?;
        builder.serial(self.serial)?;
        builder.key_id(&request.key_id)?;
        builder.cert_type(match request.kind {
            SshCertificateKind::User => CertType::User,
            SshCertificateKind::Host => CertType::Host,
        })?;
        if request.principals.is_empty() {
            builder.all_principals_valid()?;
        }
        for principal in &request.principals {
            builder.valid_principal(principal)?;
        }
        for (name, data) in &request.critical_options {
            builder.critical_option(name, data)?;
        }
        for (name, data) in &request.extensions {
            builder.extension(name, data)?;
        }
        builder.comment(request.public_key.comment())?;

        let certificate = builder.sign(&ca)?;
        tracing::info!(
            serial = self.serial,
            key_id = %request.key_id,
            principals = ?request.principals,
            "signed SSH certificate"
        );
        Ok(certificate)
    }
}

/// Adapts a [`Signer`] to the SSH signing interface with a fixed algorithm.
pub struct SshCaSigner<'a> {
    signer: &'a dyn Signer,
    algorithm: SignatureAlgorithm,
    key_data: KeyData,
}

impl<'a> SshCaSigner<'a> {
    pub fn new(signer: &'a dyn Signer, algorithm: SignatureAlgorithm) -> Result<Self> {
        algorithm.ssh_name()?;
        Ok(Self {
            signer,
            algorithm,
            key_data: signer.public_key().to_ssh_key_data()?,
        })
    }
}

impl signature::Signer<ssh_key::Signature> for SshCaSigner<'_> {
    fn try_sign(&self, msg: &[u8]) -> std::result::Result<ssh_key::Signature, signature::Error> {
        let hash = self
            .algorithm
            .ssh_hash()
            .map_err(signature::Error::from_source)?;
        let blob = self
            .signer
            .sign_with_algorithm(msg, self.algorithm)
            .map_err(signature::Error::from_source)?;
        ssh_key::Signature::new(Algorithm::Rsa { hash: Some(hash) }, blob)
            .map_err(signature::Error::from_source)
    }
}

impl<'a> From<&SshCaSigner<'a>> for KeyData {
    fn from(signer: &SshCaSigner<'a>) -> KeyData {
        signer.key_data.clone()
    }
}

/// Renders `"<cert-type> <base64>\n"`, the authorized-keys form without a comment.
pub fn marshal_certificate(certificate: &Certificate) -> Result<String> {
    let openssh = certificate.to_openssh()?;
    let mut fields = openssh.split_whitespace();
    match (fields.next(), fields.next()) {
        (Some(algorithm), Some(body)) => Ok(format!("{algorithm} {body}\n")),
        _ => Err(CloudPkiError::EncodingError(
            "malformed OpenSSH certificate encoding".to_string(),
        )),
    }
}

/// The authority's public key as an authorized-keys line.
pub fn authorized_key(signer: &dyn Signer) -> Result<String> {
    let key = PublicKey::from(signer.public_key().to_ssh_key_data()?);
    Ok(format!("{}\n", key.to_openssh()?))
}
