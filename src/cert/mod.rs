pub mod extensions;
pub mod params;
pub mod request;
pub mod template;

use der::{Decode, Encode};
use extensions::{
    AuthorityInfoAccess, AuthorityKeyIdentifier, BasicConstraints, CertificatePolicies,
    CrlDistributionPoints, ExtendedKeyUsage, KeyUsage, SubjectAltName, SubjectKeyIdentifier,
    ToAndFromX509Extension,
};
use x509_cert::name::Name;

use crate::error::Result;
use crate::key::PublicKey;
use crate::pem_utils::{der_to_pem, pem_to_der};
use crate::signer::SignatureAlgorithm;

const CERTIFICATE_PEM_LABEL: &str = "CERTIFICATE";

/// Represents a signed X.509 certificate.
///
/// This struct provides methods to encode the certificate into DER or PEM
/// formats and typed access to the extensions issuance writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// The inner representation of the certificate.
    pub inner: x509_cert::Certificate,
}

impl Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: x509_cert::Certificate::from_der(der)?,
        })
    }

    /// Parses a PEM block labeled `CERTIFICATE`.
    pub fn from_pem(pem: &str) -> Result<Self> {
        Self::from_der(&pem_to_der(pem, CERTIFICATE_PEM_LABEL)?)
    }

    /// Encodes the certificate into DER format.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.inner.to_der()?)
    }

    /// Encodes the certificate into PEM format.
    pub fn to_pem(&self) -> Result<String> {
        Ok(der_to_pem(&self.to_der()?, CERTIFICATE_PEM_LABEL))
    }

    pub fn subject(&self) -> &Name {
        &self.inner.tbs_certificate.subject
    }

    pub fn issuer(&self) -> &Name {
        &self.inner.tbs_certificate.issuer
    }

    /// DER encoding of the subject name.
    pub fn raw_subject(&self) -> Result<Vec<u8>> {
        Ok(self.subject().to_der()?)
    }

    /// DER encoding of the issuer name.
    pub fn raw_issuer(&self) -> Result<Vec<u8>> {
        Ok(self.issuer().to_der()?)
    }

    /// Serial number content octets, including any leading zero.
    pub fn serial_number(&self) -> &[u8] {
        self.inner.tbs_certificate.serial_number.as_bytes()
    }

    pub fn validity(&self) -> Result<params::Validity> {
        params::Validity::from_x509_validity(&self.inner.tbs_certificate.validity)
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_x509spki(&self.inner.tbs_certificate.subject_public_key_info)
    }

    /// Decodes extension `E`, if the certificate carries it.
    pub fn extension<E: ToAndFromX509Extension>(&self) -> Result<Option<E>> {
        let extensions = self
            .inner
            .tbs_certificate
            .extensions
            .as_deref()
            .unwrap_or_default();
        E::find_in(extensions)
    }

    /// Whether extension `E` is present and marked critical.
    pub fn is_critical<E: ToAndFromX509Extension>(&self) -> bool {
        self.inner
            .tbs_certificate
            .extensions
            .iter()
            .flatten()
            .any(|ext| ext.extn_id == E::OID && ext.critical)
    }

    pub fn subject_key_identifier(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.extension::<SubjectKeyIdentifier>()?.map(|ski| ski.0))
    }

    pub fn authority_key_identifier(&self) -> Result<Option<Vec<u8>>> {
        Ok(self
            .extension::<AuthorityKeyIdentifier>()?
            .map(|aki| aki.key_identifier))
    }

    pub fn key_usage(&self) -> Result<Option<KeyUsage>> {
        self.extension()
    }

    pub fn extended_key_usage(&self) -> Result<Option<ExtendedKeyUsage>> {
        self.extension()
    }

    pub fn basic_constraints(&self) -> Result<Option<BasicConstraints>> {
        self.extension()
    }

    pub fn subject_alt_name(&self) -> Result<Option<SubjectAltName>> {
        self.extension()
    }

    pub fn crl_distribution_points(&self) -> Result<Option<CrlDistributionPoints>> {
        self.extension()
    }

    pub fn authority_info_access(&self) -> Result<Option<AuthorityInfoAccess>> {
        self.extension()
    }

    pub fn certificate_policies(&self) -> Result<Option<CertificatePolicies>> {
        self.extension()
    }

    /// Checks the certificate signature against `issuer_key`.
    pub fn verify_signature(&self, issuer_key: &PublicKey) -> Result<()> {
        let algorithm = SignatureAlgorithm::from_oid(self.inner.signature_algorithm.oid)?;
        let tbs = self.inner.tbs_certificate.to_der()?;
        algorithm.verify(issuer_key, &tbs, self.inner.signature.raw_bytes())
    }
}
