//! PKCS#10 certificate requests: parsing incoming CSRs and producing the
//! authority's own request.

use const_oid::AssociatedOid;
use der::asn1::{Any, BitString, SetOfVec};
use der::{Decode, Encode};
use x509_cert::attr::Attribute;
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::request::{CertReq, CertReqInfo, ExtensionReq, Version};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use super::extensions::{SubjectAltName, ToAndFromX509Extension};
use crate::error::Result;
use crate::key::PublicKey;
use crate::pem_utils::{der_to_pem, pem_to_der};
use crate::profile::AuthorityProfile;
use crate::signer::{SignatureAlgorithm, Signer};

pub const CSR_PEM_LABEL: &str = "CERTIFICATE REQUEST";

/// A parsed certificate signing request.
///
/// The subject is kept as the decoded `Name`, which re-encodes to the same DER.
/// Requested extensions other than the subject alternative name are kept
/// verbatim in [`CertificateRequest::extensions`].
#[derive(Clone, Debug)]
pub struct CertificateRequest {
    inner: CertReq,
    subject_alt_name: SubjectAltName,
    extensions: Vec<Extension>,
}

impl CertificateRequest {
    pub fn from_pem(pem: &str) -> Result<Self> {
        Self::from_der(&pem_to_der(pem, CSR_PEM_LABEL)?)
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = CertReq::from_der(der)?;

        let mut subject_alt_name = SubjectAltName::default();
        let mut extensions = Vec::new();
        for requested in requested_extensions(&inner.info)? {
            if requested.extn_id == SubjectAltName::OID {
                // name forms outside SubjectAltName are passed through untouched
                if let Ok(san) =
                    SubjectAltName::from_x509_extension_value(requested.extn_value.as_bytes())
                {
                    subject_alt_name = san;
                    continue;
                }
            }
            extensions.push(requested);
        }

        Ok(Self {
            inner,
            subject_alt_name,
            extensions,
        })
    }

    pub fn subject(&self) -> &Name {
        &self.inner.info.subject
    }

    pub fn raw_subject(&self) -> Result<Vec<u8>> {
        Ok(self.inner.info.subject.to_der()?)
    }

    pub fn public_key_info(&self) -> &SubjectPublicKeyInfoOwned {
        &self.inner.info.public_key
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_x509spki(&self.inner.info.public_key)
    }

    pub fn subject_alt_name(&self) -> &SubjectAltName {
        &self.subject_alt_name
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    /// Checks the request's self-signature with the key it carries.
    pub fn verify_signature(&self) -> Result<()> {
        let algorithm = SignatureAlgorithm::from_oid(self.inner.algorithm.oid)?;
        let info = self.inner.info.to_der()?;
        algorithm.verify(
            &self.public_key()?,
            &info,
            self.inner.signature.raw_bytes(),
        )
    }

    pub fn to_pem(&self) -> Result<String> {
        Ok(der_to_pem(&self.inner.to_der()?, CSR_PEM_LABEL))
    }
}

fn requested_extensions(info: &CertReqInfo) -> Result<Vec<Extension>> {
    let mut extensions = Vec::new();
    for attribute in info.attributes.iter() {
        if attribute.oid != ExtensionReq::OID {
            continue;
        }
        for value in attribute.values.iter() {
            extensions.extend(ExtensionReq::from_der(&value.to_der()?)?.0);
        }
    }
    Ok(extensions)
}

/// Builds a request for the profile's subject and names, signed by `signer`.
///
/// The request's public key is the signer's, so the resulting CSR can be
/// submitted to a parent authority or self-signed with `--selfsigned`.
pub fn create_request(
    profile: &AuthorityProfile,
    signer: &dyn Signer,
    algorithm: SignatureAlgorithm,
) -> Result<CertificateRequest> {
    let san = profile.names.subject_alt_name();
    let extensions = if san.is_empty() {
        Vec::new()
    } else {
        vec![san.to_extension(false)?]
    };
    sign_request(
        profile.subject.as_x509_name()?,
        extensions,
        signer,
        algorithm,
    )
}

/// Signs a request for `subject` carrying `extensions` in an extensionRequest attribute.
pub(crate) fn sign_request(
    subject: Name,
    extensions: Vec<Extension>,
    signer: &dyn Signer,
    algorithm: SignatureAlgorithm,
) -> Result<CertificateRequest> {
    let mut attributes = Vec::new();
    if !extensions.is_empty() {
        let request = ExtensionReq(extensions);
        attributes.push(Attribute {
            oid: ExtensionReq::OID,
            values: SetOfVec::try_from(vec![Any::encode_from(&request)?])?,
        });
    }

    let info = CertReqInfo {
        version: Version::V1,
        subject,
        public_key: signer.public_key().to_x509spki()?,
        attributes: SetOfVec::try_from(attributes)?,
    };
    let signature = signer.sign_with_algorithm(&info.to_der()?, algorithm)?;
    let request = CertReq {
        info,
        algorithm: algorithm.into(),
        signature: BitString::from_bytes(&signature)?,
    };

    // round trip so the result carries the parsed views
    CertificateRequest::from_der(&request.to_der()?)
}
