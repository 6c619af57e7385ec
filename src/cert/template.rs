//! Certificate templates: everything a certificate carries before it is signed.

use der::Encode;
use der::asn1::BitString;
use der::flagset::FlagSet;
use x509_cert::Version;
use x509_cert::certificate::TbsCertificate;
use x509_cert::ext::Extension;
use x509_cert::ext::pkix::KeyUsages;
use x509_cert::name::Name;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use super::Certificate;
use super::extensions::{
    AuthorityInfoAccess, AuthorityKeyIdentifier, BasicConstraints, CertificatePolicies,
    CrlDistributionPoints, ExtendedKeyUsage, ExtendedKeyUsageOption, KeyUsage, SubjectAltName,
    SubjectKeyIdentifier, ToAndFromX509Extension,
};
use super::params::Validity;
use super::request::CertificateRequest;
use crate::error::{CloudPkiError, Result};
use crate::key::{KeyIdentifier, PublicKey};
use crate::policy::ResolvedPolicy;
use crate::profile::DistributionPoints;
use crate::serial::{Serial, hex, next_serial};
use crate::signer::{SignatureAlgorithm, Signer};

/// The parts of an issuer certificate a chained template links to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuerCertificate {
    pub subject: Name,
    pub key_identifier: Vec<u8>,
}

impl IssuerCertificate {
    pub fn new(subject: Name, key_identifier: Vec<u8>) -> Self {
        Self {
            subject,
            key_identifier,
        }
    }

    /// Takes subject and key identifier from `certificate`. A certificate
    /// without a subject key identifier cannot be linked to.
    pub fn from_certificate(certificate: &Certificate) -> Result<Self> {
        let key_identifier = certificate.subject_key_identifier()?.ok_or_else(|| {
            CloudPkiError::MissingIssuerCertificate(
                "issuer certificate has no subject key identifier".to_string(),
            )
        })?;
        Ok(Self::new(certificate.subject().clone(), key_identifier))
    }
}

/// Who signs the certificate being built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IssuerContext {
    SelfSigned,
    Chained(IssuerCertificate),
}

impl IssuerContext {
    pub fn is_self_signed(&self) -> bool {
        matches!(self, IssuerContext::SelfSigned)
    }
}

/// A certificate ready to be signed.
#[derive(Clone, Debug, PartialEq)]
pub struct CertificateTemplate {
    pub serial: Serial,
    pub subject: Name,
    pub issuer: Name,
    pub validity: Validity,
    pub public_key_info: SubjectPublicKeyInfoOwned,
    pub key_usage: FlagSet<KeyUsages>,
    pub extended_key_usage: Vec<ExtendedKeyUsageOption>,
    pub subject_key_identifier: KeyIdentifier,
    pub authority_key_identifier: Vec<u8>,
    pub basic_constraints: Option<BasicConstraints>,
    pub subject_alt_name: SubjectAltName,
    pub crl_distribution_points: Vec<String>,
    pub issuing_certificate_urls: Vec<String>,
    pub ocsp_servers: Vec<String>,
    pub cps_urls: Vec<String>,
    /// Requested extensions copied from the CSR, limited to [`COPIED_REQUEST_EXTENSIONS`].
    pub extra_extensions: Vec<Extension>,
}

/// Requested extensions a CSR may carry into the certificate.
///
/// Only a subject alternative name with name forms [`SubjectAltName`] does not
/// model is passed through. Everything else the certificate asserts (CA status,
/// usages, identifiers, constraints, URLs) comes from the profile.
pub const COPIED_REQUEST_EXTENSIONS: &[der::oid::ObjectIdentifier] = &[SubjectAltName::OID];

/// Builds [`CertificateTemplate`]s from a resolved policy and an issuer.
pub struct TemplateBuilder<'a> {
    policy: &'a ResolvedPolicy,
    issuer: &'a IssuerContext,
}

impl<'a> TemplateBuilder<'a> {
    pub fn new(policy: &'a ResolvedPolicy, issuer: &'a IssuerContext) -> Self {
        Self { policy, issuer }
    }

    pub fn build(&self, csr: &CertificateRequest) -> Result<CertificateTemplate> {
        let subject_key_identifier =
            PublicKey::from_x509spki(csr.public_key_info())?.key_identifier()?;
        tracing::debug!(
            ski = %hex(&subject_key_identifier),
            "computed subject key identifier"
        );

        let (issuer, authority_key_identifier) = match self.issuer {
            IssuerContext::SelfSigned => {
                (csr.subject().clone(), subject_key_identifier.to_vec())
            }
            IssuerContext::Chained(issuer) => {
                (issuer.subject.clone(), issuer.key_identifier.clone())
            }
        };

        Ok(CertificateTemplate {
            serial: next_serial(),
            subject: csr.subject().clone(),
            issuer,
            validity: self.policy.validity.clone(),
            public_key_info: csr.public_key_info().clone(),
            key_usage: self.policy.key_usage,
            extended_key_usage: self.policy.extended_key_usage.clone(),
            subject_key_identifier,
            authority_key_identifier,
            basic_constraints: self.policy.basic_constraints,
            subject_alt_name: csr.subject_alt_name().clone(),
            crl_distribution_points: Vec::new(),
            issuing_certificate_urls: Vec::new(),
            ocsp_servers: Vec::new(),
            cps_urls: Vec::new(),
            extra_extensions: csr
                .extensions()
                .iter()
                .filter(|requested| COPIED_REQUEST_EXTENSIONS.contains(&requested.extn_id))
                .cloned()
                .collect(),
        })
    }
}

impl CertificateTemplate {
    /// Overlays the URL lists; empty lists leave the template's values alone.
    pub fn apply_distribution_points(&mut self, points: &DistributionPoints) {
        let overlay = |target: &mut Vec<String>, source: &Vec<String>| {
            if !source.is_empty() {
                *target = source.clone();
            }
        };
        overlay(&mut self.crl_distribution_points, &points.crl_urls);
        overlay(
            &mut self.issuing_certificate_urls,
            &points.issuing_certificate_urls,
        );
        overlay(&mut self.ocsp_servers, &points.ocsp_servers);
        overlay(&mut self.cps_urls, &points.cps_urls);
    }

    pub fn raw_subject(&self) -> Result<Vec<u8>> {
        Ok(self.subject.to_der()?)
    }

    pub fn raw_issuer(&self) -> Result<Vec<u8>> {
        Ok(self.issuer.to_der()?)
    }

    /// Encodes the template's extensions in issuance order.
    pub fn extensions(&self) -> Result<Vec<Extension>> {
        let mut extensions = vec![
            SubjectKeyIdentifier(self.subject_key_identifier.to_vec()).to_extension(false)?,
            AuthorityKeyIdentifier {
                key_identifier: self.authority_key_identifier.clone(),
            }
            .to_extension(false)?,
        ];
        if !self.key_usage.is_empty() {
            extensions.push(KeyUsage(self.key_usage).to_extension(true)?);
        }
        if !self.extended_key_usage.is_empty() {
            extensions.push(
                ExtendedKeyUsage {
                    usage: self.extended_key_usage.clone(),
                }
                .to_extension(false)?,
            );
        }
        if let Some(basic_constraints) = &self.basic_constraints {
            extensions.push(basic_constraints.to_extension(true)?);
        }
        if !self.subject_alt_name.is_empty() {
            // critical when the subject is empty
            let critical = self.subject.0.is_empty();
            extensions.push(self.subject_alt_name.to_extension(critical)?);
        }
        if !self.crl_distribution_points.is_empty() {
            extensions.push(
                CrlDistributionPoints {
                    urls: self.crl_distribution_points.clone(),
                }
                .to_extension(false)?,
            );
        }
        if !self.issuing_certificate_urls.is_empty() || !self.ocsp_servers.is_empty() {
            extensions.push(
                AuthorityInfoAccess {
                    issuing_certificate_urls: self.issuing_certificate_urls.clone(),
                    ocsp_servers: self.ocsp_servers.clone(),
                }
                .to_extension(false)?,
            );
        }
        if !self.cps_urls.is_empty() {
            extensions.push(
                CertificatePolicies {
                    cps_urls: self.cps_urls.clone(),
                }
                .to_extension(false)?,
            );
        }

        for extra in &self.extra_extensions {
            if !extensions.iter().any(|ext| ext.extn_id == extra.extn_id) {
                extensions.push(extra.clone());
            }
        }
        Ok(extensions)
    }

    pub fn to_tbs_certificate(&self, algorithm: SignatureAlgorithm) -> Result<TbsCertificate> {
        Ok(TbsCertificate {
            version: Version::V3,
            serial_number: self.serial.to_serial_number()?,
            signature: algorithm.into(),
            issuer: self.issuer.clone(),
            validity: self.validity.to_x509_validity()?,
            subject: self.subject.clone(),
            subject_public_key_info: self.public_key_info.clone(),
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(self.extensions()?),
        })
    }

    /// Signs the template with `signer` and assembles the certificate.
    pub fn sign(&self, signer: &dyn Signer, algorithm: SignatureAlgorithm) -> Result<Certificate> {
        let tbs_certificate = self.to_tbs_certificate(algorithm)?;
        let signature = signer.sign_with_algorithm(&tbs_certificate.to_der()?, algorithm)?;
        Ok(Certificate {
            inner: x509_cert::Certificate {
                tbs_certificate,
                signature_algorithm: algorithm.into(),
                signature: BitString::from_bytes(&signature)?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::cert::extensions::PathLength;
    use crate::cert::request::{create_request, sign_request};
    use crate::profile::AuthorityProfile;
    use crate::signer::LocalSigner;

    fn policy() -> ResolvedPolicy {
        ResolvedPolicy {
            validity: Validity {
                not_before: datetime!(2024-01-01 00:00:00 UTC),
                not_after: datetime!(2025-01-01 00:00:00 UTC),
            },
            key_usage: KeyUsages::DigitalSignature | KeyUsages::KeyEncipherment,
            extended_key_usage: vec![ExtendedKeyUsageOption::ServerAuth],
            basic_constraints: None,
        }
    }

    fn csr(signer: &LocalSigner) -> CertificateRequest {
        let profile = AuthorityProfile::from_yaml(
            "subject:\n  CN: test.example.com\nnames:\n  dns: [test.example.com]\n",
        )
        .unwrap();
        create_request(&profile, signer, SignatureAlgorithm::RsaPkcs1Sha256).unwrap()
    }

    #[test]
    fn test_self_signed_links_to_itself() {
        let signer = LocalSigner::generate(1024).unwrap();
        let policy = policy();
        let template = TemplateBuilder::new(&policy, &IssuerContext::SelfSigned)
            .build(&csr(&signer))
            .unwrap();
        assert_eq!(
            template.authority_key_identifier,
            template.subject_key_identifier.to_vec()
        );
        assert_eq!(template.raw_issuer().unwrap(), template.raw_subject().unwrap());
    }

    #[test]
    fn test_chained_uses_issuer_identifiers() {
        let signer = LocalSigner::generate(1024).unwrap();
        let issuer_name = crate::cert::params::DistinguishedName::builder()
            .common_name("Example Issuing CA")
            .build()
            .as_x509_name()
            .unwrap();
        let issuer = IssuerContext::Chained(IssuerCertificate::new(
            issuer_name.clone(),
            vec![0x42; 20],
        ));
        let policy = policy();
        let template = TemplateBuilder::new(&policy, &issuer)
            .build(&csr(&signer))
            .unwrap();
        assert_eq!(template.authority_key_identifier, vec![0x42; 20]);
        assert_eq!(template.raw_issuer().unwrap(), issuer_name.to_der().unwrap());
        assert_ne!(template.raw_issuer().unwrap(), template.raw_subject().unwrap());
    }

    #[test]
    fn test_extensions_follow_policy() {
        let signer = LocalSigner::generate(1024).unwrap();
        let mut policy = policy();
        policy.basic_constraints = Some(BasicConstraints {
            is_ca: true,
            path_length: PathLength::Limit(0),
        });
        let mut template = TemplateBuilder::new(&policy, &IssuerContext::SelfSigned)
            .build(&csr(&signer))
            .unwrap();
        template.apply_distribution_points(&DistributionPoints {
            crl_urls: vec!["http://crl.example.com/ca.crl".to_string()],
            ..Default::default()
        });

        let certificate = template
            .sign(&signer, SignatureAlgorithm::RsaPkcs1Sha256)
            .unwrap();
        certificate.verify_signature(signer.public_key()).unwrap();
        assert!(certificate.is_critical::<KeyUsage>());
        assert!(certificate.is_critical::<BasicConstraints>());
        assert_eq!(
            certificate.basic_constraints().unwrap().unwrap().path_length,
            PathLength::Limit(0)
        );
        assert_eq!(
            certificate.crl_distribution_points().unwrap().unwrap().urls,
            ["http://crl.example.com/ca.crl"]
        );
        assert_eq!(certificate.authority_info_access().unwrap(), None);
        assert_eq!(
            certificate.subject_alt_name().unwrap().unwrap().dns_names,
            ["test.example.com"]
        );
        assert_eq!(certificate.validity().unwrap(), template.validity);
    }

    #[test]
    fn test_empty_overlay_keeps_existing_urls() {
        let signer = LocalSigner::generate(1024).unwrap();
        let policy = policy();
        let mut template = TemplateBuilder::new(&policy, &IssuerContext::SelfSigned)
            .build(&csr(&signer))
            .unwrap();
        template.ocsp_servers = vec!["http://ocsp.example.com".to_string()];
        template.apply_distribution_points(&DistributionPoints::default());
        assert_eq!(template.ocsp_servers, ["http://ocsp.example.com"]);
    }

    #[test]
    fn test_empty_key_usage_is_omitted() {
        let signer = LocalSigner::generate(1024).unwrap();
        let mut policy = policy();
        policy.key_usage = FlagSet::empty();
        policy.extended_key_usage.clear();
        let template = TemplateBuilder::new(&policy, &IssuerContext::SelfSigned)
            .build(&csr(&signer))
            .unwrap();
        let extensions = template.extensions().unwrap();
        assert!(!extensions.iter().any(|e| e.extn_id == KeyUsage::OID));
        assert!(!extensions.iter().any(|e| e.extn_id == ExtendedKeyUsage::OID));
    }

    #[test]
    fn test_requested_extensions_cannot_grant_authority() {
        let signer = LocalSigner::generate(1024).unwrap();
        let subject = crate::cert::params::DistinguishedName::builder()
            .common_name("rogue.example.com")
            .build()
            .as_x509_name()
            .unwrap();
        let requested = vec![
            BasicConstraints {
                is_ca: true,
                path_length: PathLength::Unset,
            }
            .to_extension(true)
            .unwrap(),
            KeyUsage(KeyUsages::KeyCertSign.into()).to_extension(true).unwrap(),
            Extension {
                extn_id: const_oid::db::rfc5280::ID_CE_NAME_CONSTRAINTS,
                critical: true,
                extn_value: der::asn1::OctetString::new(vec![0x30, 0x00]).unwrap(),
            },
        ];
        let csr = sign_request(
            subject,
            requested,
            &signer,
            SignatureAlgorithm::RsaPkcs1Sha256,
        )
        .unwrap();
        assert_eq!(csr.extensions().len(), 3);

        let policy = policy();
        let template = TemplateBuilder::new(&policy, &IssuerContext::SelfSigned)
            .build(&csr)
            .unwrap();
        assert!(template.extra_extensions.is_empty());

        let certificate = template
            .sign(&signer, SignatureAlgorithm::RsaPkcs1Sha256)
            .unwrap();
        assert_eq!(certificate.basic_constraints().unwrap(), None);
        assert_eq!(
            certificate.key_usage().unwrap(),
            Some(KeyUsage(
                KeyUsages::DigitalSignature | KeyUsages::KeyEncipherment
            ))
        );
        let extensions = certificate.inner.tbs_certificate.extensions.unwrap();
        assert!(
            !extensions
                .iter()
                .any(|e| e.extn_id == const_oid::db::rfc5280::ID_CE_NAME_CONSTRAINTS)
        );
    }
}
