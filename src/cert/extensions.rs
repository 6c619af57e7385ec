use std::net::IpAddr;

use const_oid::AssociatedOid;
use der::{
    Decode, Encode,
    asn1::{Any, Ia5String, OctetString},
    oid::ObjectIdentifier,
};
use x509_cert::ext::Extension;
use x509_cert::ext::pkix::certpolicy::{PolicyInformation, PolicyQualifierInfo};
use x509_cert::ext::pkix::crl::dp::DistributionPoint;
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_cert::ext::pkix::{AccessDescription, AuthorityInfoAccessSyntax};

use crate::error::CloudPkiError;

/// Trait for converting to and from X.509 extensions.
///
/// This trait provides methods to encode and decode X.509 extension values.
///
/// # Example
/// ```
/// use cloudpki::cert::extensions::{SubjectAltName, ToAndFromX509Extension};
/// let san = SubjectAltName { dns_names: vec!["example.com".to_string()], ..Default::default() };
/// let encoded = san.to_x509_extension_value().unwrap();
/// let decoded = SubjectAltName::from_x509_extension_value(&encoded).unwrap();
/// assert_eq!(san, decoded);
/// ```
pub trait ToAndFromX509Extension {
    /// The Object Identifier (OID) for the extension.
    const OID: ObjectIdentifier;

    /// Encodes the extension into a DER-encoded byte vector.
    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CloudPkiError>;

    /// Decodes the extension from a DER-encoded byte slice.
    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CloudPkiError>
    where
        Self: Sized;

    /// Wraps the encoded value into an `Extension` entry.
    fn to_extension(&self, critical: bool) -> Result<Extension, CloudPkiError> {
        Ok(Extension {
            extn_id: Self::OID,
            critical,
            extn_value: OctetString::new(self.to_x509_extension_value()?)?,
        })
    }

    /// Finds and decodes this extension in a list, if present.
    fn find_in(extensions: &[Extension]) -> Result<Option<Self>, CloudPkiError>
    where
        Self: Sized,
    {
        extensions
            .iter()
            .find(|ext| ext.extn_id == Self::OID)
            .map(|ext| Self::from_x509_extension_value(ext.extn_value.as_bytes()))
            .transpose()
    }
}

/// Represents the Subject Alternative Name (SAN) extension.
///
/// Only the name forms a certificate request can carry here are modelled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectAltName {
    pub dns_names: Vec<String>,
    pub email_addresses: Vec<String>,
    pub uris: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
}

impl SubjectAltName {
    pub fn is_empty(&self) -> bool {
        self.dns_names.is_empty()
            && self.email_addresses.is_empty()
            && self.uris.is_empty()
            && self.ip_addresses.is_empty()
    }
}

fn ia5(value: &str) -> Result<Ia5String, CloudPkiError> {
    Ia5String::new(value).map_err(|e| CloudPkiError::InvalidInput(format!("{value:?}: {e}")))
}

impl ToAndFromX509Extension for SubjectAltName {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::SubjectAltName::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CloudPkiError> {
        let mut names = Vec::new();
        for dns in &self.dns_names {
            names.push(GeneralName::DnsName(ia5(dns)?));
        }
        for email in &self.email_addresses {
            names.push(GeneralName::Rfc822Name(ia5(email)?));
        }
        for uri in &self.uris {
            names.push(GeneralName::UniformResourceIdentifier(ia5(uri)?));
        }
        for ip in &self.ip_addresses {
            let octets = match ip {
                IpAddr::V4(v4) => v4.octets().to_vec(),
                IpAddr::V6(v6) => v6.octets().to_vec(),
            };
            names.push(GeneralName::IpAddress(OctetString::new(octets)?));
        }

        Ok(x509_cert::ext::pkix::SubjectAltName(names).to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CloudPkiError> {
        let san = x509_cert::ext::pkix::SubjectAltName::from_der(extension)?;
        let mut out = Self::default();
        for name in san.0 {
            match name {
                GeneralName::DnsName(dns) => out.dns_names.push(dns.to_string()),
                GeneralName::Rfc822Name(email) => out.email_addresses.push(email.to_string()),
                GeneralName::UniformResourceIdentifier(uri) => out.uris.push(uri.to_string()),
                GeneralName::IpAddress(octets) => {
                    let ip = match octets.as_bytes() {
                        [a, b, c, d] => IpAddr::from([*a, *b, *c, *d]),
                        bytes => {
                            let v6: [u8; 16] = bytes.try_into().map_err(|_| {
                                CloudPkiError::InvalidInput(
                                    "IP address must be 4 or 16 bytes".to_string(),
                                )
                            })?;
                            IpAddr::from(v6)
                        }
                    };
                    out.ip_addresses.push(ip);
                }
                _ => {
                    return Err(CloudPkiError::InvalidInput(
                        "Unsupported general name type".to_string(),
                    ));
                }
            }
        }
        Ok(out)
    }
}

/// Path length constraint of a CA certificate.
///
/// `Unset` leaves the field out of the encoding; `Limit(0)` is encoded
/// explicitly and forbids any intermediate below the certificate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PathLength {
    #[default]
    Unset,
    Limit(u8),
}

impl PathLength {
    pub fn as_option(self) -> Option<u8> {
        match self {
            PathLength::Unset => None,
            PathLength::Limit(n) => Some(n),
        }
    }
}

/// Represents the Basic Constraints extension.
///
/// # Fields
/// * `is_ca` - Indicates if the certificate is a CA.
/// * `path_length` - The maximum number of intermediate CAs allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasicConstraints {
    pub is_ca: bool,
    pub path_length: PathLength,
}

impl ToAndFromX509Extension for BasicConstraints {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::BasicConstraints::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CloudPkiError> {
        let bc = x509_cert::ext::pkix::BasicConstraints {
            ca: self.is_ca,
            path_len_constraint: self.path_length.as_option(),
        };

        Ok(bc.to_der()?)
    }

    fn from_x509_extension_value(der_bytes: &[u8]) -> Result<Self, CloudPkiError> {
        let bc = x509_cert::ext::pkix::BasicConstraints::from_der(der_bytes)?;
        Ok(Self {
            is_ca: bc.ca,
            path_length: bc
                .path_len_constraint
                .map(PathLength::Limit)
                .unwrap_or_default(),
        })
    }
}

pub use der::flagset::FlagSet;
use x509_cert::ext::pkix::KeyUsage as X509KeyUsage;
pub use x509_cert::ext::pkix::KeyUsages;

/// Represents the Key Usage extension.
///
/// This extension defines the purpose of the key contained in the certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUsage(pub FlagSet<KeyUsages>);

impl ToAndFromX509Extension for KeyUsage {
    const OID: ObjectIdentifier = <X509KeyUsage as AssociatedOid>::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CloudPkiError> {
        let ku = X509KeyUsage::from(self.0);
        Ok(ku.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CloudPkiError> {
        let ku = X509KeyUsage::from_der(extension)?;
        Ok(Self(ku.0))
    }
}

/// Represents the Extended Key Usage extension.
///
/// This extension indicates purposes for which the public key may be used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedKeyUsage {
    pub usage: Vec<ExtendedKeyUsageOption>,
}

impl ToAndFromX509Extension for ExtendedKeyUsage {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::ExtendedKeyUsage::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CloudPkiError> {
        let oids: Vec<ObjectIdentifier> = self.usage.iter().map(|v| (*v).into()).collect();
        let eku = x509_cert::ext::pkix::ExtendedKeyUsage(oids);
        Ok(eku.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CloudPkiError> {
        let eku = x509_cert::ext::pkix::ExtendedKeyUsage::from_der(extension)?;
        let usage = eku
            .0
            .iter()
            .map(|v| match *v {
                const_oid::db::rfc5912::ID_KP_OCSP_SIGNING => {
                    Ok(ExtendedKeyUsageOption::OcspSigning)
                }
                const_oid::db::rfc5912::ID_KP_SERVER_AUTH => Ok(ExtendedKeyUsageOption::ServerAuth),
                const_oid::db::rfc5912::ID_KP_CLIENT_AUTH => Ok(ExtendedKeyUsageOption::ClientAuth),
                const_oid::db::rfc5912::ID_KP_CODE_SIGNING => {
                    Ok(ExtendedKeyUsageOption::CodeSigning)
                }
                const_oid::db::rfc5912::ID_KP_EMAIL_PROTECTION => {
                    Ok(ExtendedKeyUsageOption::EmailProtection)
                }
                const_oid::db::rfc5912::ID_KP_TIME_STAMPING => {
                    Ok(ExtendedKeyUsageOption::TimeStamping)
                }
                other => Err(CloudPkiError::DecodingError(format!(
                    "Unsupported extended key usage option {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { usage })
    }
}

/// Represents an option for the Extended Key Usage extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExtendedKeyUsageOption {
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    TimeStamping,
    OcspSigning,
}

impl From<ExtendedKeyUsageOption> for ObjectIdentifier {
    fn from(value: ExtendedKeyUsageOption) -> Self {
        match value {
            ExtendedKeyUsageOption::OcspSigning => const_oid::db::rfc5912::ID_KP_OCSP_SIGNING,
            ExtendedKeyUsageOption::ServerAuth => const_oid::db::rfc5912::ID_KP_SERVER_AUTH,
            ExtendedKeyUsageOption::ClientAuth => const_oid::db::rfc5912::ID_KP_CLIENT_AUTH,
            ExtendedKeyUsageOption::CodeSigning => const_oid::db::rfc5912::ID_KP_CODE_SIGNING,
            ExtendedKeyUsageOption::EmailProtection => {
                const_oid::db::rfc5912::ID_KP_EMAIL_PROTECTION
            }
            ExtendedKeyUsageOption::TimeStamping => const_oid::db::rfc5912::ID_KP_TIME_STAMPING,
        }
    }
}

/// Represents the Subject Key Identifier extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectKeyIdentifier(pub Vec<u8>);

impl ToAndFromX509Extension for SubjectKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::SubjectKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CloudPkiError> {
        let ski = x509_cert::ext::pkix::SubjectKeyIdentifier(OctetString::new(self.0.as_slice())?);
        Ok(ski.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CloudPkiError> {
        let ski = x509_cert::ext::pkix::SubjectKeyIdentifier::from_der(extension)?;
        Ok(Self(ski.0.as_bytes().to_vec()))
    }
}

/// Represents the Authority Key Identifier (AKI) extension.
///
/// Only the key identifier form is emitted; issuer name and serial are left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityKeyIdentifier {
    pub key_identifier: Vec<u8>,
}

impl ToAndFromX509Extension for AuthorityKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::AuthorityKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CloudPkiError> {
        let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier {
            key_identifier: Some(OctetString::new(self.key_identifier.as_slice())?),
            authority_cert_issuer: None,
            authority_cert_serial_number: None,
        };

        Ok(aki.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CloudPkiError> {
        let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier::from_der(extension)?;
        Ok(Self {
            key_identifier: aki
                .key_identifier
                .map(|id| id.as_bytes().to_vec())
                .unwrap_or_default(),
        })
    }
}

fn uri_from_general_name(name: &GeneralName) -> Option<String> {
    match name {
        GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
        _ => None,
    }
}

/// Represents the CRL Distribution Points extension, one full-name point per URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrlDistributionPoints {
    pub urls: Vec<String>,
}

impl ToAndFromX509Extension for CrlDistributionPoints {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::CrlDistributionPoints::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CloudPkiError> {
        let points = self
            .urls
            .iter()
            .map(|url| {
                Ok(DistributionPoint {
                    distribution_point: Some(DistributionPointName::FullName(vec![
                        GeneralName::UniformResourceIdentifier(ia5(url)?),
                    ])),
                    reasons: None,
                    crl_issuer: None,
                })
            })
            .collect::<Result<Vec<_>, CloudPkiError>>()?;
        Ok(x509_cert::ext::pkix::CrlDistributionPoints(points).to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CloudPkiError> {
        let points = x509_cert::ext::pkix::CrlDistributionPoints::from_der(extension)?;
        let urls = points
            .0
            .iter()
            .filter_map(|point| match &point.distribution_point {
                Some(DistributionPointName::FullName(names)) => Some(names),
                _ => None,
            })
            .flatten()
            .filter_map(uri_from_general_name)
            .collect();
        Ok(Self { urls })
    }
}

/// Represents the Authority Information Access extension.
///
/// # Fields
/// * `issuing_certificate_urls` - Where the issuer's certificate can be fetched (caIssuers).
/// * `ocsp_servers` - OCSP responder URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorityInfoAccess {
    pub issuing_certificate_urls: Vec<String>,
    pub ocsp_servers: Vec<String>,
}

impl ToAndFromX509Extension for AuthorityInfoAccess {
    const OID: ObjectIdentifier = AuthorityInfoAccessSyntax::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CloudPkiError> {
        let ocsp = self
            .ocsp_servers
            .iter()
            .map(|url| (const_oid::db::rfc5912::ID_AD_OCSP, url));
        let issuers = self
            .issuing_certificate_urls
            .iter()
            .map(|url| (const_oid::db::rfc5912::ID_AD_CA_ISSUERS, url));
        let descriptions = ocsp
            .chain(issuers)
            .map(|(access_method, url)| {
                Ok(AccessDescription {
                    access_method,
                    access_location: GeneralName::UniformResourceIdentifier(ia5(url)?),
                })
            })
            .collect::<Result<Vec<_>, CloudPkiError>>()?;
        Ok(AuthorityInfoAccessSyntax(descriptions).to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CloudPkiError> {
        let aia = AuthorityInfoAccessSyntax::from_der(extension)?;
        let mut out = Self::default();
        for description in &aia.0 {
            let Some(url) = uri_from_general_name(&description.access_location) else {
                continue;
            };
            match description.access_method {
                const_oid::db::rfc5912::ID_AD_OCSP => out.ocsp_servers.push(url),
                const_oid::db::rfc5912::ID_AD_CA_ISSUERS => out.issuing_certificate_urls.push(url),
                _ => {}
            }
        }
        Ok(out)
    }
}

/// Represents the Certificate Policies extension, carrying CPS pointers under `anyPolicy`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificatePolicies {
    pub cps_urls: Vec<String>,
}

impl ToAndFromX509Extension for CertificatePolicies {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::CertificatePolicies::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, CloudPkiError> {
        let qualifiers = self
            .cps_urls
            .iter()
            .map(|url| {
                Ok(PolicyQualifierInfo {
                    policy_qualifier_id: const_oid::db::rfc5912::ID_QT_CPS,
                    qualifier: Some(Any::encode_from(&ia5(url)?)?),
                })
            })
            .collect::<Result<Vec<_>, CloudPkiError>>()?;
        let policies = x509_cert::ext::pkix::CertificatePolicies(vec![PolicyInformation {
            policy_identifier: const_oid::db::rfc5280::ANY_POLICY,
            policy_qualifiers: Some(qualifiers),
        }]);
        Ok(policies.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, CloudPkiError> {
        let policies = x509_cert::ext::pkix::CertificatePolicies::from_der(extension)?;
        let cps_urls = policies
            .0
            .iter()
            .flat_map(|policy| policy.policy_qualifiers.iter().flatten())
            .filter(|q| q.policy_qualifier_id == const_oid::db::rfc5912::ID_QT_CPS)
            .filter_map(|q| q.qualifier.as_ref())
            .filter_map(|any| any.decode_as::<Ia5String>().ok())
            .map(|uri| uri.to_string())
            .collect();
        Ok(Self { cps_urls })
    }
}
