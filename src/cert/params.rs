use bon::Builder;
use const_oid::ObjectIdentifier;
use der::asn1::{Any, Ia5StringRef, PrintableStringRef, SetOfVec, Utf8StringRef};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};

use crate::error::{CloudPkiError, Result};

const OID_COUNTRY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.6");
const OID_STATE: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.8");
const OID_LOCALITY: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.7");
const OID_ORGANIZATION: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.10");
const OID_ORGANIZATION_UNIT: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.11");
const OID_COMMON_NAME: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const OID_EMAIL_ADDRESS: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.1");

/// Distinguished name parameters, as written in the `subject` block of a profile.
///
/// # Fields
/// * `common_name` - The common name (CN). Required when a name is encoded.
/// * `country` - The country (C).
/// * `state` - The state or province (ST).
/// * `locality` - The locality or city (L).
/// * `organization` - The organization (O).
/// * `organization_unit` - The organizational unit (OU).
/// * `email_address` - PKCS#9 emailAddress, appended as its own RDN.
#[derive(Clone, Debug, Builder, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistinguishedName {
    #[serde(rename = "CN", default)]
    #[builder(into, default)]
    pub common_name: String,
    #[serde(rename = "C", default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub country: Option<String>,
    #[serde(rename = "ST", default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub state: Option<String>,
    #[serde(rename = "L", default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub locality: Option<String>,
    #[serde(rename = "O", default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub organization: Option<String>,
    #[serde(rename = "OU", default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub organization_unit: Option<String>,
    #[serde(rename = "emailAddress", default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub email_address: Option<String>,
}

impl DistinguishedName {
    /// Encodes the name as an X.509 `Name`.
    ///
    /// RDNs are emitted in the order C, ST, L, O, OU, CN, emailAddress and empty
    /// fields are skipped.
    pub fn as_x509_name(&self) -> Result<Name> {
        if self.common_name.is_empty() {
            return Err(CloudPkiError::ConfigurationError(
                "Specify at least a common name (CN).".to_string(),
            ));
        }

        let attributes = [
            (OID_COUNTRY, self.country.as_deref()),
            (OID_STATE, self.state.as_deref()),
            (OID_LOCALITY, self.locality.as_deref()),
            (OID_ORGANIZATION, self.organization.as_deref()),
            (OID_ORGANIZATION_UNIT, self.organization_unit.as_deref()),
            (OID_COMMON_NAME, Some(self.common_name.as_str())),
        ];

        let mut rdns = Vec::new();
        for (oid, value) in attributes {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                rdns.push(single_rdn(oid, directory_string(value)?)?);
            }
        }
        if let Some(email) = self.email_address.as_deref().filter(|v| !v.is_empty()) {
            let value = Any::encode_from(&Ia5StringRef::new(email)?)?;
            rdns.push(single_rdn(OID_EMAIL_ADDRESS, value)?);
        }

        Ok(RdnSequence(rdns))
    }
}

/// Returns the first common name found in `name`, if any.
pub fn common_name(name: &Name) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|attr| attr.oid == OID_COMMON_NAME)
        .and_then(|attr| std::str::from_utf8(attr.value.value()).ok())
        .map(str::to_string)
}

fn single_rdn(oid: ObjectIdentifier, value: Any) -> Result<RelativeDistinguishedName> {
    let set = SetOfVec::try_from(vec![AttributeTypeAndValue { oid, value }])?;
    Ok(RelativeDistinguishedName(set))
}

// PrintableString when the value allows it, UTF8String otherwise.
fn directory_string(value: &str) -> Result<Any> {
    let any = match PrintableStringRef::new(value) {
        Ok(printable) => Any::encode_from(&printable)?,
        Err(_) => Any::encode_from(&Utf8StringRef::new(value)?)?,
    };
    Ok(any)
}

/// Certificate validity period.
///
/// This struct represents the `notBefore` and `notAfter` fields in a certificate.
///
/// # Fields
/// * `not_before` - The start of the validity period.
/// * `not_after` - The end of the validity period.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    pub fn duration(&self) -> time::Duration {
        self.not_after - self.not_before
    }

    /// Converts to the X.509 representation, switching to GeneralizedTime from 2050 on.
    pub fn to_x509_validity(&self) -> Result<x509_cert::time::Validity> {
        Ok(x509_cert::time::Validity {
            not_before: to_x509_time(self.not_before)?,
            not_after: to_x509_time(self.not_after)?,
        })
    }

    pub fn from_x509_validity(validity: &x509_cert::time::Validity) -> Result<Self> {
        Ok(Self {
            not_before: from_x509_time(&validity.not_before)?,
            not_after: from_x509_time(&validity.not_after)?,
        })
    }
}

fn to_x509_time(at: OffsetDateTime) -> Result<x509_cert::time::Time> {
    let seconds = u64::try_from(at.unix_timestamp()).map_err(|_| {
        CloudPkiError::EncodingError(format!("{at} is before the Unix epoch"))
    })?;
    let date_time = der::DateTime::from_unix_duration(std::time::Duration::from_secs(seconds))?;
    if date_time.year() < 2050 {
        Ok(x509_cert::time::Time::UtcTime(
            der::asn1::UtcTime::from_date_time(date_time)?,
        ))
    } else {
        Ok(x509_cert::time::Time::GeneralTime(
            der::asn1::GeneralizedTime::from_date_time(date_time),
        ))
    }
}

fn from_x509_time(time: &x509_cert::time::Time) -> Result<OffsetDateTime> {
    let seconds = time.to_unix_duration().as_secs() as i64;
    OffsetDateTime::from_unix_timestamp(seconds)
        .map_err(|e| CloudPkiError::DecodingError(e.to_string()))
}
