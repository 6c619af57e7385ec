//! Resolution of profile defaults and constraints into a concrete issuance policy.
//!
//! Token validation happens here, so an unknown key usage or malformed timestamp
//! is reported before a template is built or the key service is contacted.

use der::flagset::FlagSet;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use x509_cert::ext::pkix::KeyUsages;

use crate::cert::extensions::{BasicConstraints, ExtendedKeyUsageOption, PathLength};
use crate::cert::params::Validity;
use crate::error::{CloudPkiError, Result};
use crate::profile::{CaConstraints, Constraints, Defaults};

/// Lifetime applied when neither the profile nor the engine configuration names one.
pub const DEFAULT_EXPIRY_DAYS: u32 = 90;

const SECONDS_PER_DAY: i64 = 86_400;

/// The policy a template is built from, after defaults and overrides are merged.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedPolicy {
    pub validity: Validity,
    pub key_usage: FlagSet<KeyUsages>,
    pub extended_key_usage: Vec<ExtendedKeyUsageOption>,
    /// `Some` only when the certificate is allowed to issue others.
    pub basic_constraints: Option<BasicConstraints>,
}

/// Turns profile defaults plus constraints into a [`ResolvedPolicy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolicyEngine {
    default_expiry_days: u32,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY_DAYS)
    }
}

impl PolicyEngine {
    pub fn new(default_expiry_days: u32) -> Self {
        Self {
            default_expiry_days,
        }
    }

    pub fn resolve(&self, defaults: &Defaults, constraints: &Constraints) -> Result<ResolvedPolicy> {
        self.resolve_at(defaults, constraints, OffsetDateTime::now_utc())
    }

    /// Same as [`PolicyEngine::resolve`] with an explicit notion of "now".
    pub fn resolve_at(
        &self,
        defaults: &Defaults,
        constraints: &Constraints,
        now: OffsetDateTime,
    ) -> Result<ResolvedPolicy> {
        let validity = self.validity_at(defaults, constraints, now)?;
        let key_usage = parse_key_usage(constraints.usage.as_deref().unwrap_or_default())?;
        let extended_key_usage =
            parse_extended_key_usage(constraints.extended_usage.as_deref().unwrap_or_default())?;
        let basic_constraints = match &constraints.ca {
            Some(ca) if ca.issuer => Some(ca_basic_constraints(ca)?),
            _ => None,
        };

        Ok(ResolvedPolicy {
            validity,
            key_usage,
            extended_key_usage,
            basic_constraints,
        })
    }

    /// Resolves the validity window.
    ///
    /// Explicit `nbf`/`expires` timestamps win. Otherwise the window opens at
    /// midnight UTC of `now` and lasts the profile's expiry in days, falling back
    /// to the engine default when the profile names none.
    pub fn validity_at(
        &self,
        defaults: &Defaults,
        constraints: &Constraints,
        now: OffsetDateTime,
    ) -> Result<Validity> {
        let not_before = match constraints.not_before.as_deref() {
            Some(start) => parse_timestamp(start)?,
            None => start_of_day(now),
        };
        let not_after = match constraints.expires.as_deref() {
            Some(end) => parse_timestamp(end)?,
            None => {
                let expiry = self.expiry(defaults);
                not_before.checked_add(expiry).ok_or_else(|| {
                    CloudPkiError::ConfigurationError(format!(
                        "an expiry of {} days from {not_before} is out of range",
                        expiry.whole_days()
                    ))
                })?
            }
        };

        if not_before > not_after {
            return Err(CloudPkiError::ConfigurationError(format!(
                "validity starts ({not_before}) after it ends ({not_after})"
            )));
        }

        Ok(Validity {
            not_before,
            not_after,
        })
    }

    /// The default lifetime for `defaults`.
    pub fn expiry(&self, defaults: &Defaults) -> Duration {
        let days = match defaults.expires {
            Some(days) if days > 0 => days,
            _ => self.default_expiry_days,
        };
        Duration::seconds(i64::from(days) * SECONDS_PER_DAY)
    }
}

/// Midnight UTC of the day containing `at`.
pub fn start_of_day(at: OffsetDateTime) -> OffsetDateTime {
    at.to_offset(UtcOffset::UTC).replace_time(Time::MIDNIGHT)
}

/// Parses the `YYYY-MM-DDTHH:MM:SSZ` timestamps used in constraints documents.
pub fn parse_timestamp(value: &str) -> Result<OffsetDateTime> {
    let format = time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");
    PrimitiveDateTime::parse(value, format)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| CloudPkiError::ConfigurationError(format!("invalid timestamp {value:?}: {e}")))
}

/// Maps a key usage token onto its bit.
pub fn key_usage_from_token(token: &str) -> Result<KeyUsages> {
    let usage = match token {
        "digitalSignature" => KeyUsages::DigitalSignature,
        "nonRepudiation" | "contentCommitment" => KeyUsages::NonRepudiation,
        "keyEncipherment" => KeyUsages::KeyEncipherment,
        "dataEncipherment" => KeyUsages::DataEncipherment,
        "keyAgreement" => KeyUsages::KeyAgreement,
        "keyCertSign" => KeyUsages::KeyCertSign,
        "cRLSign" => KeyUsages::CRLSign,
        "encipherOnly" => KeyUsages::EncipherOnly,
        "decipherOnly" => KeyUsages::DecipherOnly,
        _ => return Err(CloudPkiError::UnknownUsageToken(token.to_string())),
    };
    Ok(usage)
}

pub fn parse_key_usage<S: AsRef<str>>(tokens: &[S]) -> Result<FlagSet<KeyUsages>> {
    let mut flags = FlagSet::empty();
    for token in tokens {
        flags |= key_usage_from_token(token.as_ref())?;
    }
    Ok(flags)
}

/// Maps an extended key usage token onto its purpose.
pub fn extended_key_usage_from_token(token: &str) -> Result<ExtendedKeyUsageOption> {
    let usage = match token {
        "serverAuth" => ExtendedKeyUsageOption::ServerAuth,
        "clientAuth" => ExtendedKeyUsageOption::ClientAuth,
        "codeSigning" => ExtendedKeyUsageOption::CodeSigning,
        "emailProtection" => ExtendedKeyUsageOption::EmailProtection,
        "timeStamping" => ExtendedKeyUsageOption::TimeStamping,
        "OCSPSigning" => ExtendedKeyUsageOption::OcspSigning,
        _ => return Err(CloudPkiError::UnknownExtendedUsageToken(token.to_string())),
    };
    Ok(usage)
}

/// Parses extended key usage tokens, keeping first-seen order and dropping duplicates.
pub fn parse_extended_key_usage<S: AsRef<str>>(
    tokens: &[S],
) -> Result<Vec<ExtendedKeyUsageOption>> {
    let mut usages = Vec::with_capacity(tokens.len());
    for token in tokens {
        let usage = extended_key_usage_from_token(token.as_ref())?;
        if !usages.contains(&usage) {
            usages.push(usage);
        }
    }
    Ok(usages)
}

fn ca_basic_constraints(ca: &CaConstraints) -> Result<BasicConstraints> {
    let path_length = match ca.path_length {
        n if n < 0 => PathLength::Unset,
        n => PathLength::Limit(u8::try_from(n).map_err(|_| {
            CloudPkiError::ConfigurationError(format!("path-length {n} exceeds 255"))
        })?),
    };
    Ok(BasicConstraints {
        is_ca: true,
        path_length,
    })
}
