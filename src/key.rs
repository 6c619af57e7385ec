use der::{Decode, Encode};
use ed25519_dalek::VerifyingKey as Ed25519VerifyingKey;
use p256::ecdsa::VerifyingKey as P256VerifyingKey;
use p384::ecdsa::VerifyingKey as P384VerifyingKey;
use rsa::{
    RsaPublicKey,
    pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey},
};
use sha1::{Digest, Sha1};
use x509_cert::spki::{AlgorithmIdentifierOwned, ObjectIdentifier, SubjectPublicKeyInfoOwned};

use crate::error::{CloudPkiError, Result};
use crate::pem_utils::pem_to_der;

/// A key identifier as carried by the subject and authority key identifier extensions.
pub type KeyIdentifier = [u8; 20];

const PUBLIC_KEY_PEM_LABEL: &str = "PUBLIC KEY";

/// Public keys that can appear in a certificate request or come back from the key service.
#[derive(Clone, Debug, PartialEq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    EcdsaP256(P256VerifyingKey),
    EcdsaP384(P384VerifyingKey),
    Ed25519(Ed25519VerifyingKey),
}

impl PublicKey {
    /// Decodes a `SubjectPublicKeyInfo` into one of the supported key types.
    pub fn from_x509spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self> {
        let key_bytes = spki.subject_public_key.raw_bytes();
        match spki.algorithm.oid {
            const_oid::db::rfc5912::RSA_ENCRYPTION => {
                Ok(PublicKey::Rsa(RsaPublicKey::from_pkcs1_der(key_bytes)?))
            }
            const_oid::db::rfc5912::ID_EC_PUBLIC_KEY => {
                let curve = spki
                    .algorithm
                    .parameters
                    .as_ref()
                    .and_then(|params| params.decode_as::<ObjectIdentifier>().ok());
                match curve {
                    Some(const_oid::db::rfc5912::SECP_256_R_1) => {
                        P256VerifyingKey::from_sec1_bytes(key_bytes)
                            .map(PublicKey::EcdsaP256)
                            .map_err(|e| CloudPkiError::DecodingError(e.to_string()))
                    }
                    Some(const_oid::db::rfc5912::SECP_384_R_1) => {
                        P384VerifyingKey::from_sec1_bytes(key_bytes)
                            .map(PublicKey::EcdsaP384)
                            .map_err(|e| CloudPkiError::DecodingError(e.to_string()))
                    }
                    other => Err(CloudPkiError::UnsupportedKeyType(format!(
                        "elliptic curve {}",
                        other.map(|oid| oid.to_string()).unwrap_or_default()
                    ))),
                }
            }
            const_oid::db::rfc8410::ID_ED_25519 => {
                let bytes: &[u8; 32] = key_bytes.try_into().map_err(|_| {
                    CloudPkiError::DecodingError("Ed25519 key must be 32 bytes".to_string())
                })?;
                Ed25519VerifyingKey::from_bytes(bytes)
                    .map(PublicKey::Ed25519)
                    .map_err(|e| CloudPkiError::DecodingError(e.to_string()))
            }
            oid => Err(CloudPkiError::UnsupportedKeyType(oid.to_string())),
        }
    }

    /// Decodes a PEM block labeled `PUBLIC KEY`.
    pub fn from_public_key_pem(pem: &str) -> Result<Self> {
        let der = pem_to_der(pem, PUBLIC_KEY_PEM_LABEL)?;
        let spki = SubjectPublicKeyInfoOwned::from_der(&der)?;
        Self::from_x509spki(&spki)
    }

    /// Encodes the key as a `SubjectPublicKeyInfo`.
    pub fn to_x509spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let spki = match self {
            PublicKey::Rsa(public) => SubjectPublicKeyInfoOwned::from_key(public.clone())?,
            PublicKey::EcdsaP256(verifying_key) => {
                SubjectPublicKeyInfoOwned::from_key(*verifying_key)?
            }
            PublicKey::EcdsaP384(verifying_key) => {
                SubjectPublicKeyInfoOwned::from_key(*verifying_key)?
            }
            PublicKey::Ed25519(verifying_key) => SubjectPublicKeyInfoOwned {
                algorithm: AlgorithmIdentifierOwned {
                    oid: const_oid::db::rfc8410::ID_ED_25519,
                    parameters: None,
                },
                subject_public_key: der::asn1::BitString::from_bytes(&verifying_key.to_bytes())?,
            },
        };
        Ok(spki)
    }

    /// Derives the 20-byte key identifier: SHA-1 over the DER encoding of the
    /// PKCS#1 `RSAPublicKey { modulus, publicExponent }` structure.
    pub fn key_identifier(&self) -> Result<KeyIdentifier> {
        match self {
            PublicKey::Rsa(public) => {
                let der = public.to_pkcs1_der()?;
                Ok(Sha1::digest(der.as_bytes()).into())
            }
            other => Err(CloudPkiError::UnsupportedKeyType(
                other.algorithm_name().to_string(),
            )),
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        match self {
            PublicKey::Rsa(_) => "RSA",
            PublicKey::EcdsaP256(_) => "ECDSA P-256",
            PublicKey::EcdsaP384(_) => "ECDSA P-384",
            PublicKey::Ed25519(_) => "Ed25519",
        }
    }

    /// Converts the key into the SSH wire representation used for CA keys.
    pub fn to_ssh_key_data(&self) -> Result<ssh_key::public::KeyData> {
        match self {
            PublicKey::Rsa(public) => Ok(ssh_key::public::KeyData::Rsa(
                ssh_key::public::RsaPublicKey::try_from(public)?,
            )),
            other => Err(CloudPkiError::UnsupportedKeyType(format!(
                "{} keys cannot sign SSH certificates",
                other.algorithm_name()
            ))),
        }
    }

    /// DER encoding of the `SubjectPublicKeyInfo`, mainly useful for comparisons.
    pub fn to_spki_der(&self) -> Result<Vec<u8>> {
        Ok(self.to_x509spki()?.to_der()?)
    }
}

impl From<RsaPublicKey> for PublicKey {
    fn from(public: RsaPublicKey) -> Self {
        PublicKey::Rsa(public)
    }
}
