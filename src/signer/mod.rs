//! Signing capability.
//!
//! A [`Signer`] holds (or reaches) one private key and signs digests with it.
//! Every signature names its algorithm explicitly, so the digest sent to the
//! key service always matches the algorithm written into the certificate.

pub mod kms;
pub mod local;
pub mod retry;

use rsa::Pkcs1v15Sign;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::error::{CloudPkiError, Result};
use crate::key::PublicKey;
use crate::profile::{SignerBackend, SignerConfig};

pub use kms::{CloudKmsClient, KmsClient, KmsSigner};
pub use local::LocalSigner;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Field name used for this hash in key-service requests.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn digest(self, data: &[u8]) -> Digest {
        let bytes = match self {
            HashAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => sha2::Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
        };
        Digest {
            algorithm: self,
            bytes,
        }
    }

    fn pkcs1v15(self) -> Pkcs1v15Sign {
        match self {
            HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<sha2::Sha256>(),
            HashAlgorithm::Sha384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
            HashAlgorithm::Sha512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
        }
    }
}

/// A message digest tagged with the hash that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Digest {
    pub algorithm: HashAlgorithm,
    pub bytes: Vec<u8>,
}

/// Signature algorithms a CA key can be asked to produce.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[default]
    #[serde(rename = "sha256WithRSA")]
    RsaPkcs1Sha256,
    #[serde(rename = "sha384WithRSA")]
    RsaPkcs1Sha384,
    #[serde(rename = "sha512WithRSA")]
    RsaPkcs1Sha512,
}

impl SignatureAlgorithm {
    pub fn hash(self) -> HashAlgorithm {
        match self {
            SignatureAlgorithm::RsaPkcs1Sha256 => HashAlgorithm::Sha256,
            SignatureAlgorithm::RsaPkcs1Sha384 => HashAlgorithm::Sha384,
            SignatureAlgorithm::RsaPkcs1Sha512 => HashAlgorithm::Sha512,
        }
    }

    pub fn from_oid(oid: const_oid::ObjectIdentifier) -> Result<Self> {
        match oid {
            const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION => Ok(Self::RsaPkcs1Sha256),
            const_oid::db::rfc5912::SHA_384_WITH_RSA_ENCRYPTION => Ok(Self::RsaPkcs1Sha384),
            const_oid::db::rfc5912::SHA_512_WITH_RSA_ENCRYPTION => Ok(Self::RsaPkcs1Sha512),
            other => Err(CloudPkiError::DecodingError(format!(
                "Unsupported signature algorithm {other}"
            ))),
        }
    }

    pub fn oid(self) -> const_oid::ObjectIdentifier {
        match self {
            SignatureAlgorithm::RsaPkcs1Sha256 => const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
            SignatureAlgorithm::RsaPkcs1Sha384 => const_oid::db::rfc5912::SHA_384_WITH_RSA_ENCRYPTION,
            SignatureAlgorithm::RsaPkcs1Sha512 => const_oid::db::rfc5912::SHA_512_WITH_RSA_ENCRYPTION,
        }
    }

    /// The SSH signature algorithm name. SSH defines no SHA-384 RSA variant.
    pub fn ssh_name(self) -> Result<&'static str> {
        match self {
            SignatureAlgorithm::RsaPkcs1Sha256 => Ok("rsa-sha2-256"),
            SignatureAlgorithm::RsaPkcs1Sha512 => Ok("rsa-sha2-512"),
            SignatureAlgorithm::RsaPkcs1Sha384 => Err(CloudPkiError::ConfigurationError(
                "sha384WithRSA has no SSH equivalent".to_string(),
            )),
        }
    }

    pub fn ssh_hash(self) -> Result<ssh_key::HashAlg> {
        self.ssh_name()?;
        Ok(match self.hash() {
            HashAlgorithm::Sha512 => ssh_key::HashAlg::Sha512,
            _ => ssh_key::HashAlg::Sha256,
        })
    }

    /// Checks `signature` over `data` against `public_key`.
    pub fn verify(self, public_key: &PublicKey, data: &[u8], signature: &[u8]) -> Result<()> {
        let digest = self.hash().digest(data);
        verify_digest(public_key, &digest, signature)
    }
}

impl From<SignatureAlgorithm> for AlgorithmIdentifierOwned {
    fn from(algorithm: SignatureAlgorithm) -> Self {
        AlgorithmIdentifierOwned {
            oid: algorithm.oid(),
            parameters: Some(der::Any::null()),
        }
    }
}

/// Checks a PKCS#1 v1.5 signature over a precomputed digest.
pub fn verify_digest(public_key: &PublicKey, digest: &Digest, signature: &[u8]) -> Result<()> {
    match public_key {
        PublicKey::Rsa(rsa) => rsa
            .verify(digest.algorithm.pkcs1v15(), &digest.bytes, signature)
            .map_err(|e| CloudPkiError::InvalidInput(format!("signature does not verify: {e}"))),
        other => Err(CloudPkiError::UnsupportedKeyType(
            other.algorithm_name().to_string(),
        )),
    }
}

/// A holder of a CA private key.
pub trait Signer: Send + Sync {
    /// The public half of the signing key.
    fn public_key(&self) -> &PublicKey;

    /// Signs a precomputed digest, returning the raw signature bytes.
    fn sign(&self, digest: &Digest) -> Result<Vec<u8>>;

    /// Hashes `data` with the algorithm's hash and signs the result.
    fn sign_with_algorithm(&self, data: &[u8], algorithm: SignatureAlgorithm) -> Result<Vec<u8>> {
        self.sign(&algorithm.hash().digest(data))
    }
}

/// Builds the signer a profile's `signer` block describes.
pub fn connect(config: &SignerConfig) -> Result<Box<dyn Signer>> {
    match config.backend {
        SignerBackend::Kms => {
            let client = CloudKmsClient::new(&config.kms)?;
            let signer = KmsSigner::connect(client, &config.keyid, config.kms.retry)?;
            Ok(Box::new(signer))
        }
        SignerBackend::Local => {
            let path = config.key.as_ref().ok_or_else(|| {
                CloudPkiError::ConfigurationError(
                    "signer.key is required for the local backend".to_string(),
                )
            })?;
            Ok(Box::new(LocalSigner::from_pem_file(path)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_lengths() {
        assert_eq!(HashAlgorithm::Sha256.digest(b"x").bytes.len(), 32);
        assert_eq!(HashAlgorithm::Sha384.digest(b"x").bytes.len(), 48);
        assert_eq!(HashAlgorithm::Sha512.digest(b"x").bytes.len(), 64);
    }

    #[test]
    fn test_ssh_names() {
        assert_eq!(
            SignatureAlgorithm::RsaPkcs1Sha256.ssh_name().unwrap(),
            "rsa-sha2-256"
        );
        assert_eq!(
            SignatureAlgorithm::RsaPkcs1Sha512.ssh_hash().unwrap(),
            ssh_key::HashAlg::Sha512
        );
        assert!(SignatureAlgorithm::RsaPkcs1Sha384.ssh_name().is_err());
    }

    #[test]
    fn test_sign_with_algorithm_verifies() {
        let signer = LocalSigner::generate(1024).unwrap();
        for algorithm in [
            SignatureAlgorithm::RsaPkcs1Sha256,
            SignatureAlgorithm::RsaPkcs1Sha384,
            SignatureAlgorithm::RsaPkcs1Sha512,
        ] {
            let signature = signer.sign_with_algorithm(b"payload", algorithm).unwrap();
            algorithm
                .verify(signer.public_key(), b"payload", &signature)
                .unwrap();
            assert!(
                algorithm
                    .verify(signer.public_key(), b"tampered", &signature)
                    .is_err()
            );
        }
    }

    #[test]
    fn test_local_backend_requires_key_path() {
        let config = SignerConfig {
            backend: SignerBackend::Local,
            ..Default::default()
        };
        assert!(matches!(
            connect(&config),
            Err(CloudPkiError::ConfigurationError(_))
        ));
    }
}
