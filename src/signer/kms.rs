//! Signing through a remote key-management service.
//!
//! The private key never leaves the service; this side only ships digests
//! and receives signatures. [`KmsClient`] is the transport seam so the
//! signer can be driven without network access.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::retry::{status_error, with_retry};
use super::{Digest, Signer, verify_digest};
use crate::error::{CloudPkiError, Result};
use crate::key::PublicKey;
use crate::profile::{KmsConfig, RetryConfig};

/// The two key-service calls issuance depends on.
pub trait KmsClient: Send + Sync {
    /// Returns the `PUBLIC KEY` PEM of the key version `key_id`.
    fn get_public_key(&self, key_id: &str) -> Result<String>;

    /// Signs `digest` with key version `key_id`, returning the raw signature.
    fn asymmetric_sign(&self, key_id: &str, digest: &Digest) -> Result<Vec<u8>>;
}

/// [`KmsClient`] over the Cloud KMS REST API.
pub struct CloudKmsClient {
    http: Client,
    endpoint: String,
    token: String,
}

#[derive(Deserialize)]
struct PublicKeyResponse {
    pem: String,
}

#[derive(Serialize)]
struct AsymmetricSignRequest<'a> {
    digest: BTreeMap<&'static str, &'a str>,
}

#[derive(Deserialize)]
struct AsymmetricSignResponse {
    signature: String,
}

impl CloudKmsClient {
    /// Creates a client with the configured timeout, reading the bearer token
    /// from the environment variable named by `config.token_env`.
    pub fn new(config: &KmsConfig) -> Result<Self> {
        let token = std::env::var(&config.token_env).map_err(|_| {
            CloudPkiError::ConfigurationError(format!(
                "environment variable {} must hold an access token",
                config.token_env
            ))
        })?;
        Self::with_token(config, token)
    }

    pub fn with_token(config: &KmsConfig, token: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CloudPkiError::ConfigurationError(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(status_error(status.as_u16(), body.trim()));
        }
        response
            .json::<T>()
            .map_err(|e| CloudPkiError::remote(format!("malformed key service response: {e}")))
    }
}

fn transport_error(err: reqwest::Error) -> CloudPkiError {
    if err.is_timeout() || err.is_connect() {
        CloudPkiError::remote_transient(err.to_string())
    } else {
        CloudPkiError::remote(err.to_string())
    }
}

impl KmsClient for CloudKmsClient {
    fn get_public_key(&self, key_id: &str) -> Result<String> {
        let url = format!("{}/v1/{key_id}/publicKey", self.endpoint);
        let response: PublicKeyResponse = self.send(self.http.get(url))?;
        Ok(response.pem)
    }

    fn asymmetric_sign(&self, key_id: &str, digest: &Digest) -> Result<Vec<u8>> {
        let url = format!("{}/v1/{key_id}:asymmetricSign", self.endpoint);
        let encoded = STANDARD.encode(&digest.bytes);
        let body = AsymmetricSignRequest {
            digest: BTreeMap::from([(digest.algorithm.name(), encoded.as_str())]),
        };
        let response: AsymmetricSignResponse = self.send(self.http.post(url).json(&body))?;
        STANDARD
            .decode(response.signature)
            .map_err(|e| CloudPkiError::remote(format!("signature is not base64: {e}")))
    }
}

/// A [`Signer`] whose key lives in the key service.
///
/// The public key is fetched once on [`KmsSigner::connect`]. Every signature
/// coming back is checked against it.
pub struct KmsSigner<C: KmsClient> {
    client: C,
    key_id: String,
    retry: RetryConfig,
    public_key: PublicKey,
}

impl<C: KmsClient> KmsSigner<C> {
    #[tracing::instrument(skip(client, retry))]
    pub fn connect(client: C, key_id: &str, retry: RetryConfig) -> Result<Self> {
        if key_id.is_empty() {
            return Err(CloudPkiError::ConfigurationError(
                "signer.keyid is required".to_string(),
            ));
        }
        let pem = with_retry(&retry, "get_public_key", || client.get_public_key(key_id))?;
        let public_key = PublicKey::from_public_key_pem(&pem)
            .map_err(|e| CloudPkiError::remote(format!("public key of {key_id}: {e}")))?;
        if !matches!(public_key, PublicKey::Rsa(_)) {
            return Err(CloudPkiError::UnsupportedKeyType(
                public_key.algorithm_name().to_string(),
            ));
        }
        tracing::debug!(
            algorithm = public_key.algorithm_name(),
            "fetched signer public key"
        );

        Ok(Self {
            client,
            key_id: key_id.to_string(),
            retry,
            public_key,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

impl<C: KmsClient> Signer for KmsSigner<C> {
    fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    #[tracing::instrument(skip(self, digest), fields(key_id = %self.key_id, hash = digest.algorithm.name()))]
    fn sign(&self, digest: &Digest) -> Result<Vec<u8>> {
        let signature = with_retry(&self.retry, "asymmetric_sign", || {
            self.client.asymmetric_sign(&self.key_id, digest)
        })?;
        verify_digest(&self.public_key, digest, &signature)
            .map_err(|e| CloudPkiError::remote(format!("key service returned a bad signature: {e}")))?;
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_endpoint_trailing_slash_is_trimmed() {
        let config = KmsConfig {
            endpoint: "http://127.0.0.1:1/".to_string(),
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let client = CloudKmsClient::with_token(&config, "token").unwrap();
        assert_eq!(client.endpoint, "http://127.0.0.1:1");
    }

    #[test]
    fn test_unreachable_service_is_transient() {
        let config = KmsConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let client = CloudKmsClient::with_token(&config, "token").unwrap();
        let err = client.get_public_key("projects/p/keys/k").unwrap_err();
        assert!(err.is_transient(), "{err}");
    }
}
