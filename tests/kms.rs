mod util;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cloudpki::error::{CloudPkiError, Result};
use cloudpki::issuer::{IssueOptions, Issuer};
use cloudpki::pem_utils::der_to_pem;
use cloudpki::profile::RetryConfig;
use cloudpki::signer::{Digest, KmsClient, KmsSigner, LocalSigner, Signer};

const KEY_ID: &str = "projects/p/locations/global/keyRings/ca/cryptoKeys/root/cryptoKeyVersions/1";

/// Serves a local key the way the key service would.
struct FakeKms {
    key: &'static LocalSigner,
    /// Sign calls that fail before one succeeds.
    failures: usize,
    transient: bool,
    corrupt: bool,
    sign_calls: AtomicUsize,
    key_fetches: Arc<AtomicUsize>,
}

impl FakeKms {
    fn new(key: &'static LocalSigner) -> Self {
        Self {
            key,
            failures: 0,
            transient: true,
            corrupt: false,
            sign_calls: AtomicUsize::new(0),
            key_fetches: Arc::default(),
        }
    }
}

impl KmsClient for FakeKms {
    fn get_public_key(&self, key_id: &str) -> Result<String> {
        assert_eq!(key_id, KEY_ID);
        self.key_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(der_to_pem(
            &self.key.public_key().to_spki_der()?,
            "PUBLIC KEY",
        ))
    }

    fn asymmetric_sign(&self, _key_id: &str, digest: &Digest) -> Result<Vec<u8>> {
        let call = self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(if self.transient {
                CloudPkiError::remote_transient("429 Too Many Requests")
            } else {
                CloudPkiError::remote("403 Forbidden")
            });
        }
        let mut signature = self.key.sign(digest)?;
        if self.corrupt {
            signature[0] ^= 0xff;
        }
        Ok(signature)
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

#[test]
fn connect_fetches_public_key() -> Result<()> {
    let signer = KmsSigner::connect(FakeKms::new(util::root_key()), KEY_ID, fast_retry())?;
    assert_eq!(signer.public_key(), util::root_key().public_key());
    assert_eq!(signer.key_id(), KEY_ID);
    Ok(())
}

#[test]
fn empty_key_id_is_a_configuration_error() {
    let err = KmsSigner::connect(FakeKms::new(util::root_key()), "", fast_retry())
        .err()
        .unwrap();
    assert!(matches!(err, CloudPkiError::ConfigurationError(_)));
}

#[test]
fn transient_failures_are_retried() -> Result<()> {
    let client = FakeKms {
        failures: 2,
        ..FakeKms::new(util::root_key())
    };
    let signer = KmsSigner::connect(client, KEY_ID, fast_retry())?;

    let profile = util::profile(util::ROOT_PROFILE);
    let csr = util::request(util::ROOT_PROFILE, util::root_key());
    let root = Issuer::new(&profile).issue(
        &csr,
        &IssueOptions::builder().self_signed(true).build(),
        &signer,
    )?;

    root.verify_signature(util::root_key().public_key())?;
    assert_eq!(signer.client().sign_calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn retries_are_bounded() {
    let client = FakeKms {
        failures: usize::MAX,
        ..FakeKms::new(util::root_key())
    };
    let signer = KmsSigner::connect(client, KEY_ID, fast_retry()).unwrap();

    let err = signer
        .sign_with_algorithm(b"payload", Default::default())
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(signer.client().sign_calls.load(Ordering::SeqCst), 4);
}

#[test]
fn permanent_failures_are_not_retried() {
    let client = FakeKms {
        failures: 1,
        transient: false,
        ..FakeKms::new(util::root_key())
    };
    let signer = KmsSigner::connect(client, KEY_ID, fast_retry()).unwrap();

    let err = signer
        .sign_with_algorithm(b"payload", Default::default())
        .unwrap_err();
    assert!(matches!(
        err,
        CloudPkiError::RemoteSigningError {
            transient: false,
            ..
        }
    ));
    assert_eq!(signer.client().sign_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn bad_signature_is_rejected() {
    let client = FakeKms {
        corrupt: true,
        ..FakeKms::new(util::root_key())
    };
    let signer = KmsSigner::connect(client, KEY_ID, fast_retry()).unwrap();

    let profile = util::profile(util::ROOT_PROFILE);
    let csr = util::request(util::ROOT_PROFILE, util::root_key());
    let err = Issuer::new(&profile)
        .issue(
            &csr,
            &IssueOptions::builder().self_signed(true).build(),
            &signer,
        )
        .unwrap_err();
    assert!(matches!(err, CloudPkiError::RemoteSigningError { .. }));
}

#[test]
fn rejected_request_never_fetches_key() {
    let client = FakeKms::new(util::root_key());
    let key_fetches = Arc::clone(&client.key_fetches);

    let profile = util::profile(&format!(
        "{}constraints:\n  usage: [everything]\n",
        util::SERVER_PROFILE
    ));
    let csr = util::request(util::SERVER_PROFILE, util::root_key());
    let err = Issuer::new(&profile)
        .issue_with(
            &csr,
            &IssueOptions::builder().self_signed(true).build(),
            |_| {
                let signer: Box<dyn Signer> =
                    Box::new(KmsSigner::connect(client, KEY_ID, fast_retry())?);
                Ok(signer)
            },
        )
        .unwrap_err();

    assert_eq!(
        err,
        CloudPkiError::UnknownUsageToken("everything".to_string())
    );
    assert_eq!(key_fetches.load(Ordering::SeqCst), 0);
}

#[test]
fn accepted_request_fetches_key_once() -> Result<()> {
    let client = FakeKms::new(util::root_key());
    let key_fetches = Arc::clone(&client.key_fetches);

    let profile = util::profile(util::ROOT_PROFILE);
    let csr = util::request(util::ROOT_PROFILE, util::root_key());
    let root = Issuer::new(&profile).issue_with(
        &csr,
        &IssueOptions::builder().self_signed(true).build(),
        |_| {
            let signer: Box<dyn Signer> =
                Box::new(KmsSigner::connect(client, KEY_ID, fast_retry())?);
            Ok(signer)
        },
    )?;

    root.verify_signature(util::root_key().public_key())?;
    assert_eq!(key_fetches.load(Ordering::SeqCst), 1);
    Ok(())
}
