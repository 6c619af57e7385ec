#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use cloudpki::cert::Certificate;
use cloudpki::cert::request::{CertificateRequest, create_request};
use cloudpki::issuer::{IssueOptions, Issuer};
use cloudpki::profile::AuthorityProfile;
use cloudpki::signer::{LocalSigner, SignatureAlgorithm};

pub const ROOT_PROFILE: &str = "\
subject:
  CN: Example Root CA
  O: Example
constraints:
  usage: [keyCertSign, cRLSign]
  ca:
    issuer: true
    path-length: 1
";

pub const SERVER_PROFILE: &str = "\
subject:
  CN: test.example.com
names:
  dns: [test.example.com]
";

pub fn root_key() -> &'static LocalSigner {
    static KEY: OnceLock<LocalSigner> = OnceLock::new();
    KEY.get_or_init(|| LocalSigner::generate(2048).unwrap())
}

pub fn intermediate_key() -> &'static LocalSigner {
    static KEY: OnceLock<LocalSigner> = OnceLock::new();
    KEY.get_or_init(|| LocalSigner::generate(2048).unwrap())
}

pub fn leaf_key() -> &'static LocalSigner {
    static KEY: OnceLock<LocalSigner> = OnceLock::new();
    KEY.get_or_init(|| LocalSigner::generate(2048).unwrap())
}

pub fn profile(yaml: &str) -> AuthorityProfile {
    AuthorityProfile::from_yaml(yaml).unwrap()
}

pub fn request(yaml: &str, key: &LocalSigner) -> CertificateRequest {
    create_request(&profile(yaml), key, SignatureAlgorithm::RsaPkcs1Sha256).unwrap()
}

pub fn write_pem(dir: &Path, name: &str, pem: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, pem).unwrap();
    path
}

/// Self-signs the root CA with [`root_key`].
pub fn generate_root_cert() -> Certificate {
    let profile = profile(ROOT_PROFILE);
    let csr = request(ROOT_PROFILE, root_key());
    Issuer::new(&profile)
        .issue(
            &csr,
            &IssueOptions::builder().self_signed(true).build(),
            root_key(),
        )
        .unwrap()
}

/// The root profile with `signer.certificate` pointing at `root` written into `dir`.
pub fn chained_root_profile(dir: &Path, root: &Certificate, extra: &str) -> AuthorityProfile {
    let path = write_pem(dir, "root.pem", &root.to_pem().unwrap());
    let mut profile = profile(&format!("{ROOT_PROFILE}{extra}"));
    profile.signer.certificate = Some(path);
    profile
}
