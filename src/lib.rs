//! # cloudpki - Certificate Issuance Backed by a Remote Key Service
//!
//! cloudpki issues X.509 and OpenSSH certificates for a certificate authority
//! whose private key never leaves a remote key-management service. Issuance is
//! driven by declarative YAML authority profiles; the crate assembles the
//! certificate, computes its identifiers and asks the key service for the
//! signature.
//!
//! ## Supported Keys
//!
//! - **CA keys**: RSA, signed with PKCS#1 v1.5 over SHA-256, SHA-384 or SHA-512
//! - **Subject keys**: RSA (key identifiers are derived from the PKCS#1 encoding)
//! - **SSH**: any key OpenSSH accepts can be certified; the CA key signs with
//!   `rsa-sha2-256` or `rsa-sha2-512`
//!
//! ## Key Features
//!
//! - **Policy resolution**: validity windows, key usage and CA constraints from
//!   profile defaults plus optional overrides
//! - **Certificate chains**: self-signed roots, intermediates and end entities
//!   linked through key identifiers
//! - **Distribution points**: AIA, CRL and CPS URLs from the signing profile or
//!   a separate intermediate profile
//! - **Remote signing**: bounded retry with backoff, signatures verified locally
//!
//! ## Quick Start
//!
//! ### Issuing a Certificate From a CSR
//!
//! ```rust,no_run
//! use cloudpki::{
//!     cert::request::CertificateRequest,
//!     issuer::{IssueOptions, Issuer},
//!     profile::AuthorityProfile,
//!     signer,
//! };
//!
//! # fn main() -> Result<(), cloudpki::error::CloudPkiError> {
//! let profile = AuthorityProfile::load("ca.yaml")?;
//! let signer = signer::connect(&profile.signer)?;
//!
//! let csr = CertificateRequest::from_pem(&std::fs::read_to_string("server.csr").unwrap())?;
//! let certificate = Issuer::new(&profile).issue(&csr, &IssueOptions::default(), signer.as_ref())?;
//!
//! println!("{}", certificate.to_pem()?);
//! # Ok(())
//! # }
//! ```
//!
//! ### Creating a Root CA
//!
//! ```rust,no_run
//! use cloudpki::{
//!     cert::request::create_request,
//!     issuer::{IssueOptions, Issuer},
//!     profile::AuthorityProfile,
//!     signer,
//! };
//!
//! # fn main() -> Result<(), cloudpki::error::CloudPkiError> {
//! let profile = AuthorityProfile::load("root.yaml")?;
//! let signer = signer::connect(&profile.signer)?;
//!
//! // The request carries the key service's public key
//! let csr = create_request(&profile, signer.as_ref(), profile.signer.algorithm)?;
//! let options = IssueOptions::builder().self_signed(true).build();
//! let root = Issuer::new(&profile).issue(&csr, &options, signer.as_ref())?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Signing an SSH Key
//!
//! ```rust,no_run
//! use cloudpki::{
//!     profile::AuthorityProfile,
//!     signer,
//!     ssh::{SshCertificateRequest, SshCertificateTemplate, marshal_certificate},
//! };
//!
//! # fn main() -> Result<(), cloudpki::error::CloudPkiError> {
//! let profile = AuthorityProfile::load("ssh-ca.yaml")?;
//! let signer = signer::connect(&profile.signer)?;
//!
//! let key = SshCertificateRequest::parse_public_key("ssh-ed25519 AAAA... alice@example.com")?;
//! let request = SshCertificateRequest::from_profile(key, &profile.ssh, None)?;
//! let certificate = SshCertificateTemplate::build(request)?
//!     .sign(signer.as_ref(), profile.signer.algorithm)?;
//! print!("{}", marshal_certificate(&certificate)?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every operation returns [`error::CloudPkiError`]. Validation failures are
//! reported before the key service is contacted:
//!
//! ```rust
//! use cloudpki::{error::CloudPkiError, policy::parse_key_usage};
//!
//! match parse_key_usage(&["digitalSignature", "signEverything"]) {
//!     Ok(_) => println!("usage accepted"),
//!     Err(CloudPkiError::UnknownUsageToken(token)) => println!("unknown usage {token}"),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`profile`]: Authority profile and constraints documents
//! - [`policy`]: Resolution of defaults and constraints into an issuance policy
//! - [`cert`]: Certificate requests, templates, extensions and encoding
//! - [`issuer`]: X.509 issuance flow
//! - [`signer`]: The signing capability and its key-service and local backends
//! - [`ssh`]: OpenSSH certificate signing
//! - [`key`]: Public keys and key identifiers
//! - [`serial`]: Random serial numbers
//! - [`error`]: Error types

pub mod cert;
pub mod error;
pub mod issuer;
pub mod key;
pub mod pem_utils;
pub mod policy;
pub mod profile;
pub mod serial;
pub mod signer;
pub mod ssh;
