use bon::Builder;

use crate::cert::Certificate;
use crate::cert::params::common_name;
use crate::cert::request::CertificateRequest;
use crate::cert::template::{
    CertificateTemplate, IssuerCertificate, IssuerContext, TemplateBuilder,
};
use crate::error::{CloudPkiError, Result};
use crate::key::PublicKey;
use crate::policy::PolicyEngine;
use crate::profile::{AuthorityProfile, Constraints, SignerConfig};
use crate::serial::hex;
use crate::signer::{SignatureAlgorithm, Signer};

/// Per-issuance options.
///
/// # Fields
/// * `constraints` - Overrides laid over the profile's constraints block.
/// * `intermediate` - Profile supplying the AIA/CRL/CPS URLs instead of the signing profile.
/// * `self_signed` - Sign the request's own subject instead of chaining to `signer.certificate`.
#[derive(Clone, Debug, Default, Builder)]
pub struct IssueOptions {
    pub constraints: Option<Constraints>,
    pub intermediate: Option<AuthorityProfile>,
    #[builder(default)]
    pub self_signed: bool,
}

/// Issues X.509 certificates on behalf of one authority profile.
///
/// Issuance runs in two steps. [`Issuer::prepare`] validates constraint
/// tokens, the validity window and the issuer certificate and builds the
/// template without any signer. [`PreparedCertificate::sign`] then makes the
/// single call to the key service.
pub struct Issuer<'a> {
    profile: &'a AuthorityProfile,
    engine: PolicyEngine,
}

impl<'a> Issuer<'a> {
    pub fn new(profile: &'a AuthorityProfile) -> Self {
        Self {
            profile,
            engine: PolicyEngine::default(),
        }
    }

    pub fn with_engine(mut self, engine: PolicyEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Builds the certificate template for `csr`.
    pub fn prepare(
        &self,
        csr: &CertificateRequest,
        options: &IssueOptions,
    ) -> Result<PreparedCertificate> {
        let constraints = match &options.constraints {
            Some(overrides) => self.profile.constraints.overlay(overrides),
            None => self.profile.constraints.clone(),
        };
        let policy = self.engine.resolve(&self.profile.defaults, &constraints)?;

        let issuer = if options.self_signed {
            IssuerContext::SelfSigned
        } else {
            let certificate = self.profile.issuer_certificate()?;
            IssuerContext::Chained(IssuerCertificate::from_certificate(&certificate)?)
        };

        let mut template = TemplateBuilder::new(&policy, &issuer).build(csr)?;
        let overlay = options.intermediate.as_ref().unwrap_or(self.profile);
        template.apply_distribution_points(&overlay.distribution_points());

        Ok(PreparedCertificate {
            template,
            algorithm: self.profile.signer.algorithm,
            self_signed_key: if options.self_signed {
                Some(csr.public_key()?)
            } else {
                None
            },
        })
    }

    /// Prepares and signs in one go.
    pub fn issue(
        &self,
        csr: &CertificateRequest,
        options: &IssueOptions,
        signer: &dyn Signer,
    ) -> Result<Certificate> {
        self.prepare(csr, options)?.sign(signer)
    }

    /// Like [`Issuer::issue`], but obtains the signer from `connect` only
    /// once the template has been built, so a rejected request never
    /// reaches the key service.
    pub fn issue_with<F>(
        &self,
        csr: &CertificateRequest,
        options: &IssueOptions,
        connect: F,
    ) -> Result<Certificate>
    where
        F: FnOnce(&SignerConfig) -> Result<Box<dyn Signer>>,
    {
        let prepared = self.prepare(csr, options)?;
        let signer = connect(&self.profile.signer)?;
        prepared.sign(signer.as_ref())
    }
}

/// A validated template waiting for its signature.
#[derive(Clone, Debug)]
pub struct PreparedCertificate {
    template: CertificateTemplate,
    algorithm: SignatureAlgorithm,
    /// The request's key when self-signing; it must be the signer's key.
    self_signed_key: Option<PublicKey>,
}

impl PreparedCertificate {
    pub fn template(&self) -> &CertificateTemplate {
        &self.template
    }

    pub fn sign(&self, signer: &dyn Signer) -> Result<Certificate> {
        if let Some(key) = &self.self_signed_key {
            if key != signer.public_key() {
                return Err(CloudPkiError::ConfigurationError(
                    "self-signed request does not carry the signer's public key".to_string(),
                ));
            }
        }

        let template = &self.template;
        let certificate = template.sign(signer, self.algorithm)?;
        tracing::info!(
            serial = %template.serial,
            subject = %common_name(&template.subject).unwrap_or_default(),
            aki = %hex(&template.authority_key_identifier),
            not_after = %template.validity.not_after,
            self_signed = self.self_signed_key.is_some(),
            "issued certificate"
        );
        Ok(certificate)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cert::request::create_request;
    use crate::signer::{Digest, LocalSigner, SignatureAlgorithm};

    struct CountingSigner {
        inner: LocalSigner,
        calls: AtomicUsize,
    }

    impl Signer for CountingSigner {
        fn public_key(&self) -> &PublicKey {
            self.inner.public_key()
        }

        fn sign(&self, digest: &Digest) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.sign(digest)
        }
    }

    fn setup(profile_yaml: &str) -> (AuthorityProfile, CountingSigner, CertificateRequest) {
        let profile = AuthorityProfile::from_yaml(profile_yaml).unwrap();
        let signer = CountingSigner {
            inner: LocalSigner::generate(1024).unwrap(),
            calls: AtomicUsize::new(0),
        };
        let csr = create_request(&profile, &signer.inner, SignatureAlgorithm::RsaPkcs1Sha256)
            .unwrap();
        (profile, signer, csr)
    }

    fn self_signed() -> IssueOptions {
        IssueOptions::builder().self_signed(true).build()
    }

    #[test]
    fn test_bad_token_never_reaches_signer() {
        let (profile, signer, csr) =
            setup("subject:\n  CN: a.example.com\nconstraints:\n  usage: [everything]\n");
        let err = Issuer::new(&profile)
            .issue(&csr, &self_signed(), &signer)
            .unwrap_err();
        assert_eq!(err, CloudPkiError::UnknownUsageToken("everything".to_string()));
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_preparation_never_connects() {
        let (profile, _, csr) =
            setup("subject:\n  CN: a.example.com\nconstraints:\n  nbf: yesterday\n");
        let mut connected = false;
        let err = Issuer::new(&profile)
            .issue_with(&csr, &self_signed(), |_| {
                connected = true;
                let signer: Box<dyn Signer> = Box::new(LocalSigner::generate(1024)?);
                Ok(signer)
            })
            .unwrap_err();
        assert!(matches!(err, CloudPkiError::ConfigurationError(_)));
        assert!(!connected);
    }

    #[test]
    fn test_chained_without_issuer_certificate_fails() {
        let (profile, signer, csr) = setup("subject:\n  CN: a.example.com\n");
        let err = Issuer::new(&profile)
            .issue(&csr, &IssueOptions::default(), &signer)
            .unwrap_err();
        assert!(matches!(err, CloudPkiError::MissingIssuerCertificate(_)));
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_self_signed_key_mismatch_is_rejected() {
        let (profile, _, csr) = setup("subject:\n  CN: a.example.com\n");
        let other = CountingSigner {
            inner: LocalSigner::generate(1024).unwrap(),
            calls: AtomicUsize::new(0),
        };
        let err = Issuer::new(&profile)
            .issue(&csr, &self_signed(), &other)
            .unwrap_err();
        assert!(matches!(err, CloudPkiError::ConfigurationError(_)));
        assert_eq!(other.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_intermediate_profile_supplies_urls() {
        let (profile, signer, csr) = setup(
            "subject:\n  CN: root.example.com\nsigner:\n  crls: [http://root.example.com/crl]\n",
        );
        let intermediate =
            AuthorityProfile::from_yaml("crl:\n  urls: [http://int.example.com/crl]\n").unwrap();

        let issuer = Issuer::new(&profile);
        let own = issuer.issue(&csr, &self_signed(), &signer).unwrap();
        assert_eq!(
            own.crl_distribution_points().unwrap().unwrap().urls,
            ["http://root.example.com/crl"]
        );

        let options = IssueOptions::builder()
            .self_signed(true)
            .intermediate(intermediate)
            .build();
        let overlaid = issuer.issue(&csr, &options, &signer).unwrap();
        assert_eq!(
            overlaid.crl_distribution_points().unwrap().unwrap().urls,
            ["http://int.example.com/crl"]
        );
    }

    #[test]
    fn test_constraint_overrides_apply() {
        let (profile, signer, csr) = setup(
            "subject:\n  CN: a.example.com\nconstraints:\n  usage: [digitalSignature]\n",
        );
        let options = IssueOptions::builder()
            .self_signed(true)
            .constraints(Constraints {
                not_before: Some("2024-01-01T00:00:00Z".to_string()),
                expires: Some("2024-02-01T00:00:00Z".to_string()),
                ..Default::default()
            })
            .build();
        let prepared = Issuer::new(&profile).prepare(&csr, &options).unwrap();
        assert_eq!(
            prepared.template().validity.duration(),
            time::Duration::days(31)
        );
        let certificate = prepared.sign(&signer).unwrap();
        assert!(certificate.key_usage().unwrap().is_some());
        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);
    }
}
