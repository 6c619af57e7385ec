use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use cloudpki::cert::request::{CertificateRequest, create_request};
use cloudpki::issuer::{IssueOptions, Issuer};
use cloudpki::policy::{DEFAULT_EXPIRY_DAYS, PolicyEngine};
use cloudpki::profile::{AuthorityProfile, Constraints};
use cloudpki::signer;
use cloudpki::ssh::{
    SshCertificateRequest, SshCertificateTemplate, authorized_key, marshal_certificate,
};
use tracing_subscriber::EnvFilter;

/// Issue X.509 and SSH certificates with a CA key held by a key-management service.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Opts {
    /// Certificate lifetime in days when a profile sets no `defaults.expires`.
    #[arg(long, global = true, default_value_t = DEFAULT_EXPIRY_DAYS)]
    default_expiry: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// X.509 certificates.
    #[command(subcommand)]
    X509(X509Command),
    /// OpenSSH certificates.
    #[command(subcommand)]
    Ssh(SshCommand),
}

#[derive(Debug, Subcommand)]
enum X509Command {
    /// Print a certificate signing request for a profile, signed by its key.
    ///
    /// The profile is read from stdin when -r is not given.
    Req {
        #[arg(short = 'r', long = "request")]
        request: Option<PathBuf>,
    },
    /// Sign the PEM certificate request read from stdin.
    Sign {
        /// Certificate authority profile.
        #[arg(long)]
        ca: PathBuf,
        /// Profile providing AIA and CRL URLs for an intermediate CA.
        #[arg(long)]
        intermediate: Option<PathBuf>,
        /// Self-sign the request instead of chaining to the signer's certificate.
        #[arg(long)]
        selfsigned: bool,
        /// Constraints laid over the profile's own.
        #[arg(short = 'p', long = "constraints")]
        constraints: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum SshCommand {
    /// Certify the SSH public key read from stdin.
    Sign {
        #[arg(long)]
        ca: PathBuf,
        /// Constraints whose `nbf`/`expires` bound the certificate.
        #[arg(short = 'C', long = "constraints")]
        constraints: Option<PathBuf>,
    },
    /// Print the authority's public key in authorized-keys form.
    AuthorizedKey {
        #[arg(long)]
        ca: PathBuf,
    },
}

fn read_stdin() -> anyhow::Result<String> {
    let mut stdin = std::io::stdin();
    let mut buf = String::new();
    if !stdin.is_terminal() {
        stdin.read_to_string(&mut buf).context("reading stdin")?;
    }
    Ok(buf)
}

fn load_profile(path: &Path) -> anyhow::Result<AuthorityProfile> {
    AuthorityProfile::load(path).with_context(|| format!("loading profile {}", path.display()))
}

fn load_constraints(path: Option<&PathBuf>) -> anyhow::Result<Option<Constraints>> {
    path.map(|path| {
        Constraints::load(path).with_context(|| format!("loading constraints {}", path.display()))
    })
    .transpose()
}

fn run(opts: Opts) -> anyhow::Result<String> {
    match opts.command {
        Command::X509(X509Command::Req { request }) => {
            let profile = match request {
                Some(path) => load_profile(&path)?,
                None => {
                    let yaml = read_stdin()?;
                    if yaml.trim().is_empty() {
                        bail!("Provide the CSR parameters through stdin or -r.");
                    }
                    AuthorityProfile::from_yaml(&yaml)?
                }
            };
            let signer = signer::connect(&profile.signer)?;
            let csr = create_request(&profile, signer.as_ref(), profile.signer.algorithm)?;
            Ok(csr.to_pem()?)
        }
        Command::X509(X509Command::Sign {
            ca,
            intermediate,
            selfsigned,
            constraints,
        }) => {
            let profile = load_profile(&ca)?;
            let pem = read_stdin()?;
            if pem.trim().is_empty() {
                bail!("Provide the CSR through stdin.");
            }
            let csr = CertificateRequest::from_pem(&pem).context("parsing certificate request")?;
            let options = IssueOptions {
                constraints: load_constraints(constraints.as_ref())?,
                intermediate: intermediate.as_deref().map(load_profile).transpose()?,
                self_signed: selfsigned,
            };

            let certificate = Issuer::new(&profile)
                .with_engine(PolicyEngine::new(opts.default_expiry))
                .issue_with(&csr, &options, signer::connect)?;
            Ok(certificate.to_pem()?)
        }
        Command::Ssh(SshCommand::Sign { ca, constraints }) => {
            let profile = load_profile(&ca)?;
            let line = read_stdin()?;
            if line.trim().is_empty() {
                bail!("Public key must be piped.");
            }
            let public_key = SshCertificateRequest::parse_public_key(&line)?;
            let constraints = load_constraints(constraints.as_ref())?;
            let request =
                SshCertificateRequest::from_profile(public_key, &profile.ssh, constraints.as_ref())?;
            let template = SshCertificateTemplate::build(request)?;

            let signer = signer::connect(&profile.signer)?;
            let certificate = template.sign(signer.as_ref(), profile.signer.algorithm)?;
            Ok(marshal_certificate(&certificate)?)
        }
        Command::Ssh(SshCommand::AuthorizedKey { ca }) => {
            let profile = load_profile(&ca)?;
            let signer = signer::connect(&profile.signer)?;
            Ok(authorized_key(signer.as_ref())?)
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Opts::parse()) {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
