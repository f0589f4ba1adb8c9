use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use efsf_core::DestructionCertificate;
use efsf_crypto::{Attestor, CertificateVerifier};
use efsf_ledger::{CertificateLedger, LedgerOptions};
use rand::RngCore as _;
use serde::Serialize;
use tracing::info;
use zeroize::Zeroizing;

#[derive(Debug, Parser)]
#[command(
    name = "efsfctl",
    version,
    about = "Verify destruction certificates and inspect certificate ledgers"
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Verify a certificate JSON file (`-` for stdin) against an attestation public key.
    Verify {
        #[arg(long)]
        certificate: PathBuf,

        /// Hex-encoded Ed25519 public key of the issuing store.
        #[arg(long, env = "EFSF_ATTESTATION_PUBLIC_KEY")]
        public_key: String,
    },

    /// Generate an attestation seed for `CryptoProvider::from_signing_seed`.
    Keygen,

    #[command(subcommand)]
    Ledger(LedgerCommand),
}

#[derive(Debug, Subcommand)]
enum LedgerCommand {
    /// Print ledger entries, newest first.
    List {
        #[arg(long, env = "EFSF_LEDGER_PATH")]
        path: PathBuf,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Recompute the hash chain from genesis.
    Verify {
        #[arg(long, env = "EFSF_LEDGER_PATH")]
        path: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct VerifyOutput {
    valid: bool,
    certificate_id: String,
    resource_id: String,
    method: String,
    destroyed_at: String,
    signer_key_id: String,
    custody_entries: usize,
}

#[derive(Debug, Serialize)]
struct KeygenOutput {
    seed_hex: String,
    public_key_hex: String,
    key_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();
    match args.command {
        Command::Verify {
            certificate,
            public_key,
        } => {
            let cert = read_certificate(&certificate)?;
            let out = verify_certificate(&cert, &public_key)?;
            print_json(&out)?;
        }
        Command::Keygen => print_json(&keygen())?,
        Command::Ledger(LedgerCommand::List {
            path,
            limit,
            offset,
        }) => {
            let ledger = open_ledger(&path).await?;
            for entry in ledger.list(limit, offset).await.context("list ledger")? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Command::Ledger(LedgerCommand::Verify { path }) => {
            let ledger = open_ledger(&path).await?;
            let verified = ledger
                .verify_chain()
                .await
                .with_context(|| format!("verify ledger {}", path.display()))?;
            info!(path = %path.display(), verified, "ledger chain intact");
            print_json(&serde_json::json!({ "valid": true, "entries": verified }))?;
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_certificate(path: &Path) -> anyhow::Result<DestructionCertificate> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read certificate from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("read certificate {}", path.display()))?
    };
    serde_json::from_str(&raw).context("parse certificate json")
}

fn verify_certificate(
    cert: &DestructionCertificate,
    public_key_hex: &str,
) -> anyhow::Result<VerifyOutput> {
    let public_key = hex::decode(public_key_hex.trim()).context("decode public key hex")?;
    let verifier = CertificateVerifier::from_public_key(&public_key)?;
    verifier
        .verify_certificate(cert)
        .with_context(|| format!("certificate {} failed verification", cert.id()))?;

    Ok(VerifyOutput {
        valid: true,
        certificate_id: cert.id().to_string(),
        resource_id: cert.resource_id().to_string(),
        method: cert.method().to_string(),
        destroyed_at: cert.destroyed_at().to_rfc3339(),
        signer_key_id: verifier.key_id().to_string(),
        custody_entries: cert.custody().len(),
    })
}

fn keygen() -> KeygenOutput {
    let mut seed = Zeroizing::new([0u8; 32]);
    rand::rng().fill_bytes(&mut seed[..]);
    let attestor = Attestor::from_seed(&seed);
    KeygenOutput {
        seed_hex: hex::encode(&seed[..]),
        public_key_hex: hex::encode(attestor.public_key_bytes()),
        key_id: attestor.key_id().to_string(),
    }
}

async fn open_ledger(path: &Path) -> anyhow::Result<CertificateLedger> {
    if !path.exists() {
        anyhow::bail!("ledger {} does not exist", path.display());
    }
    CertificateLedger::open(LedgerOptions::new(path.to_path_buf()))
        .await
        .with_context(|| format!("open ledger {}", path.display()))
}
