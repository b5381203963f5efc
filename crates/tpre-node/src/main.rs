//! tPRE Node CLI
//!
//! Command-line interface for the threshold proxy re-encryption node:
//! - Local end-to-end DKG simulation over the in-memory hub
//! - Optional secret round trip: encrypt, threshold re-encrypt, reader recovery
//! - Inspection of stored key shares

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use tpre_core::{
    dkg::Session,
    group,
    reencrypt::{self, ReencryptRequest},
    transport::MemoryHub,
    wire, DistKeyShare, NodeKey, SessionConfig, DEFAULT_PARTICIPANTS, DEFAULT_THRESHOLD,
};
use tracing::{info, Level};

/// tPRE Node - threshold proxy re-encryption participant
#[derive(Parser)]
#[command(name = "tpre-node")]
#[command(about = "Threshold DKG and proxy re-encryption node")]
#[command(version)]
struct Cli {
    /// Data directory for key shares
    #[arg(short, long, env = "DEST", default_value = "./data")]
    dest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an n-participant key generation locally and save every share
    Simulate {
        /// Number of participants
        #[arg(short, long, default_value_t = DEFAULT_PARTICIPANTS)]
        participants: u32,

        /// Threshold (t-of-n)
        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: u32,

        /// Optional secret to round-trip through re-encryption
        #[arg(short, long)]
        secret: Option<String>,
    },

    /// Show info about a stored key share
    Inspect {
        /// Path to a key share JSON file
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            participants,
            threshold,
            ref secret,
        } => {
            std::fs::create_dir_all(&cli.dest)?;
            run_simulate(&cli, participants, threshold, secret.as_deref()).await?;
        }
        Commands::Inspect { ref file } => {
            run_inspect(file)?;
        }
    }

    Ok(())
}

async fn run_simulate(
    cli: &Cli,
    participants: u32,
    threshold: u32,
    secret: Option<&str>,
) -> Result<()> {
    info!(participants, threshold, "Starting local DKG simulation");

    let keys: Vec<NodeKey> = (0..participants)
        .map(|_| NodeKey::generate(&mut OsRng))
        .collect();
    let publics: Vec<ProjectivePoint> = keys.iter().map(|key| key.public()).collect();
    let config = SessionConfig::new(publics, threshold)?;

    let hub = MemoryHub::new();
    let handles: Vec<_> = keys
        .into_iter()
        .map(|key| {
            let config = config.clone();
            let transport = hub.attach();
            tokio::spawn(async move {
                let session = Session::new(config, key)?;
                session.run(transport).await
            })
        })
        .collect();

    let results = futures_util::future::try_join_all(handles).await?;
    let mut shares = Vec::with_capacity(results.len());
    for result in results {
        shares.push(result?);
    }

    for share in &shares {
        let path = cli
            .dest
            .join(format!("keyshare.{}.json", share.pri_share.index));
        std::fs::write(&path, wire::encode_dist_key_share(share)?)?;
        info!(index = share.pri_share.index, path = ?path, "Key share saved");
    }

    let public_key = shares[0].public_key();
    println!(
        "Distributed Public Key: {}",
        hex::encode(group::encode_point(&public_key))
    );

    if let Some(secret) = secret {
        round_trip_secret(&shares, threshold, secret.as_bytes())?;
    }

    Ok(())
}

/// Encrypt a secret against the distributed key, have the first `threshold`
/// nodes answer a reader's request, and recover the plaintext as the reader.
fn round_trip_secret(shares: &[DistKeyShare], threshold: u32, plaintext: &[u8]) -> Result<()> {
    let group_public = shares[0].public_key();
    let envelope = reencrypt::encrypt_secret(&group_public, plaintext, &mut OsRng)?;

    let reader_secret = Scalar::random(&mut OsRng);
    let request = ReencryptRequest {
        org_id: "local".into(),
        secret_id: "simulated".into(),
        reader_public: ProjectivePoint::GENERATOR * reader_secret,
    };

    let mut collected = Vec::with_capacity(threshold as usize);
    for share in &shares[..threshold as usize] {
        let answer = reencrypt::handle_request(&request, &envelope, share, &mut OsRng)?;
        reencrypt::verify_share(&answer, &shares[0].commits, &envelope.enc_cmt)?;
        collected.push(answer);
    }

    let combined = reencrypt::combine_shares(&collected, threshold)?;
    let recovered =
        reencrypt::decrypt_secret(&envelope, &combined, &reader_secret, &group_public)?;
    anyhow::ensure!(recovered == plaintext, "recovered secret does not match");

    info!(
        shares = collected.len(),
        bytes = recovered.len(),
        "Secret re-encrypted and recovered by the reader"
    );
    println!("Recovered Secret: {}", String::from_utf8_lossy(&recovered));

    Ok(())
}

fn run_inspect(file: &Path) -> Result<()> {
    let bytes = std::fs::read(file)?;
    let share = wire::decode_dist_key_share(&bytes)?;
    share.verify()?;

    let own_public = group::eval_commitments(&share.commits, share.pri_share.index);

    println!("Key Share Info:");
    println!("  Index: {}", share.pri_share.index);
    println!("  Threshold: {}", share.commits.len());
    println!(
        "  Public Key: {}",
        hex::encode(group::encode_point(&share.public_key()))
    );
    println!(
        "  Public Share: {}",
        hex::encode(group::encode_point(&own_public))
    );

    Ok(())
}
