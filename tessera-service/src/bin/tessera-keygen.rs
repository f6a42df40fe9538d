//! Dealer ceremony utility: generate K-of-N Ed25519 key shards plus the
//! per-cosigner ECIES and cluster identity keypairs, written as 0600 JSON
//! files. Run this offline and distribute one directory per cosigner.

use clap::Parser;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::path::PathBuf;
use std::process::ExitCode;
use tessera_core::domain::ecies::EciesKeypair;
use tessera_core::domain::threshold::deal_shards;
use tessera_core::infrastructure::keys::{save_ecies_keypair, save_identity_key, save_key_shard};

#[derive(Debug, Parser)]
#[command(name = "tessera-keygen", about = "Generate threshold key shards for a cosigner cluster", version)]
struct Cli {
    /// K: cosigners required per signature.
    #[arg(short, long)]
    threshold: u8,

    /// N: total cosigners in the cluster.
    #[arg(short, long)]
    shards: u8,

    /// Output directory; one `cosigner-<id>/` subdirectory per shard.
    #[arg(short, long, default_value = "./ceremony")]
    out_dir: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("keygen failed: {}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(cli: &Cli) -> tessera_core::Result<()> {
    let shards = deal_shards(cli.threshold, cli.shards, &mut OsRng)?;
    let group_pubkey = hex::encode(shards[0].group_pubkey);

    println!("# consensus public key: {}", group_pubkey);
    println!("# registry entries for tessera.toml:");

    for shard in &shards {
        let dir = cli.out_dir.join(format!("cosigner-{}", shard.shard_id));
        std::fs::create_dir_all(&dir)?;

        let ecies = EciesKeypair::generate();
        let identity = SigningKey::generate(&mut OsRng);

        save_key_shard(&dir.join("shard.json"), shard)?;
        save_ecies_keypair(&dir.join("ecies.json"), &ecies)?;
        save_identity_key(&dir.join("identity.json"), &identity)?;

        println!();
        println!("[[threshold.cosigners]]");
        println!("shard_id = {}", shard.shard_id);
        println!("p2p_addr = \"127.0.0.1:55{:02}\"", shard.shard_id);
        println!("identity_pubkey = \"{}\"", hex::encode(identity.verifying_key().to_bytes()));
        println!("ecies_pubkey = \"{}\"", hex::encode(ecies.public().0));
    }

    eprintln!("wrote {} cosigner directories under {}", shards.len(), cli.out_dir.display());
    Ok(())
}
