//! Privacy CLI
//!
//! Key generation, address decoding, output scanning and read-only
//! inspection of a node's privacy database.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use privacy_core::consensus::{ConsensusParams, PrivacyState};
use privacy_core::crypto::scalar::scalar_from_canonical;
use privacy_core::crypto::RingPoint;
use privacy_core::privacy::stealth::{derive_spending_key, scan_output, StealthAddress, StealthOutput, StealthSecrets};
use rand::rngs::OsRng;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "privacy-cli", version, about = "Privacy layer tools")]
struct Args {
    /// Network preset: mainnet, testnet, regtest
    #[arg(short, long, default_value = "mainnet", global = true)]
    network: String,

    /// JSON consensus parameters, overriding the preset
    #[arg(long, global = true)]
    params: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate stealth secrets and print the address
    Keygen,

    /// Decode and check an sx1 address
    DecodeAddress { address: String },

    /// Test whether a stealth output belongs to a wallet
    Scan {
        #[arg(long)]
        scan_secret: String,
        #[arg(long)]
        spend_public: String,
        #[arg(long)]
        ephemeral: String,
        #[arg(long)]
        one_time: String,
        #[arg(long)]
        view_tag: u8,
        #[arg(long, default_value = "0")]
        index: u32,
        /// Also derive the one-time spending key
        #[arg(long)]
        spend_secret: Option<String>,
    },

    /// Print spent key image counts of a privacy database
    LedgerStats {
        #[arg(long)]
        path: PathBuf,
    },

    /// Print size, depth and root of the curve tree of a privacy database
    TreeInfo {
        #[arg(long)]
        path: PathBuf,
    },

    /// Print the effective consensus parameters as JSON
    Params,
}

fn hex32(label: &str, s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s).with_context(|| format!("{} is not hex", label))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow!("{} must be 32 bytes, got {}", label, b.len()))
}

fn point(label: &str, s: &str) -> Result<RingPoint> {
    let p = RingPoint(hex32(label, s)?);
    if !p.is_valid() {
        bail!("{} is not a valid point", label);
    }
    Ok(p)
}

fn load_params(args: &Args) -> Result<ConsensusParams> {
    let params = match &args.params {
        Some(path) => ConsensusParams::from_json_file(path)?,
        None => ConsensusParams::for_network(&args.network)
            .ok_or_else(|| anyhow!("unknown network {}", args.network))?,
    };
    debug!(network = %params.network, "consensus parameters loaded");
    Ok(params)
}

fn open_state(args: &Args, path: &Path) -> Result<PrivacyState<privacy_core::SledStore, privacy_core::fcmp::SledTreeStorage>> {
    if !path.exists() {
        bail!("no privacy database at {}", path.display());
    }
    let state = PrivacyState::open_sled(load_params(args)?, path)
        .with_context(|| format!("opening {}", path.display()))?;
    info!(path = %path.display(), "opened privacy database");
    Ok(state)
}

fn run(args: &Args) -> Result<()> {
    match &args.command {
        Command::Keygen => {
            let secrets = StealthSecrets::generate(&mut OsRng);
            println!("scan_secret:  {}", hex::encode(secrets.scan_secret.to_bytes()));
            println!("spend_secret: {}", hex::encode(secrets.spend_secret.to_bytes()));
            println!("address:      {}", secrets.address().to_address_string());
        }
        Command::DecodeAddress { address } => {
            let addr = StealthAddress::from_address_string(address)?;
            println!("scan_public:  {}", addr.scan_public.to_hex());
            println!("spend_public: {}", addr.spend_public.to_hex());
            match addr.prefix {
                Some(p) => println!("prefix:       {} bits, value {:#010x}", p.bits, p.value),
                None => println!("prefix:       none"),
            }
        }
        Command::Scan { scan_secret, spend_public, ephemeral, one_time, view_tag, index, spend_secret } => {
            let scan = scalar_from_canonical(&hex32("scan secret", scan_secret)?)
                .ok_or_else(|| anyhow!("scan secret is not a canonical scalar"))?;
            let output = StealthOutput {
                one_time_key: point("one-time key", one_time)?,
                ephemeral_key: point("ephemeral key", ephemeral)?,
                view_tag: *view_tag,
                output_index: *index,
            };
            let spend_public = point("spend public key", spend_public)?;
            if !scan_output(&output, &scan, &spend_public) {
                println!("not ours");
                return Ok(());
            }
            println!("ours");
            if let Some(spend_secret) = spend_secret {
                let spend = scalar_from_canonical(&hex32("spend secret", spend_secret)?)
                    .ok_or_else(|| anyhow!("spend secret is not a canonical scalar"))?;
                let x = derive_spending_key(&output, &scan, &spend)
                    .ok_or_else(|| anyhow!("spend secret does not match this output"))?;
                println!("one_time_secret: {}", hex::encode(x.to_bytes()));
            }
        }
        Command::LedgerStats { path } => {
            let stats = open_state(args, path)?.stats()?;
            println!("ring key images: {}", stats.ring_key_images);
            println!("fcmp key images: {}", stats.fcmp_key_images);
        }
        Command::TreeInfo { path } => {
            let stats = open_state(args, path)?.stats()?;
            println!("outputs: {}", stats.tree_outputs);
            println!("depth:   {}", stats.tree_depth);
            println!("root:    {}", stats.tree_root.to_hex());
            match stats.tip_height {
                Some(h) => println!("tip:     {}", h),
                None => println!("tip:     none"),
            }
        }
        Command::Params => {
            println!("{}", load_params(args)?.to_json()?);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("privacy_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    run(&args)
}
