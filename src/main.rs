// src/main.rs
//! Hardware signer diagnostics entry point
//! Lists connected Ledger devices, derives addresses and signs legacy amino documents.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hardware_signer::core::config::SignerConfig;
use hardware_signer::core::types::DerivationPath;
use hardware_signer::hardware::driver::{Driver, DriverFactory};
use hardware_signer::hardware::mock::{MockBus, MockDriver};
use hardware_signer::hardware::LedgerHub;
use hardware_signer::signing::{LedgerSigner, SIGN_MODE_LEGACY_AMINO_JSON};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_CONFIG_PATH: &str = "hw_signer.toml";
const DEFAULT_PATH: &str = "m/44'/60'/0'/0/0";

#[derive(Parser)]
#[command(name = "hw_signer")]
#[command(about = "Ledger hardware signer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Use an in-process simulated device instead of USB HID
    #[arg(long, global = true)]
    simulate: bool,

    /// TOML configuration file (falls back to $CONFIG_PATH, then hw_signer.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected devices and their status
    List,
    /// Print the bech32 address of a derivation path
    Address {
        #[arg(long, default_value = DEFAULT_PATH)]
        path: DerivationPath,
        /// Human readable prefix of the bech32 address
        #[arg(long, default_value = "inj")]
        hrp: String,
    },
    /// Print the uncompressed public key of a derivation path
    Pubkey {
        #[arg(long, default_value = DEFAULT_PATH)]
        path: DerivationPath,
    },
    /// Sign a legacy amino JSON sign document
    Sign {
        #[arg(long, default_value = DEFAULT_PATH)]
        path: DerivationPath,
        /// File holding the sign document
        #[arg(long)]
        doc_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging()?;

    let config = load_config(args.config.as_deref())?;
    let hub = build_hub(&config, args.simulate)?;

    match args.command {
        Commands::List => {
            let wallets = hub.wallets().await;
            if wallets.is_empty() {
                println!("no Ledger devices detected");
            }
            for wallet in wallets {
                let status = wallet.status();
                match status.failure {
                    Some(failure) => println!("{}\t{} ({})", wallet.identity(), status.text, failure),
                    None => println!("{}\t{}", wallet.identity(), status.text),
                }
            }
        }
        Commands::Address { path, hrp } => {
            let signer = LedgerSigner::discover(&hub, config.typed_data.clone()).await?;
            let (public_key, address) = signer.address(&path, &hrp).await?;
            println!("{}", address);
            println!("{}", hex::encode(public_key));
            close(&signer).await;
        }
        Commands::Pubkey { path } => {
            let signer = LedgerSigner::discover(&hub, config.typed_data.clone()).await?;
            let public_key = signer.public_key(&path).await?;
            println!("{}", hex::encode(public_key));
            close(&signer).await;
        }
        Commands::Sign { path, doc_file } => {
            let doc = std::fs::read(&doc_file)
                .with_context(|| format!("failed to read {}", doc_file.display()))?;
            let signer = LedgerSigner::discover(&hub, config.typed_data.clone()).await?;
            let signature = signer.sign(&path, &doc, SIGN_MODE_LEGACY_AMINO_JSON).await?;
            println!("0x{}", hex::encode(signature));
            close(&signer).await;
        }
    }

    Ok(())
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Explicit `--config` must exist; the implicit locations are optional
fn load_config(explicit: Option<&Path>) -> Result<SignerConfig> {
    if let Some(path) = explicit {
        return Ok(SignerConfig::load(path)?);
    }

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    if !Path::new(&config_path).exists() {
        return Ok(SignerConfig::default());
    }

    let config = SignerConfig::load(&config_path)?;
    info!("Loaded configuration from {}", config_path);
    Ok(config)
}

fn build_hub(config: &SignerConfig, simulate: bool) -> Result<LedgerHub> {
    if !simulate {
        return Ok(LedgerHub::native(config)?);
    }

    info!("Using a simulated Ledger device");
    let bus = Arc::new(MockBus::with_devices(1));
    let factory: DriverFactory = Arc::new(|| -> Box<dyn Driver> { Box::new(MockDriver::new()) });
    Ok(LedgerHub::new(config.hub.clone(), config.wallet.clone(), bus, factory)?)
}

async fn close(signer: &LedgerSigner) {
    if let Err(e) = signer.close().await {
        warn!("Failed to close wallet: {}", e);
    }
}
