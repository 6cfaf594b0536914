//! Operator CLI for sponsored transfers
//!
//! - `check`: load and validate configuration, print the resolved network profile
//! - `quote`: service fee for a transfer kind and UI amount
//! - `transfer`: sign with a local keypair file and run the full commit flow

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sponsored_tx::fees::parse_ui_amount;
use sponsored_tx::metrics::metrics;
use sponsored_tx::observability::{init_logging, DEFAULT_LOG_FILTER};
use sponsored_tx::{
    ClientSigner, FeeCalculator, KeypairSigner, PipelineConfig, SubmitMode, TransferIntent,
    TransferPipeline,
};
use tracing::{info, warn};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "sponsored-tx.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate configuration and show the network profile in effect
    Check,

    /// Quote the service fee for a transfer
    Quote {
        #[arg(long)]
        kind: String,
        /// Decimal amount, e.g. 12.50
        #[arg(long)]
        amount: String,
        /// The recipient has no token account yet
        #[arg(long)]
        create_account: bool,
    },

    /// Sign and commit a single-recipient transfer
    Transfer {
        /// Solana CLI keypair file (JSON array of 64 bytes)
        #[arg(long, env = "SENDER_KEYPAIR")]
        keypair: String,
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        kind: String,
        #[arg(long)]
        amount: String,
        #[arg(long)]
        create_account: bool,
        /// Broadcast from this process instead of letting the sponsor submit
        #[arg(long)]
        client_submits: bool,
        /// Print Prometheus metrics after the transfer
        #[arg(long)]
        print_metrics: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "sponsored_tx=debug,info"
    } else {
        DEFAULT_LOG_FILTER
    };
    init_logging(filter, args.json_logs)?;

    let config = PipelineConfig::from_file_with_env(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config))?;

    match args.command {
        Command::Check => check(&config),
        Command::Quote {
            kind,
            amount,
            create_account,
        } => quote(&config, &kind, &amount, create_account),
        Command::Transfer {
            keypair,
            recipient,
            kind,
            amount,
            create_account,
            client_submits,
            print_metrics,
        } => {
            let signer = load_keypair(&keypair)?;
            let mode = if client_submits {
                SubmitMode::ClientSubmits
            } else {
                SubmitMode::SponsorSubmits
            };
            transfer(&config, &signer, &recipient, &kind, &amount, create_account, mode).await?;
            if print_metrics {
                print!("{}", metrics().gather_text()?);
            }
            Ok(())
        }
    }
}

fn check(config: &PipelineConfig) -> Result<()> {
    let profile = config.network_profile()?;
    info!(network = ?profile.kind, endpoints = config.ledger.endpoints.len(), "Configuration valid");
    if config.sponsor.service_url.is_none() {
        warn!("sponsor.service_url is not set; transfers cannot be committed");
    }
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

fn quote(config: &PipelineConfig, kind: &str, amount: &str, create_account: bool) -> Result<()> {
    let fees = FeeCalculator::new(config.fees);
    let quote = fees.quote_ui(kind, amount, config.token.decimals, create_account)?;
    println!("{}", serde_json::to_string_pretty(&quote)?);
    Ok(())
}

async fn transfer(
    config: &PipelineConfig,
    signer: &KeypairSigner,
    recipient: &str,
    kind: &str,
    amount: &str,
    create_account: bool,
    mode: SubmitMode,
) -> Result<()> {
    let amount = parse_ui_amount(amount, config.token.decimals)?;
    let intent = TransferIntent::parse_single(
        kind,
        &signer.pubkey().to_string(),
        recipient,
        amount,
        create_account,
    )?;

    let pipeline = TransferPipeline::connect(config)?.with_submit_mode(mode);
    let receipt = pipeline
        .execute(&intent, signer)
        .await
        .context("Transfer did not confirm")?;

    info!(
        transfer_id = %receipt.transfer_id,
        signature = %receipt.signature,
        rebuilds = receipt.rebuilds,
        lenient = receipt.record.is_lenient(),
        "Transfer confirmed"
    );
    println!("{}", receipt.signature);
    Ok(())
}

fn load_keypair(path: &str) -> Result<KeypairSigner> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read keypair file {path}"))?;
    let bytes: Vec<u8> =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse keypair file {path}"))?;
    Ok(KeypairSigner::from_bytes(&bytes)?)
}
