use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use config_manager::SystemConfig;
use csv::Writer;
use dex_client::{BirdEyeClient, HeliusClient};
use pnl_core::{PnLError, PnlEngine, PnlReport};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "wallet_pnl")]
#[command(about = "FIFO cost-basis profit and loss for Solana wallets")]
struct Args {
    /// Config file (defaults to ./config.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Write to this file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Wallet addresses to analyze
    #[arg(required = true)]
    wallets: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

type WalletResult = (String, std::result::Result<PnlReport, PnLError>);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pnl_core=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SystemConfig::load_from_path(path),
        None => SystemConfig::load(),
    }
    .context("Failed to load configuration")?;
    info!("Loaded configuration: {}", config.to_redacted_json());

    let birdeye = BirdEyeClient::new(config.birdeye.clone(), config.retry.clone())
        .context("Failed to create BirdEye client")?;
    let mut helius = HeliusClient::new(config.helius.clone(), config.retry.clone())
        .context("Failed to create Helius client")?;
    if config.birdeye.historical_prices {
        helius = helius.with_historical_prices(Arc::new(birdeye.clone()));
    }

    let engine = PnlEngine::new(helius, birdeye, config.engine.clone());
    let results = engine.compute_many(&args.wallets).await;

    let rendered = match args.format {
        OutputFormat::Json => render_json(&results)?,
        OutputFormat::Csv => render_csv(&results)?,
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote results to {}", path.display());
        }
        None => println!("{}", rendered),
    }

    ensure_any_succeeded(&results)
}

/// Errors when no wallet produced a report, so the process exits non-zero
fn ensure_any_succeeded(results: &[WalletResult]) -> Result<()> {
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if failed == 0 {
        return Ok(());
    }

    warn!("{} of {} wallets failed", failed, results.len());
    if failed == results.len() {
        anyhow::bail!("All {} wallets failed", failed);
    }
    Ok(())
}

fn render_json(results: &[WalletResult]) -> Result<String> {
    let mut document = serde_json::Map::new();
    for (wallet, result) in results {
        let entry = match result {
            Ok(report) => serde_json::json!({ "report": report }),
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        document.insert(wallet.clone(), entry);
    }
    Ok(serde_json::to_string_pretty(&document)?)
}

fn render_csv(results: &[WalletResult]) -> Result<String> {
    let mut wtr = Writer::from_writer(Cursor::new(Vec::new()));

    wtr.write_record([
        "wallet_address",
        "mint",
        "realized_pnl_usd",
        "unrealized_pnl_usd",
        "total_pnl_usd",
        "average_cost_basis_usd",
        "quantity",
        "current_price_usd",
        "error",
    ])?;

    for (wallet, result) in results {
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                wtr.write_record([wallet.as_str(), "", "", "", "", "", "", "", e.to_string().as_str()])?;
                continue;
            }
        };

        for (mint, token) in &report.tokens {
            let position = report.positions.get(mint);
            wtr.write_record([
                wallet.clone(),
                mint.clone(),
                token.realized_pnl_usd.to_string(),
                token.unrealized_pnl_usd.to_string(),
                token.total_pnl_usd.to_string(),
                token.average_cost_basis_usd.map(|d| d.to_string()).unwrap_or_default(),
                position.map(|p| p.quantity.to_string()).unwrap_or_default(),
                position
                    .and_then(|p| p.current_price_usd)
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                String::new(),
            ])?;
        }

        wtr.write_record([
            wallet.clone(),
            "overall".to_string(),
            report.overall.realized_pnl_usd.to_string(),
            report.overall.unrealized_pnl_usd.to_string(),
            report.overall.total_pnl_usd.to_string(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
        ])?;
    }

    let bytes = wtr.into_inner().map_err(|e| anyhow::anyhow!("CSV flush failed: {}", e))?.into_inner();
    Ok(String::from_utf8(bytes)?)
}
