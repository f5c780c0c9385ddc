//! Ballast CLI - Main entry point

use ballast_risk::{AssetParams, ProtocolConfig};
use ballast_rpc::{commands, AppContext, Collaborators};
use ballast_core::Ratio;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ballast")]
#[command(about = "Ballast - stablecoin risk core", long_about = None)]
struct Cli {
    /// Data directory path
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show mode, TCR and totals
    Status,

    /// Show one vault with its ratio and rate
    Vault {
        vault_id: u64,
    },

    /// List the vaults of an owner
    Vaults {
        owner: String,
    },

    /// List vaults below their liquidation threshold
    Liquidatable,

    /// List payouts still owed
    Pending,

    /// Journal records that touched a vault
    History {
        vault_id: u64,
    },

    /// Rebuild state from the journal
    Replay,

    /// Audit the journal (verify hash chain and invariants)
    Audit,

    // === Operator ===

    /// Configure a collateral asset
    ConfigureAsset {
        asset: String,
        #[arg(long)]
        liquidation_ratio: Decimal,
        #[arg(long)]
        borrow_threshold: Decimal,
        #[arg(long, default_value = "0.1")]
        liquidation_bonus: Decimal,
        #[arg(long, default_value = "0.05")]
        base_rate: Decimal,
        #[arg(long)]
        recovery_target: Decimal,
        #[arg(long, default_value = "8")]
        decimals: u8,
        /// Zero uses the configured default floor
        #[arg(long, default_value = "0")]
        price_floor: Decimal,
        /// Acting principal (defaults to the configured operator)
        #[arg(long)]
        operator: Option<String>,
    },

    /// Enable or disable a collateral asset
    EnableAsset {
        asset: String,
        #[arg(long)]
        disable: bool,
        #[arg(long)]
        operator: Option<String>,
    },

    /// Register, enable or disable a stable unit
    StableUnit {
        unit: String,
        #[arg(long)]
        disable: bool,
        #[arg(long)]
        operator: Option<String>,
    },

    /// Set the stable-unit fee
    StableFee {
        fee: Decimal,
        #[arg(long)]
        operator: Option<String>,
    },

    /// Record a price observed now
    Price {
        asset: String,
        price: Decimal,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = ProtocolConfig::load(cli.config.as_deref())?;
    let operator_or = |given: Option<String>| given.unwrap_or_else(|| config.operator.to_string());

    let ctx = AppContext::new(&cli.data, config.clone(), Collaborators::in_memory()).await?;

    match cli.command {
        Commands::Status => commands::status(&ctx).await?,

        Commands::Vault { vault_id } => commands::vault(&ctx, vault_id).await?,

        Commands::Vaults { owner } => commands::vaults(&ctx, &owner).await?,

        Commands::Liquidatable => commands::liquidatable(&ctx).await?,

        Commands::Pending => commands::pending(&ctx).await?,

        Commands::History { vault_id } => commands::history(&ctx, vault_id)?,

        Commands::Replay => {
            let status = ctx.status().await;
            println!(
                "Replayed {} records: {} vaults, mode {}",
                status.last_sequence, status.vault_count, status.mode
            );
        }

        Commands::Audit => commands::audit(&ctx).await?,

        Commands::ConfigureAsset {
            asset,
            liquidation_ratio,
            borrow_threshold,
            liquidation_bonus,
            base_rate,
            recovery_target,
            decimals,
            price_floor,
            operator,
        } => {
            let params = AssetParams {
                liquidation_ratio: Ratio::new(liquidation_ratio)?,
                borrow_threshold: Ratio::new(borrow_threshold)?,
                liquidation_bonus: Ratio::new(liquidation_bonus)?,
                base_rate: Ratio::new(base_rate)?,
                recovery_target_ratio: Ratio::new(recovery_target)?,
                decimals,
                price_floor,
            };
            commands::configure_asset(&ctx, &operator_or(operator), &asset, params).await?;
        }

        Commands::EnableAsset {
            asset,
            disable,
            operator,
        } => commands::enable_asset(&ctx, &operator_or(operator), &asset, !disable).await?,

        Commands::StableUnit {
            unit,
            disable,
            operator,
        } => commands::configure_stable_unit(&ctx, &operator_or(operator), &unit, !disable).await?,

        Commands::StableFee { fee, operator } => {
            commands::set_stable_fee(&ctx, &operator_or(operator), fee).await?
        }

        Commands::Price { asset, price } => commands::price(&ctx, &asset, price).await?,
    }

    Ok(())
}
