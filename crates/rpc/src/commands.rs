//! CLI commands

use ballast_core::{AssetCode, Principal, Price, Ratio, VaultId};
use ballast_oracle::PriceReading;
use ballast_risk::AssetParams;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::context::AppContext;

fn print_json<T: Serialize>(value: &T) -> Result<(), anyhow::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// System status: mode, TCR, cached averages, totals
pub async fn status(ctx: &AppContext) -> Result<(), anyhow::Error> {
    print_json(&ctx.status().await)
}

pub async fn vault(ctx: &AppContext, vault_id: VaultId) -> Result<(), anyhow::Error> {
    let Some(vault) = ctx.vault(vault_id).await else {
        anyhow::bail!("Vault {} not found", vault_id);
    };
    print_json(&vault)?;

    match ctx.collateral_ratio(vault_id).await? {
        Some(ratio) => println!("Collateral ratio: {}", ratio),
        None => println!("Collateral ratio: no price"),
    }
    match ctx.vault_rate(vault_id).await {
        Ok(rate) => print_json(&rate)?,
        Err(e) => println!("Rate unavailable: {}", e),
    }
    Ok(())
}

pub async fn vaults(ctx: &AppContext, owner: &str) -> Result<(), anyhow::Error> {
    let owner = Principal::new(owner)?;
    let vaults = ctx.vaults_by_owner(&owner).await;
    if vaults.is_empty() {
        println!("No vaults for {}", owner);
        return Ok(());
    }
    print_json(&vaults)
}

pub async fn liquidatable(ctx: &AppContext) -> Result<(), anyhow::Error> {
    let candidates = ctx.liquidatable().await;
    if candidates.is_empty() {
        println!("No liquidatable vaults");
        return Ok(());
    }
    println!("{:<8} {:<16} {:<8} {:>14} {:>10} {:>18}", "VAULT", "OWNER", "ASSET", "RATIO", "THRESHOLD", "DEBT");
    for c in candidates {
        println!(
            "{:<8} {:<16} {:<8} {:>14} {:>10} {:>18}",
            c.vault_id,
            c.owner,
            c.asset,
            c.ratio.value().round_dp(4),
            c.threshold,
            c.debt
        );
    }
    Ok(())
}

pub async fn pending(ctx: &AppContext) -> Result<(), anyhow::Error> {
    let payouts = ctx.pending_payouts().await;
    if payouts.is_empty() {
        println!("No pending payouts");
    }
    for payout in payouts {
        println!("{} (since {})", payout, payout.created_at);
    }
    Ok(())
}

/// Every journal record that touched a vault
pub fn history(ctx: &AppContext, vault_id: VaultId) -> Result<(), anyhow::Error> {
    for record in ctx.vault_history(vault_id)? {
        println!(
            "#{:<6} {} {}",
            record.sequence,
            record.timestamp.to_rfc3339(),
            serde_json::to_string(&record.event)?
        );
    }
    Ok(())
}

/// Verify the hash chain and the state invariants
pub async fn audit(ctx: &AppContext) -> Result<(), anyhow::Error> {
    match ctx.audit() {
        Ok(count) => println!("Hash chain verified ({} records)", count),
        Err(e) => {
            println!("Hash chain broken: {}", e);
            return Ok(());
        }
    }

    let violations = ctx.invariant_violations().await;
    if violations.is_empty() {
        println!("State invariants hold");
    } else {
        for violation in violations {
            println!("Invariant violated: {}", violation);
        }
    }
    Ok(())
}

pub async fn configure_asset(
    ctx: &AppContext,
    operator: &str,
    asset: &str,
    params: AssetParams,
) -> Result<(), anyhow::Error> {
    let operator = Principal::new(operator)?;
    let asset: AssetCode = asset.parse()?;
    let receipt = ctx.configure_asset(&operator, &asset, &params).await?;
    println!("Configured {} (seq: {})", asset, receipt.sequence);
    Ok(())
}

pub async fn enable_asset(ctx: &AppContext, operator: &str, asset: &str, enabled: bool) -> Result<(), anyhow::Error> {
    let operator = Principal::new(operator)?;
    let asset: AssetCode = asset.parse()?;
    let receipt = ctx.enable_asset(&operator, &asset, enabled).await?;
    println!(
        "{} {} (seq: {})",
        if enabled { "Enabled" } else { "Disabled" },
        asset,
        receipt.sequence
    );
    Ok(())
}

pub async fn configure_stable_unit(
    ctx: &AppContext,
    operator: &str,
    unit: &str,
    enabled: bool,
) -> Result<(), anyhow::Error> {
    let operator = Principal::new(operator)?;
    let unit: AssetCode = unit.parse()?;
    let receipt = ctx.configure_stable_unit(&operator, &unit, enabled).await?;
    println!("Stable unit {} enabled={} (seq: {})", unit, enabled, receipt.sequence);
    Ok(())
}

pub async fn set_stable_fee(ctx: &AppContext, operator: &str, fee: Decimal) -> Result<(), anyhow::Error> {
    let operator = Principal::new(operator)?;
    let receipt = ctx.set_stable_fee(&operator, Ratio::new(fee)?).await?;
    println!("Stable fee set to {} (seq: {})", fee, receipt.sequence);
    Ok(())
}

/// Record a price observed now
pub async fn price(ctx: &AppContext, asset: &str, price: Decimal) -> Result<(), anyhow::Error> {
    let asset: AssetCode = asset.parse()?;
    let reading = PriceReading::new(asset.clone(), Price::new(price)?, ctx.clock.now());
    let receipt = ctx.ingest_price(&reading).await?;
    println!("{} = {} (seq: {})", asset, price, receipt.sequence);
    Ok(())
}
