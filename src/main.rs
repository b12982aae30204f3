//! Pricewise CLI

use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use pricewise::prelude::*;
use rust_decimal::Decimal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pricewise", about = "Price a basket with discounts and tax", long_about = None)]
struct Cli {
    /// YAML file holding the list of items
    #[arg(long)]
    basket: PathBuf,

    /// Optional YAML settings file
    #[arg(long, env = "PRICEWISE_CONFIG")]
    config: Option<PathBuf>,

    /// Global discount percentage (overrides settings)
    #[arg(long)]
    discount: Option<Decimal>,

    /// Global tax percentage (overrides settings)
    #[arg(long)]
    tax: Option<Decimal>,

    /// Coupon codes to apply, in order
    #[arg(long = "coupon")]
    coupons: Vec<String>,

    /// User applying the coupons; integers match numeric user ids
    #[arg(long)]
    user: Option<UserId>,

    /// Print the breakdown as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Default log filter when `RUST_LOG` is unset
    #[arg(long, env = "PRICEWISE_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

/// More than one line item in the basket.
#[derive(Debug, Default)]
struct MultipleLines;

impl ConditionRule for MultipleLines {
    fn evaluate(&self, items: &[Item]) -> bool {
        items.len() > 1
    }

    fn slug(&self) -> Option<&str> {
        Some("multiple_lines")
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    }
    .apply_env()?;

    let items: Vec<Item> = serde_norway::from_str(
        &fs::read_to_string(&cli.basket)
            .with_context(|| format!("failed to read basket {}", cli.basket.display()))?,
    )
    .context("basket must be a YAML list of items")?;

    let mut calculator = Calculator::from_settings(&settings, &catalog(&settings))?
        .with_observer(Arc::new(TracingObserver));

    calculator.set_items(items);

    if let Some(discount) = cli.discount {
        calculator.set_global_discount(discount);
    }

    if let Some(tax) = cli.tax {
        calculator.set_global_tax_rate(tax);
    }

    let user = cli.user;

    for code in &cli.coupons {
        if calculator.apply_coupon(code, user.clone())? {
            info!(code, "coupon accepted");
        } else {
            warn!(code, "coupon not applied");
        }
    }

    let breakdown = calculator.breakdown()?;

    let mut out = io::stdout().lock();

    if cli.json {
        serde_json::to_writer_pretty(&mut out, &breakdown)?;
        writeln!(out)?;
    } else {
        breakdown.write_to(&mut out)?;
    }

    Ok(())
}

fn catalog(settings: &Settings) -> RuleCatalog {
    let mut catalog = RuleCatalog::new();

    catalog.register::<MultipleLines>(&settings.condition_namespace, "MultipleLines");

    catalog
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .compact()
        .with_target(true)
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
}
