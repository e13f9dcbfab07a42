mod accumulator;
mod config;
mod decoder;
mod enrich;
mod error;
mod extract;
mod login;
mod pipeline;
mod scraper;
mod search;
mod session;

use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use config::{Cli, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the JSON result only
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::from_cli(cli, chrono::Local::now().date_naive())
        .context("invalid configuration")?;

    info!(
        "Crawling {:?} documents since {} with {} workers",
        settings.document_type, settings.date_from, settings.workers
    );

    let supplier = settings.cookie_supplier();
    let acc = pipeline::run(supplier.as_ref(), &settings.run_options()).await?;

    if acc.is_empty() {
        info!("No documents matched");
    }
    println!("{}", acc.to_json()?);

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        info!("Done in {}", format_duration(elapsed));
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
