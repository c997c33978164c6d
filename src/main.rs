// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use prometheus::Registry;
use questline_settlement::config::{generate_key_file, EngineConfig};
use questline_settlement::metrics::SettlementMetrics;
use tracing::info;

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starting-point config file.
    GenerateTemplate {
        #[clap(long)]
        output: PathBuf,
    },
    /// Generate a custodial signing key.
    GenerateKey {
        #[clap(long)]
        output: PathBuf,
    },
    /// Validate a config against the live ledger: key material, endpoint
    /// reachability, and chain id.
    Check {
        #[clap(long)]
        config_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Args::parse().command {
        Command::GenerateTemplate { output } => {
            EngineConfig::template().save(&output)?;
            info!("Wrote config template to {:?}", output);
        }
        Command::GenerateKey { output } => {
            let address = generate_key_file(&output)?;
            info!("Wrote custodial key to {:?}, address {}", output, address);
        }
        Command::Check { config_path } => {
            let config = EngineConfig::load(&config_path)?;
            let registry = Registry::new();
            let metrics = Arc::new(SettlementMetrics::new(&registry));
            config.validate(metrics).await?;
            info!("Config at {:?} is valid", config_path);
        }
    }
    Ok(())
}
