use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use txnlabels::{
    config::{ConfigFile, OutputFormat, UnknownAddressPolicy},
    pipeline::Pipeline,
};

/// Build an integer-indexed, sanction-labeled edge dataset from a raw transaction export.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML file with any of the settings below; flags given here override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory holding transactions/labels/nodes as .parquet or .csv.
    #[arg(short, long)]
    input_dir: Option<PathBuf>,
    #[arg(long)]
    transactions: Option<PathBuf>,
    #[arg(long)]
    labels: Option<PathBuf>,
    #[arg(long)]
    nodes: Option<PathBuf>,
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Fraction of edges, in time order, that go to the training split. Defaults to 0.8.
    #[arg(short = 'r', long)]
    split_ratio: Option<f64>,
    /// Treatment of addresses missing from the nodes table. Defaults to fail-open.
    #[arg(long, value_enum)]
    unknown_address_policy: Option<UnknownAddressPolicy>,
    #[arg(long, value_enum)]
    output_format: Option<OutputFormat>,
    /// Trim and lowercase addresses before matching them across inputs.
    #[arg(long)]
    canonicalize_addresses: bool,
    #[arg(long)]
    no_address_map: bool,
    #[arg(long)]
    no_graph_summary: bool,
}

impl Args {
    fn as_config_layer(&self) -> ConfigFile {
        ConfigFile {
            input_dir: self.input_dir.clone(),
            transactions: self.transactions.clone(),
            labels: self.labels.clone(),
            nodes: self.nodes.clone(),
            output_dir: self.output_dir.clone(),
            split_ratio: self.split_ratio,
            unknown_address_policy: self.unknown_address_policy,
            canonicalize_addresses: self.canonicalize_addresses.then_some(true),
            output_format: self.output_format,
            write_address_map: self.no_address_map.then_some(false),
            graph_summary: self.no_graph_summary.then_some(false),
        }
    }
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting txnlabels");
    let args = Args::parse();

    let file_layer = match &args.config {
        Some(path) => ConfigFile::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ConfigFile::default(),
    };
    let config = file_layer
        .overlay(args.as_config_layer())
        .resolve()
        .context("Invalid configuration")?;

    info!("Transactions: {}", config.inputs.transactions.display());
    info!("Labels: {}", config.inputs.labels.display());
    info!("Nodes: {}", config.inputs.nodes.display());
    info!("Output: {}", config.output_dir.display());
    info!("Split ratio: {}", config.split_ratio);
    if config.canonicalize_addresses {
        info!("Addresses are trimmed and lowercased before matching");
    }

    let pipeline = Pipeline::new(config)?;
    let report = pipeline
        .run_from_files()
        .context("Pipeline failed; no usable output was produced")?;

    info!("Pipeline finished");
    print!("{}", report);

    Ok(())
}
