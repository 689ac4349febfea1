use crate::error::{PipelineError, Result};
use clap::ValueEnum;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

pub const DEFAULT_INPUT_DIR: &str = "data";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_SPLIT_RATIO: f64 = 0.8;

/// How the contract filter treats an address that has no row in the nodes table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownAddressPolicy {
    /// Treat the address as a non-contract and keep its transactions.
    #[default]
    FailOpen,
    /// Treat the address as a contract and drop its transactions.
    FailClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

/// Locations of the three input tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPaths {
    pub transactions: PathBuf,
    pub labels: PathBuf,
    pub nodes: PathBuf,
}

impl InputPaths {
    /// Resolve `<dir>/<stem>.{parquet,pq,csv}`, preferring Parquet when several exist.
    pub fn discover(dir: &Path) -> Self {
        Self {
            transactions: discover_table(dir, "transactions"),
            labels: discover_table(dir, "labels"),
            nodes: discover_table(dir, "nodes"),
        }
    }
}

fn discover_table(dir: &Path, stem: &str) -> PathBuf {
    ["parquet", "pq", "csv"]
        .iter()
        .map(|ext| dir.join(format!("{stem}.{ext}")))
        .find(|path| path.exists())
        .unwrap_or_else(|| dir.join(format!("{stem}.csv")))
}

///
/// PipelineConfig
///
/// Fully resolved settings for one run.
///
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub inputs: InputPaths,
    pub output_dir: PathBuf,
    /// Fraction of edges, in chronological order, assigned to the training split.
    pub split_ratio: Decimal,
    pub unknown_address_policy: UnknownAddressPolicy,
    /// Trim and lowercase addresses in all three inputs before matching them. Off by default,
    /// so addresses are compared and ordered as raw strings.
    pub canonicalize_addresses: bool,
    pub output_format: OutputFormat,
    pub write_address_map: bool,
    pub graph_summary: bool,
}

impl PipelineConfig {
    pub fn new(inputs: InputPaths, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            inputs,
            output_dir: output_dir.into(),
            split_ratio: Decimal::new(8, 1),
            unknown_address_policy: UnknownAddressPolicy::default(),
            canonicalize_addresses: false,
            output_format: OutputFormat::default(),
            write_address_map: true,
            graph_summary: true,
        }
    }

    pub fn with_split_ratio(mut self, ratio: f64) -> Result<Self> {
        self.split_ratio = split_ratio_from_f64(ratio)?;
        Ok(self)
    }
}

/// Converts a ratio through its shortest decimal form so 0.8 is exactly 8/10.
pub fn split_ratio_from_f64(ratio: f64) -> Result<Decimal> {
    if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
        return Err(PipelineError::Config(format!(
            "split ratio must be within [0, 1], got {ratio}"
        )));
    }
    Decimal::from_str(&ratio.to_string())
        .map_err(|e| PipelineError::Config(format!("split ratio {ratio}: {e}")))
}

///
/// ConfigFile
///
/// Partial settings, as read from a TOML file or collected from command line flags.
/// Layers are combined with `overlay` and turned into a `PipelineConfig` by `resolve`.
///
/// ```toml
/// input_dir = "data"
/// output_dir = "output"
/// split_ratio = 0.8
/// unknown_address_policy = "fail-open"
/// output_format = "csv"
/// ```
///
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub input_dir: Option<PathBuf>,
    pub transactions: Option<PathBuf>,
    pub labels: Option<PathBuf>,
    pub nodes: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub split_ratio: Option<f64>,
    pub unknown_address_policy: Option<UnknownAddressPolicy>,
    pub canonicalize_addresses: Option<bool>,
    pub output_format: Option<OutputFormat>,
    pub write_address_map: Option<bool>,
    pub graph_summary: Option<bool>,
}

impl ConfigFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&contents)
            .map_err(|e| PipelineError::Config(format!("{}: {e}", path.display())))
    }

    pub fn parse(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Values set in `top` win over values in `self`.
    pub fn overlay(self, top: ConfigFile) -> ConfigFile {
        ConfigFile {
            input_dir: top.input_dir.or(self.input_dir),
            transactions: top.transactions.or(self.transactions),
            labels: top.labels.or(self.labels),
            nodes: top.nodes.or(self.nodes),
            output_dir: top.output_dir.or(self.output_dir),
            split_ratio: top.split_ratio.or(self.split_ratio),
            unknown_address_policy: top.unknown_address_policy.or(self.unknown_address_policy),
            canonicalize_addresses: top.canonicalize_addresses.or(self.canonicalize_addresses),
            output_format: top.output_format.or(self.output_format),
            write_address_map: top.write_address_map.or(self.write_address_map),
            graph_summary: top.graph_summary.or(self.graph_summary),
        }
    }

    pub fn resolve(self) -> Result<PipelineConfig> {
        let input_dir = self
            .input_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INPUT_DIR));
        let discovered = InputPaths::discover(&input_dir);
        let inputs = InputPaths {
            transactions: self.transactions.unwrap_or(discovered.transactions),
            labels: self.labels.unwrap_or(discovered.labels),
            nodes: self.nodes.unwrap_or(discovered.nodes),
        };

        let mut config = PipelineConfig::new(
            inputs,
            self.output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        )
        .with_split_ratio(self.split_ratio.unwrap_or(DEFAULT_SPLIT_RATIO))?;

        if let Some(policy) = self.unknown_address_policy {
            config.unknown_address_policy = policy;
        }
        if let Some(canonicalize) = self.canonicalize_addresses {
            config.canonicalize_addresses = canonicalize;
        }
        if let Some(format) = self.output_format {
            config.output_format = format;
        }
        if let Some(write_address_map) = self.write_address_map {
            config.write_address_map = write_address_map;
        }
        if let Some(graph_summary) = self.graph_summary {
            config.graph_summary = graph_summary;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConfigFile::default().resolve().unwrap();
        assert_eq!(config.split_ratio, Decimal::new(8, 1));
        assert_eq!(config.unknown_address_policy, UnknownAddressPolicy::FailOpen);
        assert_eq!(config.output_format, OutputFormat::Csv);
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(
            config.inputs.transactions,
            PathBuf::from("data").join("transactions.csv")
        );
        assert!(!config.canonicalize_addresses);
    }

    #[test]
    fn test_parse_toml() {
        let file = ConfigFile::parse(
            r#"
            input_dir = "/mnt/raw"
            split_ratio = 0.7
            unknown_address_policy = "fail-closed"
            output_format = "parquet"
            canonicalize_addresses = true
            "#,
        )
        .unwrap();
        let config = file.resolve().unwrap();
        assert_eq!(config.split_ratio, Decimal::new(7, 1));
        assert_eq!(config.unknown_address_policy, UnknownAddressPolicy::FailClosed);
        assert_eq!(config.output_format, OutputFormat::Parquet);
        assert!(config.canonicalize_addresses);
        assert_eq!(
            config.inputs.nodes,
            PathBuf::from("/mnt/raw").join("nodes.csv")
        );
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(ConfigFile::parse("split = 0.5").is_err());
    }

    #[test]
    fn test_overlay_prefers_top_layer() {
        let file = ConfigFile {
            split_ratio: Some(0.6),
            output_dir: Some(PathBuf::from("from-file")),
            ..Default::default()
        };
        let cli = ConfigFile {
            split_ratio: Some(0.9),
            ..Default::default()
        };
        let merged = file.overlay(cli);
        assert_eq!(merged.split_ratio, Some(0.9));
        assert_eq!(merged.output_dir, Some(PathBuf::from("from-file")));
    }

    #[test]
    fn test_split_ratio_bounds() {
        assert!(split_ratio_from_f64(0.0).is_ok());
        assert!(split_ratio_from_f64(1.0).is_ok());
        assert!(split_ratio_from_f64(1.5).is_err());
        assert!(split_ratio_from_f64(-0.1).is_err());
        assert!(split_ratio_from_f64(f64::NAN).is_err());
    }
}
