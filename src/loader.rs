use crate::{
    config::InputPaths,
    error::{PipelineError, Result, SchemaError},
    types::{AddressMeta, RawTransaction, SanctionLabel},
};
use polars::prelude::*;
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

pub const TRANSACTIONS_TABLE: &str = "transactions";
pub const LABELS_TABLE: &str = "labels";
pub const NODES_TABLE: &str = "nodes";

/// InputSource
///
/// A generic trait across the places the three input tables can come from.
///
pub trait InputSource {
    fn load_transactions(&self) -> Result<Vec<RawTransaction>>;
    fn load_address_meta(&self) -> Result<Vec<AddressMeta>>;
    fn load_sanctions(&self) -> Result<Vec<SanctionLabel>>;
}

/// The three input record sets of one run.
#[derive(Debug, Clone, Default)]
pub struct LoadedInputs {
    pub transactions: Vec<RawTransaction>,
    pub address_meta: Vec<AddressMeta>,
    pub sanctions: Vec<SanctionLabel>,
}

/// Loads and schema-checks every table before returning anything, so a schema problem in
/// any source aborts the run before processing begins.
pub fn load_inputs<S: InputSource + ?Sized>(source: &S) -> Result<LoadedInputs> {
    let address_meta = source.load_address_meta()?;
    info!("Loaded {} node metadata rows", address_meta.len());
    let sanctions = source.load_sanctions()?;
    info!("Loaded {} sanctioned addresses", sanctions.len());
    let transactions = source.load_transactions()?;
    info!("Loaded {} transactions", transactions.len());

    Ok(LoadedInputs {
        transactions,
        address_meta,
        sanctions,
    })
}

/// Address as used for matching across the three sources. Addresses are kept as written
/// unless `canonicalize` is set, in which case they are trimmed and lowercased.
pub fn canonical_address(raw: &str, canonicalize: bool) -> String {
    if canonicalize {
        raw.trim().to_ascii_lowercase()
    } else {
        raw.to_string()
    }
}

/// TableSource
///
/// Reads the three tables from disk. CSV files are read with every column as text;
/// Parquet files keep their types and are converted to text per column.
///
#[derive(Debug, Clone)]
pub struct TableSource {
    pub paths: InputPaths,
    pub canonicalize_addresses: bool,
}

impl TableSource {
    pub fn new(paths: InputPaths, canonicalize_addresses: bool) -> Self {
        Self {
            paths,
            canonicalize_addresses,
        }
    }
}

impl InputSource for TableSource {
    fn load_transactions(&self) -> Result<Vec<RawTransaction>> {
        let df = read_table(&self.paths.transactions)?;
        Ok(transactions_from_frame(&df, self.canonicalize_addresses)?)
    }

    fn load_address_meta(&self) -> Result<Vec<AddressMeta>> {
        let df = read_table(&self.paths.nodes)?;
        Ok(address_meta_from_frame(&df, self.canonicalize_addresses)?)
    }

    fn load_sanctions(&self) -> Result<Vec<SanctionLabel>> {
        let df = read_table(&self.paths.labels)?;
        Ok(sanctions_from_frame(&df, self.canonicalize_addresses)?)
    }
}

/// FrameSource
///
/// Wraps three polars DataFrames that are already in memory. Each DataFrame must have the
/// same columns as the corresponding file.
///
pub struct FrameSource {
    pub transactions: DataFrame,
    pub labels: DataFrame,
    pub nodes: DataFrame,
    pub canonicalize_addresses: bool,
}

impl FrameSource {
    pub fn new(transactions: DataFrame, labels: DataFrame, nodes: DataFrame) -> Self {
        Self {
            transactions,
            labels,
            nodes,
            canonicalize_addresses: false,
        }
    }

    pub fn with_canonical_addresses(mut self, canonicalize: bool) -> Self {
        self.canonicalize_addresses = canonicalize;
        self
    }
}

impl InputSource for FrameSource {
    fn load_transactions(&self) -> Result<Vec<RawTransaction>> {
        Ok(transactions_from_frame(
            &self.transactions,
            self.canonicalize_addresses,
        )?)
    }

    fn load_address_meta(&self) -> Result<Vec<AddressMeta>> {
        Ok(address_meta_from_frame(
            &self.nodes,
            self.canonicalize_addresses,
        )?)
    }

    fn load_sanctions(&self) -> Result<Vec<SanctionLabel>> {
        Ok(sanctions_from_frame(
            &self.labels,
            self.canonicalize_addresses,
        )?)
    }
}

pub fn read_table(path: &Path) -> Result<DataFrame> {
    let input_error = |source: PolarsError| PipelineError::Input {
        path: path.to_path_buf(),
        source,
    };
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let df = match extension.as_deref() {
        Some("parquet") | Some("pq") => {
            let file = File::open(path).map_err(|e| input_error(PolarsError::from(e)))?;
            ParquetReader::new(file).finish().map_err(input_error)?
        }
        _ => CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(PathBuf::from(path)))
            .and_then(|reader| reader.finish())
            .map_err(input_error)?,
    };

    info!("Read {} rows from {}", df.height(), path.display());
    Ok(df)
}

/// A column converted to text, whatever its stored type.
struct TextColumn {
    table: &'static str,
    name: &'static str,
    values: StringChunked,
}

impl TextColumn {
    fn required(df: &DataFrame, table: &'static str, name: &'static str) -> Result<Self, SchemaError> {
        Self::optional(df, table, name)?
            .ok_or(SchemaError::MissingColumn { table, column: name })
    }

    fn optional(
        df: &DataFrame,
        table: &'static str,
        name: &'static str,
    ) -> Result<Option<Self>, SchemaError> {
        if df.get_column_index(name).is_none() {
            return Ok(None);
        }
        let unreadable = |source| SchemaError::Unreadable {
            table,
            column: name,
            source,
        };
        let column = df.column(name).map_err(unreadable)?;
        let text = column.cast(&DataType::String).map_err(unreadable)?;
        let values = text.str().map_err(unreadable)?.clone();
        Ok(Some(Self {
            table,
            name,
            values,
        }))
    }

    fn get(&self, row: usize) -> Option<&str> {
        self.values.get(row)
    }

    fn wrong_type(&self, row: usize, expected: &'static str) -> SchemaError {
        SchemaError::WrongType {
            table: self.table,
            column: self.name,
            row,
            expected,
            value: self.get(row).unwrap_or("null").to_string(),
        }
    }

    fn bool_at(&self, row: usize) -> Result<bool, SchemaError> {
        self.get(row)
            .and_then(parse_bool)
            .ok_or_else(|| self.wrong_type(row, "bool"))
    }

    /// Nulls are allowed; anything else must be an integer.
    fn int_at(&self, row: usize) -> Result<Option<i64>, SchemaError> {
        match self.get(row) {
            None => Ok(None),
            Some(raw) => parse_int(raw)
                .map(Some)
                .ok_or_else(|| self.wrong_type(row, "int")),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

// Integer columns that went through a float dtype come back as "1.0".
fn parse_int(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

/// Converts the transactions table. Nulls become empty strings and are rejected later,
/// row by row, by the normalizer.
pub fn transactions_from_frame(
    df: &DataFrame,
    canonicalize: bool,
) -> Result<Vec<RawTransaction>, SchemaError> {
    let tx_hash = TextColumn::required(df, TRANSACTIONS_TABLE, "tx_hash")?;
    let timestamp = TextColumn::required(df, TRANSACTIONS_TABLE, "block_timestamp")?;
    let from_address = TextColumn::required(df, TRANSACTIONS_TABLE, "from_address")?;
    let to_address = TextColumn::required(df, TRANSACTIONS_TABLE, "to_address")?;
    let value = TextColumn::required(df, TRANSACTIONS_TABLE, "value_wei")?;

    let mut transactions = Vec::with_capacity(df.height());
    for row in 0..df.height() {
        transactions.push(RawTransaction {
            row,
            tx_hash: tx_hash.get(row).unwrap_or_default().to_string(),
            timestamp: timestamp.get(row).unwrap_or_default().to_string(),
            from_address: canonical_address(from_address.get(row).unwrap_or_default(), canonicalize),
            to_address: canonical_address(to_address.get(row).unwrap_or_default(), canonicalize),
            value: value.get(row).unwrap_or_default().to_string(),
        });
    }
    Ok(transactions)
}

pub fn address_meta_from_frame(
    df: &DataFrame,
    canonicalize: bool,
) -> Result<Vec<AddressMeta>, SchemaError> {
    let address = TextColumn::required(df, NODES_TABLE, "address")?;
    let is_contract = TextColumn::required(df, NODES_TABLE, "is_contract")?;
    let degree_in = TextColumn::optional(df, NODES_TABLE, "degree_in")?;
    let degree_out = TextColumn::optional(df, NODES_TABLE, "degree_out")?;
    let node_type = TextColumn::optional(df, NODES_TABLE, "node_type")?;

    let mut metas = Vec::with_capacity(df.height());
    let mut null_addresses = 0usize;
    for row in 0..df.height() {
        // Degrees are unused downstream but still part of the table's contract.
        for degree in degree_in.iter().chain(degree_out.iter()) {
            degree.int_at(row)?;
        }
        let is_contract = is_contract.bool_at(row)?;
        let Some(addr) = address.get(row) else {
            null_addresses += 1;
            continue;
        };
        metas.push(AddressMeta {
            address: canonical_address(addr, canonicalize),
            is_contract,
            node_type: node_type
                .as_ref()
                .and_then(|column| column.get(row))
                .and_then(|raw| raw.parse().ok()),
        });
    }
    if null_addresses > 0 {
        warn!("Skipped {} node rows with a null address", null_addresses);
    }
    Ok(metas)
}

/// Only rows with label = 1 are returned.
pub fn sanctions_from_frame(
    df: &DataFrame,
    canonicalize: bool,
) -> Result<Vec<SanctionLabel>, SchemaError> {
    let address = TextColumn::required(df, LABELS_TABLE, "address")?;
    let label = TextColumn::required(df, LABELS_TABLE, "label")?;

    let mut sanctions = Vec::new();
    let mut null_addresses = 0usize;
    for row in 0..df.height() {
        if label.int_at(row)? != Some(1) {
            continue;
        }
        match address.get(row) {
            Some(addr) => sanctions.push(SanctionLabel::new(canonical_address(addr, canonicalize))),
            None => null_addresses += 1,
        }
    }
    if null_addresses > 0 {
        warn!("Skipped {} sanction rows with a null address", null_addresses);
    }
    Ok(sanctions)
}
