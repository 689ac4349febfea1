use crate::{
    config::OutputFormat,
    error::WriteError,
    index::AddressIndex,
    pipeline::Dataset,
    types::{FormattedEdge, NodeLabel},
};
use polars::prelude::*;
use rust_decimal::prelude::ToPrimitive;
use std::{
    fmt::Display,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{info, warn};

pub const EDGES_STEM: &str = "formatted_transactions";
pub const NODE_LABELS_STEM: &str = "node_labels";
pub const ADDRESS_MAP_STEM: &str = "address_map";
pub const SPLIT_FILE: &str = "split.json";

// Single-currency, single-format dataset: these columns are constant.
const CURRENCY: i64 = 1;
const PAYMENT_FORMAT: i64 = 1;

/// Column order of the edge table.
pub const EDGE_COLUMNS: [&str; 10] = [
    "EdgeID",
    "from_id",
    "to_id",
    "Timestamp",
    "Amount Sent",
    "Sent Currency",
    "Amount Received",
    "Received Currency",
    "Payment Format",
    "Is Laundering",
];

pub fn edges_frame(edges: &[FormattedEdge]) -> PolarsResult<DataFrame> {
    let amounts: Vec<f64> = edges
        .iter()
        .map(|edge| edge.amount.to_f64().unwrap_or(f64::NAN))
        .collect();
    let constant = |value: i64| vec![value; edges.len()];

    DataFrame::new(vec![
        Column::new(EDGE_COLUMNS[0].into(), edges.iter().map(|e| e.edge_id).collect::<Vec<i64>>()),
        Column::new(EDGE_COLUMNS[1].into(), edges.iter().map(|e| e.from_id).collect::<Vec<i64>>()),
        Column::new(EDGE_COLUMNS[2].into(), edges.iter().map(|e| e.to_id).collect::<Vec<i64>>()),
        Column::new(EDGE_COLUMNS[3].into(), edges.iter().map(|e| e.timestamp).collect::<Vec<i64>>()),
        Column::new(EDGE_COLUMNS[4].into(), amounts.clone()),
        Column::new(EDGE_COLUMNS[5].into(), constant(CURRENCY)),
        Column::new(EDGE_COLUMNS[6].into(), amounts),
        Column::new(EDGE_COLUMNS[7].into(), constant(CURRENCY)),
        Column::new(EDGE_COLUMNS[8].into(), constant(PAYMENT_FORMAT)),
        Column::new(
            EDGE_COLUMNS[9].into(),
            edges.iter().map(|e| e.illicit as i64).collect::<Vec<i64>>(),
        ),
    ])
}

pub fn node_labels_frame(labels: &[NodeLabel]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Column::new("node_id".into(), labels.iter().map(|l| l.node_id).collect::<Vec<i64>>()),
        Column::new(
            "is_sanctioned".into(),
            labels.iter().map(|l| l.sanctioned as i64).collect::<Vec<i64>>(),
        ),
    ])
}

pub fn address_map_frame(index: &AddressIndex) -> PolarsResult<DataFrame> {
    let (ids, addresses): (Vec<i64>, Vec<&str>) = index.iter().unzip();
    DataFrame::new(vec![
        Column::new("node_id".into(), ids),
        Column::new("address".into(), addresses),
    ])
}

/// Where the artifacts of a successful run ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenArtifacts {
    pub edges: PathBuf,
    pub node_labels: PathBuf,
    pub split: PathBuf,
    pub address_map: Option<PathBuf>,
}

impl Display for WrittenArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Artifacts:")?;
        writeln!(f, "  edges:        {}", self.edges.display())?;
        writeln!(f, "  node labels:  {}", self.node_labels.display())?;
        writeln!(f, "  split:        {}", self.split.display())?;
        if let Some(address_map) = &self.address_map {
            writeln!(f, "  address map:  {}", address_map.display())?;
        }
        Ok(())
    }
}

///
/// DatasetWriter
///
/// Writes every artifact into a staging directory inside `output_dir` and only then moves
/// them into place. Before the move, artifacts of the same format left by an earlier run are
/// removed, including an address map this run does not write. If a move fails, files already
/// moved are deleted again, so the output directory never holds a mix of old and new artifacts.
///
#[derive(Debug, Clone)]
pub struct DatasetWriter {
    output_dir: PathBuf,
    format: OutputFormat,
    write_address_map: bool,
}

impl DatasetWriter {
    pub fn new(output_dir: impl Into<PathBuf>, format: OutputFormat, write_address_map: bool) -> Self {
        Self {
            output_dir: output_dir.into(),
            format,
            write_address_map,
        }
    }

    pub fn write(&self, dataset: &Dataset) -> Result<WrittenArtifacts, WriteError> {
        fs::create_dir_all(&self.output_dir).map_err(io_error(&self.output_dir))?;

        let staging = self
            .output_dir
            .join(format!(".staging-{}", std::process::id()));
        if staging.exists() {
            fs::remove_dir_all(&staging).map_err(io_error(&staging))?;
        }
        fs::create_dir(&staging).map_err(io_error(&staging))?;

        let result = self.stage(dataset, &staging).and_then(|names| {
            self.clear_previous()?;
            self.promote(&staging, &names)
        });

        if let Err(e) = fs::remove_dir_all(&staging) {
            warn!("Failed to remove staging directory {}: {}", staging.display(), e);
        }
        result
    }

    fn table_name(&self, stem: &str) -> String {
        format!("{stem}.{}", self.format.extension())
    }

    /// Writes every artifact into `staging` and returns their file names in promotion order.
    fn stage(&self, dataset: &Dataset, staging: &Path) -> Result<Vec<String>, WriteError> {
        let mut names = Vec::new();

        let edges_name = self.table_name(EDGES_STEM);
        self.write_table(edges_frame(&dataset.edges), &staging.join(&edges_name))?;
        names.push(edges_name);

        let labels_name = self.table_name(NODE_LABELS_STEM);
        self.write_table(
            node_labels_frame(&dataset.node_labels),
            &staging.join(&labels_name),
        )?;
        names.push(labels_name);

        if self.write_address_map {
            let map_name = self.table_name(ADDRESS_MAP_STEM);
            self.write_table(address_map_frame(&dataset.index), &staging.join(&map_name))?;
            names.push(map_name);
        }

        write_split(dataset, &staging.join(SPLIT_FILE))?;
        names.push(SPLIT_FILE.to_string());

        Ok(names)
    }

    /// Removes artifact files of this format from an earlier run.
    fn clear_previous(&self) -> Result<(), WriteError> {
        let names = [EDGES_STEM, NODE_LABELS_STEM, ADDRESS_MAP_STEM]
            .map(|stem| self.table_name(stem))
            .into_iter()
            .chain(std::iter::once(SPLIT_FILE.to_string()));
        for name in names {
            let path = self.output_dir.join(name);
            if path.is_file() {
                fs::remove_file(&path).map_err(io_error(&path))?;
                info!("Removed previous artifact {}", path.display());
            }
        }
        Ok(())
    }

    fn write_table(&self, frame: PolarsResult<DataFrame>, path: &Path) -> Result<(), WriteError> {
        let table_error = |source| WriteError::Table {
            path: path.to_path_buf(),
            source,
        };
        let mut df = frame.map_err(table_error)?;
        let file = File::create(path).map_err(io_error(path))?;
        match self.format {
            OutputFormat::Csv => CsvWriter::new(file)
                .include_header(true)
                .finish(&mut df)
                .map_err(table_error)?,
            OutputFormat::Parquet => {
                ParquetWriter::new(file)
                    .finish(&mut df)
                    .map_err(table_error)?;
            }
        }
        info!("Staged {} rows for {}", df.height(), path.display());
        Ok(())
    }

    fn promote(&self, staging: &Path, names: &[String]) -> Result<WrittenArtifacts, WriteError> {
        let mut promoted: Vec<PathBuf> = Vec::with_capacity(names.len());
        for name in names {
            let target = self.output_dir.join(name);
            if let Err(source) = fs::rename(staging.join(name), &target) {
                for path in &promoted {
                    if let Err(e) = fs::remove_file(path) {
                        warn!("Failed to remove {}: {}", path.display(), e);
                    }
                }
                return Err(WriteError::Io {
                    path: target,
                    source,
                });
            }
            promoted.push(target);
        }

        let final_path = |stem: &str| self.output_dir.join(self.table_name(stem));
        let artifacts = WrittenArtifacts {
            edges: final_path(EDGES_STEM),
            node_labels: final_path(NODE_LABELS_STEM),
            split: self.output_dir.join(SPLIT_FILE),
            address_map: self.write_address_map.then(|| final_path(ADDRESS_MAP_STEM)),
        };
        info!("Wrote dataset to {}", self.output_dir.display());
        Ok(artifacts)
    }
}

fn write_split(dataset: &Dataset, path: &Path) -> Result<(), WriteError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer(&mut out, &dataset.split).map_err(|source| WriteError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    out.flush().map_err(io_error(path))
}

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{split::SplitAssignment, types::NormalizedTransaction};
    use rust_decimal::Decimal;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("txnlabels-writer-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn dataset() -> Dataset {
        let txs: Vec<NormalizedTransaction> = [("0xa", "0xb"), ("0xb", "0xc")]
            .iter()
            .enumerate()
            .map(|(row, (from, to))| NormalizedTransaction {
                row,
                tx_hash: format!("0x{row}"),
                from_address: from.to_string(),
                to_address: to.to_string(),
                timestamp: row as i64 * 10,
                amount: Decimal::new(5, 1),
            })
            .collect();
        let index = AddressIndex::build(&txs);
        let edges = vec![
            FormattedEdge {
                edge_id: 0,
                from_id: 0,
                to_id: 1,
                timestamp: 0,
                amount: Decimal::new(5, 1),
                illicit: false,
            },
            FormattedEdge {
                edge_id: 1,
                from_id: 1,
                to_id: 2,
                timestamp: 10,
                amount: Decimal::ONE,
                illicit: true,
            },
        ];
        let node_labels = vec![
            NodeLabel { node_id: 0, sanctioned: false },
            NodeLabel { node_id: 1, sanctioned: false },
            NodeLabel { node_id: 2, sanctioned: true },
        ];
        let split = SplitAssignment::temporal(&edges, Decimal::new(5, 1));
        Dataset {
            index,
            edges,
            node_labels,
            split,
        }
    }

    fn read_csv(path: &Path) -> DataFrame {
        CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))
            .unwrap()
            .finish()
            .unwrap()
    }

    #[test]
    fn test_edge_frame_schema() {
        let df = edges_frame(&dataset().edges).unwrap();
        let names: Vec<&str> = df.get_column_names().iter().map(|n| n.as_str()).collect();
        assert_eq!(names, EDGE_COLUMNS.to_vec());
        assert_eq!(df.column("Amount Sent").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("Is Laundering").unwrap().dtype(), &DataType::Int64);
        let sent = df.column("Amount Sent").unwrap().f64().unwrap().get(0);
        let received = df.column("Amount Received").unwrap().f64().unwrap().get(0);
        assert_eq!(sent, Some(0.5));
        assert_eq!(sent, received);
    }

    #[test]
    fn test_writes_all_artifacts_as_csv() {
        let dir = scratch_dir("csv");
        let artifacts = DatasetWriter::new(&dir, OutputFormat::Csv, true)
            .write(&dataset())
            .unwrap();

        let edges = read_csv(&artifacts.edges);
        assert_eq!(edges.height(), 2);
        let laundering = edges.column("Is Laundering").unwrap().i64().unwrap();
        assert_eq!(laundering.get(0), Some(0));
        assert_eq!(laundering.get(1), Some(1));

        let labels = read_csv(&artifacts.node_labels);
        assert_eq!(labels.height(), 3);
        assert_eq!(labels.column("is_sanctioned").unwrap().i64().unwrap().get(2), Some(1));

        let map = read_csv(artifacts.address_map.as_ref().unwrap());
        assert_eq!(map.column("address").unwrap().str().unwrap().get(1), Some("0xb"));

        let split: SplitAssignment =
            serde_json::from_str(&fs::read_to_string(&artifacts.split).unwrap()).unwrap();
        assert_eq!(split.train_edge_ids, vec![0]);
        assert_eq!(split.val_edge_ids, vec![1]);

        // The staging directory is gone.
        let leftovers: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".staging"))
            .collect();
        assert!(leftovers.is_empty());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_writes_parquet_without_address_map() {
        let dir = scratch_dir("parquet");
        let artifacts = DatasetWriter::new(&dir, OutputFormat::Parquet, false)
            .write(&dataset())
            .unwrap();
        assert!(artifacts.address_map.is_none());
        assert!(!dir.join("address_map.parquet").exists());

        let file = File::open(&artifacts.edges).unwrap();
        let edges = ParquetReader::new(file).finish().unwrap();
        assert_eq!(edges.height(), 2);
        assert_eq!(edges.column("to_id").unwrap().i64().unwrap().get(1), Some(2));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_rerun_removes_stale_address_map() {
        let dir = scratch_dir("stale");
        DatasetWriter::new(&dir, OutputFormat::Csv, true)
            .write(&dataset())
            .unwrap();
        assert!(dir.join("address_map.csv").exists());

        let artifacts = DatasetWriter::new(&dir, OutputFormat::Csv, false)
            .write(&dataset())
            .unwrap();
        assert!(artifacts.address_map.is_none());
        assert!(!dir.join("address_map.csv").exists());
        assert!(artifacts.edges.exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_rerun_keeps_no_old_artifacts() {
        let dir = scratch_dir("failed-rerun");
        DatasetWriter::new(&dir, OutputFormat::Csv, true)
            .write(&dataset())
            .unwrap();
        // A directory in the way of split.json makes the last move fail.
        fs::remove_file(dir.join(SPLIT_FILE)).unwrap();
        fs::create_dir(dir.join(SPLIT_FILE)).unwrap();

        DatasetWriter::new(&dir, OutputFormat::Csv, true)
            .write(&dataset())
            .unwrap_err();
        assert!(!dir.join("formatted_transactions.csv").exists());
        assert!(!dir.join("node_labels.csv").exists());
        assert!(!dir.join("address_map.csv").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failure_leaves_no_partial_output() {
        let dir = scratch_dir("partial");
        fs::create_dir_all(dir.join(SPLIT_FILE)).unwrap();

        let err = DatasetWriter::new(&dir, OutputFormat::Csv, true)
            .write(&dataset())
            .unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }));
        assert!(!dir.join("formatted_transactions.csv").exists());
        assert!(!dir.join("node_labels.csv").exists());
        assert!(!dir.join("address_map.csv").exists());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unwritable_output_dir_is_write_error() {
        let dir = scratch_dir("not-a-dir");
        fs::create_dir_all(dir.parent().unwrap()).unwrap();
        fs::write(&dir, b"occupied").unwrap();
        let err = DatasetWriter::new(&dir, OutputFormat::Csv, true)
            .write(&dataset())
            .unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }));
        fs::remove_file(&dir).unwrap();
    }
}
