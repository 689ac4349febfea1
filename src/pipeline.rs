use crate::{
    config::PipelineConfig,
    error::{IntegrityError, PipelineError, Result},
    filter::{ContractFilter, FilterStats},
    index::AddressIndex,
    label::{label_edges, label_nodes},
    loader::{InputSource, TableSource, load_inputs},
    normalize::{NormalizeStats, normalize},
    split::SplitAssignment,
    summary::DatasetSummary,
    types::{AddressMeta, FormattedEdge, NodeLabel, NodeType, SanctionSet},
    writer::{DatasetWriter, WrittenArtifacts},
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use tracing::info;

// Busiest address pairs listed in the summary.
const SUMMARY_TOP_PAIRS: usize = 10;
// Report key for indexed addresses without a node_type.
const UNTYPED_NODE: &str = "untyped";

///
/// Dataset
///
/// Everything one run derives, held in memory until it is written.
///
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub index: AddressIndex,
    pub edges: Vec<FormattedEdge>,
    pub node_labels: Vec<NodeLabel>,
    pub split: SplitAssignment,
}

impl Dataset {
    /// Re-checks the invariants that tie the artifacts together.
    pub fn verify(&self) -> Result<(), IntegrityError> {
        let node_count = self.index.len();
        if self.node_labels.len() != node_count {
            return Err(IntegrityError::NodeLabelMismatch {
                labels: self.node_labels.len(),
                nodes: node_count,
            });
        }

        let mut previous: Option<i64> = None;
        for (position, edge) in self.edges.iter().enumerate() {
            if edge.edge_id != position as i64 {
                return Err(IntegrityError::NonContiguousEdgeId {
                    position,
                    edge_id: edge.edge_id,
                });
            }
            if edge.timestamp < 0 {
                return Err(IntegrityError::NegativeTimestamp {
                    edge_id: edge.edge_id,
                    timestamp: edge.timestamp,
                });
            }
            if previous.is_some_and(|t| t > edge.timestamp) {
                return Err(IntegrityError::OutOfOrder {
                    edge_id: edge.edge_id,
                });
            }
            previous = Some(edge.timestamp);

            for node_id in [edge.from_id, edge.to_id] {
                if node_id < 0 || node_id as usize >= node_count {
                    return Err(IntegrityError::NodeOutOfRange {
                        edge_id: edge.edge_id,
                        node_id,
                        node_count,
                    });
                }
            }
        }

        self.split.verify(&self.edges)
    }
}

///
/// RunReport
///
/// Row accounting for one run, printed after every successful run.
///
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub filter: FilterStats,
    pub normalize: NormalizeStats,
    pub nodes: usize,
    pub edges: usize,
    pub illicit_edges: usize,
    pub sanctioned_nodes: usize,
    /// Indexed nodes per `node_type` from the nodes table.
    pub node_types: BTreeMap<String, usize>,
    pub train_edges: usize,
    pub val_edges: usize,
    pub summary: Option<DatasetSummary>,
    pub artifacts: Option<WrittenArtifacts>,
}

impl RunReport {
    pub fn total_rows(&self) -> usize {
        self.filter.input
    }

    fn record_dataset(&mut self, dataset: &Dataset) {
        self.nodes = dataset.index.len();
        self.edges = dataset.edges.len();
        self.illicit_edges = dataset.edges.iter().filter(|edge| edge.illicit).count();
        self.sanctioned_nodes = dataset
            .node_labels
            .iter()
            .filter(|label| label.sanctioned)
            .count();
        self.train_edges = dataset.split.train_edge_ids.len();
        self.val_edges = dataset.split.val_edge_ids.len();
    }
}

/// Counts the indexed nodes by their `node_type`. A node whose rows carry no type, or that
/// has no nodes-table row at all, counts as untyped.
fn node_type_counts(index: &AddressIndex, address_meta: &[AddressMeta]) -> BTreeMap<String, usize> {
    let types: HashMap<&str, &NodeType> = address_meta
        .iter()
        .filter_map(|meta| Some((meta.address.as_str(), meta.node_type.as_ref()?)))
        .collect();

    let mut counts = BTreeMap::new();
    for (_, address) in index.iter() {
        let key = types
            .get(address)
            .map_or_else(|| UNTYPED_NODE.to_string(), |node_type| node_type.to_string());
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
}

impl Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Run summary:")?;
        writeln!(f, "  rows read:               {}", self.total_rows())?;
        writeln!(f, "  dropped by filter:       {}", self.filter.dropped())?;
        writeln!(f, "    contract endpoint:     {}", self.filter.dropped_contract)?;
        writeln!(f, "    unknown (fail-closed): {}", self.filter.dropped_unknown)?;
        writeln!(f, "  kept with unknown addr:  {}", self.filter.kept_unknown)?;
        writeln!(f, "  dropped by parse errors: {}", self.normalize.dropped())?;
        for (kind, count) in &self.normalize.dropped_by_kind {
            writeln!(f, "    {}: {}", kind, count)?;
        }
        writeln!(f, "  duplicate tx hashes:     {}", self.normalize.duplicate_tx_hashes)?;
        writeln!(f, "  nodes:                   {}", self.nodes)?;
        writeln!(f, "    sanctioned:            {}", self.sanctioned_nodes)?;
        for (node_type, count) in &self.node_types {
            writeln!(f, "    {}: {}", node_type, count)?;
        }
        writeln!(f, "  edges:                   {}", self.edges)?;
        writeln!(f, "    illicit:               {}", self.illicit_edges)?;
        writeln!(f, "  train edges:             {}", self.train_edges)?;
        writeln!(f, "  val edges:               {}", self.val_edges)?;
        if let Some(artifacts) = &self.artifacts {
            write!(f, "{}", artifacts)?;
        }
        if let Some(summary) = &self.summary {
            write!(f, "{}", summary)?;
        }
        Ok(())
    }
}

///
/// Pipeline
///
/// Runs load -> filter -> normalize -> index -> label -> split -> write. Each stage consumes
/// only what the previous ones produced.
///
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        if config.split_ratio < Decimal::ZERO || config.split_ratio > Decimal::ONE {
            return Err(PipelineError::Config(format!(
                "split ratio must be within [0, 1], got {}",
                config.split_ratio
            )));
        }
        Ok(Self { config })
    }

    /// Builds the dataset in memory without writing anything.
    pub fn build<S: InputSource + ?Sized>(&self, source: &S) -> Result<(Dataset, RunReport)> {
        let inputs = load_inputs(source)?;

        let contract_filter =
            ContractFilter::new(&inputs.address_meta, self.config.unknown_address_policy);
        info!(
            "{} known contracts in node metadata",
            contract_filter.contract_count()
        );
        let (surviving, filter_stats) = contract_filter.apply(inputs.transactions);

        let (ordered, normalize_stats) = normalize(surviving);

        // The index must be complete before any edge gets ids.
        let index = AddressIndex::build(&ordered);

        let sanctions = SanctionSet::from_labels(&inputs.sanctions);
        let edges = label_edges(&ordered, &index, &sanctions)?;
        let node_labels = label_nodes(&index, &sanctions);
        let split = SplitAssignment::temporal(&edges, self.config.split_ratio);

        let dataset = Dataset {
            index,
            edges,
            node_labels,
            split,
        };
        dataset.verify()?;

        let mut report = RunReport {
            filter: filter_stats,
            normalize: normalize_stats,
            ..Default::default()
        };
        report.record_dataset(&dataset);
        report.node_types = node_type_counts(&dataset.index, &inputs.address_meta);
        Ok((dataset, report))
    }

    /// Builds the dataset and writes every artifact, or nothing.
    pub fn run<S: InputSource + ?Sized>(&self, source: &S) -> Result<RunReport> {
        let (dataset, mut report) = self.build(source)?;

        let writer = DatasetWriter::new(
            &self.config.output_dir,
            self.config.output_format,
            self.config.write_address_map,
        );
        report.artifacts = Some(writer.write(&dataset)?);

        if self.config.graph_summary {
            report.summary = Some(DatasetSummary::from_dataset(&dataset, SUMMARY_TOP_PAIRS));
        }
        Ok(report)
    }

    /// Runs against the input files named in the configuration.
    pub fn run_from_files(&self) -> Result<RunReport> {
        let source = TableSource::new(
            self.config.inputs.clone(),
            self.config.canonicalize_addresses,
        );
        self.run(&source)
    }
}
