use crate::{
    pipeline::Dataset,
    types::{EdgeId, FormattedEdge, NodeId},
};
use petgraph::{
    Directed, Direction,
    algo::connected_components,
    graph::{Graph, NodeIndex},
};
use std::collections::HashMap;
use std::fmt::Display;

///
/// EdgeGraph
///
/// The output dataset as a directed graph. Node weights are node ids and edge weights are
/// edge ids; node `i` in the graph is node id `i`.
///
pub type EdgeGraph = Graph<NodeId, EdgeId, Directed>;

pub fn build_edge_graph(node_count: usize, edges: &[FormattedEdge]) -> EdgeGraph {
    let mut graph = EdgeGraph::with_capacity(node_count, edges.len());
    for node_id in 0..node_count {
        graph.add_node(node_id as NodeId);
    }
    for edge in edges {
        graph.add_edge(
            NodeIndex::new(edge.from_id as usize),
            NodeIndex::new(edge.to_id as usize),
            edge.edge_id,
        );
    }
    graph
}

/// Transfers between one ordered pair of addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedPair {
    pub from: String,
    pub to: String,
    pub no_transfers: usize,
    pub illicit_transfers: usize,
}

impl Display for AggregatedPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:.42} -> {:.42} for {} transfers ({} illicit)",
            self.from, self.to, self.no_transfers, self.illicit_transfers
        )
    }
}

///
/// DatasetSummary
///
/// Shape of the finished graph: connectivity, degree extremes, time span and the busiest
/// address pairs.
///
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSummary {
    pub nodes: usize,
    pub edges: usize,
    pub weakly_connected_components: usize,
    pub self_loops: usize,
    pub max_in_degree: usize,
    pub max_out_degree: usize,
    /// Seconds between the first and last edge.
    pub time_span: i64,
    pub top_pairs: Vec<AggregatedPair>,
}

impl DatasetSummary {
    pub fn from_dataset(dataset: &Dataset, top_n: usize) -> Self {
        let graph = build_edge_graph(dataset.index.len(), &dataset.edges);

        let degree = |direction: Direction| {
            graph
                .node_indices()
                .map(|node| graph.edges_directed(node, direction).count())
                .max()
                .unwrap_or(0)
        };

        // Accumulate/count all transfers per (from, to) pair
        let mut acc: HashMap<(NodeId, NodeId), (usize, usize)> = HashMap::new();
        for edge in &dataset.edges {
            let entry = acc.entry((edge.from_id, edge.to_id)).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += edge.illicit as usize;
        }
        let mut pairs: Vec<((NodeId, NodeId), (usize, usize))> = acc.into_iter().collect();
        pairs.sort_by(|a, b| b.1.0.cmp(&a.1.0).then_with(|| a.0.cmp(&b.0)));

        let address = |node_id: NodeId| {
            dataset
                .index
                .address_of(node_id)
                .unwrap_or("?")
                .to_string()
        };
        let top_pairs = pairs
            .into_iter()
            .take(top_n)
            .map(|((from, to), (no_transfers, illicit_transfers))| AggregatedPair {
                from: address(from),
                to: address(to),
                no_transfers,
                illicit_transfers,
            })
            .collect();

        let time_span = match (dataset.edges.first(), dataset.edges.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0,
        };

        DatasetSummary {
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            weakly_connected_components: connected_components(&graph),
            self_loops: dataset
                .edges
                .iter()
                .filter(|edge| edge.from_id == edge.to_id)
                .count(),
            max_in_degree: degree(Direction::Incoming),
            max_out_degree: degree(Direction::Outgoing),
            time_span,
            top_pairs,
        }
    }
}

impl Display for DatasetSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph summary:")?;
        writeln!(f, "  nodes:                   {}", self.nodes)?;
        writeln!(f, "  edges:                   {}", self.edges)?;
        writeln!(f, "  weak components:         {}", self.weakly_connected_components)?;
        writeln!(f, "  self loops:              {}", self.self_loops)?;
        writeln!(f, "  max in/out degree:       {}/{}", self.max_in_degree, self.max_out_degree)?;
        writeln!(f, "  time span (s):           {}", self.time_span)?;
        if !self.top_pairs.is_empty() {
            writeln!(f, "  busiest pairs:")?;
            for pair in &self.top_pairs {
                writeln!(f, "    {}", pair)?;
            }
        }
        Ok(())
    }
}
