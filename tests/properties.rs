use polars::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;
use txnlabels::{
    config::{InputPaths, PipelineConfig},
    loader::FrameSource,
    pipeline::{Dataset, Pipeline},
};

const POOL: usize = 12;
// Addresses at these positions have no nodes-table row and go through fail-open.
const UNLISTED: usize = 2;
const BASE_EPOCH: u64 = 1_700_000_000;

fn address(i: u8) -> String {
    format!("0x{:040x}", i)
}

#[derive(Debug, Clone)]
struct Scenario {
    // (from, to, seconds after BASE_EPOCH, wei)
    rows: Vec<(u8, u8, u32, u64)>,
    contracts: Vec<bool>,
    sanctioned: Vec<bool>,
}

impl Scenario {
    fn source(&self, order: &[usize]) -> FrameSource {
        let rows: Vec<&(u8, u8, u32, u64)> = order.iter().map(|i| &self.rows[*i]).collect();
        let transactions = df!(
            "tx_hash" => order.iter().map(|i| format!("0x{i:064x}")).collect::<Vec<_>>(),
            "block_timestamp" => rows.iter().map(|r| (BASE_EPOCH + r.2 as u64).to_string()).collect::<Vec<_>>(),
            "from_address" => rows.iter().map(|r| address(r.0)).collect::<Vec<_>>(),
            "to_address" => rows.iter().map(|r| address(r.1)).collect::<Vec<_>>(),
            "value_wei" => rows.iter().map(|r| r.3.to_string()).collect::<Vec<_>>()
        )
        .unwrap();

        let listed = POOL - UNLISTED;
        let nodes = df!(
            "address" => (0..listed as u8).map(address).collect::<Vec<_>>(),
            "is_contract" => self.contracts[..listed].to_vec()
        )
        .unwrap();

        let labels = df!(
            "address" => (0..POOL as u8).map(address).collect::<Vec<_>>(),
            "label" => self.sanctioned.iter().map(|s| *s as i64).collect::<Vec<_>>()
        )
        .unwrap();

        FrameSource::new(transactions, labels, nodes)
    }

    fn is_contract(&self, addr: &str) -> bool {
        (0..POOL - UNLISTED).any(|i| self.contracts[i] && address(i as u8) == addr)
    }

    fn is_sanctioned(&self, addr: &str) -> bool {
        (0..POOL).any(|i| self.sanctioned[i] && address(i as u8) == addr)
    }
}

fn scenario() -> impl Strategy<Value = Scenario> {
    (
        prop::collection::vec(
            (0..POOL as u8, 0..POOL as u8, 0u32..5_000, any::<u64>()),
            0..80,
        ),
        prop::collection::vec(prop::bool::weighted(0.25), POOL),
        prop::collection::vec(prop::bool::weighted(0.2), POOL),
    )
        .prop_map(|(rows, contracts, sanctioned)| Scenario {
            rows,
            contracts,
            sanctioned,
        })
}

fn build(source: &FrameSource) -> Dataset {
    let config = PipelineConfig::new(
        InputPaths {
            transactions: "unused".into(),
            labels: "unused".into(),
            nodes: "unused".into(),
        },
        "unused",
    );
    Pipeline::new(config).unwrap().build(source).unwrap().0
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_dataset_invariants(s in scenario()) {
        let order: Vec<usize> = (0..s.rows.len()).collect();
        let dataset = build(&s.source(&order));
        let n = dataset.edges.len();

        let mut used: HashSet<i64> = HashSet::new();
        for (position, edge) in dataset.edges.iter().enumerate() {
            prop_assert_eq!(edge.edge_id, position as i64);
            prop_assert!(edge.timestamp >= 0);

            let from = dataset.index.address_of(edge.from_id).unwrap();
            let to = dataset.index.address_of(edge.to_id).unwrap();
            // No contract leakage
            prop_assert!(!s.is_contract(from) && !s.is_contract(to));
            // Label correctness
            prop_assert_eq!(edge.illicit, s.is_sanctioned(from) || s.is_sanctioned(to));

            used.insert(edge.from_id);
            used.insert(edge.to_id);
        }
        for pair in dataset.edges.windows(2) {
            prop_assert!(pair[0].timestamp <= pair[1].timestamp);
        }

        // Every node is used by an edge, and ids are exactly 0..N.
        prop_assert_eq!(used.len(), dataset.index.len());
        prop_assert_eq!(dataset.node_labels.len(), dataset.index.len());
        for label in &dataset.node_labels {
            let addr = dataset.index.address_of(label.node_id).unwrap();
            prop_assert_eq!(label.sanctioned, s.is_sanctioned(addr));
        }

        // Temporal partition with |train| = floor(0.8 n)
        let split = &dataset.split;
        prop_assert_eq!(split.train_edge_ids.len(), n * 4 / 5);
        prop_assert_eq!(split.train_edge_ids.len() + split.val_edge_ids.len(), n);
        let train: HashSet<i64> = split.train_edge_ids.iter().copied().collect();
        prop_assert!(split.val_edge_ids.iter().all(|id| !train.contains(id)));
        let train_max = split.train_edge_ids.iter().map(|id| dataset.edges[*id as usize].timestamp).max();
        let val_min = split.val_edge_ids.iter().map(|id| dataset.edges[*id as usize].timestamp).min();
        if let (Some(train_max), Some(val_min)) = (train_max, val_min) {
            prop_assert!(train_max <= val_min);
        }
    }

    #[test]
    fn prop_index_is_independent_of_row_order(s in scenario()) {
        let forward: Vec<usize> = (0..s.rows.len()).collect();
        let backward: Vec<usize> = forward.iter().rev().copied().collect();

        let first = build(&s.source(&forward));
        let again = build(&s.source(&forward));
        let reversed = build(&s.source(&backward));

        prop_assert_eq!(&first.index, &again.index);
        prop_assert_eq!(&first.edges, &again.edges);
        prop_assert_eq!(&first.index, &reversed.index);
        prop_assert_eq!(first.edges.len(), reversed.edges.len());
    }
}
