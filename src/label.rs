use crate::{
    error::IntegrityError,
    index::AddressIndex,
    types::{EdgeId, FormattedEdge, NodeLabel, NormalizedTransaction, SanctionSet},
};
use tracing::info;

/// An edge is illicit when either endpoint is sanctioned.
pub fn is_illicit(sanctions: &SanctionSet, from_address: &str, to_address: &str) -> bool {
    sanctions.contains(from_address) || sanctions.contains(to_address)
}

///
/// label_edges
///
/// Turns chronologically ordered transactions into output edges. The edge id is the position
/// in `ordered`, so the caller's order is the edge order; nothing is re-sorted here.
///
/// Fails if an endpoint has no node id, which means the index was built from a different
/// set of transactions.
///
pub fn label_edges(
    ordered: &[NormalizedTransaction],
    index: &AddressIndex,
    sanctions: &SanctionSet,
) -> Result<Vec<FormattedEdge>, IntegrityError> {
    let node_id = |tx: &NormalizedTransaction, address: &str| {
        index
            .id_of(address)
            .ok_or_else(|| IntegrityError::UnindexedAddress {
                row: tx.row,
                address: address.to_string(),
            })
    };

    let edges = ordered
        .iter()
        .enumerate()
        .map(|(position, tx)| {
            Ok(FormattedEdge {
                edge_id: position as EdgeId,
                from_id: node_id(tx, &tx.from_address)?,
                to_id: node_id(tx, &tx.to_address)?,
                timestamp: tx.timestamp,
                amount: tx.amount,
                illicit: is_illicit(sanctions, &tx.from_address, &tx.to_address),
            })
        })
        .collect::<Result<Vec<_>, IntegrityError>>()?;

    info!(
        "Labeled {} edges, {} illicit",
        edges.len(),
        edges.iter().filter(|edge| edge.illicit).count()
    );
    Ok(edges)
}

/// One label per indexed address, in id order, whether or not the address has edges.
pub fn label_nodes(index: &AddressIndex, sanctions: &SanctionSet) -> Vec<NodeLabel> {
    let labels: Vec<NodeLabel> = index
        .iter()
        .map(|(node_id, address)| NodeLabel {
            node_id,
            sanctioned: sanctions.contains(address),
        })
        .collect();

    let sanctioned = labels.iter().filter(|label| label.sanctioned).count();
    info!(
        "{} of {} nodes sanctioned ({} sanctioned addresses not in the graph)",
        sanctioned,
        labels.len(),
        sanctions.len().saturating_sub(sanctioned)
    );
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SanctionLabel;
    use rust_decimal::Decimal;

    fn tx(row: usize, from: &str, to: &str, timestamp: i64) -> NormalizedTransaction {
        NormalizedTransaction {
            row,
            tx_hash: format!("0x{row}"),
            from_address: from.to_string(),
            to_address: to.to_string(),
            timestamp,
            amount: Decimal::ONE,
        }
    }

    fn sanctions(addresses: &[&str]) -> SanctionSet {
        let labels: Vec<SanctionLabel> = addresses.iter().map(|a| SanctionLabel::new(*a)).collect();
        SanctionSet::from_labels(&labels)
    }

    #[test]
    fn test_either_endpoint_makes_an_edge_illicit() {
        let s = sanctions(&["bad"]);
        assert!(is_illicit(&s, "bad", "ok"));
        assert!(is_illicit(&s, "ok", "bad"));
        assert!(!is_illicit(&s, "ok", "fine"));
    }

    #[test]
    fn test_edge_ids_follow_given_order() {
        let ordered = vec![tx(7, "b", "c", 0), tx(2, "a", "b", 50)];
        let index = AddressIndex::build(&ordered);
        let edges = label_edges(&ordered, &index, &sanctions(&["c"])).unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].edge_id, 0);
        assert_eq!((edges[0].from_id, edges[0].to_id), (1, 2));
        assert!(edges[0].illicit);
        assert_eq!(edges[1].edge_id, 1);
        assert_eq!((edges[1].from_id, edges[1].to_id), (0, 1));
        assert!(!edges[1].illicit);
        assert_eq!(edges[1].timestamp, 50);
    }

    #[test]
    fn test_unindexed_endpoint_is_integrity_error() {
        let index = AddressIndex::build(&[tx(0, "a", "b", 0)]);
        let err = label_edges(&[tx(1, "a", "z", 0)], &index, &SanctionSet::default()).unwrap_err();
        assert_eq!(
            err,
            IntegrityError::UnindexedAddress {
                row: 1,
                address: "z".to_string()
            }
        );
    }

    #[test]
    fn test_node_labels_cover_every_indexed_address() {
        let index = AddressIndex::build(&[tx(0, "a", "b", 0), tx(1, "b", "c", 1)]);
        let labels = label_nodes(&index, &sanctions(&["c", "not-in-graph"]));
        assert_eq!(labels.len(), 3);
        assert_eq!(
            labels,
            vec![
                NodeLabel { node_id: 0, sanctioned: false },
                NodeLabel { node_id: 1, sanctioned: false },
                NodeLabel { node_id: 2, sanctioned: true },
            ]
        );
    }
}
