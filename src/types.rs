use rust_decimal::Decimal;
use std::{
    collections::HashSet,
    fmt::{Debug, Display},
    str::FromStr,
};

/// Node ids and edge ids are written as int64 columns, so they are held as i64 throughout.
pub type NodeId = i64;
pub type EdgeId = i64;

///
/// RawTransaction
///
/// One row of the transactions table, exactly as read. `row` is the position in the input
/// and is the tie-break key for transactions that share a timestamp.
///
/// Null cells are read as empty strings; the normalizer rejects them.
///
#[derive(Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub row: usize,
    pub tx_hash: String,
    pub timestamp: String,
    pub from_address: String,
    pub to_address: String,
    pub value: String,
}

impl RawTransaction {
    pub fn new(
        row: usize,
        tx_hash: impl Into<String>,
        timestamp: impl Into<String>,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            row,
            tx_hash: tx_hash.into(),
            timestamp: timestamp.into(),
            from_address: from_address.into(),
            to_address: to_address.into(),
            value: value.into(),
        }
    }
}

impl Debug for RawTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RawTransaction {{ row: {}, tx_hash: {}, timestamp: {}, from_address: {}, to_address: {}, value: {} }}",
            self.row, self.tx_hash, self.timestamp, self.from_address, self.to_address, self.value
        )
    }
}

/// Node classification carried by the nodes table. Unrecognised strings are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeType {
    Eoa,
    Contract,
    Hub,
    Other(String),
}

impl FromStr for NodeType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "eoa" => NodeType::Eoa,
            "contract" => NodeType::Contract,
            "hub" => NodeType::Hub,
            _ => NodeType::Other(s.trim().to_string()),
        })
    }
}

impl Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Eoa => write!(f, "eoa"),
            NodeType::Contract => write!(f, "contract"),
            NodeType::Hub => write!(f, "hub"),
            NodeType::Other(s) => write!(f, "{s}"),
        }
    }
}

///
/// AddressMeta
///
/// One row of the nodes table. Only `is_contract` drives filtering; `node_type` feeds the
/// per-type node counts in the run report.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressMeta {
    pub address: String,
    pub is_contract: bool,
    pub node_type: Option<NodeType>,
}

/// An address with label=1 in the labels table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanctionLabel {
    pub address: String,
    pub sanctioned: bool,
}

impl SanctionLabel {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            sanctioned: true,
        }
    }
}

///
/// SanctionSet
///
/// The set S of sanctioned addresses. Membership is a hash lookup.
///
#[derive(Debug, Clone, Default)]
pub struct SanctionSet {
    addresses: HashSet<String>,
}

impl SanctionSet {
    pub fn from_labels(labels: &[SanctionLabel]) -> Self {
        Self {
            addresses: labels
                .iter()
                .filter(|label| label.sanctioned)
                .map(|label| label.address.clone())
                .collect(),
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

///
/// NormalizedTransaction
///
/// A transaction that survived filtering and parsing. `timestamp` is seconds since the
/// earliest surviving transaction and `amount` is in the target unit.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTransaction {
    pub row: usize,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub timestamp: i64,
    pub amount: Decimal,
}

///
/// FormattedEdge
///
/// One output edge. `edge_id` is the position in chronological order.
///
#[derive(Clone, PartialEq, Eq)]
pub struct FormattedEdge {
    pub edge_id: EdgeId,
    pub from_id: NodeId,
    pub to_id: NodeId,
    pub timestamp: i64,
    pub amount: Decimal,
    pub illicit: bool,
}

impl Debug for FormattedEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "FormattedEdge {{ edge_id: {}, from_id: {}, to_id: {}, timestamp: {}, amount: {}, illicit: {} }}",
            self.edge_id, self.from_id, self.to_id, self.timestamp, self.amount, self.illicit
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLabel {
    pub node_id: NodeId,
    pub sanctioned: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_parsing() {
        assert_eq!("EOA".parse::<NodeType>().unwrap(), NodeType::Eoa);
        assert_eq!(" hub ".parse::<NodeType>().unwrap(), NodeType::Hub);
        assert_eq!(
            "bridge".parse::<NodeType>().unwrap(),
            NodeType::Other("bridge".to_string())
        );
    }

    #[test]
    fn test_sanction_set_ignores_unsanctioned_entries() {
        let labels = vec![
            SanctionLabel::new("0xaa"),
            SanctionLabel {
                address: "0xbb".to_string(),
                sanctioned: false,
            },
        ];
        let set = SanctionSet::from_labels(&labels);
        assert!(set.contains("0xaa"));
        assert!(!set.contains("0xbb"));
        assert_eq!(set.len(), 1);
    }
}
