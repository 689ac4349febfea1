use crate::types::{NodeId, NormalizedTransaction};
use std::collections::HashMap;
use tracing::info;

///
/// AddressIndex
///
/// Bidirectional mapping between addresses and dense, zero-based node ids.
///
/// Ids follow the lexicographic (byte) order of the address strings, so the same set of
/// transactions always produces the same ids regardless of row order. Only addresses that
/// appear in a surviving transaction get an id.
///
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressIndex {
    addresses: Vec<String>,
    ids: HashMap<String, NodeId>,
}

impl AddressIndex {
    pub fn build(transactions: &[NormalizedTransaction]) -> Self {
        let mut addresses: Vec<&str> = transactions
            .iter()
            .flat_map(|tx| [tx.from_address.as_str(), tx.to_address.as_str()])
            .collect();
        addresses.sort_unstable();
        addresses.dedup();
        let index = Self::from_sorted(addresses.into_iter().map(str::to_string).collect());
        info!("Indexed {} addresses", index.len());
        index
    }

    /// `addresses` must already be sorted and free of duplicates.
    fn from_sorted(addresses: Vec<String>) -> Self {
        let ids = addresses
            .iter()
            .enumerate()
            .map(|(position, address)| (address.clone(), position as NodeId))
            .collect();
        Self { addresses, ids }
    }

    pub fn id_of(&self, address: &str) -> Option<NodeId> {
        self.ids.get(address).copied()
    }

    pub fn address_of(&self, node_id: NodeId) -> Option<&str> {
        usize::try_from(node_id)
            .ok()
            .and_then(|position| self.addresses.get(position))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// (node_id, address) pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &str)> {
        self.addresses
            .iter()
            .enumerate()
            .map(|(position, address)| (position as NodeId, address.as_str()))
    }
}
