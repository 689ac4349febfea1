use crate::{
    config::UnknownAddressPolicy,
    types::{AddressMeta, RawTransaction},
};
use std::collections::HashMap;
use tracing::{info, warn};

/// What the filter knows about one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressClass {
    Contract,
    NonContract,
    Unknown,
}

///
/// ContractFilter
///
/// Drops every transaction with a contract on *either* end. Addresses missing from the
/// nodes table are handled by the `UnknownAddressPolicy`.
///
#[derive(Debug, Clone)]
pub struct ContractFilter {
    is_contract: HashMap<String, bool>,
    policy: UnknownAddressPolicy,
}

/// Row counts from one filter pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub input: usize,
    pub kept: usize,
    /// At least one endpoint is a known contract.
    pub dropped_contract: usize,
    /// No endpoint is a known contract, but one is unknown and the policy is fail-closed.
    pub dropped_unknown: usize,
    /// Kept although at least one endpoint is unknown (fail-open).
    pub kept_unknown: usize,
}

impl FilterStats {
    pub fn dropped(&self) -> usize {
        self.dropped_contract + self.dropped_unknown
    }
}

impl ContractFilter {
    /// An address listed more than once is a contract if any of its rows says so.
    pub fn new(metas: &[AddressMeta], policy: UnknownAddressPolicy) -> Self {
        let mut is_contract: HashMap<String, bool> = HashMap::with_capacity(metas.len());
        for meta in metas {
            *is_contract.entry(meta.address.clone()).or_insert(false) |= meta.is_contract;
        }
        Self {
            is_contract,
            policy,
        }
    }

    pub fn classify(&self, address: &str) -> AddressClass {
        match self.is_contract.get(address) {
            Some(true) => AddressClass::Contract,
            Some(false) => AddressClass::NonContract,
            None => AddressClass::Unknown,
        }
    }

    pub fn contract_count(&self) -> usize {
        self.is_contract.values().filter(|c| **c).count()
    }

    /// Returns the surviving transactions in their original order.
    pub fn apply(&self, transactions: Vec<RawTransaction>) -> (Vec<RawTransaction>, FilterStats) {
        let mut stats = FilterStats {
            input: transactions.len(),
            ..Default::default()
        };

        let kept: Vec<RawTransaction> = transactions
            .into_iter()
            .filter(|tx| {
                let from = self.classify(&tx.from_address);
                let to = self.classify(&tx.to_address);
                if from == AddressClass::Contract || to == AddressClass::Contract {
                    stats.dropped_contract += 1;
                    return false;
                }
                if from == AddressClass::Unknown || to == AddressClass::Unknown {
                    match self.policy {
                        UnknownAddressPolicy::FailOpen => stats.kept_unknown += 1,
                        UnknownAddressPolicy::FailClosed => {
                            stats.dropped_unknown += 1;
                            return false;
                        }
                    }
                }
                true
            })
            .collect();
        stats.kept = kept.len();

        info!(
            "Contract filter kept {} of {} transactions ({} dropped for a contract endpoint)",
            stats.kept, stats.input, stats.dropped_contract
        );
        match self.policy {
            UnknownAddressPolicy::FailOpen if stats.kept_unknown > 0 => warn!(
                "{} transactions kept with an endpoint missing from node metadata (fail-open)",
                stats.kept_unknown
            ),
            UnknownAddressPolicy::FailClosed if stats.dropped_unknown > 0 => warn!(
                "{} transactions dropped with an endpoint missing from node metadata (fail-closed)",
                stats.dropped_unknown
            ),
            _ => {}
        }

        (kept, stats)
    }
}
