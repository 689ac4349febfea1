use crate::{
    error::IntegrityError,
    types::{EdgeId, FormattedEdge},
};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use tracing::info;

///
/// SplitAssignment
///
/// Temporal train/validation partition of the edge ids. Train is a prefix of the
/// chronological edge order and validation is the rest, so every training edge is no later
/// than any validation edge.
///
/// Serializes to the split descriptor: `{"train_edge_ids": [...], "val_edge_ids": [...]}`.
///
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitAssignment {
    pub train_edge_ids: Vec<EdgeId>,
    pub val_edge_ids: Vec<EdgeId>,
}

/// floor(ratio * n), computed exactly. `ratio` is expected in [0, 1]; the result is clamped
/// to [0, n] either way.
pub fn train_size(n: usize, ratio: Decimal) -> usize {
    let ratio = ratio.clamp(Decimal::ZERO, Decimal::ONE);
    Decimal::from(n)
        .checked_mul(ratio)
        .and_then(|product| product.floor().to_usize())
        .map_or(n, |k| k.min(n))
}

impl SplitAssignment {
    /// `edges` must be in chronological (edge id) order, as produced by the labeler.
    pub fn temporal(edges: &[FormattedEdge], ratio: Decimal) -> Self {
        let k = train_size(edges.len(), ratio);
        let (train, val) = edges.split_at(k);
        let split = Self {
            train_edge_ids: train.iter().map(|edge| edge.edge_id).collect(),
            val_edge_ids: val.iter().map(|edge| edge.edge_id).collect(),
        };
        info!(
            "Split {} edges at ratio {}: {} train, {} val",
            edges.len(),
            ratio,
            split.train_edge_ids.len(),
            split.val_edge_ids.len()
        );
        split
    }

    pub fn len(&self) -> usize {
        self.train_edge_ids.len() + self.val_edge_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that this is a chronological partition of exactly `edges`.
    pub fn verify(&self, edges: &[FormattedEdge]) -> Result<(), IntegrityError> {
        if self.len() != edges.len() {
            return Err(IntegrityError::SplitMismatch(format!(
                "{} ids assigned for {} edges",
                self.len(),
                edges.len()
            )));
        }
        // Edges are dense and in id order, so the split must be exactly 0..n in sequence.
        let expected = edges.iter().map(|edge| edge.edge_id);
        let assigned = self.train_edge_ids.iter().chain(&self.val_edge_ids).copied();
        if let Some((want, got)) = expected.zip(assigned).find(|(want, got)| want != got) {
            return Err(IntegrityError::SplitMismatch(format!(
                "expected edge {want}, found {got}"
            )));
        }

        let k = self.train_edge_ids.len();
        if k > 0 && k < edges.len() && edges[k - 1].timestamp > edges[k].timestamp {
            return Err(IntegrityError::SplitMismatch(format!(
                "last train edge at t={} is later than first val edge at t={}",
                edges[k - 1].timestamp,
                edges[k].timestamp
            )));
        }
        Ok(())
    }
}
