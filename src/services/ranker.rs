use std::cmp::Reverse;
use std::sync::Arc;

use crate::models::{OperationVariant, RankTable};

/// Orders satisfiable variants, most specific first
///
/// Ranking rule: higher combined representation rank, then higher explicit
/// priority, then earlier registration. The order only depends on the
/// registry content, so identical inputs always produce the same order.
pub struct SpecificityRanker<'a> {
    ranks: &'a RankTable,
}

impl<'a> SpecificityRanker<'a> {
    pub fn new(ranks: &'a RankTable) -> Self {
        Self { ranks }
    }

    pub fn rank(&self, mut variants: Vec<Arc<OperationVariant>>) -> Vec<Arc<OperationVariant>> {
        variants.sort_by_key(|v| {
            (
                Reverse(v.signature.specificity(self.ranks)),
                Reverse(v.priority),
                v.sequence,
            )
        });
        variants
    }
}
