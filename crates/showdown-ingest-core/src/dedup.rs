//! Drops search candidates whose replay is already stored.

use crate::types::{KnownIdSet, ReplaySummary};

/// Candidates whose id is absent from `known`, in their original order.
pub fn filter_known<I>(candidates: I, known: &KnownIdSet) -> Vec<ReplaySummary>
where
    I: IntoIterator<Item = ReplaySummary>,
{
    candidates
        .into_iter()
        .filter(|summary| !known.contains(&summary.id))
        .collect()
}

/// Owns the id set loaded at startup and filters every search page against it.
#[derive(Debug, Clone, Default)]
pub struct DedupFilter {
    known: KnownIdSet,
}

impl DedupFilter {
    pub fn new(known: KnownIdSet) -> Self {
        Self { known }
    }

    pub fn known(&self) -> &KnownIdSet {
        &self.known
    }

    pub fn filter<I>(&self, candidates: I) -> Vec<ReplaySummary>
    where
        I: IntoIterator<Item = ReplaySummary>,
    {
        filter_known(candidates, &self.known)
    }
}
