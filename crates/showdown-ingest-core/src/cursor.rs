//! Before-cursor pagination over the search endpoint.
//!
//! The remote service returns pages newest first. Each page's oldest upload
//! time becomes the next window's exclusive `before`, so a chain walks
//! backwards until the page is empty, the cursor stops moving, or the next
//! cursor would fall below the chain's lower bound.

use crate::types::{ReplaySummary, SearchWindow, TimeRange};

/// Why a cursor chain stopped issuing windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainStop {
    EmptyPage,
    /// The page's oldest entry is not older than the window's bound.
    Stalled,
    ReachedStart,
    /// Search retries were exhausted for this chain.
    SearchFailed,
}

impl std::fmt::Display for ChainStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainStop::EmptyPage => write!(f, "empty page"),
            ChainStop::Stalled => write!(f, "cursor stalled"),
            ChainStop::ReachedStart => write!(f, "reached start"),
            ChainStop::SearchFailed => write!(f, "search failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CursorStep {
    Continue(SearchWindow),
    Stop(ChainStop),
}

impl CursorStep {
    pub fn has_more(&self) -> bool {
        matches!(self, CursorStep::Continue(_))
    }
}

/// Plans search windows for one or more cursor chains.
#[derive(Debug, Clone)]
pub struct SearchCursor {
    chains: Vec<TimeRange>,
    format: Option<String>,
    user: Option<String>,
}

impl SearchCursor {
    /// `chains` contiguous sub-ranges of `range`, each walked independently.
    pub fn new(
        range: TimeRange,
        chains: usize,
        format: Option<String>,
        user: Option<String>,
    ) -> Self {
        Self {
            chains: range.split(chains),
            format,
            user,
        }
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    pub fn chain_range(&self, chain: usize) -> Option<TimeRange> {
        self.chains.get(chain).copied()
    }

    /// Initial window of every chain, bounded by that chain's end.
    pub fn seed(&self) -> Vec<SearchWindow> {
        self.chains
            .iter()
            .enumerate()
            .map(|(chain, range)| SearchWindow {
                chain,
                before: range.end,
                format: self.format.clone(),
                user: self.user.clone(),
            })
            .collect()
    }

    /// Decide the follow-up of `window` given the page it produced.
    pub fn advance(&self, window: &SearchWindow, page: &[ReplaySummary]) -> CursorStep {
        let Some(oldest) = page.iter().map(|summary| summary.uploadtime).min() else {
            return CursorStep::Stop(ChainStop::EmptyPage);
        };

        if oldest >= window.before {
            return CursorStep::Stop(ChainStop::Stalled);
        }

        let start = self
            .chain_range(window.chain)
            .map(|range| range.start)
            .unwrap_or(i64::MIN);
        if oldest < start {
            return CursorStep::Stop(ChainStop::ReachedStart);
        }

        CursorStep::Continue(SearchWindow {
            before: oldest,
            ..window.clone()
        })
    }
}
