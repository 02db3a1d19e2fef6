//! Token-budgeted chunk planning over a segment sequence

use std::ops::RangeInclusive;

use crate::config::ChunkingConfig;

/// Rough token cost of a piece of text: four ASCII characters per token, one
/// token per non-ASCII character (CJK text tokenises close to that). Never zero.
pub fn estimate_tokens(text: &str) -> usize {
    let (ascii, other) = text.chars().fold((0usize, 0usize), |(a, o), c| {
        if c.is_ascii() { (a + 1, o) } else { (a, o + 1) }
    });
    (ascii.div_ceil(4) + other).max(1)
}

/// A contiguous range of segments translated together, plus the trailing
/// segments of the previous chunk that travel along as context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    pub start: usize,
    pub end: usize,
    pub overlap: Option<RangeInclusive<usize>>,
}

impl ChunkPlan {
    pub fn range(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }

    /// Number of segments in the chunk itself (never zero)
    pub fn segment_count(&self) -> usize {
        self.end - self.start + 1
    }
}

/// Split `texts` into chunks whose estimated cost stays within
/// `chunk_tokens`, each chunk after the first carrying as much of the previous
/// chunk's tail as fits in `overlap_tokens`. Chunk plus overlap never exceeds
/// `max_context_tokens` unless a single segment is larger on its own.
pub fn plan_chunks<S: AsRef<str>>(texts: &[S], config: &ChunkingConfig) -> Vec<ChunkPlan> {
    let costs: Vec<usize> = texts.iter().map(|t| estimate_tokens(t.as_ref())).collect();
    let chunk_budget = config.chunk_tokens.max(1);
    let context_budget = config.max_context_tokens.max(chunk_budget);

    let mut plans = Vec::new();
    let mut start = 0;

    while start < costs.len() {
        // The chunk's first segment must fit next to the overlap
        let overlap_budget = config.overlap_tokens.min(context_budget.saturating_sub(costs[start]));
        let overlap = plans
            .last()
            .and_then(|prev: &ChunkPlan| trailing_overlap(&costs, prev, overlap_budget));
        let overlap_cost: usize = overlap
            .as_ref()
            .map(|r| costs[r.clone()].iter().sum())
            .unwrap_or(0);
        let budget = chunk_budget.min(context_budget.saturating_sub(overlap_cost)).max(1);

        // A chunk always takes at least one segment
        let mut end = start;
        let mut cost = costs[start];
        while end + 1 < costs.len() && cost + costs[end + 1] <= budget {
            end += 1;
            cost += costs[end];
        }

        plans.push(ChunkPlan { start, end, overlap });
        start = end + 1;
    }

    plans
}

fn trailing_overlap(costs: &[usize], prev: &ChunkPlan, budget: usize) -> Option<RangeInclusive<usize>> {
    let mut first = prev.end + 1;
    let mut used = 0;
    while first > prev.start && used + costs[first - 1] <= budget {
        first -= 1;
        used += costs[first];
    }

    (first <= prev.end).then(|| first..=prev.end)
}
