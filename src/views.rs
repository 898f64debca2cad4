//! Read-only projections over the confirmed chain.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{Block, Candidate};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChainPage {
    pub blocks: Vec<Block>,
    pub total_pages: usize,
    pub current_page: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Results {
    pub counts: BTreeMap<Candidate, u64>,
    pub percentages: BTreeMap<Candidate, f64>,
    pub total: u64,
}

/// 1-indexed page of `chain`. Pages past the end, and page 0, are empty.
pub fn page(chain: &[Block], page_number: usize, page_size: usize) -> &[Block] {
    if page_number == 0 || page_size == 0 {
        return &[];
    }
    let start = (page_number - 1).saturating_mul(page_size);
    if start >= chain.len() {
        return &[];
    }
    let end = start.saturating_add(page_size).min(chain.len());
    &chain[start..end]
}

/// Page view for the HTTP layer. Page numbers below 1 read as page 1 and a
/// zero page size reads as 1.
pub fn chain_page(chain: &[Block], page_number: usize, page_size: usize) -> ChainPage {
    let page_number = page_number.max(1);
    let page_size = page_size.max(1);
    ChainPage {
        blocks: page(chain, page_number, page_size).to_vec(),
        total_pages: chain.len().div_ceil(page_size),
        current_page: page_number,
    }
}

pub fn tally(chain: &[Block]) -> Results {
    let mut counts: BTreeMap<Candidate, u64> = Candidate::ALL.iter().map(|c| (*c, 0)).collect();
    for vote in chain.iter().flat_map(|block| &block.votes) {
        *counts.entry(vote.candidate).or_default() += 1;
    }

    let total: u64 = counts.values().sum();
    let percentages = counts
        .iter()
        .map(|(candidate, &count)| {
            let pct = if total == 0 {
                0.0
            } else {
                count as f64 * 100.0 / total as f64
            };
            (*candidate, pct)
        })
        .collect();

    Results {
        counts,
        percentages,
        total,
    }
}
