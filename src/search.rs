//! Exact top-k cosine search over a point-in-time store view.
//!
//! Every resident record is scored against the query in one linear pass over
//! the vector column. A bounded [`TopK`] keeps the best `k`, so a search costs
//! `O(n·D + n·log k)`. Scores tie-break on ascending key, which makes results
//! reproducible and lets per-shard results be merged exactly.

use crate::config::StoreConfig;
use crate::distance::{cosine_from_parts, dot_product, norm};
use crate::error::{Result, VecSimError};
use crate::storage::StoreView;
use crate::top_k::{Scored, TopK};
use crate::vector::VectorRecord;
use globset::{Glob, GlobMatcher};
use rayon::prelude::*;
use std::time::Instant;

/// Minimum number of slots one rayon task scores before splitting further.
const PARALLEL_MIN_SLOTS: usize = 4096;

/// Restricts which keys a search considers.
#[derive(Debug, Clone)]
pub enum KeyFilter {
    /// `*`: every key.
    All,
    /// A pattern without glob metacharacters names one key.
    Exact(String),
    Glob(GlobMatcher),
}

impl KeyFilter {
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(VecSimError::InvalidArgument(
                "key filter must not be empty".to_string(),
            ));
        }
        if pattern == "*" {
            return Ok(KeyFilter::All);
        }
        if !pattern.contains(['*', '?', '[']) {
            return Ok(KeyFilter::Exact(pattern.to_string()));
        }
        let glob = Glob::new(pattern).map_err(|e| {
            VecSimError::InvalidArgument(format!("invalid key filter '{}': {}", pattern, e))
        })?;
        Ok(KeyFilter::Glob(glob.compile_matcher()))
    }

    #[inline]
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Exact(k) => k == key,
            KeyFilter::Glob(m) => m.is_match(key),
        }
    }
}

/// A single `(key, score)` hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub key: String,
    pub score: f64,
}

/// Ranked results plus the per-shard error list a cluster coordinator merges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub errors: Vec<String>,
}

impl SearchResponse {
    pub fn keys(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.key.as_str()).collect()
    }
}

/// Exact cosine top-k search.
#[derive(Debug, Clone)]
pub struct SimilarityEngine {
    dimension: usize,
    parallel_scan_threshold: usize,
}

impl SimilarityEngine {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            dimension: config.dimension,
            parallel_scan_threshold: config.parallel_scan_threshold,
        }
    }

    /// Validate a raw request and search.
    ///
    /// `k` must be positive and `query` must be exactly `dimension * 4` bytes.
    pub fn search(
        &self,
        view: &StoreView,
        k: i64,
        query: &[u8],
        filter: &KeyFilter,
    ) -> Result<SearchResponse> {
        if k <= 0 {
            return Err(VecSimError::InvalidArgument(format!(
                "k must be a positive integer, got {}",
                k
            )));
        }
        let query = VectorRecord::from_bytes(query, self.dimension)?;
        let k = usize::try_from(k).unwrap_or(usize::MAX);
        Ok(self.search_vector(view, k, query.as_slice(), filter))
    }

    /// Search with an already validated query.
    pub fn search_vector(
        &self,
        view: &StoreView,
        k: usize,
        query: &[f32],
        filter: &KeyFilter,
    ) -> SearchResponse {
        let start = Instant::now();
        let query_norm = norm(query);

        let top = match filter {
            KeyFilter::Exact(key) => {
                let mut top = TopK::new(k);
                if let Some(slot) = view.slot_of(key) {
                    top.push(Scored::new(view.key(slot), score(view, slot, query, query_norm)));
                }
                top
            }
            _ if view.len() >= self.parallel_scan_threshold => {
                scan_parallel(view, k, query, query_norm, filter)
            }
            _ => scan_range(view, 0..view.len(), TopK::new(k), query, query_norm, filter),
        };

        let results: Vec<SearchResult> = top
            .into_sorted_vec()
            .into_iter()
            .map(|s| SearchResult {
                key: s.key.to_string(),
                score: s.score,
            })
            .collect();

        tracing::debug!(
            k,
            scanned = view.len(),
            returned = results.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "similarity search"
        );

        SearchResponse {
            results,
            errors: Vec::new(),
        }
    }
}

#[inline]
fn score(view: &StoreView, slot: usize, query: &[f32], query_norm: f64) -> f64 {
    cosine_from_parts(dot_product(query, view.vector(slot)), query_norm, view.norm(slot))
}

fn scan_range<'a>(
    view: &'a StoreView,
    slots: std::ops::Range<usize>,
    mut top: TopK<&'a str>,
    query: &[f32],
    query_norm: f64,
    filter: &KeyFilter,
) -> TopK<&'a str> {
    for slot in slots {
        let key = view.key(slot);
        if !filter.matches(key) {
            continue;
        }
        top.push(Scored::new(key, score(view, slot, query, query_norm)));
    }
    top
}

fn scan_parallel<'a>(
    view: &'a StoreView,
    k: usize,
    query: &[f32],
    query_norm: f64,
    filter: &KeyFilter,
) -> TopK<&'a str> {
    (0..view.len())
        .into_par_iter()
        .with_min_len(PARALLEL_MIN_SLOTS)
        .fold(
            || TopK::new(k),
            |mut top, slot| {
                let key = view.key(slot);
                if filter.matches(key) {
                    top.push(Scored::new(key, score(view, slot, query, query_norm)));
                }
                top
            },
        )
        .reduce(|| TopK::new(k), TopK::merge)
}
