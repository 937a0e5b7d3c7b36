//! Cluster-side plumbing: per-shard count reporting and the coordinator's
//! merge of per-shard search results.
//!
//! No cross-shard communication happens here. A shard reports its own count
//! to whatever aggregation facility the host injects, and a coordinator that
//! has collected one [`SearchResponse`] per shard folds them with
//! [`merge_top_k`].

use crate::error::{Result, VecSimError};
use crate::keyspace::Shard;
use crate::search::{SearchResponse, SearchResult};
use crate::top_k::{Scored, TopK};
use std::collections::BTreeMap;
use tracing::debug;

/// The host's cross-shard aggregation facility.
pub trait ClusterAggregator {
    fn report_local_count(&mut self, shard_id: &str, count: usize) -> Result<()>;
}

/// Sums the latest count reported by each shard.
#[derive(Debug, Default, Clone)]
pub struct SumAggregator {
    counts: BTreeMap<String, usize>,
}

impl SumAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn shard_count(&self, shard_id: &str) -> Option<usize> {
        self.counts.get(shard_id).copied()
    }

    pub fn shards(&self) -> usize {
        self.counts.len()
    }
}

impl ClusterAggregator for SumAggregator {
    fn report_local_count(&mut self, shard_id: &str, count: usize) -> Result<()> {
        if shard_id.is_empty() {
            return Err(VecSimError::InvalidArgument("shard id must not be empty".to_string()));
        }
        self.counts.insert(shard_id.to_string(), count);
        Ok(())
    }
}

/// Exposes one shard's vector cardinality to the aggregation facility.
#[derive(Debug)]
pub struct ShardCountAdapter<'a> {
    shard_id: String,
    shard: &'a Shard,
}

impl<'a> ShardCountAdapter<'a> {
    pub fn new(shard_id: impl Into<String>, shard: &'a Shard) -> Self {
        Self {
            shard_id: shard_id.into(),
            shard,
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Vector records resident on this shard right now.
    pub fn local_count(&self) -> usize {
        self.shard.local_count()
    }

    /// Keys of any type; always `>= local_count()`.
    pub fn host_dbsize(&self) -> usize {
        self.shard.dbsize()
    }

    pub fn report(&self, aggregator: &mut dyn ClusterAggregator) -> Result<usize> {
        let count = self.local_count();
        aggregator.report_local_count(&self.shard_id, count)?;
        debug!(shard = %self.shard_id, count, "local count reported");
        Ok(count)
    }
}

/// Merge per-shard responses into the global top `k`.
///
/// Results are re-ranked with the same order a single shard uses; error lists
/// are concatenated in shard order.
pub fn merge_top_k<I>(k: usize, responses: I) -> SearchResponse
where
    I: IntoIterator<Item = SearchResponse>,
{
    let mut top = TopK::new(k);
    let mut errors = Vec::new();
    for response in responses {
        for hit in response.results {
            top.push(Scored::new(hit.key, hit.score));
        }
        errors.extend(response.errors);
    }
    SearchResponse {
        results: top
            .into_sorted_vec()
            .into_iter()
            .map(|s| SearchResult {
                key: s.key,
                score: s.score,
            })
            .collect(),
        errors,
    }
}
