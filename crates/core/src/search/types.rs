//! Result types returned by collection queries.

use crate::document::{AttributeValue, DocId, MetadataValue};
use crate::search::planner::QueryPlan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A ranked document returned to the caller.
///
/// `score` is the composite ranking score (higher is better); `distance` is the
/// raw index distance under the collection metric (lower is closer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: DocId,
    pub score: f32,
    pub distance: f32,
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Full metadata, or only the requested paths when the query names any.
    pub metadata: MetadataValue,
}

/// Why a search-then-filter execution came back short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// Every retry was spent and the filter still rejected too many candidates.
    RetryCapReached,
    /// The index returned everything it holds before `k` candidates survived.
    IndexExhausted,
}

/// Warning attached to a successful response that returned fewer than `k` hits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedResult {
    pub requested: usize,
    pub returned: usize,
    /// Index searches issued, the first one included.
    pub attempts: usize,
    pub reason: DegradedReason,
}

impl fmt::Display for DegradedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.reason {
            DegradedReason::RetryCapReached => "retry cap reached",
            DegradedReason::IndexExhausted => "index exhausted",
        };
        write!(
            f,
            "returned {} of {} requested results after {} attempts ({reason})",
            self.returned, self.requested, self.attempts
        )
    }
}

/// Hits of one page plus the plan that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub plan: QueryPlan,
    pub warning: Option<DegradedResult>,
}

impl SearchResponse {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        self.warning.is_some()
    }

    /// Ids of the hits in rank order.
    pub fn ids(&self) -> Vec<&DocId> {
        self.hits.iter().map(|h| &h.id).collect()
    }
}
