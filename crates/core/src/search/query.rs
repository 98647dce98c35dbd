//! Query builder executed by [`Collection::search`](crate::storage::Collection::search).

use crate::config::{DEFAULT_K, MAX_K, MAX_OFFSET};
use crate::distance::DistanceMetric;
use crate::document::MetadataPath;
use crate::error::{Error, Result};
use crate::index::{validate_vector, SearchParams};
use crate::predicate::Predicate;
use crate::search::planner::Strategy;
use crate::search::scorer::{Page, ScoringWeights};
use serde::{Deserialize, Serialize};

/// A hybrid query: vector, optional filter, ranking weights and paging.
///
/// `k` is the number of nearest candidates handed to the ranker; `offset` and
/// `limit` page through the ranked candidates. `limit` defaults to `k`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    pub vector: Vec<f32>,
    pub filter: Option<Predicate>,
    pub weights: ScoringWeights,
    pub k: usize,
    pub limit: Option<usize>,
    pub offset: usize,
    /// Overrides the planner's choice for filtered queries.
    pub strategy: Option<Strategy>,
    pub ef_search: Option<usize>,
    pub nprobe: Option<usize>,
    /// Drop candidates whose distance exceeds this value.
    pub max_distance: Option<f32>,
    /// Restrict hit metadata to these paths; empty returns the whole tree.
    pub metadata_paths: Vec<MetadataPath>,
    /// Must equal the collection metric when set.
    pub metric: Option<DistanceMetric>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            vector: Vec::new(),
            filter: None,
            weights: ScoringWeights::default(),
            k: DEFAULT_K,
            limit: None,
            offset: 0,
            strategy: None,
            ef_search: None,
            nprobe: None,
            max_distance: None,
            metadata_paths: Vec::new(),
            metric: None,
        }
    }
}

impl Query {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            ..Self::default()
        }
    }

    /// Replaces the query vector, keeping every other setting.
    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = vector;
        self
    }

    /// Adds a filter. Repeated calls are combined with AND.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips this many ranked hits. Pages are cut from the `k` nearest
    /// candidates, so a window reaching past `k` comes back short.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn ef_search(mut self, ef: usize) -> Self {
        self.ef_search = Some(ef);
        self
    }

    pub fn nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = Some(nprobe);
        self
    }

    pub fn max_distance(mut self, max: f32) -> Self {
        self.max_distance = Some(max);
        self
    }

    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Dotted metadata paths to keep in hits. Malformed paths fail validation.
    pub fn metadata_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.metadata_paths = paths
            .into_iter()
            .map(|p| MetadataPath::from_dotted(p.as_ref()))
            .collect();
        self
    }

    pub fn page(&self) -> Page {
        Page::new(self.offset, self.limit.unwrap_or(self.k))
    }

    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            ef_search: self.ef_search,
            nprobe: self.nprobe,
        }
    }

    /// Checks everything that does not depend on the collection schema.
    pub fn validate(&self, dimension: usize) -> Result<()> {
        validate_vector(&self.vector, dimension)?;
        if self.k == 0 || self.k > MAX_K {
            return Err(Error::InvalidQuery(format!(
                "k must be in 1..={MAX_K}, got {}",
                self.k
            )));
        }
        if let Some(limit) = self.limit {
            if limit > MAX_K {
                return Err(Error::InvalidQuery(format!(
                    "limit {limit} exceeds {MAX_K}"
                )));
            }
        }
        if self.offset > MAX_OFFSET {
            return Err(Error::InvalidQuery(format!(
                "offset {} exceeds {MAX_OFFSET}",
                self.offset
            )));
        }
        if self.ef_search == Some(0) || self.nprobe == Some(0) {
            return Err(Error::InvalidQuery(
                "ef_search and nprobe must be positive".into(),
            ));
        }
        if let Some(max) = self.max_distance {
            if max.is_nan() {
                return Err(Error::InvalidQuery("max_distance is NaN".into()));
            }
        }
        for path in &self.metadata_paths {
            path.validate()?;
        }
        self.weights.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let q = Query::new(vec![1.0, 0.0]);
        assert_eq!(q.k, DEFAULT_K);
        assert_eq!(q.page(), Page::new(0, DEFAULT_K));
        assert_eq!(q.search_params(), SearchParams::default());
        assert!(q.validate(2).is_ok());
    }

    #[test]
    fn test_filters_combine_with_and() {
        let q = Query::new(vec![1.0])
            .filter(Predicate::attr("price").le(50.0))
            .filter(Predicate::meta("stock").gt(0.0));
        match q.filter {
            Some(Predicate::And(children)) => assert_eq!(children.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_paging_and_params() {
        let q = Query::new(vec![0.5; 3])
            .k(50)
            .limit(5)
            .offset(10)
            .ef_search(128)
            .nprobe(4);
        assert_eq!(q.page(), Page::new(10, 5));
        assert_eq!(
            q.search_params(),
            SearchParams {
                ef_search: Some(128),
                nprobe: Some(4)
            }
        );
    }

    #[test]
    fn test_validation_failures() {
        let q = Query::new(vec![1.0, 0.0]);
        assert!(matches!(
            q.clone().validate(3),
            Err(Error::DimensionMismatch { expected: 3, actual: 2 })
        ));
        assert!(matches!(q.clone().k(0).validate(2), Err(Error::InvalidQuery(_))));
        assert!(q.clone().k(MAX_K + 1).validate(2).is_err());
        assert!(q.clone().offset(MAX_OFFSET + 1).validate(2).is_err());
        assert!(q.clone().ef_search(0).validate(2).is_err());
        assert!(q.clone().max_distance(f32::NAN).validate(2).is_err());
        assert!(q.clone().metadata_paths(["a..b"]).validate(2).is_err());
        let bad = ScoringWeights::default().with_similarity(f32::INFINITY);
        assert!(q.clone().weights(bad).validate(2).unwrap_err().is_validation());
        assert!(Query::new(vec![f32::NAN, 0.0]).validate(2).is_err());
    }

    #[test]
    fn test_query_from_json() {
        let q: Query = serde_json::from_str(
            r#"{"vector": [1.0, 0.0], "k": 3, "strategy": "filter_then_search"}"#,
        )
        .unwrap();
        assert_eq!(q.k, 3);
        assert_eq!(q.strategy, Some(Strategy::FilterThenSearch));
        assert!(q.filter.is_none());
    }
}
