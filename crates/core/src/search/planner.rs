//! Query planning: choose between filtering first and searching first.
//!
//! A filtered query can run two ways:
//!
//! - **Filter-then-search** evaluates the predicate to an id set and searches
//!   only inside it (exact flat scan when the set is small, restricted index
//!   search otherwise). Cheap when few documents match.
//! - **Search-then-filter** over-fetches from the index and drops candidates
//!   that fail the predicate, growing the fetch on shortfall. Cheap when most
//!   documents match.
//!
//! The choice is made from the estimated selectivity of the predicate tree
//! against [`PlannerConfig::selectivity_threshold`]. Estimates assume
//! independent leaves; they steer the plan, they never change results.

use crate::config::PlannerConfig;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::index::{flat_search, IdSet, Neighbor, SearchParams, VectorIndex};
use crate::predicate::Predicate;
use crate::search::filter::{self, PredicateSource};
use crate::search::types::{DegradedReason, DegradedResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Execution order of filtering and similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Unfiltered,
    FilterThenSearch,
    SearchThenFilter,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Unfiltered => "unfiltered",
            Strategy::FilterThenSearch => "filter-then-search",
            Strategy::SearchThenFilter => "search-then-filter",
        })
    }
}

/// Planner state machine steps, recorded in order on the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStage {
    Start,
    EstimateSelectivity,
    ChooseStrategy,
    Execute,
    Done,
}

/// How a query was (or would be) executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub strategy: Strategy,
    pub stages: Vec<PlanStage>,
    /// Estimated fraction of live documents matching the predicate, clamped to
    /// `[min_selectivity, 1]`. `None` without a predicate.
    pub selectivity: Option<f64>,
    /// The strategy came from the caller instead of the estimate.
    pub hinted: bool,
    /// Index strategy name.
    pub index: String,
    /// Live documents at planning time.
    pub live: usize,
    /// Filter-then-search: size of the matching id set.
    pub candidate_count: Option<u64>,
    /// Filter-then-search: candidates were scored by exact flat scan.
    pub exact: bool,
    /// Index searches issued.
    pub attempts: usize,
    /// Largest number of neighbors requested from the index.
    pub fetched: usize,
}

impl QueryPlan {
    fn new(index: &dyn VectorIndex) -> Self {
        Self {
            strategy: Strategy::Unfiltered,
            stages: vec![PlanStage::Start],
            selectivity: None,
            hinted: false,
            index: index.kind().to_string(),
            live: index.len(),
            candidate_count: None,
            exact: false,
            attempts: 0,
            fetched: 0,
        }
    }

    pub fn is_executed(&self) -> bool {
        self.stages.last() == Some(&PlanStage::Done)
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {} over {} docs", self.strategy, self.index, self.live)?;
        if let Some(s) = self.selectivity {
            write!(f, ", selectivity {s:.4}")?;
        }
        if self.hinted {
            f.write_str(" (hinted)")?;
        }
        if let Some(n) = self.candidate_count {
            let scan = if self.exact { "flat scan" } else { "restricted search" };
            write!(f, ", {n} candidates by {scan}")?;
        }
        if self.attempts > 0 {
            write!(f, ", {} attempts, fetched {}", self.attempts, self.fetched)?;
        }
        Ok(())
    }
}

/// Everything the planner needs from one query.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'q> {
    pub vector: &'q [f32],
    pub k: usize,
    pub metric: DistanceMetric,
    pub params: SearchParams,
    /// Resolved predicate, if any.
    pub predicate: Option<&'q Predicate>,
    /// Candidates farther than this are dropped before ranking.
    pub max_distance: Option<f32>,
    pub hint: Option<Strategy>,
    /// Internal id never returned, e.g. the source of a similarity lookup.
    pub exclude: Option<u32>,
}

impl PlanRequest<'_> {
    /// Neighbors to ask the index for so that `k` remain after exclusion.
    fn fetch_size(&self, k: usize) -> usize {
        k.saturating_add(usize::from(self.exclude.is_some()))
    }

    /// Drops excluded and too-distant neighbors.
    fn keep(&self, mut neighbors: Vec<Neighbor>) -> Vec<Neighbor> {
        if let Some(max) = self.max_distance {
            neighbors.retain(|n| n.distance <= max);
        }
        if let Some(excluded) = self.exclude {
            neighbors.retain(|n| n.id != excluded);
        }
        neighbors
    }
}

/// Neighbors that survived filtering, nearest first.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub neighbors: Vec<Neighbor>,
    pub warning: Option<DegradedResult>,
}

/// Plans and runs one query against an index and a predicate source.
pub struct QueryPlanner<'a, S: ?Sized> {
    config: &'a PlannerConfig,
    index: &'a dyn VectorIndex,
    source: &'a S,
}

impl<'a, S> QueryPlanner<'a, S>
where
    S: PredicateSource + ?Sized,
{
    pub fn new(config: &'a PlannerConfig, index: &'a dyn VectorIndex, source: &'a S) -> Self {
        Self {
            config,
            index,
            source,
        }
    }

    /// Estimated selectivity of `predicate`, clamped to `[min_selectivity, 1]`.
    pub fn selectivity(&self, predicate: &Predicate) -> Result<f64> {
        let s = filter::estimate_selectivity(predicate, self.source)?;
        Ok(s.clamp(self.config.min_selectivity, 1.0))
    }

    /// Runs the planning stages without executing.
    pub fn plan(&self, request: &PlanRequest<'_>) -> Result<QueryPlan> {
        let mut plan = QueryPlan::new(self.index);
        let Some(predicate) = request.predicate else {
            plan.stages.push(PlanStage::ChooseStrategy);
            return Ok(plan);
        };

        plan.stages.push(PlanStage::EstimateSelectivity);
        let selectivity = self.selectivity(predicate)?;
        plan.selectivity = Some(selectivity);

        plan.stages.push(PlanStage::ChooseStrategy);
        plan.strategy = match request.hint {
            Some(Strategy::Unfiltered) => {
                return Err(Error::InvalidQuery(
                    "unfiltered strategy cannot run a query with a predicate".into(),
                ))
            }
            Some(hint) => {
                plan.hinted = true;
                hint
            }
            None if selectivity < self.config.selectivity_threshold => Strategy::FilterThenSearch,
            None => Strategy::SearchThenFilter,
        };
        debug!(
            strategy = %plan.strategy,
            selectivity,
            threshold = self.config.selectivity_threshold,
            hinted = plan.hinted,
            "query plan chosen"
        );
        Ok(plan)
    }

    /// Plans and executes.
    pub fn run(&self, request: &PlanRequest<'_>) -> Result<(QueryPlan, Execution)> {
        let mut plan = self.plan(request)?;
        let execution = self.execute(&mut plan, request)?;
        Ok((plan, execution))
    }

    /// Executes a plan produced by [`plan`](Self::plan) for the same request.
    pub fn execute(&self, plan: &mut QueryPlan, request: &PlanRequest<'_>) -> Result<Execution> {
        plan.stages.push(PlanStage::Execute);
        let execution = match (plan.strategy, request.predicate) {
            (Strategy::FilterThenSearch, Some(predicate)) => {
                self.filter_then_search(plan, request, predicate)?
            }
            (Strategy::SearchThenFilter, Some(predicate)) => {
                self.search_then_filter(plan, request, predicate)?
            }
            _ => {
                plan.attempts = 1;
                plan.fetched = request.fetch_size(request.k);
                let neighbors = self.index.search(
                    request.vector,
                    plan.fetched,
                    request.metric,
                    &request.params,
                )?;
                let mut neighbors = request.keep(neighbors);
                neighbors.truncate(request.k);
                Execution {
                    neighbors,
                    warning: None,
                }
            }
        };
        plan.stages.push(PlanStage::Done);
        Ok(execution)
    }

    fn filter_then_search(
        &self,
        plan: &mut QueryPlan,
        request: &PlanRequest<'_>,
        predicate: &Predicate,
    ) -> Result<Execution> {
        let mut allowed = filter::evaluate(predicate, self.source, None)?;
        if let Some(excluded) = request.exclude {
            allowed.remove(excluded);
        }
        let count = allowed.len();
        plan.candidate_count = Some(count);
        plan.attempts = 1;
        plan.fetched = request.k;

        let neighbors = if count as usize <= self.config.brute_force_threshold {
            plan.exact = true;
            let index = self.index;
            flat_search(
                request.vector,
                request.k,
                request.metric,
                allowed.iter().filter_map(|id| index.vector(id).map(|v| (id, v))),
            )
        } else {
            self.index.search_within(
                request.vector,
                request.k,
                request.metric,
                &allowed,
                &request.params,
            )?
        };
        debug!(candidates = count, exact = plan.exact, "filter-then-search executed");
        Ok(Execution {
            neighbors: request.keep(neighbors),
            warning: None,
        })
    }

    fn search_then_filter(
        &self,
        plan: &mut QueryPlan,
        request: &PlanRequest<'_>,
        predicate: &Predicate,
    ) -> Result<Execution> {
        let k = request.k;
        let multiplier = self.config.overfetch_multiplier;
        let mut fetch = request.fetch_size(k).saturating_mul(multiplier);
        let mut params = request.params;
        let mut survivors = Vec::new();
        let mut exhausted = false;

        for attempt in 0..=self.config.max_retries {
            plan.attempts = attempt + 1;
            plan.fetched = fetch;
            let found = self
                .index
                .search(request.vector, fetch, request.metric, &params)?;
            // A short answer only means exhaustion once every live vector was reachable
            let wider = self.index.widen(&params);
            exhausted = found.len() < fetch && fetch >= self.index.len() && wider.is_none();

            let found = request.keep(found);
            let ids: IdSet = found.iter().map(|n| n.id).collect();
            let passing = filter::evaluate(predicate, self.source, Some(&ids))?;
            survivors = found
                .into_iter()
                .filter(|n| passing.contains(n.id))
                .take(k)
                .collect();

            if survivors.len() >= k || exhausted {
                break;
            }
            debug!(
                attempt = attempt + 1,
                fetched = fetch,
                survivors = survivors.len(),
                k,
                nprobe = ?wider.and_then(|p| p.nprobe),
                "search-then-filter shortfall, widening fetch"
            );
            fetch = fetch.saturating_mul(multiplier);
            if let Some(wider) = wider {
                params = wider;
            }
        }

        let warning = (survivors.len() < k).then(|| DegradedResult {
            requested: k,
            returned: survivors.len(),
            attempts: plan.attempts,
            reason: if exhausted {
                DegradedReason::IndexExhausted
            } else {
                DegradedReason::RetryCapReached
            },
        });
        Ok(Execution {
            neighbors: survivors,
            warning,
        })
    }
}
