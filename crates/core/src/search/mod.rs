//! Query path: predicate evaluation, planning, ranking and result types.

/// Predicate evaluation over id bitmaps and selectivity estimation.
pub mod filter;
/// Filter-then-search vs search-then-filter planning and execution.
pub mod planner;
/// `Query` builder.
pub mod query;
/// Composite scoring, tie-breaking and pagination.
pub mod scorer;
/// Hits, responses and degraded-result warnings.
pub mod types;

pub use filter::{PredicateSource, StoreView};
pub use planner::{PlanStage, QueryPlan, QueryPlanner, Strategy};
pub use query::Query;
pub use scorer::{rank, Page, RankedHit, ScoringWeights, Signal, SignalKind, SignalSource};
pub use types::{DegradedReason, DegradedResult, SearchHit, SearchResponse};
