//! Predicate evaluation as set algebra over id bitmaps.
//!
//! Leaves are answered by whichever store owns them (see [`PredicateSource`]);
//! this module combines the leaf results:
//! - `AND` evaluates children from most to least selective and, once the running
//!   set is small, hands it to the next child as its candidate set so the child
//!   checks stored values instead of walking its index.
//! - `OR` unions children.
//! - `NOT` subtracts the child from the candidate set (or the whole universe).
//!
//! Selectivity follows the same shape under an independence assumption:
//! AND multiplies, OR is `1 - Π(1 - s)`, NOT is `1 - s`.

use crate::config::CANDIDATE_SCAN_LIMIT;
use crate::error::Result;
use crate::index::IdSet;
use crate::predicate::{AttributePredicate, MetadataPredicate, Predicate};
use crate::storage::attributes::AttributeStore;
use crate::storage::metadata::MetadataStore;

/// Something that can answer predicate leaves over a set of ids.
pub trait PredicateSource {
    /// All ids the source knows about; the complement base for `NOT`.
    fn universe(&self) -> &IdSet;

    /// Ids matching an attribute leaf, restricted to `candidates` when given.
    fn attribute_leaf(
        &self,
        leaf: &AttributePredicate,
        candidates: Option<&IdSet>,
    ) -> Result<IdSet>;

    /// Ids matching a metadata leaf, restricted to `candidates` when given.
    fn metadata_leaf(&self, leaf: &MetadataPredicate, candidates: Option<&IdSet>) -> Result<IdSet>;

    fn attribute_selectivity(&self, leaf: &AttributePredicate) -> Result<f64>;

    fn metadata_selectivity(&self, leaf: &MetadataPredicate) -> Result<f64>;
}

/// Both stores of a collection, restricted to its live ids.
#[derive(Debug, Clone, Copy)]
pub struct StoreView<'a> {
    pub attributes: &'a AttributeStore,
    pub metadata: &'a MetadataStore,
    pub live: &'a IdSet,
}

impl PredicateSource for StoreView<'_> {
    fn universe(&self) -> &IdSet {
        self.live
    }

    fn attribute_leaf(
        &self,
        leaf: &AttributePredicate,
        candidates: Option<&IdSet>,
    ) -> Result<IdSet> {
        self.attributes.evaluate_leaf(leaf, candidates)
    }

    fn metadata_leaf(&self, leaf: &MetadataPredicate, candidates: Option<&IdSet>) -> Result<IdSet> {
        self.metadata.evaluate_leaf(leaf, candidates)
    }

    fn attribute_selectivity(&self, leaf: &AttributePredicate) -> Result<f64> {
        self.attributes.leaf_selectivity(leaf)
    }

    fn metadata_selectivity(&self, leaf: &MetadataPredicate) -> Result<f64> {
        self.metadata.leaf_selectivity(leaf)
    }
}

/// Evaluates `predicate` to the set of matching ids.
///
/// With `candidates`, the result is a subset of them; otherwise a subset of the
/// source's universe (after intersecting leaf results with it for `NOT`).
pub fn evaluate<S>(predicate: &Predicate, source: &S, candidates: Option<&IdSet>) -> Result<IdSet>
where
    S: PredicateSource + ?Sized,
{
    match predicate {
        Predicate::Attribute(leaf) => source.attribute_leaf(leaf, candidates),
        Predicate::Metadata(leaf) => source.metadata_leaf(leaf, candidates),
        Predicate::And(children) => {
            let mut ordered = children
                .iter()
                .map(|c| Ok((estimate_selectivity(c, source)?, c)))
                .collect::<Result<Vec<_>>>()?;
            ordered.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut acc: Option<IdSet> = candidates.cloned();
            for (_, child) in ordered {
                let next = match acc {
                    Some(ref set) if set.len() <= CANDIDATE_SCAN_LIMIT => {
                        evaluate(child, source, Some(set))?
                    }
                    Some(ref set) => evaluate(child, source, None)? & set,
                    None => evaluate(child, source, None)?,
                };
                let done = next.is_empty();
                acc = Some(next);
                if done {
                    break;
                }
            }
            Ok(acc.unwrap_or_default())
        }
        Predicate::Or(children) => {
            let mut out = IdSet::new();
            for child in children {
                out |= evaluate(child, source, candidates)?;
            }
            Ok(out)
        }
        Predicate::Not(child) => {
            let matched = evaluate(child, source, candidates)?;
            let base = candidates.unwrap_or_else(|| source.universe());
            Ok(base - &matched)
        }
    }
}

/// Estimated fraction of the universe matching `predicate`, in `[0, 1]`.
pub fn estimate_selectivity<S>(predicate: &Predicate, source: &S) -> Result<f64>
where
    S: PredicateSource + ?Sized,
{
    let s = match predicate {
        Predicate::Attribute(leaf) => source.attribute_selectivity(leaf)?,
        Predicate::Metadata(leaf) => source.metadata_selectivity(leaf)?,
        Predicate::And(children) => children
            .iter()
            .map(|c| estimate_selectivity(c, source))
            .product::<Result<f64>>()?,
        Predicate::Or(children) => {
            let mut none = 1.0;
            for c in children {
                none *= 1.0 - estimate_selectivity(c, source)?;
            }
            1.0 - none
        }
        Predicate::Not(child) => 1.0 - estimate_selectivity(child, source)?,
    };
    Ok(s.clamp(0.0, 1.0))
}
