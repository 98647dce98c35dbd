//! Typed attribute columns with equality/range indexes and selectivity statistics.
//!
//! Every column keeps the raw value per document, a hash index (value → ids) for
//! equality and `IN`, and for ordered types a `BTreeMap` index for ranges. An
//! equi-depth histogram per ordered column backs range selectivity estimates; it is
//! rebuilt once enough writes have accumulated since the last refresh.

use crate::config::DEFAULT_RANGE_SELECTIVITY;
use crate::document::AttributeValue;
use crate::error::{Error, Result};
use crate::index::IdSet;
use crate::predicate::{AttributePredicate, CompareOp, MetadataPredicate, Predicate};
use crate::schema::{AttributeSchema, AttributeType};
use crate::search::filter::{self, PredicateSource};
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// Minimum writes before a histogram refresh.
const MIN_WRITES_BEFORE_REFRESH: usize = 16;

/// Index key of a scalar attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum ScalarKey {
    Number(OrderedFloat<f64>),
    /// Microseconds since the Unix epoch.
    Time(i64),
    Text(String),
}

impl ScalarKey {
    pub(crate) fn of(value: &AttributeValue) -> Self {
        match value {
            // Adding 0.0 folds -0.0 into 0.0
            AttributeValue::Number(n) => ScalarKey::Number(OrderedFloat(*n + 0.0)),
            AttributeValue::Timestamp(t) => ScalarKey::Time(t.timestamp_micros()),
            AttributeValue::Text(s) | AttributeValue::Enum(s) => ScalarKey::Text(s.clone()),
        }
    }

    fn numeric(&self) -> Option<f64> {
        match self {
            ScalarKey::Number(n) => Some(n.0),
            ScalarKey::Time(t) => Some(*t as f64),
            ScalarKey::Text(_) => None,
        }
    }

    fn same_kind(&self, other: &ScalarKey) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Equi-depth histogram over a numeric (or timestamp) column.
///
/// Bucket `i` covers `(upper[i-1], upper[i]]` (the first bucket starts at `min`) and
/// `cumulative[i]` counts rows up to and including bucket `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    min: f64,
    upper: Vec<f64>,
    cumulative: Vec<u64>,
    total: u64,
}

impl Histogram {
    /// Builds from `(value, count)` pairs in ascending value order.
    pub fn build<I>(sorted: I, buckets: usize) -> Option<Histogram>
    where
        I: IntoIterator<Item = (f64, u64)>,
    {
        let entries: Vec<(f64, u64)> = sorted.into_iter().filter(|&(_, c)| c > 0).collect();
        let total: u64 = entries.iter().map(|&(_, c)| c).sum();
        let min = entries.first()?.0;
        let buckets = buckets.max(1);
        let per_bucket = (total as f64 / buckets as f64).max(1.0);

        let mut upper = Vec::with_capacity(buckets);
        let mut cumulative = Vec::with_capacity(buckets);
        let mut running = 0u64;
        for (i, &(value, count)) in entries.iter().enumerate() {
            running += count;
            let is_last = i + 1 == entries.len();
            let target = per_bucket * (upper.len() + 1) as f64;
            if is_last || (running as f64 >= target && upper.len() + 1 < buckets) {
                upper.push(value);
                cumulative.push(running);
            }
        }
        Some(Histogram {
            min,
            upper,
            cumulative,
            total,
        })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn buckets(&self) -> usize {
        self.upper.len()
    }

    /// Estimated fraction of rows with value strictly below `x`.
    pub fn fraction_below(&self, x: f64) -> f64 {
        if self.total == 0 || x <= self.min {
            return 0.0;
        }
        let i = self.upper.partition_point(|&u| u < x);
        if i == self.upper.len() {
            return 1.0;
        }
        let lower = if i == 0 { self.min } else { self.upper[i - 1] };
        let before = if i == 0 { 0 } else { self.cumulative[i - 1] };
        let within = (self.cumulative[i] - before) as f64;
        let width = self.upper[i] - lower;
        let frac = if width > 0.0 { ((x - lower) / width).clamp(0.0, 1.0) } else { 0.0 };
        ((before as f64 + within * frac) / self.total as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
struct Column {
    ordered: bool,
    values: HashMap<u32, AttributeValue>,
    hash: HashMap<ScalarKey, IdSet>,
    sorted: BTreeMap<ScalarKey, u64>,
    present: IdSet,
    histogram: Option<Histogram>,
    writes_since_refresh: usize,
}

impl Column {
    fn new(ordered: bool) -> Self {
        Self {
            ordered,
            values: HashMap::new(),
            hash: HashMap::new(),
            sorted: BTreeMap::new(),
            present: IdSet::new(),
            histogram: None,
            writes_since_refresh: 0,
        }
    }

    fn insert(&mut self, id: u32, value: AttributeValue) {
        let key = ScalarKey::of(&value);
        self.hash.entry(key.clone()).or_default().insert(id);
        if self.ordered {
            *self.sorted.entry(key).or_insert(0) += 1;
        }
        self.present.insert(id);
        self.values.insert(id, value);
        self.writes_since_refresh += 1;
    }

    fn remove(&mut self, id: u32) -> bool {
        let Some(value) = self.values.remove(&id) else {
            return false;
        };
        let key = ScalarKey::of(&value);
        if let Some(ids) = self.hash.get_mut(&key) {
            ids.remove(id);
            if ids.is_empty() {
                self.hash.remove(&key);
            }
        }
        if let Some(count) = self.sorted.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                self.sorted.remove(&key);
            }
        }
        self.present.remove(id);
        self.writes_since_refresh += 1;
        true
    }

    fn needs_refresh(&self) -> bool {
        self.ordered
            && self.writes_since_refresh >= MIN_WRITES_BEFORE_REFRESH.max(self.values.len() / 10)
    }

    fn refresh(&mut self, buckets: usize) {
        self.histogram = Histogram::build(
            self.sorted
                .iter()
                .filter_map(|(k, &c)| k.numeric().map(|x| (x, c))),
            buckets,
        );
        self.writes_since_refresh = 0;
    }

    fn eq_ids(&self, key: &ScalarKey) -> IdSet {
        self.hash.get(key).cloned().unwrap_or_default()
    }

    fn eq_count(&self, key: &ScalarKey) -> u64 {
        self.hash.get(key).map_or(0, |ids| ids.len())
    }

    fn range_ids(&self, cmp: CompareOp, key: &ScalarKey) -> IdSet {
        let bounds: (Bound<&ScalarKey>, Bound<&ScalarKey>) = match cmp {
            CompareOp::Lt => (Bound::Unbounded, Bound::Excluded(key)),
            CompareOp::Le => (Bound::Unbounded, Bound::Included(key)),
            CompareOp::Gt => (Bound::Excluded(key), Bound::Unbounded),
            CompareOp::Ge => (Bound::Included(key), Bound::Unbounded),
            CompareOp::Eq => return self.eq_ids(key),
            CompareOp::Ne => return self.ne_ids(key),
        };
        let mut out = IdSet::new();
        for (k, _) in self.sorted.range::<ScalarKey, _>(bounds) {
            if k.same_kind(key) {
                if let Some(ids) = self.hash.get(k) {
                    out |= ids;
                }
            }
        }
        out
    }

    fn ne_ids(&self, key: &ScalarKey) -> IdSet {
        let mut out = IdSet::new();
        for (k, ids) in &self.hash {
            if k != key && k.same_kind(key) {
                out |= ids;
            }
        }
        out
    }
}

/// Attribute columns of a collection, keyed by field name.
#[derive(Debug, Clone)]
pub struct AttributeStore {
    columns: HashMap<String, Column>,
    all: IdSet,
    histogram_buckets: usize,
}

impl AttributeStore {
    pub fn new(schema: &AttributeSchema, histogram_buckets: usize) -> Self {
        let columns = schema
            .fields()
            .map(|(name, ty)| (name.clone(), Column::new(ty.is_ordered())))
            .collect();
        Self {
            columns,
            all: IdSet::new(),
            histogram_buckets,
        }
    }

    /// Number of documents registered, with or without attributes.
    pub fn len(&self) -> usize {
        self.all.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn ids(&self) -> &IdSet {
        &self.all
    }

    pub fn contains(&self, id: u32) -> bool {
        self.all.contains(id)
    }

    /// Stored value of `field` for `id`.
    pub fn value(&self, id: u32, field: &str) -> Option<&AttributeValue> {
        self.columns.get(field)?.values.get(&id)
    }

    /// Every stored value of `id`, by field name.
    pub fn attributes_of(&self, id: u32) -> BTreeMap<String, AttributeValue> {
        self.columns
            .iter()
            .filter_map(|(name, column)| Some((name.clone(), column.values.get(&id)?.clone())))
            .collect()
    }

    /// Registers a document's coerced attributes. Fields must already be validated
    /// against the schema.
    pub fn insert(&mut self, id: u32, attributes: &BTreeMap<String, AttributeValue>) -> Result<()> {
        if self.all.contains(id) {
            return Err(Error::InternalConsistency(format!(
                "id {id} is already present in the attribute store"
            )));
        }
        for name in attributes.keys() {
            if !self.columns.contains_key(name) {
                return Err(Error::UnknownField(name.clone()));
            }
        }
        for (name, value) in attributes {
            if let Some(column) = self.columns.get_mut(name) {
                column.insert(id, value.clone());
            }
        }
        self.all.insert(id);
        self.refresh_stale();
        Ok(())
    }

    /// Removes every value of `id`. Returns `false` if it was not registered.
    pub fn remove(&mut self, id: u32) -> bool {
        if !self.all.remove(id) {
            return false;
        }
        for column in self.columns.values_mut() {
            column.remove(id);
        }
        self.refresh_stale();
        true
    }

    fn refresh_stale(&mut self) {
        let buckets = self.histogram_buckets;
        for column in self.columns.values_mut() {
            if column.needs_refresh() {
                column.refresh(buckets);
            }
        }
    }

    /// Rebuilds every histogram now.
    pub fn refresh_statistics(&mut self) {
        let buckets = self.histogram_buckets;
        for column in self.columns.values_mut().filter(|c| c.ordered) {
            column.refresh(buckets);
        }
    }

    pub fn histogram(&self, field: &str) -> Option<&Histogram> {
        self.columns.get(field)?.histogram.as_ref()
    }

    /// Evaluates an attribute-only predicate tree.
    ///
    /// With `candidates`, only those ids are checked against stored values; without,
    /// the hash and sorted indexes answer each leaf.
    pub fn evaluate(&self, predicate: &Predicate, candidates: Option<&IdSet>) -> Result<IdSet> {
        filter::evaluate(predicate, self, candidates)
    }

    /// Estimated fraction of registered documents matching an attribute-only tree.
    pub fn estimate_selectivity(&self, predicate: &Predicate) -> Result<f64> {
        filter::estimate_selectivity(predicate, self)
    }

    /// Ids matching one leaf.
    pub fn evaluate_leaf(
        &self,
        leaf: &AttributePredicate,
        candidates: Option<&IdSet>,
    ) -> Result<IdSet> {
        let column = self
            .columns
            .get(leaf.field())
            .ok_or_else(|| Error::UnknownField(leaf.field().to_string()))?;

        if let Some(candidates) = candidates {
            let mut out = IdSet::new();
            for id in candidates.iter() {
                if leaf.matches(column.values.get(&id)) {
                    out.insert(id);
                }
            }
            return Ok(out);
        }

        Ok(match leaf {
            AttributePredicate::Compare { cmp, value, .. } => {
                let key = ScalarKey::of(value);
                if cmp.is_range() && !column.ordered {
                    // Unreachable for resolved predicates; scan keeps the result correct.
                    return self.evaluate_leaf(leaf, Some(&column.present));
                }
                column.range_ids(*cmp, &key)
            }
            AttributePredicate::In { values, .. } => {
                let mut out = IdSet::new();
                for v in values {
                    out |= column.eq_ids(&ScalarKey::of(v));
                }
                out
            }
        })
    }

    /// Estimated fraction of registered documents matching one leaf.
    pub fn leaf_selectivity(&self, leaf: &AttributePredicate) -> Result<f64> {
        let column = self
            .columns
            .get(leaf.field())
            .ok_or_else(|| Error::UnknownField(leaf.field().to_string()))?;
        let total = self.all.len();
        if total == 0 {
            return Ok(0.0);
        }
        let n = total as f64;
        let present_frac = column.present.len() as f64 / n;
        let sel = match leaf {
            AttributePredicate::Compare { cmp, value, .. } => {
                let key = ScalarKey::of(value);
                let eq = column.eq_count(&key) as f64 / n;
                match cmp {
                    CompareOp::Eq => eq,
                    CompareOp::Ne => present_frac - eq,
                    _ => match (key.numeric(), &column.histogram) {
                        (Some(x), Some(h)) => {
                            let below = h.fraction_below(x) * present_frac;
                            match cmp {
                                CompareOp::Lt => below,
                                CompareOp::Le => below + eq,
                                CompareOp::Gt => present_frac - below - eq,
                                _ => present_frac - below,
                            }
                        }
                        _ => DEFAULT_RANGE_SELECTIVITY * present_frac,
                    },
                }
            }
            AttributePredicate::In { values, .. } => values
                .iter()
                .map(|v| column.eq_count(&ScalarKey::of(v)) as f64 / n)
                .sum(),
        };
        Ok(sel.clamp(0.0, 1.0))
    }

    /// Column type check used by consistency validation.
    pub fn has_column(&self, field: &str, ty: &AttributeType) -> bool {
        self.columns
            .get(field)
            .is_some_and(|c| c.ordered == ty.is_ordered())
    }
}

impl PredicateSource for AttributeStore {
    fn universe(&self) -> &IdSet {
        &self.all
    }

    fn attribute_leaf(
        &self,
        leaf: &AttributePredicate,
        candidates: Option<&IdSet>,
    ) -> Result<IdSet> {
        self.evaluate_leaf(leaf, candidates)
    }

    fn metadata_leaf(
        &self,
        _leaf: &MetadataPredicate,
        _candidates: Option<&IdSet>,
    ) -> Result<IdSet> {
        Err(Error::MalformedPredicate(
            "metadata leaves cannot be evaluated by the attribute store".into(),
        ))
    }

    fn attribute_selectivity(&self, leaf: &AttributePredicate) -> Result<f64> {
        self.leaf_selectivity(leaf)
    }

    fn metadata_selectivity(&self, _leaf: &MetadataPredicate) -> Result<f64> {
        Err(Error::MalformedPredicate(
            "metadata leaves cannot be estimated by the attribute store".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn schema() -> AttributeSchema {
        AttributeSchema::new()
            .number("price")
            .text("title")
            .timestamp("published")
            .enumeration("category", ["ai", "db", "web"])
    }

    fn store(n: u32) -> AttributeStore {
        let mut s = AttributeStore::new(&schema(), 8);
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for id in 0..n {
            let mut attrs = BTreeMap::new();
            attrs.insert("price".to_string(), AttributeValue::Number(id as f64));
            let cat = ["ai", "db", "web"][(id % 3) as usize];
            attrs.insert("category".to_string(), AttributeValue::Enum(cat.into()));
            attrs.insert(
                "published".to_string(),
                AttributeValue::Timestamp(base + Duration::days(id as i64)),
            );
            if id % 2 == 0 {
                attrs.insert("title".to_string(), AttributeValue::Text(format!("t{id:03}")));
            }
            s.insert(id, &attrs).unwrap();
        }
        s
    }

    fn brute(s: &AttributeStore, p: &Predicate) -> IdSet {
        let mut out = IdSet::new();
        for id in s.ids().iter() {
            let mut attrs = BTreeMap::new();
            for f in ["price", "title", "published", "category"] {
                if let Some(v) = s.value(id, f) {
                    attrs.insert(f.to_string(), v.clone());
                }
            }
            if p.matches(&attrs, &crate::document::MetadataValue::Null) {
                out.insert(id);
            }
        }
        out
    }

    #[test]
    fn test_index_and_scan_paths_agree() {
        let s = store(100);
        let preds = vec![
            Predicate::attr("price").le(50.0),
            Predicate::attr("price").gt(90.0),
            Predicate::attr("price").ne(3.0),
            Predicate::attr("category").eq(AttributeValue::Enum("ai".into())),
            Predicate::attr("category").is_in([
                AttributeValue::Enum("db".into()),
                AttributeValue::Enum("web".into()),
            ]),
            Predicate::attr("title").ge("t050"),
            Predicate::attr("price")
                .lt(30.0)
                .and(!Predicate::attr("category").eq(AttributeValue::Enum("web".into()))),
            Predicate::attr("price").lt(5.0).or(Predicate::attr("price").ge(95.0)),
        ];
        for p in &preds {
            let indexed = s.evaluate(p, None).unwrap();
            let scanned = s.evaluate(p, Some(s.ids())).unwrap();
            assert_eq!(indexed, scanned, "{p:?}");
            assert_eq!(indexed, brute(&s, p), "{p:?}");
        }
    }

    #[test]
    fn test_missing_values_never_match() {
        let s = store(10);
        // title is only set on even ids; != must not pick up odd ids
        let ids = s.evaluate(&Predicate::attr("title").ne("nothing"), None).unwrap();
        assert_eq!(ids.len(), 5);
        assert!(ids.iter().all(|id| id % 2 == 0));
    }

    #[test]
    fn test_remove_clears_indexes() {
        let mut s = store(10);
        assert!(s.remove(4));
        assert!(!s.remove(4));
        let ids = s.evaluate(&Predicate::attr("price").eq(4.0), None).unwrap();
        assert!(ids.is_empty());
        assert_eq!(s.len(), 9);
        assert!(s.value(4, "price").is_none());
    }

    #[test]
    fn test_metadata_leaf_rejected() {
        let s = store(3);
        let err = s.evaluate(&Predicate::meta("stock").gt(1.0), None).unwrap_err();
        assert!(matches!(err, Error::MalformedPredicate(_)));
    }

    #[test]
    fn test_selectivity_equality_exact() {
        let s = store(99);
        let sel = s
            .estimate_selectivity(
                &Predicate::attr("category").eq(AttributeValue::Enum("ai".into())),
            )
            .unwrap();
        assert!((sel - 1.0 / 3.0).abs() < 1e-9, "got {sel}");
        let none = s
            .estimate_selectivity(
                &Predicate::attr("category").eq(AttributeValue::Enum("music".into())),
            )
            .unwrap();
        assert_eq!(none, 0.0);
    }

    #[test]
    fn test_selectivity_range_uses_histogram() {
        let mut s = store(1000);
        s.refresh_statistics();
        assert!(s.histogram("price").is_some());
        let sel = s.estimate_selectivity(&Predicate::attr("price").lt(250.0)).unwrap();
        assert!((sel - 0.25).abs() < 0.05, "got {sel}");
        let sel = s.estimate_selectivity(&Predicate::attr("price").ge(900.0)).unwrap();
        assert!((sel - 0.1).abs() < 0.05, "got {sel}");
    }

    #[test]
    fn test_selectivity_combinators() {
        let mut s = store(300);
        s.refresh_statistics();
        let ai = Predicate::attr("category").eq(AttributeValue::Enum("ai".into()));
        let sel_not = s.estimate_selectivity(&!ai.clone()).unwrap();
        assert!((sel_not - 2.0 / 3.0).abs() < 1e-9);
        let both = s
            .estimate_selectivity(&ai.clone().and(Predicate::attr("price").lt(150.0)))
            .unwrap();
        assert!((both - 1.0 / 6.0).abs() < 0.03, "got {both}");
        let either = s.estimate_selectivity(&ai.or(Predicate::attr("price").lt(150.0))).unwrap();
        assert!((either - (1.0 - (2.0 / 3.0) * 0.5)).abs() < 0.03, "got {either}");
    }

    #[test]
    fn test_histogram_refreshes_after_writes() {
        let s = store(20);
        assert!(s.histogram("price").is_some());
        assert!(s.histogram("category").is_none());
    }

    #[test]
    fn test_histogram_fraction_below() {
        let h = Histogram::build((0..100).map(|i| (i as f64, 1)), 10).unwrap();
        assert_eq!(h.total(), 100);
        assert_eq!(h.buckets(), 10);
        assert_eq!(h.fraction_below(-1.0), 0.0);
        assert_eq!(h.fraction_below(1000.0), 1.0);
        let mid = h.fraction_below(50.0);
        assert!((mid - 0.5).abs() < 0.05, "got {mid}");
    }

    #[test]
    fn test_timestamp_range() {
        let s = store(30);
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap();
        let ids = s.evaluate(&Predicate::attr("published").lt(cutoff), None).unwrap();
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn test_duplicate_insert_is_consistency_error() {
        let mut s = store(2);
        let err = s.insert(1, &BTreeMap::new()).unwrap_err();
        assert!(err.is_fatal());
    }
}
