//! Schema-free metadata storage with an inverted index.
//!
//! Each document's tree is walked once on insert. Every object key contributes
//! its dotted path to the key index (path → ids) and every scalar reached along
//! that path contributes to the posting index (path, scalar) → ids. Array elements
//! are flattened under the array's own path, so `{"tags": ["a", "b"]}` posts both
//! `("tags", "a")` and `("tags", "b")`.
//!
//! Index lookups produce a candidate superset which is then verified against the
//! stored tree with the same leaf semantics as [`MetadataPredicate::matches`].
//! Ranges have no ordered index: they scan the ids that have the key at all.

use crate::config::{DEFAULT_EQUALITY_SELECTIVITY, DEFAULT_RANGE_SELECTIVITY};
use crate::document::{validate_metadata, MetadataPath, MetadataValue};
use crate::error::{Error, Result};
use crate::index::IdSet;
use crate::predicate::{AttributePredicate, CompareOp, MetadataPredicate, Predicate};
use crate::search::filter::{self, PredicateSource};
use ordered_float::OrderedFloat;
use std::collections::HashMap;

/// Index key of a scalar metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MetaKey {
    Null,
    Bool(bool),
    Number(OrderedFloat<f64>),
    Text(String),
}

impl MetaKey {
    fn of(value: &MetadataValue) -> Option<MetaKey> {
        match value {
            MetadataValue::Null => Some(MetaKey::Null),
            MetadataValue::Bool(b) => Some(MetaKey::Bool(*b)),
            MetadataValue::Number(n) => Some(MetaKey::Number(OrderedFloat(*n + 0.0))),
            MetadataValue::Text(s) => Some(MetaKey::Text(s.clone())),
            MetadataValue::Array(_) | MetadataValue::Object(_) => None,
        }
    }
}

/// One `(path, scalar)` or `path` entry produced by walking a tree.
enum Entry {
    Key(String),
    Posting(String, MetaKey),
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn walk(value: &MetadataValue, path: &str, out: &mut Vec<Entry>) {
    match value {
        MetadataValue::Object(map) => {
            for (k, v) in map {
                let p = join(path, k);
                out.push(Entry::Key(p.clone()));
                walk(v, &p, out);
            }
        }
        MetadataValue::Array(items) => {
            for item in items {
                walk(item, path, out);
            }
        }
        scalar => {
            if !path.is_empty() {
                if let Some(key) = MetaKey::of(scalar) {
                    out.push(Entry::Posting(path.to_string(), key));
                }
            }
        }
    }
}

/// Metadata trees of a collection plus their inverted index.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    docs: HashMap<u32, MetadataValue>,
    postings: HashMap<String, HashMap<MetaKey, IdSet>>,
    keys: HashMap<String, IdSet>,
    all: IdSet,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

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

    pub fn get(&self, id: u32) -> Option<&MetadataValue> {
        self.docs.get(&id)
    }

    /// Stores and indexes a metadata tree.
    pub fn insert(&mut self, id: u32, metadata: &MetadataValue) -> Result<()> {
        if self.all.contains(id) {
            return Err(Error::InternalConsistency(format!(
                "id {id} is already present in the metadata store"
            )));
        }
        validate_metadata(metadata)?;
        let mut entries = Vec::new();
        walk(metadata, "", &mut entries);
        for entry in entries {
            match entry {
                Entry::Key(path) => {
                    self.keys.entry(path).or_default().insert(id);
                }
                Entry::Posting(path, key) => {
                    self.postings
                        .entry(path)
                        .or_default()
                        .entry(key)
                        .or_default()
                        .insert(id);
                }
            }
        }
        self.docs.insert(id, metadata.clone());
        self.all.insert(id);
        Ok(())
    }

    /// Removes a tree and its index entries. Returns `false` if it was not stored.
    pub fn remove(&mut self, id: u32) -> bool {
        let Some(metadata) = self.docs.remove(&id) else {
            return false;
        };
        let mut entries = Vec::new();
        walk(&metadata, "", &mut entries);
        for entry in entries {
            match entry {
                Entry::Key(path) => {
                    if let Some(ids) = self.keys.get_mut(&path) {
                        ids.remove(id);
                        if ids.is_empty() {
                            self.keys.remove(&path);
                        }
                    }
                }
                Entry::Posting(path, key) => {
                    if let Some(by_value) = self.postings.get_mut(&path) {
                        if let Some(ids) = by_value.get_mut(&key) {
                            ids.remove(id);
                            if ids.is_empty() {
                                by_value.remove(&key);
                            }
                        }
                        if by_value.is_empty() {
                            self.postings.remove(&path);
                        }
                    }
                }
            }
        }
        self.all.remove(id);
        true
    }

    /// Evaluates a metadata-only predicate tree.
    pub fn evaluate(&self, predicate: &Predicate, candidates: Option<&IdSet>) -> Result<IdSet> {
        filter::evaluate(predicate, self, candidates)
    }

    /// Estimated fraction of stored documents matching a metadata-only tree.
    pub fn estimate_selectivity(&self, predicate: &Predicate) -> Result<f64> {
        filter::estimate_selectivity(predicate, self)
    }

    fn posting(&self, path: &str, value: &MetadataValue) -> IdSet {
        MetaKey::of(value)
            .and_then(|key| self.postings.get(path)?.get(&key).cloned())
            .unwrap_or_default()
    }

    fn posting_len(&self, path: &str, value: &MetadataValue) -> u64 {
        MetaKey::of(value)
            .and_then(|key| self.postings.get(path)?.get(&key).map(|ids| ids.len()))
            .unwrap_or(0)
    }

    fn key_ids(&self, path: &str) -> IdSet {
        self.keys.get(path).cloned().unwrap_or_default()
    }

    /// Candidate superset for a containment document: intersection of every
    /// scalar posting and key set it implies.
    fn containment_candidates(&self, value: &MetadataValue) -> IdSet {
        let mut entries = Vec::new();
        walk(value, "", &mut entries);
        let mut acc: Option<IdSet> = None;
        for entry in entries {
            let ids = match entry {
                Entry::Key(path) => self.key_ids(&path),
                Entry::Posting(path, key) => self
                    .postings
                    .get(&path)
                    .and_then(|m| m.get(&key))
                    .cloned()
                    .unwrap_or_default(),
            };
            acc = Some(match acc {
                Some(a) => a & ids,
                None => ids,
            });
            if acc.as_ref().is_some_and(|a| a.is_empty()) {
                break;
            }
        }
        acc.unwrap_or_else(|| self.all.clone())
    }

    fn verify(&self, leaf: &MetadataPredicate, ids: &IdSet) -> IdSet {
        let mut out = IdSet::new();
        for id in ids.iter() {
            if self.docs.get(&id).is_some_and(|m| leaf.matches(m)) {
                out.insert(id);
            }
        }
        out
    }

    /// Ids matching one leaf. Absent paths never match.
    pub fn evaluate_leaf(
        &self,
        leaf: &MetadataPredicate,
        candidates: Option<&IdSet>,
    ) -> Result<IdSet> {
        if let Some(candidates) = candidates {
            return Ok(self.verify(leaf, candidates));
        }
        if leaf.path().is_some_and(MetadataPath::has_index_segment) {
            return Ok(self.verify(leaf, &self.all));
        }
        let superset = match leaf {
            MetadataPredicate::Exists { path } => self.key_ids(&path.to_string()),
            MetadataPredicate::Contains { value } => self.containment_candidates(value),
            MetadataPredicate::Compare { path, cmp, value } => match cmp {
                CompareOp::Eq => self.posting(&path.to_string(), value),
                _ => self.key_ids(&path.to_string()),
            },
            MetadataPredicate::In { path, values } => {
                let p = path.to_string();
                let mut out = IdSet::new();
                for v in values {
                    out |= self.posting(&p, v);
                }
                out
            }
        };
        Ok(self.verify(leaf, &superset))
    }

    /// Estimated fraction of stored documents matching one leaf.
    pub fn leaf_selectivity(&self, leaf: &MetadataPredicate) -> Result<f64> {
        let total = self.all.len();
        if total == 0 {
            return Ok(0.0);
        }
        let n = total as f64;
        let indexed = !leaf.path().is_some_and(MetadataPath::has_index_segment);
        let key_frac = |path: &MetadataPath| {
            self.keys.get(&path.to_string()).map_or(0.0, |ids| ids.len() as f64 / n)
        };
        let sel = match leaf {
            MetadataPredicate::Exists { path } if indexed => key_frac(path),
            MetadataPredicate::Exists { .. } => DEFAULT_RANGE_SELECTIVITY,
            MetadataPredicate::Contains { value } => {
                let mut entries = Vec::new();
                walk(value, "", &mut entries);
                entries
                    .iter()
                    .map(|e| match e {
                        Entry::Key(path) => {
                            self.keys.get(path).map_or(0.0, |ids| ids.len() as f64 / n)
                        }
                        Entry::Posting(path, key) => self
                            .postings
                            .get(path)
                            .and_then(|m| m.get(key))
                            .map_or(0.0, |ids| ids.len() as f64 / n),
                    })
                    .product()
            }
            MetadataPredicate::Compare { path, cmp, value } if indexed => {
                let eq = self.posting_len(&path.to_string(), value) as f64 / n;
                match cmp {
                    CompareOp::Eq => eq,
                    CompareOp::Ne => key_frac(path) - eq,
                    _ => key_frac(path) * DEFAULT_RANGE_SELECTIVITY,
                }
            }
            MetadataPredicate::Compare { cmp, .. } => match cmp {
                CompareOp::Eq => DEFAULT_EQUALITY_SELECTIVITY,
                CompareOp::Ne => 1.0 - DEFAULT_EQUALITY_SELECTIVITY,
                _ => DEFAULT_RANGE_SELECTIVITY,
            },
            MetadataPredicate::In { path, values } if indexed => {
                let p = path.to_string();
                values
                    .iter()
                    .map(|v| self.posting_len(&p, v) as f64 / n)
                    .sum()
            }
            MetadataPredicate::In { values, .. } => {
                DEFAULT_EQUALITY_SELECTIVITY * values.len() as f64
            }
        };
        Ok(sel.clamp(0.0, 1.0))
    }
}

impl PredicateSource for MetadataStore {
    fn universe(&self) -> &IdSet {
        &self.all
    }

    fn attribute_leaf(
        &self,
        _leaf: &AttributePredicate,
        _candidates: Option<&IdSet>,
    ) -> Result<IdSet> {
        Err(Error::MalformedPredicate(
            "attribute leaves cannot be evaluated by the metadata store".into(),
        ))
    }

    fn metadata_leaf(&self, leaf: &MetadataPredicate, candidates: Option<&IdSet>) -> Result<IdSet> {
        self.evaluate_leaf(leaf, candidates)
    }

    fn attribute_selectivity(&self, _leaf: &AttributePredicate) -> Result<f64> {
        Err(Error::MalformedPredicate(
            "attribute leaves cannot be estimated by the metadata store".into(),
        ))
    }

    fn metadata_selectivity(&self, leaf: &MetadataPredicate) -> Result<f64> {
        self.leaf_selectivity(leaf)
    }
}
