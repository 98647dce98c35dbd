//! Property tests: filter correctness against reference evaluation and ranking
//! determinism.

use chrono::{TimeZone, Utc};
use hybridsearch_core::search::scorer::{rank, Candidate, Page};
use hybridsearch_core::search::{DegradedReason, SearchResponse, Strategy as Execution};
use hybridsearch_core::{
    AttributeSchema, AttributeValue, Collection, CollectionConfig, DistanceMetric, DocId, Document,
    IndexStrategy, IvfConfig, MetadataValue, Predicate, Query, ScoringWeights,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

const CATEGORIES: [&str; 3] = ["ai", "db", "web"];
const TAGS: [&str; 3] = ["sale", "new", "eco"];

#[derive(Debug, Clone)]
struct Row {
    price: Option<u8>,
    category: usize,
    stock: Option<u8>,
    tags: Vec<usize>,
    specs: bool,
    vector: [f32; 3],
}

fn row() -> impl Strategy<Value = Row> {
    (
        proptest::option::of(0u8..100),
        0usize..3,
        proptest::option::of(0u8..20),
        proptest::collection::vec(0usize..3, 0..3),
        any::<bool>(),
        proptest::array::uniform3(-1.0f32..1.0),
    )
        .prop_map(|(price, category, stock, tags, specs, vector)| Row {
            price,
            category,
            stock,
            tags,
            specs,
            vector,
        })
}

fn document(i: usize, r: &Row) -> Document {
    let mut meta = serde_json::Map::new();
    if let Some(s) = r.stock {
        meta.insert("stock".into(), json!(s));
    }
    meta.insert(
        "tags".into(),
        json!(r.tags.iter().map(|t| TAGS[*t]).collect::<Vec<_>>()),
    );
    if r.specs {
        meta.insert("specs".into(), json!({"ram": r.stock.unwrap_or(4) as u32 * 2}));
    }
    let mut doc = Document::new(format!("d{i:03}"), r.vector.to_vec())
        .with_attribute("category", CATEGORIES[r.category])
        .with_metadata(serde_json::Value::Object(meta));
    if let Some(p) = r.price {
        doc = doc.with_attribute("price", p as f64);
    }
    doc
}

fn leaf() -> impl Strategy<Value = Predicate> {
    prop_oneof![
        (0u8..6, 0u8..100).prop_map(|(op, n)| {
            let f = Predicate::attr("price");
            let n = n as f64;
            match op {
                0 => f.eq(n),
                1 => f.ne(n),
                2 => f.lt(n),
                3 => f.le(n),
                4 => f.gt(n),
                _ => f.ge(n),
            }
        }),
        (any::<bool>(), 0usize..3).prop_map(|(eq, c)| {
            let f = Predicate::attr("category");
            if eq {
                f.eq(CATEGORIES[c])
            } else {
                f.ne(CATEGORIES[c])
            }
        }),
        proptest::collection::vec(0usize..3, 1..3).prop_map(|cs| {
            Predicate::attr("category").is_in(cs.into_iter().map(|c| CATEGORIES[c]))
        }),
        (0u8..3, 0u8..20).prop_map(|(op, n)| {
            let f = Predicate::meta("stock");
            let n = n as f64;
            match op {
                0 => f.eq(n),
                1 => f.lt(n),
                _ => f.ge(n),
            }
        }),
        (0usize..3).prop_map(|t| Predicate::contains(json!({"tags": [TAGS[t]]}))),
        Just(Predicate::meta("specs.ram").exists()),
        (0u8..20).prop_map(|n| Predicate::meta("specs.ram").gt(n as f64)),
    ]
}

fn predicate() -> impl Strategy<Value = Predicate> {
    leaf().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 1..4).prop_map(Predicate::all),
            proptest::collection::vec(inner.clone(), 1..4).prop_map(Predicate::any),
            inner.prop_map(|p| !p),
        ]
    })
}

fn schema() -> AttributeSchema {
    AttributeSchema::new()
        .number("price")
        .enumeration("category", CATEGORIES)
}

fn load(rows: &[Row]) -> Collection {
    load_with(rows, IndexStrategy::default())
}

fn load_with(rows: &[Row], index: IndexStrategy) -> Collection {
    let config = CollectionConfig::new(DistanceMetric::Euclidean, index);
    let col = Collection::new("props", 3, schema(), config).unwrap();
    let docs: Vec<Document> = rows.iter().enumerate().map(|(i, r)| document(i, r)).collect();
    col.upsert_batch(docs).unwrap();
    col
}

/// Trained IVF probing one of four partitions by default.
fn load_ivf(rows: &[Row]) -> Collection {
    let ivf = IvfConfig {
        nlist: 4,
        nprobe: 1,
        ..IvfConfig::default()
    };
    let col = load_with(rows, IndexStrategy::Ivf(ivf));
    col.rebuild_index().unwrap();
    assert!(!col.maintenance_needed(), "IVF must be trained");
    col
}

/// Post-filter invariants shared by every index strategy.
fn check_post_filter(
    col: &Collection,
    res: &SearchResponse,
    want: &BTreeSet<DocId>,
    k: usize,
) -> Result<(), TestCaseError> {
    prop_assert!(res.len() <= k);
    for hit in &res.hits {
        prop_assert!(want.contains(&hit.id), "{} does not match", hit.id);
    }
    if res.len() < k {
        let warning = res.warning.as_ref();
        prop_assert!(warning.is_some(), "short result without a warning");
        if warning.is_some_and(|w| w.reason == DegradedReason::IndexExhausted) {
            prop_assert!(
                res.plan.fetched >= col.len(),
                "exhausted after fetching {} of {} live documents",
                res.plan.fetched,
                col.len()
            );
        }
    }
    Ok(())
}

/// Ids matching `predicate` by per-document reference evaluation.
fn expected(col: &Collection, rows: &[Row], predicate: &Predicate) -> BTreeSet<DocId> {
    let resolved = predicate.resolve(&col.schema()).unwrap();
    (0..rows.len())
        .map(|i| DocId::new(format!("d{i:03}")))
        .filter(|id| {
            let stored = col.get(id).unwrap().unwrap().document;
            resolved.matches(&stored.attributes, &stored.metadata)
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Filter-first execution returns exactly the matching set.
    #[test]
    fn prop_filter_then_search_is_exact(
        rows in proptest::collection::vec(row(), 1..40),
        predicate in predicate(),
    ) {
        let col = load(&rows);
        let want = expected(&col, &rows, &predicate);
        let query = Query::new(vec![0.0, 0.0, 0.0])
            .filter(predicate)
            .strategy(Execution::FilterThenSearch)
            .k(rows.len());
        let res = col.search(&query).unwrap();
        let got: BTreeSet<DocId> = res.hits.into_iter().map(|h| h.id).collect();
        prop_assert_eq!(got, want);
        prop_assert!(res.warning.is_none());
    }

    /// Post-filtering never returns a non-matching document.
    #[test]
    fn prop_search_then_filter_has_no_false_positives(
        rows in proptest::collection::vec(row(), 1..40),
        predicate in predicate(),
        k in 1usize..10,
    ) {
        let col = load(&rows);
        let want = expected(&col, &rows, &predicate);
        let query = Query::new(vec![0.5, 0.5, 0.0])
            .filter(predicate)
            .strategy(Execution::SearchThenFilter)
            .k(k);
        let res = col.search(&query).unwrap();
        check_post_filter(&col, &res, &want, k)?;
    }

    /// Post-filtering on a partitioned index widens the probe on retry, so the
    /// default retry budget reaches every partition and finds every match.
    #[test]
    fn prop_search_then_filter_on_ivf_is_complete(
        rows in proptest::collection::vec(row(), 40..80),
        predicate in predicate(),
        k in 1usize..10,
    ) {
        let col = load_ivf(&rows);
        let want = expected(&col, &rows, &predicate);
        let query = Query::new(vec![0.5, 0.5, 0.0])
            .filter(predicate)
            .strategy(Execution::SearchThenFilter)
            .k(k);
        let res = col.search(&query).unwrap();
        check_post_filter(&col, &res, &want, k)?;
        prop_assert_eq!(res.len(), k.min(want.len()), "plan: {}", res.plan);
    }

    /// Ranking is a total order: repeated and reordered inputs rank identically,
    /// and pages are slices of the full ranking.
    #[test]
    fn prop_ranking_is_deterministic(
        distances in proptest::collection::vec(0u8..4, 1..30),
        offset in 0usize..10,
        limit in 0usize..10,
    ) {
        let attrs: BTreeMap<String, AttributeValue> = BTreeMap::new();
        let meta = MetadataValue::Null;
        let ids: Vec<DocId> = (0..distances.len())
            .map(|i| DocId::new(format!("c{i:02}")))
            .collect();
        let created = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let candidates: Vec<Candidate<'_>> = ids
            .iter()
            .zip(&distances)
            .map(|(id, d)| Candidate {
                id,
                distance: *d as f32 * 0.25,
                attributes: &attrs,
                metadata: &meta,
                created_at: created,
            })
            .collect();
        let weights = ScoringWeights::default();
        let metric = DistanceMetric::Euclidean;
        let order = |cs: &[Candidate<'_>], page: Page| -> Vec<DocId> {
            rank(cs, metric, &weights, page, created).into_iter().map(|h| h.id).collect()
        };

        let full = order(&candidates, Page::first(candidates.len()));
        prop_assert_eq!(&full, &order(&candidates, Page::first(candidates.len())));

        let mut reversed = candidates.clone();
        reversed.reverse();
        prop_assert_eq!(&full, &order(&reversed, Page::first(candidates.len())));

        let page = order(&candidates, Page::new(offset, limit));
        let end = (offset + limit).min(full.len());
        let start = offset.min(end);
        prop_assert_eq!(page, full[start..end].to_vec());
    }
}
