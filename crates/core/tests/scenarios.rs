//! End-to-end query scenarios against a single collection.

use hybridsearch_core::search::DegradedReason;
use hybridsearch_core::{
    AttributeSchema, AttributeValue, Collection, CollectionConfig, DistanceMetric, DocId, Document,
    Error, Predicate, Query, ScoringWeights, Signal, SignalSource, Strategy,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

fn catalog_schema() -> AttributeSchema {
    AttributeSchema::new()
        .number("price")
        .enumeration("category", ["ai", "db", "web"])
}

#[test]
fn test_unfiltered_top_k_by_cosine() {
    let col =
        Collection::new("five", 4, AttributeSchema::new(), CollectionConfig::default()).unwrap();
    let docs = [
        ("a", [1.0, 0.0, 0.0, 0.0]),
        ("b", [0.8, 0.6, 0.0, 0.0]),
        ("c", [0.0, 1.0, 0.0, 0.0]),
        ("d", [0.6, 0.0, 0.8, 0.0]),
        ("e", [-1.0, 0.0, 0.0, 0.0]),
    ];
    for (id, v) in docs {
        col.upsert(Document::new(id, v.to_vec())).unwrap();
    }

    let query = [0.9, 0.2, 0.1, 0.0];
    let mut expected: Vec<(f32, &str)> = docs
        .iter()
        .map(|(id, v)| (DistanceMetric::Cosine.distance(&query, v), *id))
        .collect();
    expected.sort_by(|a, b| a.0.total_cmp(&b.0));
    let expected: Vec<&str> = expected.iter().take(3).map(|(_, id)| *id).collect();

    let res = col
        .query(&query, None, ScoringWeights::default(), 3, None)
        .unwrap();
    let got: Vec<&str> = res.hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(got, expected);
    assert_eq!(res.plan.strategy, Strategy::Unfiltered);
    assert!(res.warning.is_none());
    assert!(
        res.hits.windows(2).all(|w| w[0].score >= w[1].score),
        "scores must be non-increasing"
    );
}

#[test]
fn test_selective_filter_runs_filter_first() {
    let mut rng = StdRng::seed_from_u64(7);
    let col = Collection::new("catalog", 8, catalog_schema(), CollectionConfig::default()).unwrap();
    for i in 0..100 {
        let category = match i {
            3 | 42 => "ai",
            70 | 71 => "ai", // ai but too expensive
            _ if i % 2 == 0 => "db",
            _ => "web",
        };
        let price = if i == 70 || i == 71 { 90.0 } else { (i % 60) as f64 };
        col.upsert(
            Document::new(format!("doc-{i}"), random_vector(&mut rng, 8))
                .with_attribute("price", price)
                .with_attribute("category", category),
        )
        .unwrap();
    }
    col.refresh_statistics().unwrap();

    let filter = Predicate::attr("price")
        .le(50.0)
        .and(Predicate::attr("category").eq("ai"));
    for k in [1, 2, 10, 100] {
        let query = Query::new(random_vector(&mut rng, 8)).filter(filter.clone()).k(k);
        let res = col.search(&query).unwrap();
        assert_eq!(res.plan.strategy, Strategy::FilterThenSearch, "k={k}");
        assert_eq!(res.plan.candidate_count, Some(2));
        assert_eq!(res.len(), k.min(2));
        for hit in &res.hits {
            assert!(hit.id.as_str() == "doc-3" || hit.id.as_str() == "doc-42");
            assert_eq!(
                hit.attributes.get("category"),
                Some(&AttributeValue::Enum("ai".into()))
            );
        }
        assert!(res.warning.is_none(), "filter-then-search never degrades");
    }
}

#[test]
fn test_unsatisfiable_post_filter_degrades() {
    let mut rng = StdRng::seed_from_u64(11);
    let col =
        Collection::new("stock", 8, AttributeSchema::new(), CollectionConfig::default()).unwrap();
    for i in 0..60 {
        col.upsert(
            Document::new(format!("s{i}"), random_vector(&mut rng, 8))
                .with_metadata(json!({ "stock": i })),
        )
        .unwrap();
    }

    let query = Query::new(random_vector(&mut rng, 8))
        .filter(Predicate::meta("stock").gt(1e9))
        .k(5);
    let res = col.search(&query).expect("degraded results are not errors");
    assert_eq!(res.plan.strategy, Strategy::SearchThenFilter);
    assert!(res.is_empty());
    let warning = res.warning.expect("a degraded result must carry a warning");
    assert_eq!(warning.requested, 5);
    assert_eq!(warning.returned, 0);
    assert!(warning.attempts >= 1);
    assert!(matches!(
        warning.reason,
        DegradedReason::IndexExhausted | DegradedReason::RetryCapReached
    ));
}

#[test]
fn test_metadata_filters_and_signals() {
    let col =
        Collection::new("products", 2, catalog_schema(), CollectionConfig::default()).unwrap();
    let rows = [
        ("p1", [1.0, 0.0], 10.0, json!({"specs": {"ram": 16}, "tags": ["sale"], "in_stock": true})),
        ("p2", [1.0, 0.05], 30.0, json!({"specs": {"ram": 32}, "tags": ["new"], "in_stock": true})),
        (
            "p3",
            [1.0, 0.1],
            20.0,
            json!({"specs": {"ram": 8}, "tags": ["sale", "new"], "in_stock": false}),
        ),
        ("p4", [0.0, 1.0], 5.0, json!({"tags": []})),
    ];
    for (id, v, price, meta) in rows {
        col.upsert(
            Document::new(id, v.to_vec())
                .with_attribute("price", price)
                .with_metadata(meta),
        )
        .unwrap();
    }

    let res = col
        .search(&Query::new(vec![1.0, 0.0]).filter(Predicate::meta("specs.ram").ge(16.0)))
        .unwrap();
    let mut ids: Vec<&str> = res.hits.iter().map(|h| h.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["p1", "p2"]);

    let res = col
        .search(&Query::new(vec![1.0, 0.0]).filter(Predicate::contains(json!({"tags": ["sale"]}))))
        .unwrap();
    let mut ids: Vec<&str> = res.hits.iter().map(|h| h.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["p1", "p3"]);

    let plain = col
        .search(&Query::new(vec![1.0, 0.05]).filter(Predicate::meta("specs").exists()))
        .unwrap();
    assert_eq!(plain.hits[0].id.as_str(), "p2");

    // Availability and cheapness outweigh the small similarity gap
    let weights = ScoringWeights::default()
        .with_signal(Signal::availability(SignalSource::metadata("in_stock"), 1.0))
        .with_signal(Signal::numeric(SignalSource::attribute("price"), 0.0, 40.0, -1.0));
    let res = col
        .search(
            &Query::new(vec![1.0, 0.05])
                .filter(Predicate::meta("specs").exists())
                .weights(weights)
                .k(3),
        )
        .unwrap();
    let ids: Vec<&str> = res.hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["p1", "p2", "p3"]);
}

#[test]
fn test_pagination_is_a_stable_window() {
    let mut rng = StdRng::seed_from_u64(3);
    let col =
        Collection::new("pages", 6, AttributeSchema::new(), CollectionConfig::default()).unwrap();
    for i in 0..40 {
        col.upsert(Document::new(format!("p{i:02}"), random_vector(&mut rng, 6)))
            .unwrap();
    }
    let base = Query::new(random_vector(&mut rng, 6)).k(30);
    let all: Vec<DocId> = col
        .search(&base.clone().limit(30))
        .unwrap()
        .hits
        .into_iter()
        .map(|h| h.id)
        .collect();
    let page2: Vec<DocId> = col
        .search(&base.clone().offset(10).limit(10))
        .unwrap()
        .hits
        .into_iter()
        .map(|h| h.id)
        .collect();
    assert_eq!(page2, all[10..20].to_vec());
    assert!(col.search(&base.offset(40)).unwrap().is_empty());
}

#[test]
fn test_max_distance_and_strategy_hints() {
    let col = Collection::new(
        "hints",
        2,
        catalog_schema(),
        CollectionConfig::new(DistanceMetric::Euclidean, Default::default()),
    )
    .unwrap();
    for i in 0..20 {
        col.upsert(
            Document::new(format!("h{i}"), vec![i as f32, 0.0]).with_attribute("price", i as f64),
        )
        .unwrap();
    }
    let res = col
        .search(&Query::new(vec![0.0, 0.0]).max_distance(2.5).k(10))
        .unwrap();
    assert_eq!(res.len(), 3);

    let hinted = Query::new(vec![0.0, 0.0])
        .filter(Predicate::attr("price").ge(0.0))
        .strategy(Strategy::FilterThenSearch)
        .k(2);
    let res = col.search(&hinted).unwrap();
    assert!(res.plan.hinted);
    assert_eq!(res.plan.strategy, Strategy::FilterThenSearch);
    assert_eq!(res.ids(), vec![&DocId::new("h0"), &DocId::new("h1")]);

    let bad = Query::new(vec![0.0, 0.0])
        .filter(Predicate::attr("price").ge(0.0))
        .strategy(Strategy::Unfiltered);
    assert!(matches!(col.search(&bad), Err(Error::InvalidQuery(_))));
}
