//! Composite scoring and ranking.
//!
//! Each candidate's score is a weighted sum:
//!
//! ```text
//! score = w_sim * similarity(distance) + Σ w_i * signal_i
//! ```
//!
//! `similarity` maps the index distance onto \[0, 1\] (see
//! [`DistanceMetric::similarity`]). Signals read an attribute, a metadata path or
//! the document's insertion time and are rescaled to \[0, 1\]; a signal whose
//! source is missing contributes nothing.
//!
//! Ranking is a total order: score descending, then [`DocId`] ascending.

use crate::distance::DistanceMetric;
use crate::document::{AttributeValue, DocId, MetadataPath, MetadataValue};
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a signal reads its raw value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Attribute(String),
    Metadata(MetadataPath),
    /// Insertion time assigned by the collection.
    CreatedAt,
}

impl SignalSource {
    pub fn attribute(field: impl Into<String>) -> Self {
        SignalSource::Attribute(field.into())
    }

    pub fn metadata(path: &str) -> Self {
        SignalSource::Metadata(MetadataPath::from_dotted(path))
    }
}

/// How a raw value becomes a contribution in \[0, 1\].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalKind {
    /// Linear rescale of a number from `[min, max]`, clamped.
    Numeric {
        source: SignalSource,
        min: f64,
        max: f64,
    },
    /// `0.5^(age / half_life)`; future timestamps count as age zero.
    Recency {
        source: SignalSource,
        half_life_secs: f64,
    },
    /// 1 when the value is `true` or a positive number, else 0.
    Availability { source: SignalSource },
}

/// A weighted auxiliary ranking signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub weight: f32,
    #[serde(flatten)]
    pub kind: SignalKind,
}

impl Signal {
    pub fn numeric(source: SignalSource, min: f64, max: f64, weight: f32) -> Self {
        Self {
            weight,
            kind: SignalKind::Numeric { source, min, max },
        }
    }

    pub fn recency(source: SignalSource, half_life: Duration, weight: f32) -> Self {
        Self {
            weight,
            kind: SignalKind::Recency {
                source,
                half_life_secs: half_life.num_milliseconds() as f64 / 1000.0,
            },
        }
    }

    pub fn availability(source: SignalSource, weight: f32) -> Self {
        Self {
            weight,
            kind: SignalKind::Availability { source },
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.weight.is_finite() {
            return Err(Error::InvalidWeights(format!(
                "signal weight {} is not finite",
                self.weight
            )));
        }
        let source = match &self.kind {
            SignalKind::Numeric { source, min, max } => {
                if !(min.is_finite() && max.is_finite() && max > min) {
                    return Err(Error::InvalidWeights(format!(
                        "numeric signal range [{min}, {max}] is empty or not finite"
                    )));
                }
                source
            }
            SignalKind::Recency {
                source,
                half_life_secs,
            } => {
                if !(half_life_secs.is_finite() && *half_life_secs > 0.0) {
                    return Err(Error::InvalidWeights(format!(
                        "half life {half_life_secs}s must be positive"
                    )));
                }
                source
            }
            SignalKind::Availability { source } => source,
        };
        if let SignalSource::Metadata(path) = source {
            path.validate()
                .map_err(|e| Error::InvalidWeights(format!("signal path: {e}")))?;
        }
        Ok(())
    }

    /// Contribution before weighting, or `None` when the source is missing.
    fn value(&self, candidate: &Candidate<'_>, now: DateTime<Utc>) -> Option<f64> {
        match &self.kind {
            SignalKind::Numeric { source, min, max } => {
                let x = numeric_value(source, candidate)?;
                Some(((x - min) / (max - min)).clamp(0.0, 1.0))
            }
            SignalKind::Recency {
                source,
                half_life_secs,
            } => {
                let ts = timestamp_value(source, candidate)?;
                let age = ((now - ts).num_milliseconds() as f64 / 1000.0).max(0.0);
                Some(0.5f64.powf(age / half_life_secs))
            }
            SignalKind::Availability { source } => {
                let available = match raw_value(source, candidate)? {
                    Raw::Attribute(AttributeValue::Number(n)) => *n > 0.0,
                    Raw::Metadata(MetadataValue::Bool(b)) => *b,
                    Raw::Metadata(MetadataValue::Number(n)) => *n > 0.0,
                    _ => false,
                };
                Some(if available { 1.0 } else { 0.0 })
            }
        }
    }
}

/// Weights of the composite score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub similarity: f32,
    pub signals: Vec<Signal>,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            similarity: 1.0,
            signals: Vec::new(),
        }
    }
}

impl ScoringWeights {
    /// Pure similarity ranking.
    pub fn similarity_only() -> Self {
        Self::default()
    }

    pub fn with_similarity(mut self, weight: f32) -> Self {
        self.similarity = weight;
        self
    }

    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }

    /// Rejects non-finite weights and malformed signal parameters.
    pub fn validate(&self) -> Result<()> {
        if !self.similarity.is_finite() {
            return Err(Error::InvalidWeights(format!(
                "similarity weight {} is not finite",
                self.similarity
            )));
        }
        self.signals.iter().try_for_each(Signal::validate)
    }
}

/// One document offered to the ranker.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub id: &'a DocId,
    pub distance: f32,
    pub attributes: &'a BTreeMap<String, AttributeValue>,
    pub metadata: &'a MetadataValue,
    pub created_at: DateTime<Utc>,
}

/// Output of [`rank`]. `position` indexes the candidate slice given to it.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedHit {
    pub position: usize,
    pub id: DocId,
    pub score: f32,
    pub distance: f32,
}

/// Slice of the ranked list to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }
}

enum Raw<'a> {
    Attribute(&'a AttributeValue),
    Metadata(&'a MetadataValue),
    Time(DateTime<Utc>),
}

fn raw_value<'a>(source: &SignalSource, c: &Candidate<'a>) -> Option<Raw<'a>> {
    match source {
        SignalSource::Attribute(field) => c.attributes.get(field).map(Raw::Attribute),
        SignalSource::Metadata(path) => c.metadata.get_path(path).map(Raw::Metadata),
        SignalSource::CreatedAt => Some(Raw::Time(c.created_at)),
    }
}

fn numeric_value(source: &SignalSource, c: &Candidate<'_>) -> Option<f64> {
    match raw_value(source, c)? {
        Raw::Attribute(AttributeValue::Number(n)) => Some(*n),
        Raw::Attribute(AttributeValue::Timestamp(t)) => Some(t.timestamp() as f64),
        Raw::Attribute(_) => None,
        Raw::Metadata(m) => m.as_f64(),
        Raw::Time(t) => Some(t.timestamp() as f64),
    }
}

/// Timestamps come from timestamp attributes, RFC 3339 strings or epoch seconds.
fn timestamp_value(source: &SignalSource, c: &Candidate<'_>) -> Option<DateTime<Utc>> {
    match raw_value(source, c)? {
        Raw::Attribute(AttributeValue::Timestamp(t)) => Some(*t),
        Raw::Attribute(AttributeValue::Number(n)) => from_epoch_secs(*n),
        Raw::Attribute(_) => None,
        Raw::Metadata(MetadataValue::Text(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Raw::Metadata(MetadataValue::Number(n)) => from_epoch_secs(*n),
        Raw::Metadata(_) => None,
        Raw::Time(t) => Some(t),
    }
}

fn from_epoch_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0) as i64)
}

/// Composite score of one candidate.
pub fn score(
    candidate: &Candidate<'_>,
    metric: DistanceMetric,
    weights: &ScoringWeights,
    now: DateTime<Utc>,
) -> f32 {
    let mut total = weights.similarity * metric.similarity(candidate.distance);
    for signal in &weights.signals {
        if let Some(v) = signal.value(candidate, now) {
            total += signal.weight * v as f32;
        }
    }
    total
}

/// Scores, orders and paginates candidates.
///
/// Never pads: fewer candidates than `offset + limit` yields what is there.
pub fn rank(
    candidates: &[Candidate<'_>],
    metric: DistanceMetric,
    weights: &ScoringWeights,
    page: Page,
    now: DateTime<Utc>,
) -> Vec<RankedHit> {
    let mut scored: Vec<(f32, usize)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (score(c, metric, weights, now), i))
        .collect();
    scored.sort_unstable_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| candidates[a.1].id.cmp(candidates[b.1].id))
            .then_with(|| a.1.cmp(&b.1))
    });
    scored
        .into_iter()
        .skip(page.offset)
        .take(page.limit)
        .map(|(s, i)| RankedHit {
            position: i,
            id: candidates[i].id.clone(),
            score: s,
            distance: candidates[i].distance,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    struct Owned {
        id: DocId,
        distance: f32,
        attributes: BTreeMap<String, AttributeValue>,
        metadata: MetadataValue,
        created_at: DateTime<Utc>,
    }

    impl Owned {
        fn new(id: &str, distance: f32) -> Self {
            Self {
                id: DocId::new(id),
                distance,
                attributes: BTreeMap::new(),
                metadata: MetadataValue::Null,
                created_at: now(),
            }
        }

        fn candidate(&self) -> Candidate<'_> {
            Candidate {
                id: &self.id,
                distance: self.distance,
                attributes: &self.attributes,
                metadata: &self.metadata,
                created_at: self.created_at,
            }
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn ids(hits: &[RankedHit]) -> Vec<&str> {
        hits.iter().map(|h| h.id.as_str()).collect()
    }

    fn run(docs: &[Owned], weights: &ScoringWeights, page: Page) -> Vec<RankedHit> {
        let cands: Vec<Candidate<'_>> = docs.iter().map(Owned::candidate).collect();
        rank(&cands, DistanceMetric::Cosine, weights, page, now())
    }

    #[test]
    fn test_similarity_order_and_tie_break() {
        let docs = vec![
            Owned::new("c", 0.2),
            Owned::new("b", 0.1),
            Owned::new("a", 0.2),
            Owned::new("d", 1.5),
        ];
        let hits = run(&docs, &ScoringWeights::default(), Page::first(10));
        assert_eq!(ids(&hits), vec!["b", "a", "c", "d"]);
        assert!((hits[0].score - 0.95).abs() < 1e-6);
        assert_eq!(hits[1].position, 2);
    }

    #[test]
    fn test_pagination_never_pads() {
        let docs: Vec<Owned> = (0..5)
            .map(|i| Owned::new(&format!("d{i}"), i as f32 * 0.1))
            .collect();
        let w = ScoringWeights::default();
        assert_eq!(ids(&run(&docs, &w, Page::new(1, 2))), vec!["d1", "d2"]);
        assert_eq!(ids(&run(&docs, &w, Page::new(4, 10))), vec!["d4"]);
        assert!(run(&docs, &w, Page::new(9, 10)).is_empty());
        assert!(run(&docs, &w, Page::new(0, 0)).is_empty());
    }

    #[test]
    fn test_numeric_and_availability_signals() {
        let mut cheap = Owned::new("cheap", 0.3);
        cheap.attributes.insert("rating".into(), AttributeValue::Number(5.0));
        cheap.metadata = MetadataValue::from(json!({"stock": 4}));
        let mut close = Owned::new("close", 0.1);
        close.attributes.insert("rating".into(), AttributeValue::Number(1.0));
        close.metadata = MetadataValue::from(json!({"stock": 0}));

        let w = ScoringWeights::default()
            .with_signal(Signal::numeric(SignalSource::attribute("rating"), 0.0, 5.0, 0.5))
            .with_signal(Signal::availability(SignalSource::metadata("stock"), 0.2));
        let hits = run(&[cheap, close], &w, Page::first(2));
        assert_eq!(ids(&hits), vec!["cheap", "close"]);
        // 0.85 + 0.5 * 1.0 + 0.2
        assert!((hits[0].score - 1.55).abs() < 1e-5, "got {}", hits[0].score);
        // 0.95 + 0.5 * 0.2 + 0
        assert!((hits[1].score - 1.05).abs() < 1e-5, "got {}", hits[1].score);
    }

    #[test]
    fn test_recency_half_life() {
        let mut fresh = Owned::new("fresh", 0.0);
        fresh.created_at = now();
        let mut old = Owned::new("old", 0.0);
        old.created_at = now() - Duration::days(7);
        let w = ScoringWeights::default()
            .with_similarity(0.0)
            .with_signal(Signal::recency(SignalSource::CreatedAt, Duration::days(7), 1.0));
        let hits = run(&[old, fresh], &w, Page::first(2));
        assert_eq!(ids(&hits), vec!["fresh", "old"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_recency_from_metadata_text() {
        let mut doc = Owned::new("x", 0.0);
        doc.metadata = MetadataValue::from(json!({"published": "2024-05-31T00:00:00Z"}));
        let w = ScoringWeights::default()
            .with_similarity(0.0)
            .with_signal(Signal::recency(
                SignalSource::metadata("published"),
                Duration::days(1),
                1.0,
            ));
        let hits = run(&[doc], &w, Page::first(1));
        assert!((hits[0].score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_missing_signal_is_neutral() {
        let a = Owned::new("a", 0.2);
        let w = ScoringWeights::default()
            .with_signal(Signal::numeric(SignalSource::attribute("rating"), 0.0, 5.0, 3.0))
            .with_signal(Signal::availability(SignalSource::metadata("stock"), 3.0));
        let hits = run(&[a], &w, Page::first(1));
        assert!((hits[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_weight_validation() {
        assert!(ScoringWeights::default().validate().is_ok());
        let bad = ScoringWeights::default().with_similarity(f32::NAN);
        assert!(matches!(bad.validate(), Err(Error::InvalidWeights(_))));
        let bad = ScoringWeights::default()
            .with_signal(Signal::numeric(SignalSource::attribute("x"), 1.0, 1.0, 1.0));
        assert!(bad.validate().unwrap_err().is_validation());
        let bad = ScoringWeights::default()
            .with_signal(Signal::recency(SignalSource::CreatedAt, Duration::zero(), 1.0));
        assert!(bad.validate().is_err());
        let bad = ScoringWeights::default()
            .with_signal(Signal::availability(SignalSource::metadata("a..b"), 1.0));
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_weights_serde() {
        let w: ScoringWeights = serde_json::from_value(json!({
            "similarity": 0.7,
            "signals": [
                {"weight": 0.3, "kind": "numeric", "source": {"attribute": "rating"}, "min": 0.0, "max": 5.0},
                {"weight": 0.1, "kind": "recency", "source": "created_at", "half_life_secs": 86400.0}
            ]
        }))
        .unwrap();
        assert_eq!(w.signals.len(), 2);
        assert!(w.validate().is_ok());
    }
}
