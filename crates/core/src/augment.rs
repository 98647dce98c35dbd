//! Retrieval-augmented answering.
//!
//! The engine only retrieves. Answer generation is delegated to an
//! [`LlmAugmenter`], which receives the question and the ranked hits.
//! [`render_context`] and [`build_prompt`] produce the plain-text prompt most
//! augmenters want, and [`RagPipeline`] wires embed → search → augment.

use crate::document::MetadataValue;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::search::query::Query;
use crate::search::types::{DegradedResult, SearchHit};
use crate::storage::Collection;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing::debug;

/// Produces an answer from a question and the hits retrieved for it.
pub trait LlmAugmenter: Send + Sync {
    fn augment(&self, query_text: &str, hits: &[SearchHit]) -> Result<String>;
}

/// Layout of the context block built from hits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStyle {
    /// One line per hit with its title.
    Simple,
    /// One line per hit with title, subject and score.
    #[default]
    Summary,
    /// Numbered paragraphs with authors, subject and relevance.
    Detailed,
}

const NO_CONTEXT: &str = "No relevant context found.";

/// Display title of a hit: metadata `title`, then `name`, then the document id.
fn title(hit: &SearchHit) -> String {
    ["title", "name"]
        .iter()
        .find_map(|k| text_field(&hit.metadata, k))
        .unwrap_or_else(|| hit.id.to_string())
}

fn text_field(metadata: &MetadataValue, key: &str) -> Option<String> {
    match metadata {
        MetadataValue::Object(map) => match map.get(key)? {
            MetadataValue::Text(s) => Some(s.clone()),
            MetadataValue::Number(n) => Some(n.to_string()),
            MetadataValue::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect();
                (!parts.is_empty()).then(|| parts.join(", "))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Renders hits as a plain-text context block.
pub fn render_context(hits: &[SearchHit], style: ContextStyle) -> String {
    if hits.is_empty() {
        return NO_CONTEXT.to_string();
    }
    let subject = |h: &SearchHit| {
        text_field(&h.metadata, "subject").unwrap_or_else(|| "Unknown".to_string())
    };
    match style {
        ContextStyle::Simple => hits
            .iter()
            .map(|h| format!("- {}", title(h)))
            .collect::<Vec<_>>()
            .join("\n"),
        ContextStyle::Summary => hits
            .iter()
            .map(|h| {
                format!(
                    "- \"{}\" (Subject: {}, Score: {:.3})",
                    title(h),
                    subject(h),
                    h.score
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        ContextStyle::Detailed => {
            let mut out = String::new();
            for (i, h) in hits.iter().enumerate() {
                if i > 0 {
                    out.push_str("\n\n");
                }
                let authors = text_field(&h.metadata, "authors")
                    .unwrap_or_else(|| "Unknown".to_string());
                // Writing to a String cannot fail
                let _ = write!(
                    out,
                    "{}. \"{}\" by {}\n   - Subject: {}\n   - Relevance: {:.3}",
                    i + 1,
                    title(h),
                    authors,
                    subject(h),
                    h.score
                );
            }
            out
        }
    }
}

/// Question-plus-context prompt in the default layout.
pub fn build_prompt(query_text: &str, hits: &[SearchHit], style: ContextStyle) -> String {
    format!(
        "Question: {query_text}\n\nRelevant information:\n{}\n\nPlease provide a helpful response based on the above information.",
        render_context(hits, style)
    )
}

/// Result of one [`RagPipeline::answer`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub query: String,
    pub answer: String,
    /// Hits handed to the augmenter. Empty when retrieval was skipped.
    pub hits: Vec<SearchHit>,
    pub warning: Option<DegradedResult>,
}

/// Embeds a question, retrieves hits from a collection and asks an augmenter.
pub struct RagPipeline<'a> {
    collection: &'a Collection,
    embedder: &'a dyn EmbeddingProvider,
    augmenter: &'a dyn LlmAugmenter,
    template: Query,
    min_score: Option<f32>,
    no_context: bool,
}

impl<'a> RagPipeline<'a> {
    pub fn new(
        collection: &'a Collection,
        embedder: &'a dyn EmbeddingProvider,
        augmenter: &'a dyn LlmAugmenter,
    ) -> Self {
        Self {
            collection,
            embedder,
            augmenter,
            template: Query::default(),
            min_score: None,
            no_context: false,
        }
    }

    /// Query settings (filter, weights, k, ...) applied to every question.
    pub fn template(mut self, template: Query) -> Self {
        self.template = template;
        self
    }

    /// Drops hits scoring below `min`.
    pub fn min_score(mut self, min: f32) -> Self {
        self.min_score = Some(min);
        self
    }

    /// Skips retrieval and calls the augmenter with no hits.
    pub fn no_context(mut self, skip: bool) -> Self {
        self.no_context = skip;
        self
    }

    pub fn answer(&self, question: &str) -> Result<RagAnswer> {
        let (hits, warning) = if self.no_context {
            (Vec::new(), None)
        } else {
            let response =
                self.collection
                    .query_text(self.embedder, question, self.template.clone())?;
            let mut hits = response.hits;
            if let Some(min) = self.min_score {
                hits.retain(|h| h.score >= min);
            }
            (hits, response.warning)
        };
        debug!(
            collection = self.collection.name(),
            model = self.embedder.model_name(),
            hits = hits.len(),
            "augmenting answer"
        );
        let answer = self.augmenter.augment(question, &hits)?;
        Ok(RagAnswer {
            query: question.to_string(),
            answer,
            hits,
            warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectionConfig;
    use crate::document::{DocId, Document};
    use crate::embedding::HashEmbedder;
    use crate::error::Error;
    use crate::schema::AttributeSchema;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn hit(id: &str, score: f32, metadata: serde_json::Value) -> SearchHit {
        SearchHit {
            id: DocId::new(id),
            score,
            distance: 1.0 - score,
            attributes: BTreeMap::new(),
            metadata: metadata.into(),
        }
    }

    fn hits() -> Vec<SearchHit> {
        vec![
            hit(
                "b1",
                0.91234,
                json!({"title": "Dune", "authors": ["Frank Herbert"], "subject": "Fiction"}),
            ),
            hit("b2", 0.5, json!({"name": "Untitled"})),
        ]
    }

    /// Echoes the prompt so tests can inspect what the augmenter saw.
    struct EchoAugmenter;

    impl LlmAugmenter for EchoAugmenter {
        fn augment(&self, query_text: &str, hits: &[SearchHit]) -> Result<String> {
            Ok(build_prompt(query_text, hits, ContextStyle::Simple))
        }
    }

    struct FailingAugmenter;

    impl LlmAugmenter for FailingAugmenter {
        fn augment(&self, _: &str, _: &[SearchHit]) -> Result<String> {
            Err(Error::Augmentation("model offline".into()))
        }
    }

    #[test]
    fn test_render_context_styles() {
        let h = hits();
        assert_eq!(render_context(&h, ContextStyle::Simple), "- Dune\n- Untitled");
        assert_eq!(
            render_context(&h, ContextStyle::Summary),
            "- \"Dune\" (Subject: Fiction, Score: 0.912)\n- \"Untitled\" (Subject: Unknown, Score: 0.500)"
        );
        let detailed = render_context(&h, ContextStyle::Detailed);
        assert!(detailed.starts_with(
            "1. \"Dune\" by Frank Herbert\n   - Subject: Fiction\n   - Relevance: 0.912\n\n2. \"Untitled\""
        ));
        assert_eq!(render_context(&[], ContextStyle::Detailed), NO_CONTEXT);
    }

    #[test]
    fn test_title_falls_back_to_id() {
        let h = hit("doc-7", 0.1, json!(null));
        assert_eq!(render_context(&[h], ContextStyle::Simple), "- doc-7");
    }

    #[test]
    fn test_build_prompt() {
        let prompt = build_prompt("what is dune?", &[], ContextStyle::Summary);
        assert_eq!(
            prompt,
            "Question: what is dune?\n\nRelevant information:\nNo relevant context found.\n\nPlease provide a helpful response based on the above information."
        );
    }

    fn library() -> (Collection, HashEmbedder) {
        let embedder = HashEmbedder::new(32).unwrap();
        let col = Collection::new(
            "library",
            32,
            AttributeSchema::new(),
            CollectionConfig::default(),
        )
            .unwrap();
        for (id, text) in [
            ("rust", "rust ownership borrowing lifetimes"),
            ("sql", "postgres sql joins indexes"),
            ("cook", "bread baking sourdough flour"),
        ] {
            let doc = Document::new(id, embedder.embed(text).unwrap())
                .with_metadata(json!({ "title": text }));
            col.upsert(doc).unwrap();
        }
        (col, embedder)
    }

    #[test]
    fn test_pipeline_retrieves_and_augments() {
        let (col, embedder) = library();
        let rag = RagPipeline::new(&col, &embedder, &EchoAugmenter).template(Query::default().k(1));
        let out = rag.answer("rust ownership borrowing lifetimes").unwrap();
        assert_eq!(out.hits.len(), 1);
        assert_eq!(out.hits[0].id, DocId::new("rust"));
        assert!(out.answer.contains("- rust ownership borrowing lifetimes"));
        assert!(out.warning.is_none());
    }

    #[test]
    fn test_pipeline_no_context_and_threshold() {
        let (col, embedder) = library();
        let rag = RagPipeline::new(&col, &embedder, &EchoAugmenter).no_context(true);
        let out = rag.answer("anything here").unwrap();
        assert!(out.hits.is_empty());
        assert!(out.answer.contains(NO_CONTEXT));

        let strict = RagPipeline::new(&col, &embedder, &EchoAugmenter).min_score(1.1);
        assert!(strict.answer("rust lifetimes").unwrap().hits.is_empty());
    }

    #[test]
    fn test_pipeline_propagates_collaborator_errors() {
        let (col, embedder) = library();
        let rag = RagPipeline::new(&col, &embedder, &FailingAugmenter);
        assert!(matches!(rag.answer("rust"), Err(Error::Augmentation(_))));
        let rag = RagPipeline::new(&col, &embedder, &EchoAugmenter);
        assert!(matches!(rag.answer("the of"), Err(Error::Embedding(_))));
    }
}
