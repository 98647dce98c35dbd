//! # hybridsearch-core
//!
//! Embeddable in-memory hybrid search engine: approximate nearest neighbor
//! search (HNSW or IVF) combined with typed attribute filters, schema-free
//! metadata filters, selectivity-driven query planning and weighted ranking.
//!
//! The crate is synchronous and has no async dependencies. Embedding
//! generation and answer generation are plugged in through the
//! [`EmbeddingProvider`] and [`LlmAugmenter`] traits.
//!
//! ```
//! use hybridsearch_core::{AttributeSchema, CollectionConfig, Database, Document, Predicate, Query};
//!
//! let db = Database::new();
//! let schema = AttributeSchema::new().number("price");
//! let books = db.create_collection("books", 3, schema, CollectionConfig::default())?;
//! books.upsert(Document::new("a", vec![1.0, 0.0, 0.0]).with_attribute("price", 12.0))?;
//! books.upsert(Document::new("b", vec![0.9, 0.1, 0.0]).with_attribute("price", 80.0))?;
//!
//! let query = Query::new(vec![1.0, 0.0, 0.0]).filter(Predicate::attr("price").le(50.0));
//! let response = books.search(&query)?;
//! assert_eq!(response.hits[0].id.as_str(), "a");
//! # Ok::<(), hybridsearch_core::Error>(())
//! ```

/// Retrieval-augmented answering: `LlmAugmenter`, context rendering and the RAG pipeline.
pub mod augment;
/// Limits, tuning defaults and the JSON-loadable `CollectionConfig`.
pub mod config;
/// Distance metrics and their similarity transforms.
pub mod distance;
/// Core document types: `DocId`, `Document`, attribute and metadata values.
pub mod document;
/// Text-to-vector providers.
pub mod embedding;
/// Error taxonomy.
pub mod error;
/// HNSW approximate nearest neighbor index.
pub mod hnsw;
/// `VectorIndex` trait, strategy factory and exact flat scan.
pub mod index;
/// IVF partitioned index with k-means trained centroids.
pub mod ivf;
/// Predicate trees over attributes and metadata.
pub mod predicate;
/// Attribute schema declared per collection.
pub mod schema;
/// Query planning, filtering, scoring and result types.
pub mod search;
/// Attribute and metadata stores, collections and the database handle.
pub mod storage;

pub use augment::{build_prompt, render_context, ContextStyle, LlmAugmenter, RagAnswer, RagPipeline};
pub use config::{CollectionConfig, PlannerConfig};
pub use distance::DistanceMetric;
pub use document::{AttributeValue, DocId, Document, MetadataPath, MetadataValue};
pub use embedding::{EmbeddingProvider, HashEmbedder};
pub use error::{Error, ErrorKind, Result};
pub use hnsw::HnswConfig;
pub use index::{IndexStrategy, Neighbor, SearchParams, VectorIndex};
pub use ivf::IvfConfig;
pub use predicate::Predicate;
pub use schema::{AttributeSchema, AttributeType};
pub use search::{
    DegradedReason, DegradedResult, Query, QueryPlan, ScoringWeights, SearchHit, SearchResponse,
    Signal, SignalSource, Strategy,
};
pub use storage::{Collection, Database, StoredDocument};
