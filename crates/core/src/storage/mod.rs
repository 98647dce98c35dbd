//! Storage layer: typed attribute columns, the metadata tree store, and the
//! collections that keep them in step with the vector index.
//!
//! Everything is in-memory. A [`Collection`] owns one vector index, one
//! [`AttributeStore`] and one [`MetadataStore`], all keyed by the same internal
//! `u32` ids, and updates the three under a single write lock. A [`Database`]
//! groups named collections.

/// Typed attribute columns with hash/ordered indexes and histograms.
pub mod attributes;
/// Collection and database handles.
pub mod collection;
/// Metadata trees with an inverted path/value index.
pub mod metadata;

pub use attributes::{AttributeStore, Histogram};
pub use collection::{Collection, CollectionData, Database, StoredDocument};
pub use metadata::MetadataStore;
