//! Collection and database data structures.
//!
//! A [`Collection`] keeps a vector index, an [`AttributeStore`] and a
//! [`MetadataStore`] in step. Writes are validated in full before any store is
//! touched and then applied to all three under one write lock, so readers see a
//! document in every store or in none. [`Database`] manages named collections.
//!
//! Every stored document gets a fresh internal `u32` id on each write. Replacing
//! a document tombstones the old vector and inserts the new one under a new id;
//! [`Collection::rebuild_index`] compacts the tombstones away.

use crate::config::{
    CollectionConfig, DEFAULT_COMPACT_RATIO, MAX_BATCH_SIZE, MAX_COLLECTION_NAME_LEN, MAX_DIMENSION,
};
use crate::distance::DistanceMetric;
use crate::document::{AttributeValue, DocId, Document, MetadataValue};
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::index::{validate_vector, IdSet, Neighbor, VectorIndex};
use crate::predicate::Predicate;
use crate::schema::AttributeSchema;
use crate::search::filter::{self, StoreView};
use crate::search::planner::{PlanRequest, QueryPlan, QueryPlanner};
use crate::search::query::Query;
use crate::search::scorer::{rank, Candidate, ScoringWeights};
use crate::search::types::{SearchHit, SearchResponse};
use crate::storage::attributes::AttributeStore;
use crate::storage::metadata::MetadataStore;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Per-document bookkeeping kept next to the stores.
#[derive(Debug, Clone)]
struct Record {
    id: DocId,
    created_at: DateTime<Utc>,
}

/// A document as stored, with the insertion time the collection assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub document: Document,
    pub created_at: DateTime<Utc>,
}

/// Internal data for a collection, protected by a `RwLock`.
#[derive(Debug)]
pub struct CollectionData {
    pub name: String,
    pub dimension: usize,
    pub config: CollectionConfig,
    pub schema: AttributeSchema,
    index: Box<dyn VectorIndex>,
    attributes: AttributeStore,
    metadata: MetadataStore,
    records: HashMap<u32, Record>,
    internal_ids: HashMap<DocId, u32>,
    live: IdSet,
    next_internal: u32,
    last_created: Option<DateTime<Utc>>,
}

impl CollectionData {
    /// Creates empty stores for a validated configuration.
    pub fn new(
        name: String,
        dimension: usize,
        schema: AttributeSchema,
        config: CollectionConfig,
    ) -> Self {
        let index = config.index.build(dimension, config.metric);
        let attributes = AttributeStore::new(&schema, config.histogram_buckets);
        Self {
            name,
            dimension,
            config,
            schema,
            index,
            attributes,
            metadata: MetadataStore::new(),
            records: HashMap::new(),
            internal_ids: HashMap::new(),
            live: IdSet::new(),
            next_internal: 0,
            last_created: None,
        }
    }

    pub fn len(&self) -> usize {
        self.live.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    /// Both stores restricted to live ids, for predicate evaluation.
    pub fn view(&self) -> StoreView<'_> {
        StoreView {
            attributes: &self.attributes,
            metadata: &self.metadata,
            live: &self.live,
        }
    }

    /// Checks that the index, both stores and the id maps agree.
    pub fn validate(&self) -> Result<()> {
        let inconsistent = |msg: String| Err(Error::InternalConsistency(msg));

        if self.index.dimension() != self.dimension {
            return inconsistent(format!(
                "index dimension {} != collection dimension {}",
                self.index.dimension(),
                self.dimension
            ));
        }
        if let Some((field, _)) = self
            .schema
            .fields()
            .find(|(field, ty)| !self.attributes.has_column(field, ty))
        {
            return inconsistent(format!(
                "attribute store has no matching column for '{field}'"
            ));
        }
        let index_ids = self.index.ids();
        if index_ids != self.live {
            return inconsistent(format!(
                "index holds {} live ids, collection has {} ({} differ)",
                index_ids.len(),
                self.live.len(),
                (&index_ids ^ &self.live).len()
            ));
        }
        if self.attributes.ids() != &self.live {
            return inconsistent(format!(
                "attribute store holds {} ids, collection has {}",
                self.attributes.len(),
                self.live.len()
            ));
        }
        if self.metadata.ids() != &self.live {
            return inconsistent(format!(
                "metadata store holds {} ids, collection has {}",
                self.metadata.len(),
                self.live.len()
            ));
        }
        if self.records.len() != self.len()
            || self.records.keys().any(|id| !self.live.contains(*id))
        {
            return inconsistent(format!(
                "{} records for {} live ids",
                self.records.len(),
                self.live.len()
            ));
        }
        if self.internal_ids.len() != self.records.len() {
            return inconsistent(format!(
                "{} document ids map to {} records",
                self.internal_ids.len(),
                self.records.len()
            ));
        }
        for (doc_id, internal) in &self.internal_ids {
            match self.records.get(internal) {
                Some(record) if &record.id == doc_id => {}
                _ => {
                    return inconsistent(format!(
                        "document '{doc_id}' maps to internal id {internal} with a different record"
                    ))
                }
            }
        }
        Ok(())
    }

    /// Full validation of an incoming document, returning it with coerced attributes.
    fn prepare(&self, mut doc: Document) -> Result<Document> {
        doc.validate()?;
        validate_vector(&doc.embedding, self.dimension)?;
        doc.attributes = self.schema.coerce_all(std::mem::take(&mut doc.attributes))?;
        Ok(doc)
    }

    fn assign_internal_id(&mut self) -> Result<u32> {
        let id = self.next_internal;
        self.next_internal = id.checked_add(1).ok_or_else(|| {
            Error::InternalConsistency("internal id space exhausted".into())
        })?;
        Ok(id)
    }

    /// Wall-clock time, nudged forward so it strictly increases per insert.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_created {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created = Some(ts);
        ts
    }

    /// Removes one internal id from every store. Any store that did not hold it
    /// is a consistency violation.
    fn remove_internal(&mut self, internal: u32) -> Result<()> {
        let record = self.records.remove(&internal);
        if let Some(record) = &record {
            self.internal_ids.remove(&record.id);
        }
        self.live.remove(internal);
        let in_index = self.index.remove(internal);
        let in_attributes = self.attributes.remove(internal);
        let in_metadata = self.metadata.remove(internal);
        if record.is_none() || !(in_index && in_attributes && in_metadata) {
            return Err(Error::InternalConsistency(format!(
                "internal id {internal} missing from a store (record: {}, index: {in_index}, attributes: {in_attributes}, metadata: {in_metadata})",
                record.is_some()
            )));
        }
        Ok(())
    }

    /// Writes a prepared document, replacing any previous version.
    fn apply(&mut self, doc: Document) -> Result<()> {
        if let Some(&old) = self.internal_ids.get(&doc.id) {
            self.remove_internal(old)?;
        }
        let internal = self.assign_internal_id()?;
        let created_at = self.next_created_at();
        let stored = self
            .index
            .insert(internal, &doc.embedding)
            .and_then(|_| self.attributes.insert(internal, &doc.attributes))
            .and_then(|_| self.metadata.insert(internal, &doc.metadata));
        if let Err(e) = stored {
            return Err(Error::InternalConsistency(format!(
                "write of prepared document '{}' failed: {e}",
                doc.id
            )));
        }
        self.live.insert(internal);
        self.internal_ids.insert(doc.id.clone(), internal);
        self.records.insert(
            internal,
            Record {
                id: doc.id,
                created_at,
            },
        );
        Ok(())
    }

    fn stored_document(&self, internal: u32) -> Option<StoredDocument> {
        let record = self.records.get(&internal)?;
        let embedding = self.index.vector(internal)?.to_vec();
        let metadata = self.metadata.get(internal)?.clone();
        Some(StoredDocument {
            document: Document {
                id: record.id.clone(),
                embedding,
                attributes: self.attributes.attributes_of(internal),
                metadata,
            },
            created_at: record.created_at,
        })
    }

    /// Resolves neighbors to documents, ranks them and cuts the requested page.
    fn rank_hits(&self, neighbors: &[Neighbor], query: &Query) -> Result<Vec<SearchHit>> {
        let mut rows: Vec<(&Record, f32, BTreeMap<String, AttributeValue>, &MetadataValue)> =
            Vec::with_capacity(neighbors.len());
        for n in neighbors {
            let missing = || {
                Error::InternalConsistency(format!(
                    "index returned internal id {} with no stored document",
                    n.id
                ))
            };
            let record = self.records.get(&n.id).ok_or_else(missing)?;
            let metadata = self.metadata.get(n.id).ok_or_else(missing)?;
            rows.push((record, n.distance, self.attributes.attributes_of(n.id), metadata));
        }

        let candidates: Vec<Candidate<'_>> = rows
            .iter()
            .map(|(record, distance, attributes, metadata)| Candidate {
                id: &record.id,
                distance: *distance,
                attributes,
                metadata,
                created_at: record.created_at,
            })
            .collect();
        let ranked = rank(
            &candidates,
            self.config.metric,
            &query.weights,
            query.page(),
            Utc::now(),
        );

        Ok(ranked
            .into_iter()
            .map(|hit| {
                let (_, _, attributes, metadata) = &rows[hit.position];
                let metadata = if query.metadata_paths.is_empty() {
                    (*metadata).clone()
                } else {
                    metadata.excerpt(&query.metadata_paths)
                };
                SearchHit {
                    id: hit.id,
                    score: hit.score,
                    distance: hit.distance,
                    attributes: attributes.clone(),
                    metadata,
                }
            })
            .collect())
    }

    /// Keeps only documents every store agrees on and rebuilds the stores from them.
    /// Returns the number of ids dropped.
    fn repair(&mut self) -> Result<usize> {
        let index_ids = self.index.ids();
        let record_ids: IdSet = self.records.keys().copied().collect();
        let seen = &(&(&index_ids | self.attributes.ids()) | self.metadata.ids()) | &record_ids;
        let keep = &(&(&index_ids & self.attributes.ids()) & self.metadata.ids()) & &record_ids;

        // A document id claimed by two records keeps the newest one
        let mut newest: HashMap<DocId, u32> = HashMap::new();
        for internal in keep.iter() {
            if let Some(record) = self.records.get(&internal) {
                let slot = newest.entry(record.id.clone()).or_insert(internal);
                *slot = (*slot).max(internal);
            }
        }
        let keep: IdSet = newest.values().copied().collect();

        let mut vectors = Vec::with_capacity(keep.len() as usize);
        let mut rows = Vec::with_capacity(keep.len() as usize);
        for internal in keep.iter() {
            if let (Some(v), Some(m)) = (self.index.vector(internal), self.metadata.get(internal)) {
                vectors.push((internal, v.to_vec()));
                rows.push((internal, self.attributes.attributes_of(internal), m.clone()));
            }
        }

        let index = self
            .config
            .index
            .build_from(self.dimension, self.config.metric, &vectors)?;
        let mut attributes = AttributeStore::new(&self.schema, self.config.histogram_buckets);
        let mut metadata = MetadataStore::new();
        for (internal, attrs, meta) in &rows {
            attributes.insert(*internal, attrs)?;
            metadata.insert(*internal, meta)?;
        }
        attributes.refresh_statistics();

        self.index = index;
        self.attributes = attributes;
        self.metadata = metadata;
        self.live = keep;
        let live = &self.live;
        self.records.retain(|id, _| live.contains(*id));
        self.internal_ids = self
            .records
            .iter()
            .map(|(internal, record)| (record.id.clone(), *internal))
            .collect();
        self.validate()?;
        Ok((seen.len() - self.live.len()) as usize)
    }
}

/// A thread-safe collection of documents with vector, attribute and metadata indexes.
///
/// Cloning a `Collection` produces a new handle to the same shared data.
#[derive(Debug, Clone)]
pub struct Collection {
    name: Arc<str>,
    data: Arc<RwLock<CollectionData>>,
    quarantined: Arc<AtomicBool>,
    maintenance: Arc<Mutex<()>>,
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_COLLECTION_NAME_LEN {
        return Err(Error::InvalidConfig(format!(
            "collection name must be 1..={MAX_COLLECTION_NAME_LEN} bytes"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidConfig(format!(
            "collection name '{name}' may only contain ASCII letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

impl Collection {
    /// Creates an empty collection after validating its name, dimension, schema
    /// and configuration.
    pub fn new(
        name: impl Into<String>,
        dimension: usize,
        schema: AttributeSchema,
        config: CollectionConfig,
    ) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        if dimension == 0 || dimension > MAX_DIMENSION {
            return Err(Error::InvalidConfig(format!(
                "dimension must be in 1..={MAX_DIMENSION}, got {dimension}"
            )));
        }
        schema.validate()?;
        config.validate()?;
        info!(
            collection = %name,
            dimension,
            metric = %config.metric,
            index = config.index.name(),
            fields = schema.len(),
            "collection created"
        );
        Ok(Self {
            name: Arc::from(name.as_str()),
            data: Arc::new(RwLock::new(CollectionData::new(
                name, dimension, schema, config,
            ))),
            quarantined: Arc::new(AtomicBool::new(false)),
            maintenance: Arc::new(Mutex::new(())),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.data.read().dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.data.read().config.metric
    }

    pub fn config(&self) -> CollectionConfig {
        self.data.read().config.clone()
    }

    pub fn schema(&self) -> AttributeSchema {
        self.data.read().schema.clone()
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantined.load(Ordering::Acquire)
    }

    fn guard(&self) -> Result<()> {
        if self.is_quarantined() {
            return Err(Error::Quarantined(self.name.to_string()));
        }
        Ok(())
    }

    /// Flags the collection when `result` carries a consistency violation.
    fn check<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() && !self.quarantined.swap(true, Ordering::AcqRel) {
                error!(
                    collection = %self.name,
                    error = %e,
                    "consistency violation, collection quarantined"
                );
            }
        }
        result
    }

    /// Inserts or fully replaces a document. Returns its id.
    pub fn upsert(&self, doc: Document) -> Result<DocId> {
        self.guard()?;
        let mut data = self.data.write();
        let doc = data.prepare(doc)?;
        let id = doc.id.clone();
        let replaced = data.internal_ids.contains_key(&id);
        self.check(data.apply(doc))?;
        debug!(collection = %self.name, id = %id, replaced, "document upserted");
        Ok(id)
    }

    /// Upserts a batch atomically: every document is validated before any is written.
    pub fn upsert_batch(&self, docs: Vec<Document>) -> Result<Vec<DocId>> {
        self.guard()?;
        if docs.len() > MAX_BATCH_SIZE {
            return Err(Error::InvalidDocument(format!(
                "batch of {} exceeds {MAX_BATCH_SIZE} documents",
                docs.len()
            )));
        }
        let mut seen = HashSet::with_capacity(docs.len());
        if let Some(dup) = docs.iter().find(|d| !seen.insert(&d.id)) {
            return Err(Error::InvalidDocument(format!(
                "document '{}' appears twice in the batch",
                dup.id
            )));
        }

        let mut data = self.data.write();
        let prepared = docs
            .into_iter()
            .map(|d| data.prepare(d))
            .collect::<Result<Vec<_>>>()?;
        let ids: Vec<DocId> = prepared.iter().map(|d| d.id.clone()).collect();
        for doc in prepared {
            self.check(data.apply(doc))?;
        }
        debug!(collection = %self.name, count = ids.len(), "batch upserted");
        Ok(ids)
    }

    /// Replaces an existing document. Fails with `NotFound` if the id is not stored.
    pub fn replace(&self, doc: Document) -> Result<()> {
        self.guard()?;
        let mut data = self.data.write();
        if !data.internal_ids.contains_key(&doc.id) {
            return Err(Error::NotFound(doc.id.to_string()));
        }
        let doc = data.prepare(doc)?;
        self.check(data.apply(doc))
    }

    /// Removes a document from every store. Its vector stays tombstoned in the
    /// index until the next rebuild.
    pub fn delete(&self, id: &DocId) -> Result<()> {
        self.guard()?;
        let mut data = self.data.write();
        let internal = *data
            .internal_ids
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        self.check(data.remove_internal(internal))?;
        debug!(collection = %self.name, id = %id, "document deleted");
        Ok(())
    }

    /// Retrieves a document by id.
    pub fn get(&self, id: &DocId) -> Result<Option<StoredDocument>> {
        self.guard()?;
        let data = self.data.read();
        let Some(&internal) = data.internal_ids.get(id) else {
            return Ok(None);
        };
        match data.stored_document(internal) {
            Some(doc) => Ok(Some(doc)),
            None => self.check(Err(Error::InternalConsistency(format!(
                "document '{id}' is mapped but not stored"
            )))),
        }
    }

    pub fn contains(&self, id: &DocId) -> bool {
        self.data.read().internal_ids.contains_key(id)
    }

    /// Number of live documents.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Vectors removed from the index but not yet compacted.
    pub fn tombstones(&self) -> usize {
        self.data.read().index.tombstones()
    }

    /// Hybrid query with default paging. `limit` defaults to `k`.
    pub fn query(
        &self,
        vector: &[f32],
        predicate: Option<Predicate>,
        weights: ScoringWeights,
        k: usize,
        limit: Option<usize>,
    ) -> Result<SearchResponse> {
        let mut query = Query::new(vector.to_vec()).weights(weights).k(k);
        if let Some(p) = predicate {
            query = query.filter(p);
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        self.search(&query)
    }

    /// Embeds `text` and runs `template` with the resulting vector.
    pub fn query_text<P>(&self, provider: &P, text: &str, template: Query) -> Result<SearchResponse>
    where
        P: EmbeddingProvider + ?Sized,
    {
        let vector = provider.embed(text)?;
        validate_vector(&vector, self.dimension())?;
        self.search(&template.with_vector(vector))
    }

    /// Executes a query: validate, plan, search, filter, rank, paginate.
    pub fn search(&self, query: &Query) -> Result<SearchResponse> {
        self.guard()?;
        let data = self.data.read();
        self.execute(&data, query, None)
    }

    /// Documents nearest to the stored document `id`, which is never among the
    /// hits. `template` supplies filters, weights and paging; its vector is
    /// replaced by the stored embedding.
    pub fn similar_to(&self, id: &DocId, template: Query) -> Result<SearchResponse> {
        self.guard()?;
        let data = self.data.read();
        let Some(&internal) = data.internal_ids.get(id) else {
            return Err(Error::NotFound(id.to_string()));
        };
        let Some(vector) = data.index.vector(internal) else {
            return self.check(Err(Error::InternalConsistency(format!(
                "document '{id}' is mapped but has no vector"
            ))));
        };
        let query = template.with_vector(vector.to_vec());
        self.execute(&data, &query, Some(internal))
    }

    fn execute(
        &self,
        data: &CollectionData,
        query: &Query,
        exclude: Option<u32>,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        query.validate(data.dimension)?;
        let (request_predicate, plan_request) = Self::resolve(data, query)?;
        let view = data.view();
        let planner = QueryPlanner::new(&data.config.planner, data.index(), &view);
        let request = PlanRequest {
            predicate: request_predicate.as_ref(),
            exclude,
            ..plan_request
        };
        let (plan, execution) = self.check(planner.run(&request))?;
        let hits = self.check(data.rank_hits(&execution.neighbors, query))?;

        if let Some(w) = &execution.warning {
            warn!(
                collection = %self.name,
                requested = w.requested,
                returned = w.returned,
                attempts = w.attempts,
                "search returned fewer results than requested"
            );
        }
        debug!(
            collection = %self.name,
            strategy = %plan.strategy,
            hits = hits.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "query executed"
        );
        Ok(SearchResponse {
            hits,
            plan,
            warning: execution.warning,
        })
    }

    /// Schema resolution and metric check shared by search and explain.
    fn resolve<'q>(
        data: &CollectionData,
        query: &'q Query,
    ) -> Result<(Option<Predicate>, PlanRequest<'q>)> {
        if let Some(metric) = query.metric {
            if metric != data.config.metric {
                return Err(Error::MetricMismatch {
                    expected: data.config.metric,
                    actual: metric,
                });
            }
        }
        let predicate = query
            .filter
            .as_ref()
            .map(|p| p.resolve(&data.schema))
            .transpose()?;
        let request = PlanRequest {
            vector: &query.vector,
            k: query.k,
            metric: data.config.metric,
            params: query.search_params(),
            predicate: None,
            max_distance: query.max_distance,
            hint: query.strategy,
            exclude: None,
        };
        Ok((predicate, request))
    }

    /// Plans a query without executing it.
    pub fn explain(&self, query: &Query) -> Result<QueryPlan> {
        self.guard()?;
        let data = self.data.read();
        query.validate(data.dimension)?;
        let (predicate, request) = Self::resolve(&data, query)?;
        let view = data.view();
        let planner = QueryPlanner::new(&data.config.planner, data.index(), &view);
        planner.plan(&PlanRequest {
            predicate: predicate.as_ref(),
            ..request
        })
    }

    /// Estimated fraction of live documents matching `predicate`, before clamping.
    pub fn estimate_selectivity(&self, predicate: &Predicate) -> Result<f64> {
        self.guard()?;
        let data = self.data.read();
        let resolved = predicate.resolve(&data.schema)?;
        filter::estimate_selectivity(&resolved, &data.view())
    }

    /// Rebuilds every attribute histogram now instead of waiting for the write threshold.
    pub fn refresh_statistics(&self) -> Result<()> {
        self.guard()?;
        self.data.write().attributes.refresh_statistics();
        Ok(())
    }

    /// `true` when tombstones exceed the compaction ratio or an IVF index has
    /// enough vectors to train but is still untrained.
    pub fn maintenance_needed(&self) -> bool {
        let data = self.data.read();
        let tombstones = data.index.tombstones();
        let total = data.index.len() + tombstones;
        data.index.needs_training()
            || (total > 0 && tombstones as f64 / total as f64 > DEFAULT_COMPACT_RATIO)
    }

    /// Rebuilds the vector index from live documents, dropping tombstones and
    /// (for IVF) retraining centroids.
    ///
    /// **Phase A** (read lock): snapshot live vectors.
    /// **Phase B** (no lock): build the new index. This is the expensive part.
    /// **Phase C** (write lock, brief): reconcile writes made during phase B and swap.
    ///
    /// Returns the number of live documents in the new index.
    pub fn rebuild_index(&self) -> Result<usize> {
        self.guard()?;
        let _maintenance = self.maintenance.lock();
        let started = Instant::now();

        // Phase A: snapshot under read lock
        let (snapshot, strategy, dimension, metric) = {
            let data = self.data.read();
            let mut snapshot = Vec::with_capacity(data.len());
            for id in data.live.iter() {
                let vector = data.index.vector(id).ok_or_else(|| {
                    Error::InternalConsistency(format!("live id {id} has no vector"))
                });
                snapshot.push((id, self.check(vector)?.to_vec()));
            }
            (
                snapshot,
                data.config.index.clone(),
                data.dimension,
                data.config.metric,
            )
        };

        // Phase B: build without any lock
        let mut rebuilt = strategy.build_from(dimension, metric, &snapshot)?;
        let snapshot_ids: IdSet = snapshot.iter().map(|(id, _)| *id).collect();
        drop(snapshot);

        // Phase C: reconcile and swap under write lock
        let mut data = self.data.write();
        let removed = &snapshot_ids - &data.live;
        for id in removed.iter() {
            rebuilt.remove(id);
        }
        let added = &data.live - &snapshot_ids;
        for id in added.iter() {
            let vector = data.index.vector(id).map(<[f32]>::to_vec).ok_or_else(|| {
                Error::InternalConsistency(format!("live id {id} has no vector"))
            });
            let vector = self.check(vector)?;
            self.check(rebuilt.insert(id, &vector).map_err(|e| {
                Error::InternalConsistency(format!("reconciling id {id} failed: {e}"))
            }))?;
        }
        let dropped = data.index.tombstones();
        data.index = rebuilt;
        let live = data.len();
        info!(
            collection = %self.name,
            documents = live,
            dropped_tombstones = dropped,
            reconciled_inserts = added.len(),
            reconciled_deletes = removed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index rebuilt"
        );
        Ok(live)
    }

    /// Runs the consistency check, quarantining the collection on failure.
    pub fn validate(&self) -> Result<()> {
        let data = self.data.read();
        self.check(data.validate())
    }

    /// Drops documents the stores disagree on, rebuilds every store from the rest
    /// and lifts the quarantine. Returns the number of documents dropped.
    pub fn repair(&self) -> Result<usize> {
        let _maintenance = self.maintenance.lock();
        let mut data = self.data.write();
        let dropped = data.repair()?;
        self.quarantined.store(false, Ordering::Release);
        info!(collection = %self.name, dropped, documents = data.len(), "collection repaired");
        Ok(dropped)
    }
}

/// Database holds all collections.
#[derive(Debug, Clone, Default)]
pub struct Database {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl Database {
    /// Creates a new empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new collection. Fails if a collection with the same name already exists.
    pub fn create_collection(
        &self,
        name: impl Into<String>,
        dimension: usize,
        schema: AttributeSchema,
        config: CollectionConfig,
    ) -> Result<Collection> {
        let name = name.into();
        let mut collections = self.collections.write();
        if collections.contains_key(&name) {
            return Err(Error::CollectionExists(name));
        }
        let collection = Collection::new(name.clone(), dimension, schema, config)?;
        collections.insert(name, collection.clone());
        Ok(collection)
    }

    /// Returns a handle to the named collection.
    pub fn get_collection(&self, name: &str) -> Result<Collection> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Deletes a collection by name. Existing handles keep working on the detached data.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections
            .write()
            .remove(name)
            .map(|_| info!(collection = %name, "collection deleted"))
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Names of all collections, sorted.
    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.collections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.read().is_empty()
    }
}
