//! Inverted-file (IVF) partitioned index.
//!
//! Vectors are bucketed by their nearest of `nlist` centroids. A query ranks the
//! centroids and scans only the `nprobe` closest partitions, so recall rises with
//! `nprobe` and reaches exact search at `nprobe == nlist`.
//!
//! Centroids are trained by [`IvfIndex::train`], which the collection only calls
//! from the out-of-band rebuild. Until then (or while fewer than
//! [`IVF_MIN_TRAINING_POINTS`] vectors exist) the index holds a single partition
//! and every search is an exact scan.
//!
//! For the cosine metric, centroids are trained on unit-normalized vectors so
//! coarse assignment follows angular order. Euclidean and inner product use
//! squared L2 for the coarse step.

pub mod kmeans;

use crate::config::{
    IVF_DEFAULT_NLIST, IVF_DEFAULT_NPROBE, IVF_DEFAULT_TRAINING_SAMPLE, IVF_MIN_TRAINING_POINTS,
    KMEANS_DEFAULT_ITERATIONS, KMEANS_SEED,
};
use crate::distance::{euclidean_sq_f32, DistanceMetric};
use crate::error::{Error, Result};
use crate::index::{flat_search, validate_vector, IdSet, Neighbor, SearchParams, VectorIndex};
use kmeans::{kmeans, nearest_centroid, normalize};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// IVF build and search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IvfConfig {
    /// Number of partitions (`L`).
    pub nlist: usize,
    /// Partitions probed per query (`P`, must be below `nlist`).
    pub nprobe: usize,
    /// Maximum vectors sampled for centroid training.
    pub training_sample: usize,
    /// Lloyd iterations after k-means++ seeding.
    pub kmeans_iterations: usize,
    /// Seed for sampling and k-means++.
    pub seed: u64,
}

impl Default for IvfConfig {
    fn default() -> Self {
        Self {
            nlist: IVF_DEFAULT_NLIST,
            nprobe: IVF_DEFAULT_NPROBE,
            training_sample: IVF_DEFAULT_TRAINING_SAMPLE,
            kmeans_iterations: KMEANS_DEFAULT_ITERATIONS,
            seed: KMEANS_SEED,
        }
    }
}

impl IvfConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nlist < 2 {
            return Err(Error::InvalidConfig(format!(
                "ivf nlist {} must be >= 2",
                self.nlist
            )));
        }
        if self.nprobe == 0 || self.nprobe >= self.nlist {
            return Err(Error::InvalidConfig(format!(
                "ivf nprobe {} must be in 1..{}",
                self.nprobe, self.nlist
            )));
        }
        if self.training_sample < self.nlist {
            return Err(Error::InvalidConfig(format!(
                "ivf training_sample {} must be >= nlist {}",
                self.training_sample, self.nlist
            )));
        }
        Ok(())
    }
}

/// Partitioned index with a flat f32 arena.
///
/// Slots are append-only; removal tombstones the slot. Each partition lists the
/// slots assigned to it.
#[derive(Debug)]
pub struct IvfIndex {
    pub config: IvfConfig,
    pub metric: DistanceMetric,
    pub dimension: usize,
    /// Trained centroids, `nlist * dimension` floats. Empty while untrained.
    pub centroids: Vec<f32>,
    pub lists: Vec<Vec<u32>>,
    vectors: Vec<f32>,
    slot_ids: Vec<u32>,
    deleted: Vec<bool>,
    id_to_slot: HashMap<u32, u32>,
}

impl IvfIndex {
    pub fn new(dimension: usize, metric: DistanceMetric, config: IvfConfig) -> Self {
        Self {
            config,
            metric,
            dimension,
            centroids: Vec::new(),
            lists: vec![Vec::new()],
            vectors: Vec::new(),
            slot_ids: Vec::new(),
            deleted: Vec::new(),
            id_to_slot: HashMap::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Number of partitions currently in use (1 while untrained).
    pub fn partitions(&self) -> usize {
        self.lists.len()
    }

    /// Trains centroids from `vectors` and reassigns every stored slot.
    ///
    /// Returns `Ok(false)` without training when fewer than
    /// `max(IVF_MIN_TRAINING_POINTS, nlist)` vectors are given.
    pub fn train<'a, I>(&mut self, vectors: I) -> Result<bool>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let all: Vec<&[f32]> = vectors.into_iter().collect();
        for v in &all {
            validate_vector(v, self.dimension)?;
        }
        let nlist = self.config.nlist;
        if all.len() < IVF_MIN_TRAINING_POINTS.max(nlist) {
            return Ok(false);
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let sample_size = self.config.training_sample.min(all.len());
        let mut picked = sample(&mut rng, all.len(), sample_size).into_vec();
        picked.sort_unstable();

        let spherical = self.metric == DistanceMetric::Cosine;
        let mut data = Vec::with_capacity(sample_size * self.dimension);
        for i in picked {
            let start = data.len();
            data.extend_from_slice(all[i]);
            if spherical {
                normalize(&mut data[start..]);
            }
        }
        self.centroids = kmeans(
            &data,
            self.dimension,
            nlist,
            self.config.kmeans_iterations,
            spherical,
            &mut rng,
        );

        self.lists = vec![Vec::new(); nlist];
        for slot in 0..self.slot_ids.len() as u32 {
            let list = self.assign(self.slot_vector(slot));
            self.lists[list].push(slot);
        }
        Ok(true)
    }

    #[inline]
    fn slot_vector(&self, slot: u32) -> &[f32] {
        let start = slot as usize * self.dimension;
        &self.vectors[start..start + self.dimension]
    }

    fn coarse_query(&self, v: &[f32]) -> Vec<f32> {
        let mut q = v.to_vec();
        if self.metric == DistanceMetric::Cosine {
            normalize(&mut q);
        }
        q
    }

    /// Partition for a stored vector.
    fn assign(&self, v: &[f32]) -> usize {
        if !self.is_trained() {
            return 0;
        }
        nearest_centroid(&self.centroids, self.dimension, &self.coarse_query(v))
    }

    /// Partitions ordered by centroid distance to `query`, closest first.
    fn ranked_partitions(&self, query: &[f32]) -> Vec<usize> {
        if !self.is_trained() {
            return vec![0];
        }
        let q = self.coarse_query(query);
        let mut ranked: Vec<(OrderedFloat<f32>, usize)> = self
            .centroids
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(i, c)| (OrderedFloat(euclidean_sq_f32(&q, c)), i))
            .collect();
        ranked.sort_unstable();
        ranked.into_iter().map(|(_, i)| i).collect()
    }

    fn effective_nprobe(&self, params: &SearchParams) -> usize {
        params
            .nprobe
            .unwrap_or(self.config.nprobe)
            .clamp(1, self.partitions())
    }

    fn scan<'a>(
        &'a self,
        partitions: &'a [usize],
        allowed: Option<&'a IdSet>,
    ) -> impl Iterator<Item = (u32, &'a [f32])> + 'a {
        partitions
            .iter()
            .flat_map(move |&p| self.lists[p].iter())
            .filter(move |&&slot| !self.deleted[slot as usize])
            .map(move |&slot| (self.slot_ids[slot as usize], self.slot_vector(slot)))
            .filter(move |(id, _)| allowed.map_or(true, |a| a.contains(*id)))
    }
}

impl VectorIndex for IvfIndex {
    fn kind(&self) -> &'static str {
        "ivf"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn len(&self) -> usize {
        self.id_to_slot.len()
    }

    fn tombstones(&self) -> usize {
        self.slot_ids.len() - self.id_to_slot.len()
    }

    fn needs_training(&self) -> bool {
        !self.is_trained() && self.len() >= IVF_MIN_TRAINING_POINTS.max(self.config.nlist)
    }

    fn contains(&self, id: u32) -> bool {
        self.id_to_slot.contains_key(&id)
    }

    fn vector(&self, id: u32) -> Option<&[f32]> {
        self.id_to_slot.get(&id).map(|&slot| self.slot_vector(slot))
    }

    fn ids(&self) -> IdSet {
        self.id_to_slot.keys().copied().collect()
    }

    fn insert(&mut self, id: u32, vector: &[f32]) -> Result<()> {
        validate_vector(vector, self.dimension)?;
        if self.id_to_slot.contains_key(&id) {
            return Err(Error::InternalConsistency(format!(
                "id {id} is already present in the ivf index"
            )));
        }
        let slot = self.slot_ids.len() as u32;
        let list = self.assign(vector);
        self.vectors.extend_from_slice(vector);
        self.slot_ids.push(id);
        self.deleted.push(false);
        self.id_to_slot.insert(id, slot);
        self.lists[list].push(slot);
        Ok(())
    }

    fn remove(&mut self, id: u32) -> bool {
        match self.id_to_slot.remove(&id) {
            Some(slot) => {
                self.deleted[slot as usize] = true;
                true
            }
            None => false,
        }
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        params: &SearchParams,
    ) -> Result<Vec<Neighbor>> {
        self.check_query(query, metric)?;
        let ranked = self.ranked_partitions(query);
        let probe = &ranked[..self.effective_nprobe(params)];
        Ok(flat_search(query, k, metric, self.scan(probe, None)))
    }

    fn widen(&self, params: &SearchParams) -> Option<SearchParams> {
        let nprobe = self.effective_nprobe(params);
        let partitions = self.partitions();
        (nprobe < partitions).then(|| SearchParams {
            nprobe: Some((nprobe * 2).min(partitions)),
            ..*params
        })
    }

    fn search_within(
        &self,
        query: &[f32],
        k: usize,
        metric: DistanceMetric,
        allowed: &IdSet,
        params: &SearchParams,
    ) -> Result<Vec<Neighbor>> {
        self.check_query(query, metric)?;
        let ranked = self.ranked_partitions(query);
        let wanted = k.min(allowed.len() as usize);
        let mut nprobe = self.effective_nprobe(params);
        // Widen the probe until k allowed vectors are found or every partition is scanned
        loop {
            let hits = flat_search(query, k, metric, self.scan(&ranked[..nprobe], Some(allowed)));
            if hits.len() >= wanted || nprobe == ranked.len() {
                return Ok(hits);
            }
            nprobe = (nprobe * 2).min(ranked.len());
        }
    }
}
