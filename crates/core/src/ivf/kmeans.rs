//! k-means++ seeding followed by Lloyd iterations.
//!
//! Used to train IVF centroids. With `spherical` set, points and centroids are
//! kept on the unit sphere so assignment by squared L2 matches cosine order.

use crate::distance::euclidean_sq_f32;
use rand::rngs::StdRng;
use rand::Rng;

/// Trains `k` centroids over `data` (row-major, `dim` floats per point).
///
/// Returns `k * dim` floats. When there are no more points than centroids, each
/// point becomes a centroid and the remaining slots repeat the first point.
pub fn kmeans(
    data: &[f32],
    dim: usize,
    k: usize,
    iterations: usize,
    spherical: bool,
    rng: &mut StdRng,
) -> Vec<f32> {
    let n = data.len() / dim;
    if n == 0 || k == 0 {
        return Vec::new();
    }
    let point = |i: usize| &data[i * dim..(i + 1) * dim];

    if n <= k {
        let mut centroids = Vec::with_capacity(k * dim);
        for i in 0..k {
            centroids.extend_from_slice(point(i.min(n - 1)));
        }
        return centroids;
    }

    // k-means++ initialization
    let mut centroids = vec![0.0f32; k * dim];
    let first = rng.gen_range(0..n);
    centroids[..dim].copy_from_slice(point(first));

    // Distance from each point to its nearest chosen centroid
    let mut min_dists = vec![f32::MAX; n];
    for ci in 1..k {
        let last = centroids[(ci - 1) * dim..ci * dim].to_vec();
        let mut total = 0.0f64;
        for (i, md) in min_dists.iter_mut().enumerate() {
            let d = euclidean_sq_f32(point(i), &last);
            if d < *md {
                *md = d;
            }
            total += *md as f64;
        }

        // All points coincide with existing centroids
        let chosen = if total < 1e-30 {
            rng.gen_range(0..n)
        } else {
            // Weighted selection proportional to squared distance
            let threshold = rng.gen::<f64>() * total;
            let mut cumulative = 0.0f64;
            let mut chosen = n - 1;
            for (i, &d) in min_dists.iter().enumerate() {
                cumulative += d as f64;
                if cumulative >= threshold {
                    chosen = i;
                    break;
                }
            }
            chosen
        };
        centroids[ci * dim..(ci + 1) * dim].copy_from_slice(point(chosen));
    }

    // Lloyd iterations
    let mut assignments = vec![usize::MAX; n];
    for _ in 0..iterations {
        let mut changed = false;
        for (i, slot) in assignments.iter_mut().enumerate() {
            let best = nearest_centroid(&centroids, dim, point(i));
            if *slot != best {
                *slot = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut counts = vec![0u32; k];
        let mut sums = vec![0.0f32; k * dim];
        for (i, &ci) in assignments.iter().enumerate() {
            counts[ci] += 1;
            let c = &mut sums[ci * dim..(ci + 1) * dim];
            for (acc, &x) in c.iter_mut().zip(point(i)) {
                *acc += x;
            }
        }
        for ci in 0..k {
            // Empty cluster keeps its previous centroid
            if counts[ci] == 0 {
                continue;
            }
            let inv = 1.0 / counts[ci] as f32;
            let c = &mut centroids[ci * dim..(ci + 1) * dim];
            for (dst, &s) in c.iter_mut().zip(&sums[ci * dim..(ci + 1) * dim]) {
                *dst = s * inv;
            }
            if spherical {
                normalize(c);
            }
        }
    }
    centroids
}

/// Index of the centroid closest to `v` by squared L2. Ties go to the lower index.
pub fn nearest_centroid(centroids: &[f32], dim: usize, v: &[f32]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::MAX;
    for (ci, c) in centroids.chunks_exact(dim).enumerate() {
        let d = euclidean_sq_f32(v, c);
        if d < best_dist {
            best_dist = d;
            best = ci;
        }
    }
    best
}

/// Scales `v` to unit length in place. Zero vectors are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_kmeans_separates_clusters() {
        let mut data = Vec::new();
        for i in 0..50 {
            let jitter = (i as f32 * 0.01).sin() * 0.1;
            data.extend_from_slice(&[jitter, jitter]);
            data.extend_from_slice(&[10.0 + jitter, 10.0 - jitter]);
        }
        let mut rng = StdRng::seed_from_u64(7);
        let centroids = kmeans(&data, 2, 2, 10, false, &mut rng);
        assert_eq!(centroids.len(), 4);
        let a = nearest_centroid(&centroids, 2, &[0.0, 0.0]);
        let b = nearest_centroid(&centroids, 2, &[10.0, 10.0]);
        assert_ne!(a, b, "clusters should get distinct centroids");
        let ca = &centroids[a * 2..a * 2 + 2];
        assert!(ca[0].abs() < 0.5 && ca[1].abs() < 0.5, "centroid {ca:?}");
    }

    #[test]
    fn test_fewer_points_than_centroids() {
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let mut rng = StdRng::seed_from_u64(1);
        let centroids = kmeans(&data, 2, 3, 5, false, &mut rng);
        assert_eq!(centroids, vec![1.0, 2.0, 3.0, 4.0, 3.0, 4.0]);
    }

    #[test]
    fn test_spherical_centroids_are_unit() {
        let mut data = Vec::new();
        for i in 0..40 {
            let a = i as f32 * 0.15;
            data.extend_from_slice(&[a.cos(), a.sin()]);
        }
        let mut rng = StdRng::seed_from_u64(3);
        let centroids = kmeans(&data, 2, 4, 10, true, &mut rng);
        for c in centroids.chunks_exact(2) {
            let norm = (c[0] * c[0] + c[1] * c[1]).sqrt();
            assert!((norm - 1.0).abs() < 1e-4, "norm {norm}");
        }
    }

    #[test]
    fn test_deterministic_with_seed() {
        let data: Vec<f32> = (0..200).map(|i| (i as f32 * 0.7).sin()).collect();
        let a = kmeans(&data, 4, 5, 8, false, &mut StdRng::seed_from_u64(11));
        let b = kmeans(&data, 4, 5, 8, false, &mut StdRng::seed_from_u64(11));
        assert_eq!(a, b);
    }
}
