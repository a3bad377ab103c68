//! 2D neighbour embedding over raw fingerprints.
//!
//! Builds a fuzzy neighbour graph (per-point `rho`/`sigma` calibration, then symmetrized with
//! `a + b - ab`) and lays it out by stochastic gradient descent. Attraction acts along graph
//! edges and repulsion works through negative sampling, using the low-dimensional kernel
//! `1 / (1 + a d^(2b))`. The optimization is sequential and seeded, so a given input always gives
//! the same coordinates.

use crate::data::Fingerprint;
use crate::error::Error;
use crate::lsh_forest::LshForest;
use kdam::tqdm;
use log::debug;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Serialize, Deserialize};
use std::collections::HashMap;

const SMOOTH_K_TOLERANCE: f32 = 1e-5;
const MIN_K_DIST_SCALE: f32 = 1e-3;
const NEGATIVE_SAMPLE_RATE: usize = 5;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub n_neighbors: usize,
    pub n_epochs: usize,
    pub min_dist: f32,
    pub spread: f32,
    pub learning_rate: f32,
    pub candidate_factor: usize,
    pub seed: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        return Self {
            n_neighbors: 10,
            n_epochs: 200,
            min_dist: 0.1,
            spread: 1.0,
            learning_rate: 1.0,
            candidate_factor: 10,
            seed: 42,
        }
    }
}

/// Per row, the ids and Euclidean distances of its nearest neighbours (self excluded), ascending.
pub type NeighborLists = Vec<Vec<(u32, f32)>>;

///Exact neighbours by exhaustive comparison. Quadratic, so only for small inputs.
pub fn brute_force_neighbors(fingerprints: &[Fingerprint], k: usize) -> NeighborLists {

    return (0..fingerprints.len()).into_par_iter().map(|i| {
        let mut row: Vec<(u32, f32)> = fingerprints.iter().enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(j, fp)| (j as u32, fingerprints[i].distance(fp)))
            .collect();
        row.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        row.truncate(k);
        row
    }).collect();
}

///Neighbours from LSH forest candidates, rescored by Euclidean distance on the raw fingerprints.
pub fn rescored_neighbors(forest: &LshForest, fingerprints: &[Fingerprint], k: usize, candidate_factor: usize) -> Result<NeighborLists, Error> {

    if forest.len() != fingerprints.len() {
        return Err(Error::InvalidArgument(format!(
            "forest has {} entries but {} fingerprints were given", forest.len(), fingerprints.len())));
    }

    return (0..fingerprints.len()).into_par_iter().map(|i| {
        let candidates = forest.query_by_id(i as u32, (k + 1) * candidate_factor.max(1))?;
        let mut row: Vec<(u32, f32)> = candidates.into_iter()
            .filter(|j| *j as usize != i)
            .map(|j| (j, fingerprints[i].distance(&fingerprints[j as usize])))
            .collect();
        row.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        row.truncate(k);
        Ok(row)
    }).collect();
}

///Least-squares fit of `1 / (1 + a x^(2b))` to the offset exponential defined by `spread` and
///`min_dist`, by coarse-to-fine grid search.
pub fn find_ab_params(spread: f32, min_dist: f32) -> (f32, f32) {

    let xs: Vec<f32> = (0..300).map(|i| i as f32 * spread * 3.0 / 299.0).collect();
    let ys: Vec<f32> = xs.iter().map(|x| {
        if *x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() }
    }).collect();

    let error = |a: f32, b: f32| -> f32 {
        xs.iter().zip(ys.iter()).map(|(x, y)| {
            let f = 1.0 / (1.0 + a * x.powf(2.0 * b));
            (f - y) * (f - y)
        }).sum()
    };

    let (mut best_a, mut best_b) = (1.0f32, 1.0f32);
    let (mut a_range, mut b_range) = ((0.01f32, 10.0f32), (0.1f32, 3.0f32));

    for _ in 0..4 {
        let mut best_error = f32::MAX;
        for i in 0..=40 {
            let a = a_range.0 + (a_range.1 - a_range.0) * i as f32 / 40.0;
            for j in 0..=40 {
                let b = b_range.0 + (b_range.1 - b_range.0) * j as f32 / 40.0;
                let e = error(a, b);
                if e < best_error {
                    best_error = e;
                    best_a = a;
                    best_b = b;
                }
            }
        }

        let a_step = (a_range.1 - a_range.0) / 40.0;
        let b_step = (b_range.1 - b_range.0) / 40.0;
        a_range = ((best_a - 2.0 * a_step).max(1e-3), best_a + 2.0 * a_step);
        b_range = ((best_b - 2.0 * b_step).max(1e-2), best_b + 2.0 * b_step);
    }

    return (best_a, best_b);
}

///Finds `(rho, sigma)` for one row so that its membership strengths sum to `log2(k)`.
fn smooth_knn_dist(distances: &[f32], mean_distance: f32) -> (f32, f32) {

    let k = distances.len();
    if k == 0 {
        return (0.0, 1.0);
    }

    let target = (k as f32).log2().max(1e-3);
    let rho = distances.iter().cloned().find(|d| *d > 0.0).unwrap_or(0.0);

    let (mut lo, mut hi, mut mid) = (0.0f32, f32::INFINITY, 1.0f32);
    for _ in 0..64 {
        let psum: f32 = distances.iter().map(|d| {
            let d = d - rho;
            if d > 0.0 { (-d / mid).exp() } else { 1.0 }
        }).sum();

        if (psum - target).abs() < SMOOTH_K_TOLERANCE {
            break;
        }

        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi == f32::INFINITY { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }

    let mean_row: f32 = distances.iter().sum::<f32>() / k as f32;
    let floor = match rho > 0.0 {
        true => MIN_K_DIST_SCALE * mean_row,
        false => MIN_K_DIST_SCALE * mean_distance,
    };

    return (rho, mid.max(floor).max(f32::MIN_POSITIVE));
}

///Symmetrized membership strengths as undirected edges `(i, j, w)` with `i < j`.
pub fn fuzzy_graph(neighbors: &NeighborLists) -> Vec<(u32, u32, f32)> {

    let total: f32 = neighbors.iter().flat_map(|r| r.iter().map(|x| x.1)).sum();
    let count: usize = neighbors.iter().map(|r| r.len()).sum();
    let mean_distance = if count > 0 { total / count as f32 } else { 0.0 };

    let mut directed: HashMap<(u32, u32), (f32, f32)> = HashMap::new();

    for (i, row) in neighbors.iter().enumerate() {
        let distances: Vec<f32> = row.iter().map(|x| x.1).collect();
        let (rho, sigma) = smooth_knn_dist(&distances, mean_distance);

        for (j, d) in row.iter() {
            let i = i as u32;
            if *j == i {
                continue;
            }
            let w = match d - rho > 0.0 {
                true => (-(d - rho) / sigma).exp(),
                false => 1.0,
            };
            if i < *j {
                directed.entry((i, *j)).or_insert((0.0, 0.0)).0 = w;
            } else {
                directed.entry((*j, i)).or_insert((0.0, 0.0)).1 = w;
            }
        }
    }

    let mut edges: Vec<(u32, u32, f32)> = directed.into_iter()
        .map(|((i, j), (a, b))| (i, j, a + b - a * b))
        .filter(|(_, _, w)| *w > 0.0)
        .collect();
    edges.sort_by(|x, y| x.0.cmp(&y.0).then(x.1.cmp(&y.1)));

    return edges;
}

fn clip(v: f32) -> f32 {
    return v.clamp(-4.0, 4.0);
}

pub struct NeighborEmbedding {
    pub config: EmbeddingConfig,
    a: f32,
    b: f32,
}

impl NeighborEmbedding {

    pub fn new(config: EmbeddingConfig) -> Self {

        let (a, b) = find_ab_params(config.spread, config.min_dist);
        debug!("Embedding curve parameters a = {:.4}, b = {:.4}", a, b);

        return Self { config, a, b };
    }

    pub fn curve_params(&self) -> (f32, f32) {
        return (self.a, self.b);
    }

    pub fn fit_transform(&self, fingerprints: &[Fingerprint], neighbors: &NeighborLists) -> Result<Vec<(f32, f32)>, Error> {

        let n = fingerprints.len();
        if neighbors.len() != n {
            return Err(Error::InvalidArgument(format!(
                "{} neighbour lists for {} fingerprints", neighbors.len(), n)));
        }
        for row in neighbors.iter() {
            if row.iter().any(|(j, _)| *j as usize >= n) {
                return Err(Error::InvalidArgument("neighbour id out of range".to_string()));
            }
        }

        if n == 0 {
            return Ok(Vec::new());
        }
        if n == 1 {
            return Ok(vec![(0.0, 0.0)]);
        }

        let mut edges = fuzzy_graph(neighbors);

        let n_epochs = self.config.n_epochs.max(1);
        let max_weight = edges.iter().map(|e| e.2).fold(0.0f32, f32::max);
        edges.retain(|e| e.2 >= max_weight / n_epochs as f32);
        debug!("Embedding graph has {} edges", edges.len());

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut coords: Vec<[f32; 2]> = (0..n).map(|_| [rng.gen_range(-10.0..10.0), rng.gen_range(-10.0..10.0)]).collect();

        let epochs_per_sample: Vec<f32> = edges.iter().map(|e| max_weight / e.2).collect();
        let epochs_per_negative_sample: Vec<f32> = epochs_per_sample.iter().map(|x| x / NEGATIVE_SAMPLE_RATE as f32).collect();
        let mut epoch_of_next_sample: Vec<f32> = epochs_per_sample.clone();
        let mut epoch_of_next_negative_sample: Vec<f32> = epochs_per_negative_sample.clone();

        let (a, b) = (self.a, self.b);

        for epoch in tqdm!(0..n_epochs) {

            let alpha = self.config.learning_rate * (1.0 - epoch as f32 / n_epochs as f32);
            let epoch_f = epoch as f32;

            for (e, (i, j, _)) in edges.iter().enumerate() {

                if epoch_of_next_sample[e] > epoch_f {
                    continue;
                }

                let (i, j) = (*i as usize, *j as usize);

                let diff = [coords[i][0] - coords[j][0], coords[i][1] - coords[j][1]];
                let dist_sq = diff[0] * diff[0] + diff[1] * diff[1];

                if dist_sq > 0.0 {
                    let grad_coeff = -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0);
                    for d in 0..2 {
                        let grad = clip(grad_coeff * diff[d]) * alpha;
                        coords[i][d] += grad;
                        coords[j][d] -= grad;
                    }
                }

                epoch_of_next_sample[e] += epochs_per_sample[e];

                let n_neg = ((epoch_f - epoch_of_next_negative_sample[e]) / epochs_per_negative_sample[e]).max(0.0) as usize;

                for _ in 0..n_neg {
                    let k = rng.gen_range(0..n);
                    if k == i {
                        continue;
                    }

                    let diff = [coords[i][0] - coords[k][0], coords[i][1] - coords[k][1]];
                    let dist_sq = diff[0] * diff[0] + diff[1] * diff[1];

                    for d in 0..2 {
                        let grad = match dist_sq > 0.0 {
                            true => {
                                let grad_coeff = 2.0 * b / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0));
                                clip(grad_coeff * diff[d])
                            }
                            false => 4.0,
                        };
                        coords[i][d] += grad * alpha;
                    }
                }

                epoch_of_next_negative_sample[e] += n_neg as f32 * epochs_per_negative_sample[e];
            }
        }

        return Ok(coords.into_iter().map(|c| (c[0], c[1])).collect());
    }
}
