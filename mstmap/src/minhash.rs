//! Minhash sketches for fingerprints.
//!
//! Weighted vectors are encoded with consistent weighted sampling (Ioffe, 2010). Each sample
//! contributes the pair `(k*, t*)`, so a sketch of `sample_size` values holds `sample_size / 2`
//! samples. Binary vectors use classic permutation minhashing with `sample_size` hash functions.

use crate::error::Error;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use rayon::prelude::*;

const PRIME: u128 = (1 << 61) - 1;
const MAX_HASH: u128 = u32::MAX as u128;

#[derive(Debug, Clone)]
pub struct Minhash {
    pub dimension: usize,
    pub seed: u64,
    pub sample_size: usize,
    perms_a: Vec<u64>,
    perms_b: Vec<u64>,
    rs: Vec<f64>,
    ln_cs: Vec<f64>,
    betas: Vec<f64>,
}

/// Gamma(2, 1) as the sum of two unit exponentials.
fn sample_gamma2(rng: &mut StdRng) -> f64 {

    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(f64::EPSILON..1.0);
    return -(u1 * u2).ln();
}

impl Minhash {

    pub fn new(dimension: usize, seed: u64, sample_size: usize) -> Result<Self, Error> {

        if sample_size == 0 || sample_size % 2 != 0 {
            return Err(Error::InvalidArgument(format!("sample_size must be positive and even, got {}", sample_size)));
        }

        let mut rng = StdRng::seed_from_u64(seed);

        let mut perms_a: Vec<u64> = Vec::with_capacity(sample_size);
        let mut perms_b: Vec<u64> = Vec::with_capacity(sample_size);
        for _ in 0..sample_size {
            perms_a.push(rng.gen_range(1..PRIME as u64));
            perms_b.push(rng.gen_range(0..PRIME as u64));
        }

        let n = (sample_size / 2) * dimension;
        let mut rs: Vec<f64> = Vec::with_capacity(n);
        let mut ln_cs: Vec<f64> = Vec::with_capacity(n);
        let mut betas: Vec<f64> = Vec::with_capacity(n);
        for _ in 0..n {
            rs.push(sample_gamma2(&mut rng));
            ln_cs.push(sample_gamma2(&mut rng).ln());
            betas.push(rng.gen_range(0.0..1.0));
        }

        return Ok(Self {
            dimension,
            seed,
            sample_size,
            perms_a,
            perms_b,
            rs,
            ln_cs,
            betas,
        })
    }

    pub fn num_weighted_samples(&self) -> usize {
        return self.sample_size / 2;
    }

    pub fn from_weight_array(&self, weights: &[f32]) -> Result<Vec<u32>, Error> {

        if weights.len() != self.dimension {
            return Err(Error::InvalidArgument(format!(
                "weight array has length {}, encoder dimension is {}", weights.len(), self.dimension)));
        }

        let mut sketch: Vec<u32> = vec![u32::MAX; self.sample_size];

        for s in 0..self.num_weighted_samples() {

            let mut min_ln_a = f64::INFINITY;
            let mut best: Option<(u32, i64)> = None;

            for (k, weight) in weights.iter().enumerate() {

                if *weight <= 0.0 || !weight.is_finite() {
                    continue;
                }

                let idx = s * self.dimension + k;
                let r = self.rs[idx];
                let beta = self.betas[idx];

                let t = ((*weight as f64).ln() / r + beta).floor();
                let ln_y = r * (t - beta);
                let ln_a = self.ln_cs[idx] - ln_y - r;

                if ln_a < min_ln_a {
                    min_ln_a = ln_a;
                    best = Some((k as u32, t as i64));
                }
            }

            if let Some((k_star, t_star)) = best {
                sketch[2 * s] = k_star;
                sketch[2 * s + 1] = t_star as i32 as u32;
            }
        }

        Ok(sketch)
    }

    pub fn batch_from_weight_array(&self, vecs: &[Vec<f32>]) -> Result<Vec<Vec<u32>>, Error> {

        return vecs.par_iter().map(|v| self.from_weight_array(v)).collect();
    }

    pub fn from_sparse_binary_array(&self, indices: &[u32]) -> Vec<u32> {

        let mut sketch: Vec<u32> = vec![u32::MAX; self.sample_size];

        for index in indices.iter() {
            for i in 0..self.sample_size {
                let h = ((self.perms_a[i] as u128 * *index as u128 + self.perms_b[i] as u128) % PRIME) & MAX_HASH;
                let h = h as u32;
                if h < sketch[i] {
                    sketch[i] = h;
                }
            }
        }

        return sketch;
    }

    pub fn from_binary_array(&self, bits: &[u8]) -> Vec<u32> {

        let indices: Vec<u32> = bits.iter()
            .enumerate()
            .filter(|(_, b)| **b != 0)
            .map(|(i, _)| i as u32)
            .collect();

        return self.from_sparse_binary_array(&indices);
    }

    pub fn batch_from_sparse_binary_array(&self, vecs: &[Vec<u32>]) -> Vec<Vec<u32>> {

        return vecs.par_iter().map(|v| self.from_sparse_binary_array(v)).collect();
    }
}

/// Estimated Jaccard distance between two unweighted sketches.
pub fn distance(a: &[u32], b: &[u32]) -> f32 {

    let d = a.len().min(b.len());
    if d == 0 {
        return 1.0;
    }

    let intersect = a.iter().zip(b.iter()).filter(|(x, y)| x == y).count();
    return 1.0 - intersect as f32 / d as f32;
}

/// Estimated weighted Jaccard distance between two weighted sketches. Only complete `(k*, t*)`
/// pairs count as a match.
pub fn weighted_distance(a: &[u32], b: &[u32]) -> f32 {

    let d = a.len().min(b.len());
    if d < 2 {
        return 1.0;
    }

    let mut intersect = 0;
    for i in (0..d - 1).step_by(2) {
        if a[i] == b[i] && a[i + 1] == b[i + 1] {
            intersect += 1;
        }
    }

    return 1.0 - 2.0 * intersect as f32 / (d - d % 2) as f32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn identical_inputs_identical_sketches() {

        let enc = Minhash::new(16, 42, 64).unwrap();
        let v: Vec<f32> = (0..16).map(|x| (x % 4) as f32).collect();

        let a = enc.from_weight_array(&v).unwrap();
        let b = enc.from_weight_array(&v).unwrap();

        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert_approx_eq!(weighted_distance(&a, &b), 0.0);
    }

    #[test]
    fn same_seed_same_encoder() {

        let v: Vec<f32> = (0..16).map(|x| x as f32 * 0.5).collect();
        let a = Minhash::new(16, 7, 32).unwrap().from_weight_array(&v).unwrap();
        let b = Minhash::new(16, 7, 32).unwrap().from_weight_array(&v).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_vector_gives_max_sketch() {

        let enc = Minhash::new(8, 42, 16).unwrap();
        let sketch = enc.from_weight_array(&[0.0; 8]).unwrap();
        assert!(sketch.iter().all(|x| *x == u32::MAX));
    }

    #[test]
    fn wrong_dimension_rejected() {

        let enc = Minhash::new(8, 42, 16).unwrap();
        assert!(enc.from_weight_array(&[1.0; 7]).is_err());
        assert!(Minhash::new(8, 42, 15).is_err());
    }

    #[test]
    fn weighted_distance_tracks_similarity() {

        let enc = Minhash::new(32, 42, 512).unwrap();
        let base: Vec<f32> = (0..32).map(|x| 1.0 + (x % 7) as f32).collect();

        let mut close = base.clone();
        close[0] += 1.0;

        let far: Vec<f32> = (0..32).map(|x| if x < 16 { 0.0 } else { 10.0 }).collect();

        let sb = enc.from_weight_array(&base).unwrap();
        let sc = enc.from_weight_array(&close).unwrap();
        let sf = enc.from_weight_array(&far).unwrap();

        let d_close = weighted_distance(&sb, &sc);
        let d_far = weighted_distance(&sb, &sf);

        assert!(d_close < d_far);
        assert!(d_close >= 0.0 && d_far <= 1.0);
    }

    #[test]
    fn binary_minhash_estimates_jaccard() {

        let enc = Minhash::new(0, 42, 1024).unwrap();

        let a: Vec<u32> = (0..100).collect();
        let b: Vec<u32> = (50..150).collect();

        let sa = enc.from_sparse_binary_array(&a);
        let sb = enc.from_sparse_binary_array(&b);

        // true Jaccard distance is 1 - 50/150
        let d = distance(&sa, &sb);
        assert!((d - 2.0 / 3.0).abs() < 0.08, "distance {}", d);
    }

    #[test]
    fn dense_and_sparse_binary_agree() {

        let enc = Minhash::new(0, 1, 32).unwrap();
        let bits = [0u8, 1, 0, 1, 1, 0];
        assert_eq!(enc.from_binary_array(&bits), enc.from_sparse_binary_array(&[1, 3, 4]));
    }

    #[test]
    fn batch_matches_single() {

        let enc = Minhash::new(4, 42, 8).unwrap();
        let vecs = vec![vec![1.0, 2.0, 0.0, 1.0], vec![0.0, 0.0, 3.0, 1.0]];

        let batch = enc.batch_from_weight_array(&vecs).unwrap();
        assert_eq!(batch[1], enc.from_weight_array(&vecs[1]).unwrap());
    }

    #[test]
    fn sparse_batch_matches_single() {

        let enc = Minhash::new(0, 3, 16).unwrap();
        let vecs = vec![vec![1, 5, 9], vec![], vec![2, 5]];

        let batch = enc.batch_from_sparse_binary_array(&vecs);
        assert_eq!(batch.len(), 3);
        for (i, sketch) in batch.iter().enumerate() {
            assert_eq!(*sketch, enc.from_sparse_binary_array(&vecs[i]));
        }
        assert!(batch[1].iter().all(|h| *h == u32::MAX));
    }
}
