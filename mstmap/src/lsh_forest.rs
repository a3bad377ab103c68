//! LSH forest over minhash sketches.
//!
//! Tree `i` owns the sketch range `[i*k, (i+1)*k)` with `k = d / l`. Every entry is bucketed under
//! the big-endian bytes of its range, so comparing key prefixes of `4*r` bytes is the same as
//! comparing the first `r` hash values. Queries start with the full prefix and shorten it until
//! enough candidates are found.
//!
//! On-disk layout (big endian):
//!
//! | field            | size            |
//! |------------------|-----------------|
//! | magic `MSTF`     | 4               |
//! | version          | 4               |
//! | d, l, k, size    | 8 each          |
//! | store            | 1               |
//! | stored sketches  | size * d * 4    |
//! | per tree buckets | variable        |

use crate::error::Error;
use crate::minhash;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

const MAGIC: &[u8; 4] = b"MSTF";
const VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct LshForest {
    d: usize,
    l: usize,
    k: usize,
    store: bool,
    size: usize,
    clean: bool,
    hashtables: Vec<HashMap<Vec<u8>, Vec<u32>>>,
    hashranges: Vec<(usize, usize)>,
    sorted_keys: Vec<Vec<Vec<u8>>>,
    data: Vec<Vec<u32>>,
}

fn hash(range: &[u32]) -> Vec<u8> {

    let mut s: Vec<u8> = Vec::with_capacity(range.len() * 4);
    for value in range.iter() {
        s.extend_from_slice(&value.to_be_bytes());
    }

    return s;
}

fn truncated(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Format("LSH forest file is truncated"),
        _ => Error::Io(e),
    }
}

impl LshForest {

    pub fn new(d: usize, l: usize, store: bool) -> Result<Self, Error> {

        if l == 0 || l > d {
            return Err(Error::InvalidArgument(format!("l ({}) must be between 1 and d ({})", l, d)));
        }

        let k = d / l;
        let hashranges: Vec<(usize, usize)> = (0..l).map(|i| (i * k, (i + 1) * k)).collect();

        return Ok(Self {
            d,
            l,
            k,
            store,
            size: 0,
            clean: false,
            hashtables: vec![HashMap::new(); l],
            hashranges,
            sorted_keys: vec![Vec::new(); l],
            data: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        return self.size;
    }

    pub fn is_empty(&self) -> bool {
        return self.size == 0;
    }

    pub fn is_clean(&self) -> bool {
        return self.clean;
    }

    pub fn dimension(&self) -> usize {
        return self.d;
    }

    pub fn num_trees(&self) -> usize {
        return self.l;
    }

    fn check_length(&self, vec: &[u32]) -> Result<(), Error> {

        if vec.len() != self.d {
            return Err(Error::InvalidArgument(format!("sketch has length {}, forest expects {}", vec.len(), self.d)));
        }

        Ok(())
    }

    pub fn add(&mut self, vec: Vec<u32>) -> Result<u32, Error> {

        self.check_length(&vec)?;

        let id = self.size as u32;
        for (i, table) in self.hashtables.iter_mut().enumerate() {
            let (start, end) = self.hashranges[i];
            table.entry(hash(&vec[start..end])).or_default().push(id);
        }

        if self.store {
            self.data.push(vec);
        }

        self.size += 1;
        self.clean = false;

        Ok(id)
    }

    pub fn batch_add(&mut self, vecs: Vec<Vec<u32>>) -> Result<(), Error> {

        for vec in vecs.iter() {
            self.check_length(vec)?;
        }

        let first_id = self.size as u32;
        let hashranges = &self.hashranges;

        self.hashtables.par_iter_mut().enumerate().for_each(|(i, table)| {
            let (start, end) = hashranges[i];
            for (j, vec) in vecs.iter().enumerate() {
                table.entry(hash(&vec[start..end])).or_default().push(first_id + j as u32);
            }
        });

        self.size += vecs.len();
        if self.store {
            self.data.extend(vecs);
        }
        self.clean = false;

        Ok(())
    }

    ///Sorts the bucket keys of every tree. Must be called after adding and before querying.
    pub fn index(&mut self) {

        let hashtables = &self.hashtables;
        self.sorted_keys = hashtables.par_iter().map(|table| {
            let mut keys: Vec<Vec<u8>> = table.keys().cloned().collect();
            keys.sort();
            keys
        }).collect();

        self.clean = true;
    }

    pub fn get_data(&self, id: u32) -> Result<&Vec<u32>, Error> {

        if !self.store {
            return Err(Error::NotStored);
        }

        match self.data.get(id as usize) {
            Some(v) => Ok(v),
            None => Err(Error::InvalidArgument(format!("no entry with id {}", id))),
        }
    }

    fn query_internal(&self, vec: &[u32], r: usize, results: &mut BTreeSet<u32>, k: usize, exclude: Option<&HashSet<u32>>) -> bool {

        let prefix_size = r * 4;

        for (i, sorted) in self.sorted_keys.iter().enumerate() {

            let (start, _) = self.hashranges[i];
            let prefix = hash(&vec[start..start + r]);

            let j = sorted.partition_point(|key| key[..prefix_size] < prefix[..]);

            for key in sorted[j..].iter() {

                if key[..prefix_size] != prefix[..] {
                    break;
                }

                let ids = match self.hashtables[i].get(key) {
                    Some(ids) => ids,
                    None => continue,
                };

                for id in ids.iter() {
                    if let Some(exclude) = exclude {
                        if exclude.contains(id) {
                            continue;
                        }
                    }

                    results.insert(*id);
                    if results.len() >= k {
                        return true;
                    }
                }
            }
        }

        return false;
    }

    fn query_with(&self, vec: &[u32], k: usize, exclude: Option<&HashSet<u32>>) -> Result<Vec<u32>, Error> {

        self.check_length(vec)?;
        if !self.clean {
            return Err(Error::NotIndexed);
        }

        let mut results: BTreeSet<u32> = BTreeSet::new();
        if k == 0 {
            return Ok(Vec::new());
        }

        for r in (1..=self.k).rev() {
            if self.query_internal(vec, r, &mut results, k, exclude) {
                break;
            }
        }

        Ok(results.into_iter().collect())
    }

    ///Returns up to `k` candidate ids sharing the longest possible prefix with `vec`. Fewer than
    ///`k` ids come back when even single-value prefixes run out of matches.
    pub fn query(&self, vec: &[u32], k: usize) -> Result<Vec<u32>, Error> {
        return self.query_with(vec, k, None);
    }

    pub fn query_exclude(&self, vec: &[u32], exclude: &[u32], k: usize) -> Result<Vec<u32>, Error> {

        let exclude: HashSet<u32> = exclude.iter().cloned().collect();
        return self.query_with(vec, k, Some(&exclude));
    }

    pub fn query_by_id(&self, id: u32, k: usize) -> Result<Vec<u32>, Error> {

        let vec = self.get_data(id)?;
        return self.query(vec, k);
    }

    pub fn query_exclude_by_id(&self, id: u32, exclude: &[u32], k: usize) -> Result<Vec<u32>, Error> {

        let vec = self.get_data(id)?;
        return self.query_exclude(vec, exclude, k);
    }

    pub fn batch_query(&self, vecs: &[Vec<u32>], k: usize) -> Result<Vec<Vec<u32>>, Error> {

        return vecs.par_iter().map(|v| self.query(v, k)).collect();
    }

    pub fn distance_between(&self, a: &[u32], b: &[u32], weighted: bool) -> f32 {

        match weighted {
            true => minhash::weighted_distance(a, b),
            false => minhash::distance(a, b),
        }
    }

    ///Rescores `indices` against `vec` and keeps the `k` closest as `(distance, id)`, ascending.
    ///`k == 0` keeps all of them.
    pub fn linear_scan(&self, vec: &[u32], indices: &[u32], k: usize, weighted: bool) -> Result<Vec<(f32, u32)>, Error> {

        if !self.store {
            return Err(Error::NotStored);
        }

        let mut result: Vec<(f32, u32)> = Vec::with_capacity(indices.len());
        for id in indices.iter() {
            let data = self.get_data(*id)?;
            result.push((self.distance_between(vec, data, weighted), *id));
        }

        result.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        if k != 0 && k < result.len() {
            result.truncate(k);
        }

        Ok(result)
    }

    pub fn query_linear_scan(&self, vec: &[u32], k: usize, kc: usize, weighted: bool) -> Result<Vec<(f32, u32)>, Error> {

        if !self.store {
            return Err(Error::NotStored);
        }

        let candidates = self.query(vec, k * kc)?;
        return self.linear_scan(vec, &candidates, k, weighted);
    }

    pub fn query_linear_scan_exclude(&self, vec: &[u32], k: usize, exclude: &[u32], kc: usize, weighted: bool) -> Result<Vec<(f32, u32)>, Error> {

        if !self.store {
            return Err(Error::NotStored);
        }

        let candidates = self.query_exclude(vec, exclude, k * kc)?;
        return self.linear_scan(vec, &candidates, k, weighted);
    }

    pub fn query_linear_scan_by_id(&self, id: u32, k: usize, kc: usize, weighted: bool) -> Result<Vec<(f32, u32)>, Error> {

        let vec = self.get_data(id)?;
        return self.query_linear_scan(vec, k, kc, weighted);
    }

    pub fn query_linear_scan_exclude_by_id(&self, id: u32, k: usize, exclude: &[u32], kc: usize, weighted: bool) -> Result<Vec<(f32, u32)>, Error> {

        let vec = self.get_data(id)?;
        return self.query_linear_scan_exclude(vec, k, exclude, kc, weighted);
    }

    pub fn get_distance_by_id(&self, a: u32, b: u32) -> Result<f32, Error> {
        return Ok(minhash::distance(self.get_data(a)?, self.get_data(b)?));
    }

    pub fn get_weighted_distance_by_id(&self, a: u32, b: u32) -> Result<f32, Error> {
        return Ok(minhash::weighted_distance(self.get_data(a)?, self.get_data(b)?));
    }

    pub fn get_all_distances(&self, vec: &[u32]) -> Result<Vec<f32>, Error> {

        if !self.store {
            return Err(Error::NotStored);
        }

        return Ok(self.data.par_iter().map(|x| minhash::distance(vec, x)).collect());
    }

    ///Queries every stored entry for its `k` nearest neighbours. Self matches are dropped, so an
    ///entry contributes at most `k` directed edges `(from, to, distance)`.
    pub fn knn_graph(&self, k: usize, kc: usize, weighted: bool) -> Result<Vec<(u32, u32, f32)>, Error> {

        if !self.store {
            return Err(Error::NotStored);
        }

        let per_entry: Result<Vec<Vec<(u32, u32, f32)>>, Error> = (0..self.size as u32).into_par_iter().map(|i| {
            let result = self.query_linear_scan(&self.data[i as usize], k + 1, kc, weighted)?;
            Ok(result.into_iter()
                .filter(|(_, j)| *j != i)
                .take(k)
                .map(|(dist, j)| (i, j, dist))
                .collect())
        }).collect();

        return Ok(per_entry?.into_iter().flatten().collect());
    }

    pub fn clear(&mut self) {

        self.hashtables = vec![HashMap::new(); self.l];
        self.sorted_keys = vec![Vec::new(); self.l];
        self.data = Vec::new();
        self.size = 0;
        self.clean = false;
    }

    pub fn store(&self, path: &Path) -> Result<(), Error> {

        let mut w = BufWriter::new(File::create(path)?);

        w.write_all(MAGIC)?;
        w.write_u32::<BigEndian>(VERSION)?;
        w.write_u64::<BigEndian>(self.d as u64)?;
        w.write_u64::<BigEndian>(self.l as u64)?;
        w.write_u64::<BigEndian>(self.k as u64)?;
        w.write_u64::<BigEndian>(self.size as u64)?;
        w.write_u8(self.store as u8)?;

        if self.store {
            for vec in self.data.iter() {
                for value in vec.iter() {
                    w.write_u32::<BigEndian>(*value)?;
                }
            }
        }

        for table in self.hashtables.iter() {
            w.write_u64::<BigEndian>(table.len() as u64)?;
            for (key, ids) in table.iter() {
                w.write_u32::<BigEndian>(key.len() as u32)?;
                w.write_all(key)?;
                w.write_u64::<BigEndian>(ids.len() as u64)?;
                for id in ids.iter() {
                    w.write_u32::<BigEndian>(*id)?;
                }
            }
        }

        w.flush()?;
        Ok(())
    }

    ///Replaces the contents of this forest with the one stored at `path` and indexes it.
    pub fn restore(&mut self, path: &Path) -> Result<(), Error> {

        self.clear();

        let file = File::open(path)?;
        let file_len = file.metadata()?.len() as usize;
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(truncated)?;
        if &magic != MAGIC {
            return Err(Error::Format("not an LSH forest file"));
        }

        let version = r.read_u32::<BigEndian>().map_err(truncated)?;
        if version != VERSION {
            return Err(Error::Format("unsupported LSH forest version"));
        }

        let d = r.read_u64::<BigEndian>().map_err(truncated)? as usize;
        let l = r.read_u64::<BigEndian>().map_err(truncated)? as usize;
        let k = r.read_u64::<BigEndian>().map_err(truncated)? as usize;
        let size = r.read_u64::<BigEndian>().map_err(truncated)? as usize;
        let store = r.read_u8().map_err(truncated)? != 0;

        if l == 0 || l > d || k != d / l {
            return Err(Error::Format("inconsistent LSH forest parameters"));
        }

        //each tree stores at least its bucket count, each stored sketch d values
        let data_bytes = match store {
            true => size.checked_mul(d).and_then(|v| v.checked_mul(4)),
            false => Some(0),
        };
        let needed = data_bytes.and_then(|v| l.checked_mul(8).and_then(|t| v.checked_add(t)));
        match needed {
            Some(n) if n <= file_len && size <= u32::MAX as usize => {},
            _ => return Err(Error::Format("LSH forest header does not match the file size")),
        }

        let mut restored = Self::new(d, l, store)?;

        if store {
            restored.data.reserve(size);
            for _ in 0..size {
                let mut vec = vec![0u32; d];
                r.read_u32_into::<BigEndian>(&mut vec).map_err(truncated)?;
                restored.data.push(vec);
            }
        }

        for table in restored.hashtables.iter_mut() {
            let num_buckets = r.read_u64::<BigEndian>().map_err(truncated)?;
            for _ in 0..num_buckets {
                let key_len = r.read_u32::<BigEndian>().map_err(truncated)? as usize;
                if key_len != k * 4 {
                    return Err(Error::Format("bucket key has the wrong length"));
                }
                let mut key = vec![0u8; key_len];
                r.read_exact(&mut key).map_err(truncated)?;

                let num_ids = r.read_u64::<BigEndian>().map_err(truncated)? as usize;
                if num_ids > size {
                    return Err(Error::Format("bucket holds more ids than the forest has entries"));
                }
                let mut ids = vec![0u32; num_ids];
                r.read_u32_into::<BigEndian>(&mut ids).map_err(truncated)?;
                if ids.iter().any(|id| *id as usize >= size) {
                    return Err(Error::Format("bucket id out of range"));
                }
                table.insert(key, ids);
            }
        }

        restored.size = size;
        *self = restored;
        self.index();

        Ok(())
    }
}
