//! End-to-end map building: read and sketch the dataset, index it in an LSH forest, lay out its
//! minimum spanning tree, optionally re-embed the points, and write one plot per property column.

use crate::cache::PropertyCache;
use crate::config::PipelineConfig;
use crate::data::{Fingerprint, PropertyTable};
use crate::embedding::{rescored_neighbors, NeighborEmbedding};
use crate::error::Error;
use crate::layout::{layout_from_lsh_forest, LayoutResult};
use crate::lsh_forest::LshForest;
use crate::minhash::Minhash;
use crate::plot::{Plot, ScatterData, ScatterOptions, TreeData, TreeOptions};
use crate::rank::{quintile_summary, rank_normalize};
use crate::reader::ChunkedReader;
use kdam::tqdm;
use log::{debug, info, warn};
use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Nearest neighbours of a labelled entry, closest first.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NearestNeighbors {
    pub query: String,
    pub labels: Vec<String>,
    pub distances: Vec<f32>,
}

impl NearestNeighbors {

    pub fn len(&self) -> usize {
        return self.labels.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.labels.is_empty();
    }

    pub fn to_yaml(&self) -> Result<String, Error> {
        return Ok(serde_yaml::to_string(self)?);
    }

    pub fn to_json(&self) -> Result<String, Error> {
        return Ok(serde_json::to_string(self)?);
    }
}

pub struct Pipeline {
    pub config: PipelineConfig,
    minhash: Minhash,
    forest: LshForest,
    fingerprints: Vec<Fingerprint>,
    table: PropertyTable,
    layout: Option<LayoutResult>,
}

impl Pipeline {

    pub fn new(config: PipelineConfig) -> Result<Self, Error> {

        config.validate()?;

        let minhash = Minhash::new(config.reader.fingerprint_length, config.minhash.seed, config.minhash.sample_size)?;
        let forest = LshForest::new(config.minhash.sample_size, config.forest.num_trees, config.forest.store)?;
        let table = PropertyTable::new(config.reader.num_properties);

        return Ok(Self {
            config,
            minhash,
            forest,
            fingerprints: Vec::new(),
            table,
            layout: None,
        })
    }

    pub fn forest(&self) -> &LshForest {
        return &self.forest;
    }

    pub fn table(&self) -> &PropertyTable {
        return &self.table;
    }

    pub fn layout_result(&self) -> Option<&LayoutResult> {
        return self.layout.as_ref();
    }

    fn keep_fingerprints(&self) -> bool {
        return self.config.embedding.is_some();
    }

    ///Builds (or restores) the forest and property table, then adds the configured ratio columns.
    pub fn index(&mut self) -> Result<(), Error> {

        let start = Instant::now();

        self.forest.clear();
        self.fingerprints.clear();
        self.table = PropertyTable::new(self.config.reader.num_properties);
        self.layout = None;

        std::fs::create_dir_all(&self.config.output_dir)?;

        let forest_filename = self.config.get_forest_filename();
        let cache_filename = self.config.get_cache_filename();

        if self.config.restore_index && forest_filename.exists() && cache_filename.exists() {
            self.restore(&forest_filename, &cache_filename)?;
        } else {
            if self.config.restore_index {
                warn!("No stored index in {}, building from {}", self.config.output_dir, self.config.input);
            }
            self.build()?;
            self.forest.store(&forest_filename)?;
            PropertyCache::write(&cache_filename, &self.table)?;
            info!("Stored forest in {} and properties in {}", forest_filename.display(), cache_filename.display());
        }

        self.forest.index();

        for (num, den) in self.config.ratios.iter() {
            let column = self.table.add_ratio_column(*num, *den)?;
            debug!("Added ratio column {} = {} / {}", column, num, den);
        }

        info!("index: {} entries, {}", self.forest.len(), start.elapsed().as_secs_f64());
        Ok(())
    }

    fn build(&mut self) -> Result<(), Error> {

        let keep = self.keep_fingerprints();
        let mut reader = ChunkedReader::open(&self.config.input, &self.config.reader)?;

        for chunk in tqdm!(reader.by_ref()) {
            let chunk = chunk?;

            let weights: Vec<Vec<f32>> = chunk.iter().map(|r| r.fingerprint.data.clone()).collect();
            let sketches = self.minhash.batch_from_weight_array(&weights)?;
            self.forest.batch_add(sketches)?;

            for record in chunk.into_iter() {
                self.table.push(&record)?;
                if keep {
                    self.fingerprints.push(record.fingerprint);
                }
            }
        }

        if reader.skipped() > 0 {
            warn!("Skipped {} malformed rows", reader.skipped());
        }

        Ok(())
    }

    fn restore(&mut self, forest_filename: &Path, cache_filename: &Path) -> Result<(), Error> {

        info!("Restoring forest from {}", forest_filename.display());
        self.forest.restore(forest_filename)?;
        self.table = PropertyCache::read(cache_filename)?;

        if self.table.len() != self.forest.len() {
            return Err(Error::InvalidArgument(format!(
                "property cache has {} entries but the forest has {}", self.table.len(), self.forest.len())));
        }

        //the embedding needs the raw fingerprints, which only the input has
        if self.keep_fingerprints() {
            let reader = ChunkedReader::open(&self.config.input, &self.config.reader)?;
            for chunk in reader {
                self.fingerprints.extend(chunk?.into_iter().map(|r| r.fingerprint));
            }
            if self.fingerprints.len() != self.forest.len() {
                return Err(Error::InvalidArgument(format!(
                    "input has {} entries but the stored forest has {}", self.fingerprints.len(), self.forest.len())));
            }
        }

        Ok(())
    }

    pub fn layout(&mut self) -> Result<(), Error> {

        if !self.forest.is_clean() {
            return Err(Error::NotIndexed);
        }

        let start = Instant::now();
        let result = layout_from_lsh_forest(&self.forest, &self.config.layout)?;
        info!("layout: {} points, {} edges, {}", result.len(), result.num_edges(), start.elapsed().as_secs_f64());

        self.layout = Some(result);
        Ok(())
    }

    ///Replaces the layout coordinates with a neighbour embedding. The tree edges are kept.
    pub fn embed(&mut self) -> Result<(), Error> {

        let config = match &self.config.embedding {
            Some(c) => c.clone(),
            None => {
                debug!("Embedding disabled, keeping tree layout coordinates");
                return Ok(());
            }
        };

        let layout = match self.layout.as_mut() {
            Some(l) => l,
            None => return Err(Error::InvalidArgument("layout must run before embed".to_string())),
        };

        let start = Instant::now();

        let neighbors = rescored_neighbors(&self.forest, &self.fingerprints, config.n_neighbors, config.candidate_factor)?;
        let coordinates = NeighborEmbedding::new(config).fit_transform(&self.fingerprints, &neighbors)?;

        layout.x = coordinates.iter().map(|c| c.0).collect();
        layout.y = coordinates.iter().map(|c| c.1).collect();

        info!("embed: {}", start.elapsed().as_secs_f64());
        Ok(())
    }

    ///Writes `<prefix><i>.html` and `<prefix><i>.faerun` for every property column. Returns the
    ///HTML paths.
    pub fn render(&self) -> Result<Vec<PathBuf>, Error> {

        let layout = match self.layout.as_ref() {
            Some(l) => l,
            None => return Err(Error::InvalidArgument("layout must run before render".to_string())),
        };

        let start = Instant::now();
        let prefix = &self.config.output_prefix;
        let output_dir = PathBuf::from(&self.config.output_dir);
        let mut written: Vec<PathBuf> = Vec::new();

        for (i, column) in self.table.columns.iter().enumerate() {

            if let Some(q) = quintile_summary(column) {
                info!("column {}: min {} q40 {} q60 {} q80 {} max {}", i, q.min, q.q40, q.q60, q.q80, q.max);
            }

            let data = ScatterData {
                x: layout.x.clone(),
                y: layout.y.clone(),
                c: rank_normalize(column),
                labels: self.table.labels.clone(),
            };
            let options = ScatterOptions {
                colormap: self.config.plot.colormap.clone(),
                point_scale: self.config.plot.point_scale,
                max_point_size: self.config.plot.max_point_size,
            };

            let mut plot = Plot::new(&i.to_string());
            plot.add_scatter(prefix, data, options)?;
            plot.add_tree(
                &format!("{}_tree", prefix),
                TreeData { from: layout.s.clone(), to: layout.t.clone() },
                TreeOptions { point_helper: prefix.clone(), color: self.config.plot.tree_color.clone() },
            )?;

            written.push(plot.plot(&output_dir, &self.config.get_plot_name(i))?);
            plot.write_data(&self.config.get_data_filename(i))?;
        }

        info!("render: {} plots, {}", written.len(), start.elapsed().as_secs_f64());
        return Ok(written);
    }

    pub fn run(&mut self) -> Result<Vec<PathBuf>, Error> {

        let start = Instant::now();

        self.index()?;
        self.layout()?;
        self.embed()?;
        let written = self.render()?;

        info!("run: {}", start.elapsed().as_secs_f64());
        return Ok(written);
    }

    ///The `k` entries closest to `label` by sketch distance, the entry itself excluded.
    pub fn query(&self, label: &str, k: usize) -> Result<NearestNeighbors, Error> {

        let id = match self.table.position(label) {
            Some(i) => i as u32,
            None => return Err(Error::LabelNotFound(label.to_string())),
        };

        let layout = &self.config.layout;
        let hits = self.forest.query_linear_scan_by_id(id, k + 1, layout.kc, layout.weighted)?;

        let mut labels: Vec<String> = Vec::with_capacity(k);
        let mut distances: Vec<f32> = Vec::with_capacity(k);
        for (distance, j) in hits.into_iter().filter(|(_, j)| *j != id).take(k) {
            labels.push(self.table.labels[j as usize].clone());
            distances.push(distance);
        }

        return Ok(NearestNeighbors {
            query: label.to_string(),
            labels,
            distances,
        });
    }
}
