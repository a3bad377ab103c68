//! Pipeline configuration, read from and written to YAML.

use crate::embedding::EmbeddingConfig;
use crate::error::Error;
use crate::layout::LayoutConfig;
use serde::{Serialize, Deserialize};
use std::fs::File;
use std::io::prelude::*;
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ReaderConfig {
    pub fingerprint_length: usize,
    pub num_properties: usize,
    pub chunk_size: usize,
    pub max_chunks: Option<usize>,
    pub delimiter: char,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        return Self {
            fingerprint_length: 136,
            num_properties: 7,
            chunk_size: 20000,
            max_chunks: Some(10),
            delimiter: ',',
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MinhashConfig {
    pub seed: u64,
    pub sample_size: usize,
}

impl Default for MinhashConfig {
    fn default() -> Self {
        return Self {
            seed: 42,
            sample_size: 256,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ForestConfig {
    pub num_trees: usize,
    pub store: bool,
}

impl Default for ForestConfig {
    fn default() -> Self {
        return Self {
            num_trees: 128,
            store: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PlotConfig {
    pub colormap: String,
    pub point_scale: f32,
    pub max_point_size: f32,
    pub tree_color: String,
}

impl Default for PlotConfig {
    fn default() -> Self {
        return Self {
            colormap: "rainbow".to_string(),
            point_scale: 2.0,
            max_point_size: 20.0,
            tree_color: "#555555".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub input: String,
    pub output_dir: String,
    pub output_prefix: String,
    pub forest_filename: String,
    pub cache_filename: String,
    pub restore_index: bool,
    pub ratios: Vec<(usize, usize)>,
    pub reader: ReaderConfig,
    pub minhash: MinhashConfig,
    pub forest: ForestConfig,
    pub layout: LayoutConfig,
    pub embedding: Option<EmbeddingConfig>,
    pub plot: PlotConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        return Self {
            input: "full_fp.csv".to_string(),
            output_dir: ".".to_string(),
            output_prefix: "pdb_umap".to_string(),
            forest_filename: "pdb.dat".to_string(),
            cache_filename: "pdb.cache".to_string(),
            restore_index: false,
            ratios: vec![(2, 0)],
            reader: ReaderConfig::default(),
            minhash: MinhashConfig::default(),
            forest: ForestConfig::default(),
            layout: LayoutConfig::default(),
            embedding: Some(EmbeddingConfig::default()),
            plot: PlotConfig::default(),
        }
    }
}

impl PipelineConfig {

    pub fn from_file(filename: &str) -> Result<Self, Error> {

        let serialized = std::fs::read_to_string(filename)?;
        let deserialized: Self = serde_yaml::from_str(&serialized)?;
        deserialized.validate()?;

        return Ok(deserialized);
    }

    pub fn to_file(&self, filename: &str) -> Result<(), Error> {

        let serialized = serde_yaml::to_string(&self)?;
        let mut file = File::create(filename)?;

        file.write_all(serialized.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {

        if self.reader.chunk_size == 0 {
            return Err(Error::InvalidArgument("chunk_size must be positive".to_string()));
        }
        if !self.reader.delimiter.is_ascii() {
            return Err(Error::InvalidArgument(format!("delimiter {:?} is not an ascii character", self.reader.delimiter)));
        }
        if self.minhash.sample_size == 0 || self.minhash.sample_size % 2 != 0 {
            return Err(Error::InvalidArgument("sample_size must be a positive even number".to_string()));
        }
        if self.forest.num_trees == 0 || self.forest.num_trees > self.minhash.sample_size {
            return Err(Error::InvalidArgument(format!(
                "num_trees ({}) must be between 1 and sample_size ({})",
                self.forest.num_trees, self.minhash.sample_size)));
        }
        for (num, den) in self.ratios.iter() {
            if *num >= self.reader.num_properties || *den >= self.reader.num_properties {
                return Err(Error::InvalidArgument(format!(
                    "ratio ({}, {}) refers to a missing property column", num, den)));
            }
        }

        Ok(())
    }

    pub fn get_forest_filename(&self) -> PathBuf {
        return PathBuf::from(&self.output_dir).join(&self.forest_filename);
    }

    pub fn get_cache_filename(&self) -> PathBuf {
        return PathBuf::from(&self.output_dir).join(&self.cache_filename);
    }

    pub fn get_plot_name(&self, column: usize) -> String {
        return format!("{}{}", self.output_prefix, column);
    }

    pub fn get_data_filename(&self, column: usize) -> PathBuf {
        return PathBuf::from(&self.output_dir).join(format!("{}{}.faerun", self.output_prefix, column));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_to_file_and_back() {

        let mut config = PipelineConfig::default();
        config.reader.max_chunks = None;
        config.layout.k = 5;

        let filename = std::env::temp_dir().join("mstmap_config_roundtrip.yaml");
        let filename = filename.to_str().unwrap();
        config.to_file(filename).unwrap();

        let loaded = PipelineConfig::from_file(filename).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_config_uses_defaults() {

        let yaml = "input: data/*.csv\nrestore_index: true\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.input, "data/*.csv");
        assert!(config.restore_index);
        assert_eq!(config.reader.chunk_size, 20000);
        assert_eq!(config.forest.num_trees, 128);
    }

    #[test]
    fn invalid_configs_rejected() {

        let mut config = PipelineConfig::default();
        config.forest.num_trees = 512;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.ratios = vec![(7, 0)];
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.minhash.sample_size = 255;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.reader.delimiter = '§';
        assert!(config.validate().is_err());
        config.reader.delimiter = '\t';
        assert!(config.validate().is_ok());

        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn output_paths() {

        let mut config = PipelineConfig::default();
        config.output_dir = "/tmp/out".to_string();

        assert_eq!(config.get_plot_name(3), "pdb_umap3");
        assert_eq!(config.get_data_filename(0), PathBuf::from("/tmp/out/pdb_umap0.faerun"));
        assert_eq!(config.get_forest_filename(), PathBuf::from("/tmp/out/pdb.dat"));
    }
}
