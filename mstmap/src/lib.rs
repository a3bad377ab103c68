//! Similarity maps of large fingerprint datasets.
//!
//! Rows of a CSV dataset (label, fingerprint, scalar properties) are streamed in chunks, encoded as
//! weighted minhash sketches and indexed in an LSH forest. The approximate kNN graph from the
//! forest is reduced to a minimum spanning tree and laid out in 2D. The coordinates can then be
//! replaced by a neighbour embedding of the raw fingerprints. Finally every property column is
//! rank normalized and written out as an interactive HTML plot with the tree drawn underneath.
//!
//! The forest and the property table are stored next to the plots so later runs can restore them
//! instead of re-reading the dataset.
//!
//! TODO
//! - [ ] file-backed sketch storage for datasets that do not fit in memory
//!
pub mod cache;
pub mod config;
pub mod data;
pub mod embedding;
pub mod error;
pub mod layout;
pub mod lsh_forest;
pub mod minhash;
pub mod pipeline;
pub mod plot;
pub mod rank;
pub mod reader;
