use mstmap::config::PipelineConfig;
use mstmap::embedding::EmbeddingConfig;
use mstmap::pipeline::Pipeline;
use mstmap::plot::Plot;
use std::io::Write;
use std::path::PathBuf;

const NUM_ROWS: usize = 60;
const FINGERPRINT_LENGTH: usize = 12;

///Three loose clusters of fingerprints followed by three property columns, plus one malformed
///row that the reader should skip.
fn write_dataset(dir: &PathBuf) -> PathBuf {

    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join("full_fp.csv");
    let mut file = std::fs::File::create(&path).unwrap();

    for i in 0..NUM_ROWS {
        let cluster = i % 3;
        let fingerprint: Vec<String> = (0..FINGERPRINT_LENGTH).map(|j| {
            let base = if j / 4 == cluster { 10.0 } else { 1.0 };
            format!("{}", base + ((i * 13 + j * 5) % 7) as f32)
        }).collect();

        writeln!(file, "PDB{},{},{},{},{}", i, fingerprint.join(","), 100 + i, i % 4, 3 * i + 1).unwrap();

        if i == 10 {
            writeln!(file, "BROKEN,1,2,not_a_number").unwrap();
        }
    }

    return path;
}

fn config_for(name: &str) -> PipelineConfig {

    let dir = std::env::temp_dir().join(name);
    let input = write_dataset(&dir);

    let mut config = PipelineConfig::default();
    config.input = input.to_str().unwrap().to_string();
    config.output_dir = dir.join("out").to_str().unwrap().to_string();
    config.reader.fingerprint_length = FINGERPRINT_LENGTH;
    config.reader.num_properties = 3;
    config.reader.chunk_size = 16;
    config.reader.max_chunks = None;
    config.minhash.sample_size = 64;
    config.forest.num_trees = 16;
    config.layout.k = 5;
    config.layout.kc = 10;
    config.layout.fme_iterations = 20;

    let mut embedding = EmbeddingConfig::default();
    embedding.n_neighbors = 5;
    embedding.n_epochs = 30;
    config.embedding = Some(embedding);

    return config;
}

#[test]
fn full_run_writes_plots() {

    let config = config_for("mstmap_it_full_run");
    let output_dir = PathBuf::from(&config.output_dir);

    let mut pipeline = Pipeline::new(config.clone()).unwrap();
    let written = pipeline.run().unwrap();

    //three property columns plus the default ratio column
    assert_eq!(written.len(), 4);
    assert_eq!(pipeline.table().len(), NUM_ROWS);
    assert!(output_dir.join("pdb.dat").exists());
    assert!(output_dir.join("pdb.cache").exists());

    let layout = pipeline.layout_result().unwrap();
    assert_eq!(layout.len(), NUM_ROWS);
    assert!(layout.x.iter().chain(layout.y.iter()).all(|v| v.is_finite()));
    assert!(layout.num_edges() < NUM_ROWS);

    for i in 0..4 {
        let html = output_dir.join(format!("pdb_umap{}.html", i));
        assert!(written.contains(&html));

        let contents = std::fs::read_to_string(&html).unwrap();
        assert!(contents.contains("PDB0"));

        let data = Plot::read_data(&config.get_data_filename(i)).unwrap();
        assert_eq!(data.scatters.len(), 1);
        assert_eq!(data.trees.len(), 1);
        assert_eq!(data.scatters[0].data.len(), NUM_ROWS);
        assert!(data.scatters[0].data.c.iter().all(|c| *c > 0.0 && *c <= 1.0));
    }

    let neighbors = pipeline.query("PDB3", 4).unwrap();
    assert!(!neighbors.is_empty());
    assert!(!neighbors.labels.contains(&"PDB3".to_string()));
}

#[test]
fn plot_task_restores_index() {

    let mut config = config_for("mstmap_it_restore");
    config.embedding = None;

    let mut first = Pipeline::new(config.clone()).unwrap();
    first.run().unwrap();

    config.restore_index = true;
    let mut second = Pipeline::new(config).unwrap();
    second.run().unwrap();

    assert_eq!(second.table(), first.table());
    assert_eq!(second.layout_result().unwrap().s, first.layout_result().unwrap().s);
    assert_eq!(second.layout_result().unwrap().t, first.layout_result().unwrap().t);
}

#[test]
fn embedding_replaces_coordinates_and_keeps_edges() {

    let config = config_for("mstmap_it_embed");

    let mut pipeline = Pipeline::new(config.clone()).unwrap();
    pipeline.index().unwrap();
    pipeline.layout().unwrap();
    let before = pipeline.layout_result().unwrap().clone();

    pipeline.embed().unwrap();
    let after = pipeline.layout_result().unwrap();

    assert_eq!(after.x.len(), NUM_ROWS);
    assert_eq!(after.y.len(), NUM_ROWS);
    assert_ne!(after.x, before.x);
    assert_ne!(after.y, before.y);
    assert_eq!(after.s, before.s);
    assert_eq!(after.t, before.t);
    assert_eq!(after.degrees, before.degrees);

    let mut config = config;
    config.embedding = None;

    let mut pipeline = Pipeline::new(config).unwrap();
    pipeline.index().unwrap();
    pipeline.layout().unwrap();
    let before = pipeline.layout_result().unwrap().clone();

    pipeline.embed().unwrap();
    assert_eq!(*pipeline.layout_result().unwrap(), before);
}
