//! Streams the fingerprint dataset in fixed-size chunks.
//!
//! Rows are headerless: `label, f_1 .. f_n, p_1 .. p_m`. A pattern such as `data/*.csv` reads every
//! matching file in sorted order as if they were one file.

use crate::config::ReaderConfig;
use crate::data::{EntryRecord, Fingerprint};
use crate::error::Error;
use glob::glob;
use log::{debug, warn};
use std::fs::File;
use std::path::PathBuf;

pub fn expand_input(pattern: &str) -> Result<Vec<PathBuf>, Error> {

    let mut filenames: Vec<PathBuf> = Vec::new();
    for entry in glob(pattern)? {
        match entry {
            Ok(path) => filenames.push(path),
            Err(e) => warn!("Cannot read {}: {}", e.path().display(), e.error()),
        }
    }
    filenames.sort();

    if filenames.is_empty() {
        return Err(Error::InvalidArgument(format!("no input files match {}", pattern)));
    }

    Ok(filenames)
}

fn parse_field(field: &[u8]) -> Result<f32, Error> {

    let s = std::str::from_utf8(field).map_err(|_| Error::Parse("field is not valid utf8".to_string()))?;
    return Ok(s.trim().parse::<f32>()?);
}

///Labels that are not valid utf8 are decoded lossily, numeric fields must be valid.
pub fn parse_record(record: &csv::ByteRecord, config: &ReaderConfig) -> Result<EntryRecord, Error> {

    let needed = 1 + config.fingerprint_length + config.num_properties;
    if record.len() < needed {
        return Err(Error::Parse(format!("expected {} fields, found {}", needed, record.len())));
    }

    let label = String::from_utf8_lossy(&record[0]).trim().to_string();

    let mut data: Vec<f32> = Vec::with_capacity(config.fingerprint_length);
    for field in record.iter().skip(1).take(config.fingerprint_length) {
        data.push(parse_field(field)?);
    }

    let mut values: Vec<f32> = Vec::with_capacity(config.num_properties);
    for field in record.iter().skip(1 + config.fingerprint_length).take(config.num_properties) {
        values.push(parse_field(field)?);
    }

    let fingerprint = Fingerprint::from_vec(data, config.fingerprint_length)?;

    Ok(EntryRecord::new(label, fingerprint, values))
}

/// Iterator over chunks of parsed records.
pub struct ChunkedReader {
    config: ReaderConfig,
    filenames: Vec<PathBuf>,
    next_file: usize,
    current: Option<csv::ByteRecordsIntoIter<File>>,
    chunks_read: usize,
    skipped: usize,
}

impl ChunkedReader {

    pub fn open(pattern: &str, config: &ReaderConfig) -> Result<Self, Error> {

        let filenames = expand_input(pattern)?;

        return Ok(Self {
            config: config.clone(),
            filenames,
            next_file: 0,
            current: None,
            chunks_read: 0,
            skipped: 0,
        })
    }

    pub fn skipped(&self) -> usize {
        return self.skipped;
    }

    fn open_next_file(&mut self) -> Result<bool, Error> {

        let filename = match self.filenames.get(self.next_file) {
            Some(f) => f.clone(),
            None => return Ok(false),
        };
        self.next_file += 1;

        debug!("Opening {}", filename.display());

        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.config.delimiter as u8)
            .from_path(&filename)?;

        self.current = Some(reader.into_byte_records());
        Ok(true)
    }

    fn read_chunk(&mut self) -> Result<Vec<EntryRecord>, Error> {

        let mut chunk: Vec<EntryRecord> = Vec::with_capacity(self.config.chunk_size);

        while chunk.len() < self.config.chunk_size {

            if self.current.is_none() && !self.open_next_file()? {
                break;
            }

            let next = match self.current.as_mut() {
                Some(records) => records.next(),
                None => None,
            };

            match next {
                None => {
                    self.current = None;
                }
                Some(Err(e)) => return Err(Error::from(e)),
                Some(Ok(record)) => {
                    match parse_record(&record, &self.config) {
                        Ok(entry) => chunk.push(entry),
                        Err(e) => {
                            self.skipped += 1;
                            warn!("Skipping row {:?}: {}", record.position().map(|p| p.line()), e);
                        }
                    }
                }
            }
        }

        Ok(chunk)
    }
}

impl Iterator for ChunkedReader {
    type Item = Result<Vec<EntryRecord>, Error>;

    fn next(&mut self) -> Option<Self::Item> {

        if let Some(max_chunks) = self.config.max_chunks {
            if self.chunks_read >= max_chunks {
                return None;
            }
        }

        match self.read_chunk() {
            Ok(chunk) if chunk.is_empty() => None,
            Ok(chunk) => {
                self.chunks_read += 1;
                Some(Ok(chunk))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(name: &str, rows: usize, fp_len: usize, num_props: usize) -> PathBuf {

        let dir = std::env::temp_dir().join("mstmap_reader");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();

        for i in 0..rows {
            let mut fields = vec![format!("E{}", i)];
            fields.extend((0..fp_len).map(|j| format!("{}", (i + j) % 5)));
            fields.extend((0..num_props).map(|j| format!("{}.5", i * j)));
            writeln!(file, "{}", fields.join(",")).unwrap();
        }

        path
    }

    fn small_config() -> ReaderConfig {
        return ReaderConfig {
            fingerprint_length: 4,
            num_properties: 2,
            chunk_size: 3,
            max_chunks: None,
            delimiter: ',',
        }
    }

    #[test]
    fn chunks_have_bounded_size() {

        let path = write_csv("bounded.csv", 10, 4, 2);
        let reader = ChunkedReader::open(path.to_str().unwrap(), &small_config()).unwrap();

        let sizes: Vec<usize> = reader.map(|c| c.unwrap().len()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 1]);
    }

    #[test]
    fn max_chunks_stops_early() {

        let path = write_csv("max_chunks.csv", 10, 4, 2);
        let mut config = small_config();
        config.max_chunks = Some(2);

        let reader = ChunkedReader::open(path.to_str().unwrap(), &config).unwrap();
        let total: usize = reader.map(|c| c.unwrap().len()).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn fields_are_split_correctly() {

        let path = write_csv("fields.csv", 2, 4, 2);
        let mut reader = ChunkedReader::open(path.to_str().unwrap(), &small_config()).unwrap();

        let chunk = reader.next().unwrap().unwrap();
        assert_eq!(chunk[1].label, "E1");
        assert_eq!(chunk[1].fingerprint.data, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(chunk[1].values, vec![0.5, 1.5]);
    }

    #[test]
    fn bad_rows_are_skipped() {

        let dir = std::env::temp_dir().join("mstmap_reader");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad_rows.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "A,1,2,3,4,5,6").unwrap();
        writeln!(file, "B,1,2").unwrap();
        writeln!(file, "C,1,x,3,4,5,6").unwrap();
        writeln!(file, "D,1,2,3,4,5,6").unwrap();
        drop(file);

        let mut reader = ChunkedReader::open(path.to_str().unwrap(), &small_config()).unwrap();
        let chunk = reader.next().unwrap().unwrap();
        let labels: Vec<&str> = chunk.iter().map(|x| x.label.as_str()).collect();

        assert_eq!(labels, vec!["A", "D"]);
        assert_eq!(reader.skipped(), 2);
        assert!(reader.next().is_none());
    }

    #[test]
    fn invalid_utf8_does_not_abort() {

        let dir = std::env::temp_dir().join("mstmap_reader");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("invalid_utf8.csv");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"A,1,2,3,4,5,6\n").unwrap();
        file.write_all(b"B\xff\xfe,1,2,3,4,5,6\n").unwrap();
        file.write_all(b"X,1,\xff,3,4,5,6\n").unwrap();
        file.write_all(b"C,1,2,3,4,5,6\n").unwrap();
        drop(file);

        let mut reader = ChunkedReader::open(path.to_str().unwrap(), &small_config()).unwrap();
        let chunk = reader.next().unwrap().unwrap();
        let labels: Vec<&str> = chunk.iter().map(|x| x.label.as_str()).collect();

        assert_eq!(labels, vec!["A", "B\u{fffd}\u{fffd}", "C"]);
        assert_eq!(reader.skipped(), 1);
    }

    #[test]
    fn glob_reads_files_in_order() {

        let dir = std::env::temp_dir().join("mstmap_reader_glob");
        std::fs::create_dir_all(&dir).unwrap();
        for (name, label) in [("b.csv", "B"), ("a.csv", "A")] {
            let mut file = File::create(dir.join(name)).unwrap();
            writeln!(file, "{},1,2,3,4,5,6", label).unwrap();
        }

        let pattern = dir.join("*.csv");
        let reader = ChunkedReader::open(pattern.to_str().unwrap(), &small_config()).unwrap();
        let labels: Vec<String> = reader.flat_map(|c| c.unwrap()).map(|x| x.label).collect();

        assert_eq!(labels, vec!["A", "B"]);
    }

    #[test]
    fn missing_input_is_error() {

        assert!(ChunkedReader::open("/nonexistent/mstmap/*.csv", &small_config()).is_err());
    }
}
