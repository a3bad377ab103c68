//! Binary cache of labels and property columns, so later runs can skip re-reading the dataset for
//! them.
//!
//! Layout (big endian): `num_entries: u64`, `num_columns: u64`, then every label as
//! `len: u32` + utf8 bytes, then each column as `num_entries` f32 values.

use crate::data::PropertyTable;
use crate::error::Error;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

pub const ENTRIES_SIZE: usize = 8;
pub const COLUMNS_SIZE: usize = 8;
pub const HEADER_SIZE: usize = ENTRIES_SIZE + COLUMNS_SIZE;

pub const MAX_LABEL_LENGTH: usize = 1 << 16;
pub const MAX_COLUMNS: usize = 1 << 16;

pub struct PropertyCache {}

fn truncated(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Format("property cache is truncated"),
        _ => Error::Io(e),
    }
}

impl PropertyCache {

    pub fn write(path: &Path, table: &PropertyTable) -> Result<(), Error> {

        if table.num_columns() > MAX_COLUMNS {
            return Err(Error::InvalidArgument(format!("too many property columns: {}", table.num_columns())));
        }

        for column in table.columns.iter() {
            if column.len() != table.len() {
                return Err(Error::InvalidArgument("property columns differ in length from labels".to_string()));
            }
        }

        let mut w = BufWriter::new(File::create(path)?);

        w.write_u64::<BigEndian>(table.len() as u64)?;
        w.write_u64::<BigEndian>(table.num_columns() as u64)?;

        for label in table.labels.iter() {
            let bytes = label.as_bytes();
            if bytes.len() > MAX_LABEL_LENGTH {
                return Err(Error::InvalidArgument(format!("label too long: {} bytes", bytes.len())));
            }
            w.write_u32::<BigEndian>(bytes.len() as u32)?;
            w.write_all(bytes)?;
        }

        for column in table.columns.iter() {
            for value in column.iter() {
                w.write_f32::<BigEndian>(*value)?;
            }
        }

        w.flush()?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<PropertyTable, Error> {

        let file = File::open(path)?;
        let file_len = file.metadata()?.len() as usize;
        let mut r = BufReader::new(file);

        let num_entries = r.read_u64::<BigEndian>().map_err(truncated)? as usize;
        let num_columns = r.read_u64::<BigEndian>().map_err(truncated)? as usize;

        //every label takes at least its length prefix and every value 4 bytes
        let body = file_len.saturating_sub(HEADER_SIZE);
        let label_bytes = num_entries.checked_mul(4);
        let value_bytes = num_entries.checked_mul(num_columns).and_then(|v| v.checked_mul(4));
        match label_bytes.zip(value_bytes).and_then(|(a, b)| a.checked_add(b)) {
            Some(needed) if needed <= body => {},
            _ => return Err(Error::Format("property cache header does not match the file size")),
        }
        if num_columns > MAX_COLUMNS {
            return Err(Error::Format("property cache has too many columns"));
        }

        let mut labels: Vec<String> = Vec::with_capacity(num_entries);
        for _ in 0..num_entries {
            let len = r.read_u32::<BigEndian>().map_err(truncated)? as usize;
            if len > MAX_LABEL_LENGTH {
                return Err(Error::Format("label length out of range"));
            }
            let mut buf = vec![0u8; len];
            r.read_exact(&mut buf).map_err(truncated)?;
            let label = String::from_utf8(buf).map_err(|_| Error::Format("label is not valid utf8"))?;
            labels.push(label);
        }

        let mut columns: Vec<Vec<f32>> = Vec::with_capacity(num_columns);
        for _ in 0..num_columns {
            let mut column = vec![0f32; num_entries];
            r.read_f32_into::<BigEndian>(&mut column).map_err(truncated)?;
            columns.push(column);
        }

        return Ok(PropertyTable { labels, columns });
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::data::EntryRecord;

    #[test]
    fn small_random_cache() {

        let mut table = PropertyTable::new(7);
        for _ in 0..1000 {
            table.push(&EntryRecord::random(4, 7)).unwrap();
        }
        table.add_ratio_column(2, 0).unwrap();

        let path = std::env::temp_dir().join("mstmap_small_random.cache");
        PropertyCache::write(&path, &table).unwrap();

        let loaded = PropertyCache::read(&path).unwrap();
        assert_eq!(loaded, table);
    }

    #[test]
    fn empty_table() {

        let table = PropertyTable::new(3);
        let path = std::env::temp_dir().join("mstmap_empty.cache");
        PropertyCache::write(&path, &table).unwrap();

        let loaded = PropertyCache::read(&path).unwrap();
        assert_eq!(loaded.len(), 0);
        assert_eq!(loaded.num_columns(), 3);
    }

    #[test]
    fn truncated_cache_is_error() {

        let mut table = PropertyTable::new(2);
        table.push(&EntryRecord::random(4, 2)).unwrap();

        let path = std::env::temp_dir().join("mstmap_truncated.cache");
        PropertyCache::write(&path, &table).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 4 + table.labels[0].len() + 2 * 4);
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        assert!(matches!(PropertyCache::read(&path), Err(Error::Format(_))));
    }

    #[test]
    fn oversized_header_is_error() {

        let path = std::env::temp_dir().join("mstmap_oversized.cache");

        let mut bytes: Vec<u8> = Vec::new();
        bytes.write_u64::<BigEndian>(0).unwrap();
        bytes.write_u64::<BigEndian>(1 << 62).unwrap();
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(PropertyCache::read(&path), Err(Error::Format(_))));

        let mut bytes: Vec<u8> = Vec::new();
        bytes.write_u64::<BigEndian>(1 << 40).unwrap();
        bytes.write_u64::<BigEndian>(3).unwrap();
        bytes.extend_from_slice(&[0u8; 64]);
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(PropertyCache::read(&path), Err(Error::Format(_))));
    }
}
