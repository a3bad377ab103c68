use rand::{distributions::Alphanumeric, Rng};
use crate::error::Error;

pub type EntryIndex = u32;

/// A single row of the input dataset: an entry label, its fingerprint and the scalar property
/// values that follow the fingerprint columns.
#[derive(Debug, PartialEq, Clone)]
pub struct EntryRecord {
    pub label: String,
    pub fingerprint: Fingerprint,
    pub values: Vec<f32>,
}

impl EntryRecord {

    pub fn new(label: String, fingerprint: Fingerprint, values: Vec<f32>) -> Self {

        return Self {
            label,
            fingerprint,
            values,
        }
    }

    pub fn random(length: usize, num_values: usize) -> Self {

        let label: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(4)
            .map(char::from)
            .collect();

        let fingerprint = Fingerprint::random(length);
        let values: Vec<f32> = (0..num_values).map(|_| rand::random::<f32>()).collect();

        return Self {
            label,
            fingerprint,
            values,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Fingerprint {
    pub data: Vec<f32>,
    pub length: usize,
}

impl Fingerprint {

    pub fn distance(&self, other: &Fingerprint) -> f32 {

        let mut sum: f32 = 0.0;
        for i in 0..self.length {
            sum += f32::powf(self.data[i] - other.data[i], 2.0);
        }

        return f32::powf(sum, 0.5);
    }

    pub fn random(length: usize) -> Self {

        let random_vec: Vec<f32> = (0..length).map(|_| rand::random::<f32>()).collect();
        return Self { data: random_vec, length };
    }

    pub fn from_vec(v: Vec<f32>, length: usize) -> Result<Self, Error> {

        if v.len() != length {
            return Err(Error::InvalidArgument(format!(
                "fingerprint has {} values, expected {}", v.len(), length)));
        }

        return Ok(Self {
            data: v,
            length,
        })
    }
}

/// Labels and property columns for every loaded row, kept apart from the fingerprints so they can
/// be cached and reloaded without re-reading the dataset.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct PropertyTable {
    pub labels: Vec<String>,
    pub columns: Vec<Vec<f32>>,
}

impl PropertyTable {

    pub fn new(num_columns: usize) -> Self {
        return Self {
            labels: Vec::new(),
            columns: vec![Vec::new(); num_columns],
        }
    }

    pub fn len(&self) -> usize {
        return self.labels.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.labels.is_empty();
    }

    pub fn num_columns(&self) -> usize {
        return self.columns.len();
    }

    pub fn column(&self, index: usize) -> Option<&Vec<f32>> {
        return self.columns.get(index);
    }

    pub fn push(&mut self, record: &EntryRecord) -> Result<(), Error> {

        if record.values.len() != self.columns.len() {
            return Err(Error::InvalidArgument(format!(
                "record {} has {} values, table has {} columns",
                record.label, record.values.len(), self.columns.len())));
        }

        self.labels.push(record.label.clone());
        for (column, value) in self.columns.iter_mut().zip(record.values.iter()) {
            column.push(*value);
        }

        Ok(())
    }

    ///Appends `numerator / denominator` as a new column. Zero denominators give inf or NaN, which
    ///are kept as-is.
    pub fn add_ratio_column(&mut self, numerator: usize, denominator: usize) -> Result<usize, Error> {

        let (num, den) = match (self.columns.get(numerator), self.columns.get(denominator)) {
            (Some(n), Some(d)) => (n, d),
            _ => return Err(Error::InvalidArgument(format!(
                "ratio columns ({}, {}) out of range for {} columns",
                numerator, denominator, self.columns.len()))),
        };

        let ratio: Vec<f32> = num.iter().zip(den.iter()).map(|(a, b)| a / b).collect();
        self.columns.push(ratio);

        Ok(self.columns.len() - 1)
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        return self.labels.iter().position(|x| x == label);
    }
}
