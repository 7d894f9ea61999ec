//! Class label table

use std::io::BufRead;
use std::path::Path;

use crate::error::BatchrResult;

/// Class names, index-aligned with the model's output columns
///
/// Line `i` of the label file names class `i`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    /// Load a newline-delimited UTF-8 label file
    pub fn from_file<P: AsRef<Path>>(path: P) -> BatchrResult<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> BatchrResult<Self> {
        let labels = reader
            .lines()
            .map(|line| line.map(|l| l.trim_end_matches('\r').to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    /// Name of class `index`, or `#<index>` when the table has no such line
    pub fn label(&self, index: usize) -> String {
        self.get(index)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{index}"))
    }
}
