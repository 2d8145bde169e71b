//! Molecule corpus loaded from a delimited file.
//!
//! Expects a header row naming a `SMILES` column and a `SPLIT` column. Rows
//! are routed by split value: `train`, `test`, `test_scaffolds`; any other
//! split is ignored.

use std::path::Path;

use crate::error::{OrganError, Result};
use crate::vocab::Vocab;

const SMILES_COLUMN: &str = "SMILES";
const SPLIT_COLUMN: &str = "SPLIT";

/// Training and reference strings split by the corpus `SPLIT` column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Corpus {
    pub train: Vec<String>,
    pub test: Vec<String>,
    pub test_scaffolds: Vec<String>,
}

impl Corpus {
    /// Load a comma-separated corpus file.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content).map_err(|e| match e {
            OrganError::Corpus(msg) => {
                OrganError::Corpus(format!("{}: {}", path.as_ref().display(), msg))
            }
            other => other,
        })
    }

    /// Parse comma-separated corpus text.
    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| OrganError::Corpus("empty corpus".into()))?;
        let columns: Vec<&str> = header.split(',').map(str::trim).collect();
        let column = |name: &str| {
            columns
                .iter()
                .position(|c| *c == name)
                .ok_or_else(|| OrganError::Corpus(format!("missing column {name}")))
        };
        let smiles_idx = column(SMILES_COLUMN)?;
        let split_idx = column(SPLIT_COLUMN)?;

        let mut corpus = Corpus::default();
        for (line_no, line) in lines.enumerate() {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let (smiles, split) = match (fields.get(smiles_idx), fields.get(split_idx)) {
                (Some(s), Some(p)) => (*s, *p),
                _ => {
                    return Err(OrganError::Corpus(format!(
                        "row {} has {} fields, header has {}",
                        line_no + 2,
                        fields.len(),
                        columns.len()
                    )))
                }
            };
            let bucket = match split {
                "train" => &mut corpus.train,
                "test" => &mut corpus.test,
                "test_scaffolds" => &mut corpus.test_scaffolds,
                _ => continue,
            };
            bucket.push(smiles.to_string());
        }
        Ok(corpus)
    }

    /// Every string of every split.
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.train
            .iter()
            .chain(&self.test)
            .chain(&self.test_scaffolds)
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.test.len() + self.test_scaffolds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vocabulary over every character in the corpus.
    pub fn vocab(&self) -> Vocab {
        Vocab::from_corpus(self.all())
    }
}
