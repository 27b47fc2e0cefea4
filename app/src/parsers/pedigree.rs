// ==============================================================================
// parsers/pedigree.rs - PED file parser
// ==============================================================================
// Description: Reads pedigree (PED) files into study individuals
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Format: tab-separated, no header, '#' comments
//   FAMILY  INDIVIDUAL  FATHER  MOTHER  SEX  PHENOTYPE
//   FAM1    NA12878     0       0       2    1
// Parent id "0" (or ".") means unknown.
// ==============================================================================

use csv::{ReaderBuilder, Trim};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::models::Individual;

/// Errors that can occur during PED file parsing
#[derive(Error, Debug)]
pub enum PedigreeError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Row {row}: expected at least 6 columns, found {found}")]
    MissingColumns { row: usize, found: usize },

    #[error("Row {row}: invalid sex '{value}'")]
    InvalidSex { row: usize, value: String },

    #[error("Individual '{0}' listed twice")]
    DuplicateIndividual(String),
}

pub struct PedigreeParser;

impl PedigreeParser {
    /// Parse a PED file
    ///
    /// # Arguments
    /// * `path` - Path to the pedigree file
    ///
    /// # Returns
    /// * `Ok(Vec<Individual>)` - Individuals in file order
    /// * `Err(PedigreeError)` - Parse error
    pub fn parse(path: impl AsRef<Path>) -> Result<Vec<Individual>, PedigreeError> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::parse_reader(file)
    }

    pub fn parse_reader<R: Read>(reader: R) -> Result<Vec<Individual>, PedigreeError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        let mut individuals: Vec<Individual> = Vec::new();

        for (idx, result) in reader.records().enumerate() {
            let record = result?;
            let row = idx + 1;

            if record.len() < 6 {
                return Err(PedigreeError::MissingColumns {
                    row,
                    found: record.len(),
                });
            }

            let sex_field = &record[4];
            let sex = match sex_field {
                "0" | "1" | "2" => sex_field.parse::<u8>().unwrap_or(0),
                "other" | "." => 0,
                _ => {
                    return Err(PedigreeError::InvalidSex {
                        row,
                        value: sex_field.to_string(),
                    })
                }
            };

            let id = record[1].to_string();
            if individuals.iter().any(|i| i.id == id) {
                return Err(PedigreeError::DuplicateIndividual(id));
            }

            individuals.push(Individual {
                family: record[0].to_string(),
                id,
                father: parent(&record[2]),
                mother: parent(&record[3]),
                sex,
                phenotype: record[5].to_string(),
            });
        }

        Ok(individuals)
    }
}

fn parent(field: &str) -> Option<String> {
    match field {
        "" | "0" | "." => None,
        id => Some(id.to_string()),
    }
}
