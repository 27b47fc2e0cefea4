// ==============================================================================
// error.rs - Pipeline Error Taxonomy
// ==============================================================================
// Description: Error types shared by the job engine, storage gateway and exporter
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Taxonomy:
//   - Parameter  : malformed/missing job parameter, fails the job immediately
//   - Storage    : any storage gateway failure, fails the current step
//   - Conversion : one record cannot be exported, counted and skipped
//   - Io         : output cannot be written, fatal for the export
// ==============================================================================

use std::path::PathBuf;
use thiserror::Error;

use crate::genotype::GenotypeError;
use crate::parsers::{PedigreeError, VcfParseError};

/// Top-level error returned by steps, the launcher and the exporter
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid job parameter '{key}': {reason}")]
    Parameter { key: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Step '{step}' reported FAILED")]
    StepFailed { step: String },

    #[error("Step '{step}' is already running (execution {owner})")]
    AlreadyRunning { step: String, owner: String },
}

impl PipelineError {
    pub fn parameter(key: &str, reason: impl Into<String>) -> Self {
        PipelineError::Parameter {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failures raised by a storage gateway implementation
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("VCF error: {0}")]
    Vcf(#[from] VcfParseError),

    #[error("Pedigree error: {0}")]
    Pedigree(#[from] PedigreeError),

    #[error("Input not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Unsupported URI '{0}' (only file:// is handled by local storage)")]
    UnsupportedUri(String),

    #[error("Variant database '{0}' does not exist")]
    UnknownDatabase(String),

    #[error("Variant source metadata not found for study '{study_id}', file '{file_id}'")]
    UnknownSource { study_id: String, file_id: String },

    #[error("Malformed stored document for variant '{id}': {reason}")]
    CorruptDocument { id: String, reason: String },
}

/// A single variant record could not be converted to its output form
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("Variant {variant}: malformed genotype for sample '{sample}': {source}")]
    MalformedGenotype {
        variant: String,
        sample: String,
        #[source]
        source: GenotypeError,
    },

    #[error("Variant {variant}: sample '{sample}' is not part of study '{study_id}'")]
    UnknownSample {
        variant: String,
        study_id: String,
        sample: String,
    },

    #[error("Variant {variant}: no metadata for study '{study_id}'")]
    UnknownStudy { variant: String, study_id: String },

    #[error("Variant {variant}: alternate '{alternate}' missing from the original allele list")]
    AlternateNotFound { variant: String, alternate: String },
}

/// Failures of the persisted step-status store
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown step status '{0}'")]
    UnknownStatus(String),

    #[error("Repository lock poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_error_message() {
        let err = PipelineError::parameter("input", "missing");
        assert_eq!(err.to_string(), "Invalid job parameter 'input': missing");
    }

    #[test]
    fn test_storage_error_converts() {
        let err: PipelineError = StorageError::MissingInput(PathBuf::from("/tmp/none.vcf")).into();
        assert!(matches!(err, PipelineError::Storage(StorageError::MissingInput(_))));
        assert!(err.to_string().contains("/tmp/none.vcf"));
    }
}
