// ==============================================================================
// lib.rs - Variant Pipeline Library
// ==============================================================================
// Description: Library interface for the variant batch pipeline and exporter
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

pub mod compression;
pub mod config;
pub mod engine;
pub mod error;
pub mod exporter;
pub mod genotype;
pub mod jobs;
pub mod models;
pub mod parameters;
pub mod parsers;
pub mod repository;
pub mod storage;

pub use engine::{ExitStatus, JobExecution, JobLauncher, StepResult};
pub use error::{PipelineError, StorageError};
pub use exporter::{ExportSummary, VariantExporter};
pub use parameters::JobParameters;
