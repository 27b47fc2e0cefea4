// ==============================================================================
// parsers/mod.rs - File parser modules
// ==============================================================================
// Description: Parsers for VCF and pedigree input files
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

pub mod vcf;
pub mod pedigree;

pub use vcf::{VariantReader, VcfParseError, VcfReadOptions, SRC_ATTRIBUTE};
pub use pedigree::{PedigreeError, PedigreeParser};
