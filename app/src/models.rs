// ==============================================================================
// models.rs - Variant Data Models
// ==============================================================================
// Description: Variant records, per-study source entries and file metadata
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Name of the cohort covering every sample of a study
pub const DEFAULT_COHORT: &str = "ALL";

/// Aggregation level of a study's input files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Aggregation {
    /// Per-sample genotypes are present
    #[default]
    None,
    /// Only allele counts/frequencies in INFO
    Basic,
    /// Exome Variant Server style aggregation
    Evs,
    /// ExAC style aggregation
    Exac,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::None => "NONE",
            Aggregation::Basic => "BASIC",
            Aggregation::Evs => "EVS",
            Aggregation::Exac => "EXAC",
        }
    }

    pub fn is_aggregated(&self) -> bool {
        *self != Aggregation::None
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(Aggregation::None),
            "BASIC" => Ok(Aggregation::Basic),
            "EVS" => Ok(Aggregation::Evs),
            "EXAC" => Ok(Aggregation::Exac),
            other => Err(format!("unknown aggregation '{}'", other)),
        }
    }
}

/// Study design
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudyType {
    #[default]
    Collection,
    Family,
    Trio,
    Control,
    Case,
    CaseControl,
    Paired,
    PairedTumor,
    TimeSeries,
    Aggregate,
}

impl StudyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudyType::Collection => "COLLECTION",
            StudyType::Family => "FAMILY",
            StudyType::Trio => "TRIO",
            StudyType::Control => "CONTROL",
            StudyType::Case => "CASE",
            StudyType::CaseControl => "CASE_CONTROL",
            StudyType::Paired => "PAIRED",
            StudyType::PairedTumor => "PAIRED_TUMOR",
            StudyType::TimeSeries => "TIME_SERIES",
            StudyType::Aggregate => "AGGREGATE",
        }
    }
}

impl FromStr for StudyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let study_type = match s.trim().to_ascii_uppercase().as_str() {
            "COLLECTION" => StudyType::Collection,
            "FAMILY" => StudyType::Family,
            "TRIO" => StudyType::Trio,
            "CONTROL" => StudyType::Control,
            "CASE" => StudyType::Case,
            "CASE_CONTROL" => StudyType::CaseControl,
            "PAIRED" => StudyType::Paired,
            "PAIRED_TUMOR" => StudyType::PairedTumor,
            "TIME_SERIES" => StudyType::TimeSeries,
            "AGGREGATE" => StudyType::Aggregate,
            other => return Err(format!("unknown study type '{}'", other)),
        };
        Ok(study_type)
    }
}

impl fmt::Display for StudyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pedigree member as read from a PED file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub family: String,
    pub id: String,
    pub father: Option<String>,
    pub mother: Option<String>,
    /// 1 = male, 2 = female, 0 = unknown
    pub sex: u8,
    pub phenotype: String,
}

/// Metadata of one loaded file within a study
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSource {
    pub file_name: String,
    pub file_id: String,
    pub study_id: String,
    pub study_name: String,
    pub study_type: StudyType,
    pub aggregation: Aggregation,

    /// Sample names in VCF column order
    #[serde(default)]
    pub samples: Vec<String>,

    #[serde(default)]
    pub pedigree: Vec<Individual>,
}

impl VariantSource {
    pub fn new(
        file_name: impl Into<String>,
        file_id: impl Into<String>,
        study_id: impl Into<String>,
        study_name: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_id: file_id.into(),
            study_id: study_id.into(),
            study_name: study_name.into(),
            study_type: StudyType::default(),
            aggregation: Aggregation::default(),
            samples: Vec::new(),
            pedigree: Vec::new(),
        }
    }

    /// Deterministic base name for files derived from this source
    /// (e.g. stats files): `<studyId>_<fileId>`
    pub fn build_filename(&self) -> String {
        format!("{}_{}", self.study_id, self.file_id)
    }

    pub fn sample_index(&self, sample: &str) -> Option<usize> {
        self.samples.iter().position(|s| s == sample)
    }
}

/// Allele and genotype counts of one cohort at one variant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortStats {
    pub ref_allele_count: u32,
    pub alt_allele_count: u32,
    /// Called alleles (AN), other alternates included
    pub allele_number: u32,
    pub ref_allele_freq: f64,
    pub alt_allele_freq: f64,
    pub missing_alleles: u32,
    pub missing_genotypes: u32,
    /// Normalized genotype ("0/1") → number of samples
    pub genotype_counts: BTreeMap<String, u32>,
    pub maf: f64,
    pub minor_allele: String,
}

/// Per-study, per-file data block of a variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub study_id: String,
    pub file_id: String,

    /// ALT column of the original site, in order; genotype indices point
    /// into `[reference] + alternates`
    pub alternates: Vec<String>,

    #[serde(default)]
    pub format: Vec<String>,

    /// Sample name → GT string
    #[serde(default)]
    pub samples_data: BTreeMap<String, String>,

    #[serde(default)]
    pub cohort_stats: BTreeMap<String, CohortStats>,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl SourceEntry {
    pub fn new(study_id: impl Into<String>, file_id: impl Into<String>, alternates: Vec<String>) -> Self {
        Self {
            study_id: study_id.into(),
            file_id: file_id.into(),
            alternates,
            format: vec!["GT".to_string()],
            samples_data: BTreeMap::new(),
            cohort_stats: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> String {
        source_entry_key(&self.study_id, &self.file_id)
    }

    /// Index of `alternate` in the original allele list (reference = 0)
    pub fn allele_index(&self, alternate: &str) -> Option<usize> {
        self.alternates
            .iter()
            .position(|alt| alt == alternate)
            .map(|i| i + 1)
    }

    /// Number of alleles at the original site, reference included
    pub fn allele_count(&self) -> usize {
        self.alternates.len() + 1
    }
}

pub fn source_entry_key(study_id: &str, file_id: &str) -> String {
    format!("{}_{}", study_id, file_id)
}

/// One variant with a single alternate allele
///
/// A multi-allelic VCF line becomes one record per alternate; the genotypes
/// on each source entry keep referring to the original allele list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRecord {
    pub chromosome: String,
    /// 1-based
    pub position: u64,
    #[serde(default)]
    pub ids: Vec<String>,
    pub reference: String,
    pub alternate: String,

    /// Keyed by `<studyId>_<fileId>`
    #[serde(default)]
    pub source_entries: BTreeMap<String, SourceEntry>,
}

impl VariantRecord {
    pub fn new(
        chromosome: impl Into<String>,
        position: u64,
        reference: impl Into<String>,
        alternate: impl Into<String>,
    ) -> Self {
        Self {
            chromosome: chromosome.into(),
            position,
            ids: Vec::new(),
            reference: reference.into(),
            alternate: alternate.into(),
            source_entries: BTreeMap::new(),
        }
    }

    /// `chrom:pos:ref:alt`
    pub fn id(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.chromosome, self.position, self.reference, self.alternate
        )
    }

    pub fn add_source_entry(&mut self, entry: SourceEntry) {
        self.source_entries.insert(entry.key(), entry);
    }

    pub fn source_entry(&self, study_id: &str, file_id: &str) -> Option<&SourceEntry> {
        self.source_entries.get(&source_entry_key(study_id, file_id))
    }

    /// Distinct study ids of the entries, in key order
    pub fn study_ids(&self) -> Vec<&str> {
        let mut studies: Vec<&str> = Vec::new();
        for entry in self.source_entries.values() {
            if !studies.contains(&entry.study_id.as_str()) {
                studies.push(&entry.study_id);
            }
        }
        studies
    }

    pub fn entries_for_study<'a>(&'a self, study_id: &'a str) -> impl Iterator<Item = &'a SourceEntry> + 'a {
        self.source_entries
            .values()
            .filter(move |entry| entry.study_id == study_id)
    }

    /// Take over the entries of another record for the same variant;
    /// entries of the same study and file are replaced.
    pub fn merge(&mut self, other: VariantRecord) {
        for id in other.ids {
            if !self.ids.contains(&id) {
                self.ids.push(id);
            }
        }
        self.source_entries.extend(other.source_entries);
    }

    /// Keep only the entries accepted by `keep`
    pub fn retain_entries(&mut self, mut keep: impl FnMut(&SourceEntry) -> bool) {
        self.source_entries.retain(|_, entry| keep(entry));
    }
}
