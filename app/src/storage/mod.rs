// ==============================================================================
// storage/mod.rs - Variant Storage Gateway
// ==============================================================================
// Description: Storage capability traits and the variant query filter
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Call order driven by the pipeline:
//   extract → pre_transform → transform → post_transform
//   pre_load → load → post_load
//   create_stats → load_stats
// Every call is synchronous; any error fails the calling step.
// ==============================================================================

pub mod database;
pub mod local;
pub mod statistics;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::config::VariantOptions;
use crate::error::StorageError;
use crate::models::{SourceEntry, VariantRecord, VariantSource};

pub use database::VariantDatabase;
pub use local::LocalVariantStorage;
pub use statistics::VariantStatsRecord;

/// Lazy, single-pass sequence of stored variants
pub type VariantIterator<'a> = Box<dyn Iterator<Item = Result<VariantRecord, StorageError>> + 'a>;

/// Cohort name → member sample names
pub type Cohorts = BTreeMap<String, Vec<String>>;

/// Extract/transform/load/stats operations against a backing store
pub trait VariantStorage {
    /// Make the input available for transformation and prepare `output_dir`
    fn extract(&self, input: &Url, output_dir: &Url, options: &VariantOptions) -> Result<(), StorageError>;

    fn pre_transform(&self, input: &Url, options: &VariantOptions) -> Result<(), StorageError>;

    /// Write the transformed variants and file metadata into `output_dir`
    fn transform(
        &self,
        input: &Url,
        pedigree: Option<&Url>,
        output_dir: &Url,
        options: &VariantOptions,
    ) -> Result<(), StorageError>;

    fn post_transform(&self, input: &Url, output_dir: &Url, options: &VariantOptions) -> Result<(), StorageError>;

    fn pre_load(&self, transformed: &Url, output_dir: &Url, options: &VariantOptions) -> Result<(), StorageError>;

    fn load(&self, transformed: &Url, options: &VariantOptions) -> Result<(), StorageError>;

    fn post_load(&self, transformed: &Url, output_dir: &Url, options: &VariantOptions) -> Result<(), StorageError>;

    /// Compute per-cohort statistics of the configured study/file and write
    /// them next to `stats_uri`; returns the written file's URI
    fn create_stats(
        &self,
        db: &dyn VariantDbAdaptor,
        stats_uri: &Url,
        cohorts: Option<&Cohorts>,
        options: &VariantOptions,
    ) -> Result<Url, StorageError>;

    /// Store the statistics previously written by `create_stats`
    fn load_stats(&self, db: &dyn VariantDbAdaptor, stats_uri: &Url, options: &VariantOptions) -> Result<(), StorageError>;

    fn get_db_adaptor(&self, db_name: &str) -> Result<Box<dyn VariantDbAdaptor>, StorageError>;
}

/// Read access to one variant database
pub trait VariantDbAdaptor {
    fn name(&self) -> &str;

    /// Records matching `query`, in insertion order; each record only
    /// carries the source entries accepted by the query
    fn iterator<'a>(&'a self, query: &VariantQuery) -> Result<VariantIterator<'a>, StorageError>;

    fn count(&self, query: &VariantQuery) -> Result<u64, StorageError> {
        let mut count = 0;
        for record in self.iterator(query)? {
            record?;
            count += 1;
        }
        Ok(count)
    }

    /// File metadata of the given studies (all studies when empty)
    fn sources(&self, study_ids: &[String]) -> Result<Vec<VariantSource>, StorageError>;

    /// Attach cohort statistics to stored source entries; returns the number
    /// of entries updated
    fn update_stats(&self, stats: &[VariantStatsRecord]) -> Result<usize, StorageError>;
}

/// Genomic interval `chromosome:start-end` (1-based, inclusive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn new(chromosome: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            chromosome: chromosome.into(),
            start,
            end,
        }
    }

    pub fn contains(&self, chromosome: &str, position: u64) -> bool {
        self.chromosome == chromosome && (self.start..=self.end).contains(&position)
    }
}

impl FromStr for Region {
    type Err = String;

    /// Accepts `chr`, `chr:pos` and `chr:start-end`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (chromosome, range) = match s.split_once(':') {
            Some((chromosome, range)) => (chromosome, Some(range)),
            None => (s, None),
        };
        if chromosome.is_empty() {
            return Err(format!("invalid region '{}'", s));
        }

        let parse = |value: &str| {
            value
                .trim()
                .replace(',', "")
                .parse::<u64>()
                .map_err(|_| format!("invalid region '{}'", s))
        };

        let (start, end) = match range {
            None => (1, u64::MAX),
            Some(range) => match range.split_once('-') {
                Some((start, end)) => (parse(start)?, parse(end)?),
                None => {
                    let position = parse(range)?;
                    (position, position)
                }
            },
        };

        if start > end {
            return Err(format!("invalid region '{}': start after end", s));
        }
        Ok(Region::new(chromosome, start, end))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chromosome, self.start, self.end)
    }
}

/// Filter for database iteration
///
/// Empty study/file lists accept everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantQuery {
    pub studies: Vec<String>,
    pub files: Vec<String>,
    pub region: Option<Region>,
    pub reference: Option<String>,
}

impl VariantQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn studies<I, S>(mut self, studies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.studies = studies.into_iter().map(Into::into).collect();
        self
    }

    pub fn files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn accepts_study(&self, study_id: &str) -> bool {
        self.studies.is_empty() || self.studies.iter().any(|s| s == study_id)
    }

    pub fn accepts_entry(&self, entry: &SourceEntry) -> bool {
        self.accepts_study(&entry.study_id)
            && (self.files.is_empty() || self.files.iter().any(|f| *f == entry.file_id))
    }

    pub fn accepts_site(&self, record: &VariantRecord) -> bool {
        let in_region = self
            .region
            .as_ref()
            .map_or(true, |region| region.contains(&record.chromosome, record.position));
        let reference = self
            .reference
            .as_ref()
            .map_or(true, |reference| *reference == record.reference);
        in_region && reference
    }

    /// Apply the filter to one record: `None` when the site is rejected or
    /// no source entry survives
    pub fn restrict(&self, mut record: VariantRecord) -> Option<VariantRecord> {
        if !self.accepts_site(&record) {
            return None;
        }
        record.retain_entries(|entry| self.accepts_entry(entry));
        if record.source_entries.is_empty() {
            None
        } else {
            Some(record)
        }
    }
}
