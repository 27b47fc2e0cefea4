// ==============================================================================
// config.rs - Typed Job Configuration
// ==============================================================================
// Description: Job configuration resolved once from the launch parameters
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;

use crate::error::PipelineError;
use crate::models::{Aggregation, StudyType, VariantSource};
use crate::parameters::{child_uri, create_uri, keys, uri_file_name, JobParameters};

/// Suffix of transformed variant files
pub const VARIANTS_FILE_SUFFIX: &str = ".variants.json";
/// Suffix of transformed file metadata
pub const SOURCE_FILE_SUFFIX: &str = ".file.json";
/// Suffix of statistics files
pub const STATS_FILE_SUFFIX: &str = ".variants.stats.json";

/// How much of the original VCF line is kept on each source entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncludeSrc {
    #[default]
    No,
    #[serde(rename = "FIRST_8_COLUMNS")]
    First8Columns,
    Full,
}

impl FromStr for IncludeSrc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NO" => Ok(IncludeSrc::No),
            "FIRST_8_COLUMNS" => Ok(IncludeSrc::First8Columns),
            "FULL" => Ok(IncludeSrc::Full),
            other => Err(format!("unknown includeSrc '{}'", other)),
        }
    }
}

/// Per-step "do nothing" overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipFlags {
    pub load: bool,
    pub stats_create: bool,
    pub stats_load: bool,
}

/// Options handed to the storage gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantOptions {
    pub db_name: String,
    /// e.g. ".gz", or "" for uncompressed output
    pub compress_extension: String,
    pub compress_genotypes: bool,
    pub include_src: IncludeSrc,
    pub aggregation: Aggregation,
    pub study_type: StudyType,
    /// Study/file metadata of the input; samples are filled in by transform
    pub source: VariantSource,
}

/// Fully resolved job configuration
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    pub input: Url,
    pub output_dir: Url,
    pub pedigree: Option<Url>,
    pub options: VariantOptions,
    pub skip: SkipFlags,
}

fn parse_enum<T: FromStr<Err = String> + Default>(
    params: &JobParameters,
    key: &str,
) -> Result<T, PipelineError> {
    match params.get(key).map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(value) => value
            .parse()
            .map_err(|reason: String| PipelineError::parameter(key, reason)),
    }
}

impl JobConfig {
    /// Validate and type the launch parameters
    ///
    /// # Errors
    /// `PipelineError::Parameter` for a missing mandatory key, an unparsable
    /// path/URI or an unknown enum value.
    pub fn resolve(params: &JobParameters) -> Result<Self, PipelineError> {
        let input = create_uri(params.require(keys::INPUT)?)
            .map_err(|e| PipelineError::parameter(keys::INPUT, e.to_string()))?;
        let output_dir = create_uri(params.require(keys::OUTPUT_DIR)?)
            .map_err(|e| PipelineError::parameter(keys::OUTPUT_DIR, e.to_string()))?;
        let pedigree = match params.get(keys::PEDIGREE).map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                create_uri(raw).map_err(|e| PipelineError::parameter(keys::PEDIGREE, e.to_string()))?,
            ),
        };

        let db_name = params.require(keys::DB_NAME)?.to_string();
        let study_id = params.require(keys::STUDY_ID)?.to_string();
        let file_id = params.require(keys::FILE_ID)?.to_string();
        let study_name = params.get_or(keys::STUDY_NAME, &study_id).to_string();

        let aggregation: Aggregation = parse_enum(params, keys::AGGREGATED)?;
        let study_type: StudyType = parse_enum(params, keys::STUDY_TYPE)?;
        let include_src: IncludeSrc = parse_enum(params, keys::INCLUDE_SRC)?;

        let file_name = uri_file_name(&input)
            .ok_or_else(|| PipelineError::parameter(keys::INPUT, "URI has no file name"))?;

        let mut source = VariantSource::new(file_name, file_id, study_id, study_name);
        source.study_type = study_type;
        source.aggregation = aggregation;

        Ok(Self {
            input,
            output_dir,
            pedigree,
            options: VariantOptions {
                db_name,
                compress_extension: params.get_or(keys::COMPRESS_EXTENSION, "").trim().to_string(),
                compress_genotypes: params.get_bool(keys::COMPRESS_GENOTYPES),
                include_src,
                aggregation,
                study_type,
                source,
            },
            skip: SkipFlags {
                load: params.get_bool(keys::SKIP_LOAD),
                stats_create: params.get_bool(keys::SKIP_STATS_CREATE),
                stats_load: params.get_bool(keys::SKIP_STATS_LOAD),
            },
        })
    }

    pub fn db_name(&self) -> &str {
        &self.options.db_name
    }

    pub fn compress_extension(&self) -> &str {
        &self.options.compress_extension
    }

    pub fn input_file_name(&self) -> &str {
        &self.options.source.file_name
    }

    /// `<outputDir>/<inputFileName>.variants.json<compressExtension>`
    pub fn transformed_variants_uri(&self) -> Url {
        child_uri(
            &self.output_dir,
            &format!("{}{}{}", self.input_file_name(), VARIANTS_FILE_SUFFIX, self.compress_extension()),
        )
    }

    /// `<outputDir>/<inputFileName>.file.json<compressExtension>`
    pub fn transformed_source_uri(&self) -> Url {
        child_uri(
            &self.output_dir,
            &format!("{}{}{}", self.input_file_name(), SOURCE_FILE_SUFFIX, self.compress_extension()),
        )
    }

    /// `<outputDir>/<studyId>_<fileId>`; the stats file adds
    /// `.variants.stats.json<compressExtension>`
    pub fn stats_uri(&self) -> Url {
        child_uri(&self.output_dir, &self.options.source.build_filename())
    }
}
