// ==============================================================================
// storage/local.rs - Local Filesystem + SQLite Storage
// ==============================================================================
// Description: VariantStorage over local files and per-database SQLite files
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Layout:
//   <outputDir>/<input>.variants.json[.gz]   transformed variants (JSON lines)
//   <outputDir>/<input>.file.json[.gz]       file metadata (VariantSource)
//   <statsUri>.variants.stats.json[.gz]      cohort statistics (JSON lines)
//   <storage home>/<dbName>.sqlite           variant database
// ==============================================================================

use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

use crate::compression::{is_gzip_path, open_input, AtomicOutput, GZIP_EXTENSION};
use crate::config::{VariantOptions, SOURCE_FILE_SUFFIX, STATS_FILE_SUFFIX, VARIANTS_FILE_SUFFIX};
use crate::error::StorageError;
use crate::models::{VariantRecord, VariantSource};
use crate::parameters::uri_to_path;
use crate::parsers::{PedigreeParser, VariantReader, VcfReadOptions};
use crate::storage::statistics::{default_cohorts, variant_stats};
use crate::storage::{
    Cohorts, VariantDatabase, VariantDbAdaptor, VariantQuery, VariantStatsRecord, VariantStorage,
};

/// Environment variable selecting the storage home
pub const STORAGE_HOME_ENV: &str = "VARIANT_STORAGE_HOME";
/// Storage home used when the environment does not set one
pub const DEFAULT_STORAGE_HOME: &str = "/opt/variant-storage";

/// Stats records written to the database per transaction
const STATS_BATCH_SIZE: usize = 1000;

/// Storage gateway over the local filesystem
#[derive(Debug, Clone)]
pub struct LocalVariantStorage {
    home: PathBuf,
}

impl LocalVariantStorage {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Storage home from `VARIANT_STORAGE_HOME`, or the default location
    pub fn from_env() -> Self {
        let home = std::env::var(STORAGE_HOME_ENV).unwrap_or_else(|_| DEFAULT_STORAGE_HOME.to_string());
        Self::new(home)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn database_path(&self, db_name: &str) -> PathBuf {
        self.home.join(format!("{}.sqlite", db_name))
    }

    fn open_database(&self, db_name: &str) -> Result<VariantDatabase, StorageError> {
        std::fs::create_dir_all(&self.home)?;
        VariantDatabase::create(self.database_path(db_name), db_name)
    }

    fn existing_input(uri: &Url) -> Result<PathBuf, StorageError> {
        let path = uri_to_path(uri)?;
        if !path.is_file() {
            return Err(StorageError::MissingInput(path));
        }
        Ok(path)
    }

    fn output_path(output_dir: &Url, name: &str) -> Result<PathBuf, StorageError> {
        Ok(uri_to_path(output_dir)?.join(name))
    }

    /// Metadata file written next to a transformed variants file
    fn source_path_for(transformed: &Path) -> Result<PathBuf, StorageError> {
        let name = transformed.to_string_lossy();
        let index = name
            .rfind(VARIANTS_FILE_SUFFIX)
            .ok_or_else(|| StorageError::MissingInput(transformed.to_path_buf()))?;
        let source = format!(
            "{}{}{}",
            &name[..index],
            SOURCE_FILE_SUFFIX,
            &name[index + VARIANTS_FILE_SUFFIX.len()..]
        );
        Ok(PathBuf::from(source))
    }

    fn stats_path(stats_uri: &Url, options: &VariantOptions) -> Result<PathBuf, StorageError> {
        let base = uri_to_path(stats_uri)?;
        let mut name = base.file_name().unwrap_or_default().to_os_string();
        name.push(STATS_FILE_SUFFIX);
        name.push(&options.compress_extension);
        Ok(base.with_file_name(name))
    }

    fn read_source(path: &Path) -> Result<VariantSource, StorageError> {
        let mut reader = open_input(path)?;
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Stream JSON lines of a transformed or stats file
    fn json_lines<T: serde::de::DeserializeOwned>(
        path: &Path,
    ) -> Result<impl Iterator<Item = Result<T, StorageError>>, StorageError> {
        let reader = open_input(path)?;
        Ok(reader.lines().filter_map(|line| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(serde_json::from_str(&line).map_err(StorageError::from)),
            Err(e) => Some(Err(StorageError::from(e))),
        }))
    }
}

impl VariantStorage for LocalVariantStorage {
    fn extract(&self, input: &Url, output_dir: &Url, _options: &VariantOptions) -> Result<(), StorageError> {
        info!("Extract variants '{}'", input);
        let path = Self::existing_input(input)?;
        let out = uri_to_path(output_dir)?;
        std::fs::create_dir_all(&out)?;
        debug!("Input {} ready, output directory {}", path.display(), out.display());
        Ok(())
    }

    fn pre_transform(&self, input: &Url, options: &VariantOptions) -> Result<(), StorageError> {
        info!("PreTransform variants '{}'", input);
        let path = Self::existing_input(input)?;
        let reader = VariantReader::open(&path, read_options(options))?;

        if reader.samples().is_empty() && !options.aggregation.is_aggregated() {
            warn!("{}: no samples in header; genotypes will be empty", path.display());
        }
        debug!("{}: {} samples", path.display(), reader.samples().len());
        Ok(())
    }

    fn transform(
        &self,
        input: &Url,
        pedigree: Option<&Url>,
        output_dir: &Url,
        options: &VariantOptions,
    ) -> Result<(), StorageError> {
        info!("Transform variants '{}'", input);
        let path = Self::existing_input(input)?;
        let gzip = options.compress_extension == GZIP_EXTENSION;

        let mut source = options.source.clone();
        if let Some(pedigree) = pedigree {
            let pedigree_path = Self::existing_input(pedigree)?;
            source.pedigree = PedigreeParser::parse(&pedigree_path)?;
            info!("Pedigree: {} individuals", source.pedigree.len());
        }

        let mut reader = VariantReader::open(&path, read_options(options))?;
        source.samples = reader.samples().to_vec();

        let variants_path = Self::output_path(
            output_dir,
            &format!("{}{}{}", source.file_name, VARIANTS_FILE_SUFFIX, options.compress_extension),
        )?;
        let source_path = Self::output_path(
            output_dir,
            &format!("{}{}{}", source.file_name, SOURCE_FILE_SUFFIX, options.compress_extension),
        )?;

        // Nothing is renamed into place unless every record converted
        let mut variants_out = AtomicOutput::create(&variants_path, gzip)?;
        let mut written = 0u64;
        for record in reader.by_ref() {
            let record = record?;
            serde_json::to_writer(&mut variants_out, &record)?;
            variants_out.write_all(b"\n")?;
            written += 1;
        }

        let mut source_out = AtomicOutput::create(&source_path, gzip)?;
        serde_json::to_writer(&mut source_out, &source)?;
        source_out.write_all(b"\n")?;

        variants_out.commit()?;
        source_out.commit()?;

        info!(
            "Transformed {} variants ({} non-variant sites skipped) into {}",
            written,
            reader.skipped_count,
            variants_path.display()
        );
        Ok(())
    }

    fn post_transform(&self, input: &Url, output_dir: &Url, options: &VariantOptions) -> Result<(), StorageError> {
        info!("PostTransform variants '{}'", input);
        let variants_path = Self::output_path(
            output_dir,
            &format!("{}{}{}", options.source.file_name, VARIANTS_FILE_SUFFIX, options.compress_extension),
        )?;
        if !variants_path.is_file() {
            return Err(StorageError::MissingInput(variants_path));
        }
        Ok(())
    }

    fn pre_load(&self, transformed: &Url, _output_dir: &Url, _options: &VariantOptions) -> Result<(), StorageError> {
        info!("-- PreLoad variants -- {}", transformed);
        let variants_path = Self::existing_input(transformed)?;
        let source_path = Self::source_path_for(&variants_path)?;
        if !source_path.is_file() {
            return Err(StorageError::MissingInput(source_path));
        }
        Ok(())
    }

    fn load(&self, transformed: &Url, options: &VariantOptions) -> Result<(), StorageError> {
        info!("-- Load variants -- {}", transformed);
        let variants_path = Self::existing_input(transformed)?;
        let source = Self::read_source(&Self::source_path_for(&variants_path)?)?;

        let db = self.open_database(&options.db_name)?;
        db.save_source(&source)?;

        let records = Self::json_lines::<VariantRecord>(&variants_path)?;
        db.load_variants(records, options.compress_genotypes)?;
        Ok(())
    }

    fn post_load(&self, transformed: &Url, _output_dir: &Url, options: &VariantOptions) -> Result<(), StorageError> {
        info!("-- PostLoad variants -- {}", transformed);
        let db = self.open_database(&options.db_name)?;
        db.create_indexes()
    }

    fn create_stats(
        &self,
        db: &dyn VariantDbAdaptor,
        stats_uri: &Url,
        cohorts: Option<&Cohorts>,
        options: &VariantOptions,
    ) -> Result<Url, StorageError> {
        let study_id = &options.source.study_id;
        let file_id = &options.source.file_id;

        let source = db
            .sources(std::slice::from_ref(study_id))?
            .into_iter()
            .find(|s| s.file_id == *file_id)
            .ok_or_else(|| StorageError::UnknownSource {
                study_id: study_id.clone(),
                file_id: file_id.clone(),
            })?;

        let cohorts = match cohorts {
            Some(cohorts) => cohorts.clone(),
            None => default_cohorts(&source),
        };
        info!(
            "Calculating stats of study {} file {} for cohorts {:?}",
            study_id,
            file_id,
            cohorts.keys().collect::<Vec<_>>()
        );

        let stats_path = Self::stats_path(stats_uri, options)?;
        let mut out = AtomicOutput::create(&stats_path, is_gzip_path(&stats_path))?;
        let query = VariantQuery::new().studies([study_id.clone()]).files([file_id.clone()]);

        let mut written = 0u64;
        for record in db.iterator(&query)? {
            let record = record?;
            if let Some(stats) = variant_stats(&record, study_id, file_id, &cohorts) {
                serde_json::to_writer(&mut out, &stats)?;
                out.write_all(b"\n")?;
                written += 1;
            }
        }
        out.commit()?;

        info!("Wrote stats of {} variants to {}", written, stats_path.display());
        Url::from_file_path(&stats_path).map_err(|_| StorageError::UnsupportedUri(stats_path.display().to_string()))
    }

    fn load_stats(&self, db: &dyn VariantDbAdaptor, stats_uri: &Url, options: &VariantOptions) -> Result<(), StorageError> {
        let stats_path = Self::stats_path(stats_uri, options)?;
        if !stats_path.is_file() {
            return Err(StorageError::MissingInput(stats_path));
        }
        info!("Loading stats from {}", stats_path.display());

        let mut batch: Vec<VariantStatsRecord> = Vec::with_capacity(STATS_BATCH_SIZE);
        let mut updated = 0;
        for stats in Self::json_lines::<VariantStatsRecord>(&stats_path)? {
            batch.push(stats?);
            if batch.len() == STATS_BATCH_SIZE {
                updated += db.update_stats(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            updated += db.update_stats(&batch)?;
        }

        info!("Stats stored for {} variants in database '{}'", updated, db.name());
        Ok(())
    }

    fn get_db_adaptor(&self, db_name: &str) -> Result<Box<dyn VariantDbAdaptor>, StorageError> {
        let db = VariantDatabase::open(self.database_path(db_name), db_name)?;
        Ok(Box::new(db))
    }
}

fn read_options(options: &VariantOptions) -> VcfReadOptions {
    VcfReadOptions {
        study_id: options.source.study_id.clone(),
        file_id: options.source.file_id.clone(),
        aggregation: options.aggregation,
        include_src: options.include_src,
    }
}
