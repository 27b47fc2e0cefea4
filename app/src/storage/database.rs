// ==============================================================================
// storage/database.rs - SQLite Variant Database
// ==============================================================================
// Description: Stores variant documents and file metadata in one SQLite file
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Schema:
//   variants(id PK, chromosome, position, reference, alternate, document)
//   files(study_id, file_id, document, PK(study_id, file_id))
// `document` is the JSON variant record. With genotype compression, the
// samples of an entry are replaced by the most frequent genotype plus the
// sample indices (VCF column order of the file) of every other genotype.
// Iteration pages through rowids, so records come back in insertion order.
// ==============================================================================

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::models::{SourceEntry, VariantRecord, VariantSource};
use crate::storage::{VariantDbAdaptor, VariantIterator, VariantQuery, VariantStatsRecord};

/// Rows fetched per iterator page
const PAGE_SIZE: usize = 1000;

const INDEXES: [(&str, &str); 2] = [
    ("idx_variants_region", "CREATE INDEX IF NOT EXISTS idx_variants_region ON variants (chromosome, position)"),
    ("idx_variants_reference", "CREATE INDEX IF NOT EXISTS idx_variants_reference ON variants (reference)"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CompressedGenotypes {
    default_genotype: String,
    /// Genotype → sample indices
    others: BTreeMap<String, Vec<usize>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredVariant {
    #[serde(flatten)]
    record: VariantRecord,

    /// Entry key → compressed samples of that entry
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    compressed: BTreeMap<String, CompressedGenotypes>,
}

/// Compress the samples of an entry; `None` when some sample is not part of
/// the file's sample list
fn compress_entry(entry: &SourceEntry, samples: &[String]) -> Option<CompressedGenotypes> {
    if entry.samples_data.is_empty() {
        return None;
    }

    let mut frequencies: BTreeMap<&str, usize> = BTreeMap::new();
    for genotype in entry.samples_data.values() {
        *frequencies.entry(genotype.as_str()).or_insert(0) += 1;
    }
    let mut default_genotype = "";
    let mut best = 0;
    for (genotype, count) in frequencies {
        if count > best {
            default_genotype = genotype;
            best = count;
        }
    }

    let mut others: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (sample, genotype) in &entry.samples_data {
        let index = samples.iter().position(|s| s == sample)?;
        if genotype != default_genotype {
            others.entry(genotype.clone()).or_default().push(index);
        }
    }
    for indices in others.values_mut() {
        indices.sort_unstable();
    }

    Some(CompressedGenotypes {
        default_genotype: default_genotype.to_string(),
        others,
    })
}

fn decompress_entry(
    id: &str,
    compressed: &CompressedGenotypes,
    samples: &[String],
) -> Result<BTreeMap<String, String>, StorageError> {
    let mut samples_data: BTreeMap<String, String> = samples
        .iter()
        .map(|s| (s.clone(), compressed.default_genotype.clone()))
        .collect();

    for (genotype, indices) in &compressed.others {
        for index in indices {
            let sample = samples.get(*index).ok_or_else(|| StorageError::CorruptDocument {
                id: id.to_string(),
                reason: format!("sample index {} out of range", index),
            })?;
            samples_data.insert(sample.clone(), genotype.clone());
        }
    }
    Ok(samples_data)
}

/// Variant database backed by one SQLite file
pub struct VariantDatabase {
    conn: Connection,
    name: String,
}

impl VariantDatabase {
    /// Open an existing database
    pub fn open(path: impl AsRef<Path>, name: &str) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(StorageError::UnknownDatabase(name.to_string()));
        }
        Self::create(path, name)
    }

    /// Open a database, creating file and schema when missing
    pub fn create(path: impl AsRef<Path>, name: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS variants (
                id TEXT PRIMARY KEY,
                chromosome TEXT NOT NULL,
                position INTEGER NOT NULL,
                reference TEXT NOT NULL,
                alternate TEXT NOT NULL,
                document TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS files (
                study_id TEXT NOT NULL,
                file_id TEXT NOT NULL,
                document TEXT NOT NULL,
                PRIMARY KEY (study_id, file_id)
            );",
        )?;

        Ok(Self {
            conn,
            name: name.to_string(),
        })
    }

    /// Store (or replace) the metadata of one file
    pub fn save_source(&self, source: &VariantSource) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO files (study_id, file_id, document) VALUES (?1, ?2, ?3)
             ON CONFLICT(study_id, file_id) DO UPDATE SET document = excluded.document",
            params![source.study_id, source.file_id, serde_json::to_string(source)?],
        )?;
        Ok(())
    }

    /// Sources keyed by entry key (`<studyId>_<fileId>`)
    fn source_index(&self) -> Result<BTreeMap<String, VariantSource>, StorageError> {
        Ok(self
            .sources(&[])?
            .into_iter()
            .map(|source| (source.build_filename(), source))
            .collect())
    }

    fn decode(
        &self,
        id: &str,
        document: &str,
        sources: &BTreeMap<String, VariantSource>,
    ) -> Result<VariantRecord, StorageError> {
        let stored: StoredVariant = serde_json::from_str(document).map_err(|e| StorageError::CorruptDocument {
            id: id.to_string(),
            reason: e.to_string(),
        })?;

        let mut record = stored.record;
        for (key, compressed) in &stored.compressed {
            let source = sources.get(key).ok_or_else(|| StorageError::CorruptDocument {
                id: id.to_string(),
                reason: format!("no file metadata for compressed entry '{}'", key),
            })?;
            let samples_data = decompress_entry(id, compressed, &source.samples)?;
            if let Some(entry) = record.source_entries.get_mut(key) {
                entry.samples_data = samples_data;
            }
        }
        Ok(record)
    }

    fn encode(
        record: &VariantRecord,
        sources: &BTreeMap<String, VariantSource>,
        compress: bool,
    ) -> Result<String, StorageError> {
        let mut stored = StoredVariant {
            record: record.clone(),
            compressed: BTreeMap::new(),
        };

        if compress {
            for (key, entry) in stored.record.source_entries.iter_mut() {
                let Some(source) = sources.get(key) else { continue };
                if let Some(compressed) = compress_entry(entry, &source.samples) {
                    entry.samples_data.clear();
                    stored.compressed.insert(key.clone(), compressed);
                }
            }
        }

        Ok(serde_json::to_string(&stored)?)
    }

    /// Upsert variants in one transaction, merging into stored records of
    /// the same site; returns the number of records read
    pub fn load_variants<I>(&self, variants: I, compress_genotypes: bool) -> Result<u64, StorageError>
    where
        I: IntoIterator<Item = Result<VariantRecord, StorageError>>,
    {
        let sources = self.source_index()?;
        let tx = self.conn.unchecked_transaction()?;
        let mut loaded = 0u64;
        let mut merged = 0u64;

        {
            let mut select = tx.prepare_cached("SELECT document FROM variants WHERE id = ?1")?;
            let mut upsert = tx.prepare_cached(
                "INSERT INTO variants (id, chromosome, position, reference, alternate, document)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET document = excluded.document",
            )?;

            for variant in variants {
                let variant = variant?;
                let id = variant.id();

                let existing: Option<String> = select.query_row(params![id], |row| row.get(0)).optional()?;
                let record = match existing {
                    Some(document) => {
                        let mut stored = self.decode(&id, &document, &sources)?;
                        stored.merge(variant);
                        merged += 1;
                        stored
                    }
                    None => variant,
                };

                let document = Self::encode(&record, &sources, compress_genotypes)?;
                upsert.execute(params![
                    id,
                    record.chromosome,
                    record.position as i64,
                    record.reference,
                    record.alternate,
                    document
                ])?;
                loaded += 1;
            }
        }

        tx.commit()?;
        info!(
            "Database '{}': loaded {} variants ({} merged into existing sites)",
            self.name, loaded, merged
        );
        Ok(loaded)
    }

    /// Build the query indexes
    pub fn create_indexes(&self) -> Result<(), StorageError> {
        for (name, sql) in INDEXES {
            debug!("Creating index {}", name);
            self.conn.execute(sql, [])?;
        }
        Ok(())
    }

    pub fn has_indexes(&self) -> Result<bool, StorageError> {
        let mut found = 0;
        for (name, _) in INDEXES {
            let count: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
                params![name],
                |row| row.get(0),
            )?;
            found += count;
        }
        Ok(found == INDEXES.len() as i64)
    }
}

impl VariantDbAdaptor for VariantDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn iterator<'a>(&'a self, query: &VariantQuery) -> Result<VariantIterator<'a>, StorageError> {
        let sources = self.source_index()?;
        Ok(Box::new(VariantCursor {
            db: self,
            query: query.clone(),
            sources,
            last_rowid: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn sources(&self, study_ids: &[String]) -> Result<Vec<VariantSource>, StorageError> {
        let mut stmt = self.conn.prepare("SELECT study_id, document FROM files ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut sources = Vec::new();
        for row in rows {
            let (study_id, document) = row?;
            if study_ids.is_empty() || study_ids.contains(&study_id) {
                sources.push(serde_json::from_str(&document)?);
            }
        }
        Ok(sources)
    }

    fn update_stats(&self, stats: &[VariantStatsRecord]) -> Result<usize, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut updated = 0;

        {
            let mut select = tx.prepare_cached("SELECT document FROM variants WHERE id = ?1")?;
            let mut update = tx.prepare_cached("UPDATE variants SET document = ?2 WHERE id = ?1")?;

            for variant_stats in stats {
                let id = variant_stats.variant_id();
                let Some(document) = select
                    .query_row(params![id], |row| row.get::<_, String>(0))
                    .optional()?
                else {
                    warn!("Stats for unknown variant {} ignored", id);
                    continue;
                };

                let mut stored: StoredVariant =
                    serde_json::from_str(&document).map_err(|e| StorageError::CorruptDocument {
                        id: id.clone(),
                        reason: e.to_string(),
                    })?;

                let key = crate::models::source_entry_key(&variant_stats.study_id, &variant_stats.file_id);
                match stored.record.source_entries.get_mut(&key) {
                    Some(entry) => {
                        entry.cohort_stats = variant_stats.cohort_stats.clone();
                        update.execute(params![id, serde_json::to_string(&stored)?])?;
                        updated += 1;
                    }
                    None => warn!("Variant {} has no entry for {}; stats ignored", id, key),
                }
            }
        }

        tx.commit()?;
        Ok(updated)
    }
}

/// Keyset-paged iteration over the variants table
struct VariantCursor<'a> {
    db: &'a VariantDatabase,
    query: VariantQuery,
    sources: BTreeMap<String, VariantSource>,
    last_rowid: i64,
    buffer: VecDeque<VariantRecord>,
    exhausted: bool,
}

impl VariantCursor<'_> {
    fn fetch_page(&mut self) -> Result<(), StorageError> {
        let db = self.db;
        let mut sql = String::from("SELECT rowid, id, document FROM variants WHERE rowid > ?");
        let mut values: Vec<Value> = vec![Value::Integer(self.last_rowid)];

        if let Some(region) = &self.query.region {
            sql.push_str(" AND chromosome = ? AND position BETWEEN ? AND ?");
            values.push(Value::Text(region.chromosome.clone()));
            values.push(Value::Integer(i64::try_from(region.start).unwrap_or(i64::MAX)));
            values.push(Value::Integer(i64::try_from(region.end).unwrap_or(i64::MAX)));
        }
        if let Some(reference) = &self.query.reference {
            sql.push_str(" AND reference = ?");
            values.push(Value::Text(reference.clone()));
        }
        sql.push_str(&format!(" ORDER BY rowid LIMIT {}", PAGE_SIZE));

        let mut stmt = db.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut fetched = 0;
        for row in rows {
            let (rowid, id, document) = row?;
            self.last_rowid = rowid;
            fetched += 1;

            let record = db.decode(&id, &document, &self.sources)?;
            if let Some(record) = self.query.restrict(record) {
                self.buffer.push_back(record);
            }
        }

        if fetched < PAGE_SIZE {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for VariantCursor<'_> {
    type Item = Result<VariantRecord, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn source(study: &str, file: &str, samples: &[&str]) -> VariantSource {
        let mut source = VariantSource::new(format!("{}.vcf", file), file, study, study);
        source.samples = samples.iter().map(|s| s.to_string()).collect();
        source
    }

    fn variant(study: &str, file: &str, position: u64, genotypes: &[(&str, &str)]) -> VariantRecord {
        let mut entry = SourceEntry::new(study, file, vec!["A".to_string()]);
        for (sample, gt) in genotypes {
            entry.samples_data.insert(sample.to_string(), gt.to_string());
        }
        let mut record = VariantRecord::new("20", position, "G", "A");
        record.add_source_entry(entry);
        record
    }

    #[test]
    fn test_compress_entry() {
        let record = variant("7", "5", 1, &[("S1", "0|0"), ("S2", "0|1"), ("S3", "0|0")]);
        let entry = record.source_entry("7", "5").unwrap();
        let samples = vec!["S1".to_string(), "S2".to_string(), "S3".to_string()];

        let compressed = compress_entry(entry, &samples).unwrap();
        assert_eq!(compressed.default_genotype, "0|0");
        assert_eq!(compressed.others["0|1"], vec![1]);

        let restored = decompress_entry("x", &compressed, &samples).unwrap();
        assert_eq!(restored, entry.samples_data);

        assert!(compress_entry(entry, &samples[..2]).is_none());
    }

    #[test]
    fn test_load_merge_and_iterate_in_insertion_order() {
        let dir = tempdir().unwrap();
        let db = VariantDatabase::create(dir.path().join("batch.sqlite"), "batch").unwrap();
        db.save_source(&source("7", "5", &["S1", "S2"])).unwrap();
        db.save_source(&source("8", "6", &["S3"])).unwrap();

        let first = vec![
            Ok(variant("7", "5", 300, &[("S1", "0|1"), ("S2", "0|0")])),
            Ok(variant("7", "5", 100, &[("S1", "1|1"), ("S2", "0|0")])),
        ];
        assert_eq!(db.load_variants(first, true).unwrap(), 2);

        let second = vec![Ok(variant("8", "6", 300, &[("S3", "0|1")]))];
        db.load_variants(second, false).unwrap();

        let all: Vec<VariantRecord> = db
            .iterator(&VariantQuery::new())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].position, 300);
        assert_eq!(all[0].study_ids(), vec!["7", "8"]);
        assert_eq!(all[0].source_entry("7", "5").unwrap().samples_data["S1"], "0|1");
        assert_eq!(all[1].source_entry("7", "5").unwrap().samples_data["S2"], "0|0");

        let study8 = VariantQuery::new().studies(["8"]);
        assert_eq!(db.count(&study8).unwrap(), 1);
        let region = VariantQuery::new().region("20:50-150".parse().unwrap());
        assert_eq!(db.count(&region).unwrap(), 1);
        assert_eq!(db.sources(&["8".to_string()]).unwrap().len(), 1);
    }

    #[test]
    fn test_iterator_pages_through_many_rows() {
        let dir = tempdir().unwrap();
        let db = VariantDatabase::create(dir.path().join("big.sqlite"), "big").unwrap();
        db.save_source(&source("7", "5", &["S1"])).unwrap();

        let variants = (1..=(PAGE_SIZE as u64 * 2 + 5)).map(|pos| Ok(variant("7", "5", pos, &[("S1", "0|1")])));
        db.load_variants(variants, false).unwrap();

        let positions: Vec<u64> = db
            .iterator(&VariantQuery::new())
            .unwrap()
            .map(|r| r.unwrap().position)
            .collect();
        assert_eq!(positions.len(), PAGE_SIZE * 2 + 5);
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_update_stats_and_indexes() {
        let dir = tempdir().unwrap();
        let db = VariantDatabase::create(dir.path().join("s.sqlite"), "s").unwrap();
        db.save_source(&source("7", "5", &["S1"])).unwrap();
        db.load_variants(vec![Ok(variant("7", "5", 10, &[("S1", "0|1")]))], true).unwrap();

        let mut cohort_stats = BTreeMap::new();
        cohort_stats.insert("ALL".to_string(), crate::models::CohortStats::default());
        let stats = vec![
            VariantStatsRecord {
                chromosome: "20".to_string(),
                position: 10,
                reference: "G".to_string(),
                alternate: "A".to_string(),
                study_id: "7".to_string(),
                file_id: "5".to_string(),
                cohort_stats: cohort_stats.clone(),
            },
            VariantStatsRecord {
                chromosome: "20".to_string(),
                position: 11,
                reference: "G".to_string(),
                alternate: "A".to_string(),
                study_id: "7".to_string(),
                file_id: "5".to_string(),
                cohort_stats,
            },
        ];
        assert_eq!(db.update_stats(&stats).unwrap(), 1);

        let record = db.iterator(&VariantQuery::new()).unwrap().next().unwrap().unwrap();
        let entry = record.source_entry("7", "5").unwrap();
        assert_eq!(entry.cohort_stats.len(), 1);
        assert_eq!(entry.samples_data["S1"], "0|1");

        assert!(!db.has_indexes().unwrap());
        db.create_indexes().unwrap();
        assert!(db.has_indexes().unwrap());
    }

    #[test]
    fn test_open_missing_database() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            VariantDatabase::open(dir.path().join("none.sqlite"), "none"),
            Err(StorageError::UnknownDatabase(_))
        ));
    }
}
