// ==============================================================================
// exporter.rs - Per-Study VCF Export
// ==============================================================================
// Description: Writes stored variants back out as one gzipped VCF per study
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Export flow:
//   1. Study metadata from the file sources: ordered sample union per study
//   2. For each record (in iterator order), for each study present on it:
//      - merge the study's file entries into one sample → genotype map
//      - re-map genotypes onto {0 = ref, 1 = alt, 2 = other}
//      - ALT gets the symbolic <*> only when a sample carries "other"
//   3. A conversion error skips that record for that study and is counted
//   4. Writers open lazily per study; all are finished at the end
// Storage and I/O errors abort the export.
// ==============================================================================

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::compression::OutputStream;
use crate::error::{ConversionError, PipelineError, StorageError};
use crate::genotype::Genotype;
use crate::models::{CohortStats, VariantRecord, VariantSource, DEFAULT_COHORT};
use crate::storage::{VariantDbAdaptor, VariantQuery};

/// Symbolic allele standing for every alternate but the one on the line
pub const OTHER_ALLELE_SYMBOL: &str = "<*>";

const MISSING_GENOTYPE: &str = "./.";

/// Samples and files of one study, merged across its files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyMetadata {
    pub study_id: String,
    pub study_name: String,
    pub file_ids: Vec<String>,
    /// Ordered union of the files' samples
    pub samples: Vec<String>,
}

impl StudyMetadata {
    fn new(source: &VariantSource) -> Self {
        Self {
            study_id: source.study_id.clone(),
            study_name: source.study_name.clone(),
            file_ids: Vec::new(),
            samples: Vec::new(),
        }
    }

    fn add_source(&mut self, source: &VariantSource) {
        if !self.file_ids.contains(&source.file_id) {
            self.file_ids.push(source.file_id.clone());
        }
        for sample in &source.samples {
            if !self.samples.contains(sample) {
                self.samples.push(sample.clone());
            }
        }
    }

    /// Group sources by study, keeping only the files accepted by `query`
    pub fn from_sources(sources: &[VariantSource], query: &VariantQuery) -> BTreeMap<String, StudyMetadata> {
        let mut studies: BTreeMap<String, StudyMetadata> = BTreeMap::new();
        for source in sources {
            if !query.accepts_study(&source.study_id) {
                continue;
            }
            if !query.files.is_empty() && !query.files.contains(&source.file_id) {
                continue;
            }
            studies
                .entry(source.study_id.clone())
                .or_insert_with(|| StudyMetadata::new(source))
                .add_source(source);
        }
        studies
    }

    /// `<studyId>_<fileId>[-<fileId>...].vcf.gz`
    pub fn output_file_name(&self) -> String {
        format!("{}_{}.vcf.gz", self.study_id, self.file_ids.join("-"))
    }
}

/// Result of one export call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    /// One file per study that received a record, in order of first record
    pub files: Vec<PathBuf>,
    /// Records that could not be converted (per study they belong to)
    pub failed_variants: u64,
    /// Study id → data lines written
    pub written: BTreeMap<String, u64>,
}

impl ExportSummary {
    pub fn total_written(&self) -> u64 {
        self.written.values().sum()
    }
}

/// One converted line, or why the record could not be converted for a study
#[derive(Debug, Clone, PartialEq)]
pub struct StudyLine {
    pub study_id: String,
    pub line: Result<String, ConversionError>,
}

/// Convert a record into one VCF data line per study carried by it
///
/// Studies missing from `studies` yield `ConversionError::UnknownStudy`.
pub fn variant_to_vcf_lines(record: &VariantRecord, studies: &BTreeMap<String, StudyMetadata>) -> Vec<StudyLine> {
    record
        .study_ids()
        .into_iter()
        .map(|study_id| StudyLine {
            study_id: study_id.to_string(),
            line: match studies.get(study_id) {
                Some(study) => study_line(record, study),
                None => Err(ConversionError::UnknownStudy {
                    variant: record.id(),
                    study_id: study_id.to_string(),
                }),
            },
        })
        .collect()
}

fn study_line(record: &VariantRecord, study: &StudyMetadata) -> Result<String, ConversionError> {
    let mut genotypes: HashMap<&str, Genotype> = HashMap::new();
    let mut stats = None;

    for entry in record.entries_for_study(&study.study_id) {
        let allele = entry
            .allele_index(&record.alternate)
            .ok_or_else(|| ConversionError::AlternateNotFound {
                variant: record.id(),
                alternate: record.alternate.clone(),
            })?;

        for (sample, gt) in &entry.samples_data {
            if !study.samples.contains(sample) {
                return Err(ConversionError::UnknownSample {
                    variant: record.id(),
                    study_id: study.study_id.clone(),
                    sample: sample.clone(),
                });
            }
            let genotype = gt
                .parse::<Genotype>()
                .and_then(|g| g.validate(entry.allele_count()).map(|_| g))
                .map_err(|source| ConversionError::MalformedGenotype {
                    variant: record.id(),
                    sample: sample.clone(),
                    source,
                })?;
            genotypes.insert(sample.as_str(), genotype.remap(allele));
        }

        if stats.is_none() {
            stats = entry.cohort_stats.get(DEFAULT_COHORT);
        }
    }

    let with_other = genotypes.values().any(Genotype::uses_other_allele);
    let mut alternate = record.alternate.clone();
    if with_other {
        alternate.push(',');
        alternate.push_str(OTHER_ALLELE_SYMBOL);
    }

    let ids = if record.ids.is_empty() {
        ".".to_string()
    } else {
        record.ids.join(";")
    };

    let mut columns = vec![
        record.chromosome.clone(),
        record.position.to_string(),
        ids,
        record.reference.clone(),
        alternate,
        ".".to_string(),
        ".".to_string(),
        stats.map_or_else(|| ".".to_string(), |stats| info_column(stats, with_other)),
    ];

    if !study.samples.is_empty() {
        columns.push("GT".to_string());
        for sample in &study.samples {
            columns.push(match genotypes.get(sample.as_str()) {
                Some(genotype) => genotype.to_string(),
                None => MISSING_GENOTYPE.to_string(),
            });
        }
    }

    Ok(columns.join("\t"))
}

/// AC/AN/AF with one AC and AF value per written alternate; the `<*>` values
/// cover every called allele that is neither the reference nor the alternate
fn info_column(stats: &CohortStats, with_other: bool) -> String {
    let mut counts = vec![stats.alt_allele_count];
    let mut frequencies = vec![format_frequency(stats.alt_allele_freq)];

    if with_other {
        let other = stats
            .allele_number
            .saturating_sub(stats.ref_allele_count)
            .saturating_sub(stats.alt_allele_count);
        let frequency = if stats.allele_number > 0 {
            other as f64 / stats.allele_number as f64
        } else {
            0.0
        };
        counts.push(other);
        frequencies.push(format_frequency(frequency));
    }

    format!(
        "AC={};AN={};AF={}",
        counts.iter().map(u32::to_string).collect::<Vec<_>>().join(","),
        stats.allele_number,
        frequencies.join(",")
    )
}

/// Frequency with at most 4 decimals and no trailing zeros
fn format_frequency(value: f64) -> String {
    let formatted = format!("{:.4}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

struct StudyWriter {
    path: PathBuf,
    stream: OutputStream,
}

/// Exports variants into `<output_dir>/<studyId>_<fileIds>.vcf.gz`
pub struct VariantExporter {
    output_dir: PathBuf,
    species: String,
}

impl VariantExporter {
    pub fn new(output_dir: impl Into<PathBuf>, species: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            species: species.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Query `db` and export what it returns
    pub fn export_from_db(&self, db: &dyn VariantDbAdaptor, query: &VariantQuery) -> Result<ExportSummary, PipelineError> {
        let sources = db.sources(&query.studies)?;
        info!(
            "Exporting from database '{}' ({} file sources)",
            db.name(),
            sources.len()
        );
        self.export(db.iterator(query)?, &sources, query)
    }

    /// Export `variants` as one VCF per study
    pub fn export<I>(
        &self,
        variants: I,
        sources: &[VariantSource],
        query: &VariantQuery,
    ) -> Result<ExportSummary, PipelineError>
    where
        I: IntoIterator<Item = Result<VariantRecord, StorageError>>,
    {
        let studies = StudyMetadata::from_sources(sources, query);
        std::fs::create_dir_all(&self.output_dir)?;

        let mut summary = ExportSummary::default();
        let mut writers: HashMap<String, StudyWriter> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for record in variants {
            let record = match query.restrict(record?) {
                Some(record) => record,
                None => continue,
            };

            for StudyLine { study_id, line } in variant_to_vcf_lines(&record, &studies) {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Skipping variant for study {}: {}", study_id, e);
                        summary.failed_variants += 1;
                        continue;
                    }
                };

                if !writers.contains_key(&study_id) {
                    // Converted lines only come from known studies
                    let Some(study) = studies.get(&study_id) else { continue };
                    writers.insert(study_id.clone(), self.open_writer(study)?);
                    order.push(study_id.clone());
                }
                if let Some(writer) = writers.get_mut(&study_id) {
                    writer.stream.write_all(line.as_bytes())?;
                    writer.stream.write_all(b"\n")?;
                    *summary.written.entry(study_id).or_insert(0) += 1;
                }
            }
        }

        for study_id in order {
            if let Some(writer) = writers.remove(&study_id) {
                writer.stream.finish()?;
                info!(
                    "Study {}: {} variants written to {}",
                    study_id,
                    summary.written.get(&study_id).copied().unwrap_or(0),
                    writer.path.display()
                );
                summary.files.push(writer.path);
            }
        }

        if summary.failed_variants > 0 {
            warn!("{} variants could not be exported", summary.failed_variants);
        }
        Ok(summary)
    }

    fn open_writer(&self, study: &StudyMetadata) -> Result<StudyWriter, PipelineError> {
        let path = self.output_dir.join(study.output_file_name());
        debug!("Opening {} for study {}", path.display(), study.study_id);

        let mut stream = OutputStream::create(&path, true)?;
        stream.write_all(self.header(study).as_bytes())?;
        Ok(StudyWriter { path, stream })
    }

    fn header(&self, study: &StudyMetadata) -> String {
        let mut header = String::new();
        header.push_str("##fileformat=VCFv4.2\n");
        header.push_str(&format!("##fileDate={}\n", Utc::now().format("%Y%m%d")));
        header.push_str(&format!("##source=variant-pipeline-{}\n", env!("CARGO_PKG_VERSION")));
        header.push_str(&format!("##species={}\n", self.species));
        header.push_str(&format!(
            "##study=<ID={},Name=\"{}\",Files=\"{}\">\n",
            study.study_id,
            study.study_name,
            study.file_ids.join(",")
        ));
        header.push_str("##ALT=<ID=*,Description=\"Represents any alternate allele other than the one on this line\">\n");
        header.push_str("##INFO=<ID=AC,Number=A,Type=Integer,Description=\"Alternate allele count\">\n");
        header.push_str("##INFO=<ID=AN,Number=1,Type=Integer,Description=\"Total number of called alleles\">\n");
        header.push_str("##INFO=<ID=AF,Number=A,Type=Float,Description=\"Alternate allele frequency\">\n");
        header.push_str("##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n");

        header.push_str("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO");
        if !study.samples.is_empty() {
            header.push_str("\tFORMAT");
            for sample in &study.samples {
                header.push('\t');
                header.push_str(sample);
            }
        }
        header.push('\n');
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::open_input;
    use crate::models::{CohortStats, SourceEntry};
    use std::io::BufRead;
    use tempfile::tempdir;

    fn source(study: &str, file: &str, samples: &[&str]) -> VariantSource {
        let mut source = VariantSource::new(format!("{}.vcf", file), file, study, format!("Study {}", study));
        source.samples = samples.iter().map(|s| s.to_string()).collect();
        source
    }

    fn entry(study: &str, file: &str, alternates: &[&str], genotypes: &[(&str, &str)]) -> SourceEntry {
        let mut entry = SourceEntry::new(study, file, alternates.iter().map(|a| a.to_string()).collect());
        for (sample, gt) in genotypes {
            entry.samples_data.insert(sample.to_string(), gt.to_string());
        }
        entry
    }

    fn studies(sources: &[VariantSource]) -> BTreeMap<String, StudyMetadata> {
        StudyMetadata::from_sources(sources, &VariantQuery::new())
    }

    #[test]
    fn test_multiallelic_lines_are_remapped() {
        let sources = [source("7", "5", &["S1", "S2"])];
        let genotypes = [("S1", "0|2"), ("S2", "1|2")];

        let mut for_a = VariantRecord::new("20", 61098, "C", "A");
        for_a.add_source_entry(entry("7", "5", &["A", "T"], &genotypes));
        let mut for_t = VariantRecord::new("20", 61098, "C", "T");
        for_t.add_source_entry(entry("7", "5", &["A", "T"], &genotypes));

        let a = variant_to_vcf_lines(&for_a, &studies(&sources));
        assert_eq!(
            a[0].line.as_deref().unwrap(),
            "20\t61098\t.\tC\tA,<*>\t.\t.\t.\tGT\t0|2\t1|2"
        );
        let t = variant_to_vcf_lines(&for_t, &studies(&sources));
        assert_eq!(
            t[0].line.as_deref().unwrap(),
            "20\t61098\t.\tC\tT,<*>\t.\t.\t.\tGT\t0|1\t2|1"
        );
    }

    #[test]
    fn test_symbolic_allele_gets_its_own_counts() {
        let sources = [source("7", "5", &["S1", "S2"])];
        let mut record = VariantRecord::new("20", 61098, "C", "A");
        let mut stored = entry("7", "5", &["A", "T"], &[("S1", "0|2"), ("S2", "1|2")]);
        stored.cohort_stats.insert(
            DEFAULT_COHORT.to_string(),
            CohortStats {
                ref_allele_count: 1,
                alt_allele_count: 1,
                allele_number: 4,
                alt_allele_freq: 0.25,
                ..Default::default()
            },
        );
        record.add_source_entry(stored);

        let line = variant_to_vcf_lines(&record, &studies(&sources))[0].line.clone().unwrap();
        let columns: Vec<&str> = line.split('\t').collect();
        assert_eq!(columns[4], "A,<*>");
        assert_eq!(columns[7], "AC=1,2;AN=4;AF=0.25,0.5");

        // No <*> written: a single value per field
        let stats = CohortStats {
            ref_allele_count: 3,
            alt_allele_count: 1,
            allele_number: 4,
            alt_allele_freq: 0.25,
            ..Default::default()
        };
        assert_eq!(info_column(&stats, false), "AC=1;AN=4;AF=0.25");
    }

    #[test]
    fn test_merges_files_and_fills_missing_samples() {
        let sources = [source("7", "5", &["S1"]), source("7", "6", &["S2"]), source("7", "8", &["S3"])];
        let mut record = VariantRecord::new("1", 100, "G", "A");
        record.ids.push("rs1".to_string());
        let mut first = entry("7", "5", &["A"], &[("S1", "0/1")]);
        first.cohort_stats.insert(
            DEFAULT_COHORT.to_string(),
            CohortStats {
                alt_allele_count: 1,
                allele_number: 3,
                alt_allele_freq: 1.0 / 3.0,
                ..Default::default()
            },
        );
        record.add_source_entry(first);
        record.add_source_entry(entry("7", "6", &["A"], &[("S2", "1/1")]));

        let lines = variant_to_vcf_lines(&record, &studies(&sources));
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines[0].line.as_deref().unwrap(),
            "1\t100\trs1\tG\tA\t.\t.\tAC=1;AN=3;AF=0.3333\tGT\t0/1\t1/1\t./."
        );
    }

    #[test]
    fn test_conversion_errors() {
        let sources = [source("7", "5", &["S1"])];

        let mut bad_gt = VariantRecord::new("1", 100, "G", "A");
        bad_gt.add_source_entry(entry("7", "5", &["A"], &[("S1", "0|3")]));
        assert!(matches!(
            variant_to_vcf_lines(&bad_gt, &studies(&sources))[0].line,
            Err(ConversionError::MalformedGenotype { .. })
        ));

        let mut stranger = VariantRecord::new("1", 100, "G", "A");
        stranger.add_source_entry(entry("7", "5", &["A"], &[("NOBODY", "0|1")]));
        assert!(matches!(
            variant_to_vcf_lines(&stranger, &studies(&sources))[0].line,
            Err(ConversionError::UnknownSample { .. })
        ));

        let mut unknown_study = VariantRecord::new("1", 100, "G", "A");
        unknown_study.add_source_entry(entry("9", "1", &["A"], &[]));
        assert!(matches!(
            variant_to_vcf_lines(&unknown_study, &studies(&sources))[0].line,
            Err(ConversionError::UnknownStudy { .. })
        ));
    }

    #[test]
    fn test_export_writes_one_file_per_study() {
        let dir = tempdir().unwrap();
        let sources = [source("7", "5", &["S1"]), source("8", "6", &[])];

        let mut both = VariantRecord::new("20", 10, "A", "G");
        both.add_source_entry(entry("7", "5", &["G"], &[("S1", "0|1")]));
        both.add_source_entry(entry("8", "6", &["G"], &[]));
        let mut broken = VariantRecord::new("20", 11, "A", "C");
        broken.add_source_entry(entry("7", "5", &["C"], &[("S1", "x|1")]));
        let mut only_8 = VariantRecord::new("20", 12, "T", "C");
        only_8.add_source_entry(entry("8", "6", &["C"], &[]));

        let variants: Vec<Result<VariantRecord, StorageError>> = vec![Ok(both), Ok(broken), Ok(only_8)];
        let exporter = VariantExporter::new(dir.path(), "hsapiens");
        let summary = exporter.export(variants, &sources, &VariantQuery::new()).unwrap();

        assert_eq!(
            summary.files,
            vec![dir.path().join("7_5.vcf.gz"), dir.path().join("8_6.vcf.gz")]
        );
        assert_eq!(summary.failed_variants, 1);
        assert_eq!(summary.written["7"], 1);
        assert_eq!(summary.written["8"], 2);

        let lines: Vec<String> = open_input(&summary.files[1]).unwrap().lines().map(|l| l.unwrap()).collect();
        assert!(lines[0].starts_with("##fileformat=VCFv4.2"));
        assert!(lines.contains(&"##species=hsapiens".to_string()));
        assert!(lines.contains(&"#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO".to_string()));
        let data: Vec<&String> = lines.iter().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(data.len(), 2);
        assert!(data[0].starts_with("20\t10\t"));
    }

    #[test]
    fn test_export_aborts_on_storage_error() {
        let dir = tempdir().unwrap();
        let variants: Vec<Result<VariantRecord, StorageError>> =
            vec![Err(StorageError::UnknownDatabase("gone".to_string()))];
        let exporter = VariantExporter::new(dir.path(), "hsapiens");
        let result = exporter.export(variants, &[], &VariantQuery::new());
        assert!(matches!(result, Err(PipelineError::Storage(_))));
    }

    #[test]
    fn test_format_frequency() {
        assert_eq!(format_frequency(0.5), "0.5");
        assert_eq!(format_frequency(0.0), "0");
        assert_eq!(format_frequency(1.0), "1");
        assert_eq!(format_frequency(2.0 / 3.0), "0.6667");
    }
}
