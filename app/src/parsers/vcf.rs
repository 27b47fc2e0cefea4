// ==============================================================================
// parsers/vcf.rs - VCF variant reader
// ==============================================================================
// Description: Streams VCF records as single-alternate VariantRecords
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// References:
// - VCF 4.2 Spec: https://samtools.github.io/hts-specs/VCFv4.2.pdf
// - noodles-vcf: https://docs.rs/noodles-vcf/0.81.0/noodles_vcf/
// ==============================================================================
// Records are read with the noodles reader. The stream runs through a
// LineCapture so the raw text of the current line stays available for
// includeSrc and for reporting malformed columns with their line number.
// ==============================================================================

use flate2::read::MultiGzDecoder;
use noodles_vcf as vcf;
use noodles_vcf::variant::record::{AlternateBases as _, Ids as _};
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::config::IncludeSrc;
use crate::models::{Aggregation, SourceEntry, VariantRecord};

/// Attribute key holding the original VCF columns when `includeSrc` is set
pub const SRC_ATTRIBUTE: &str = "src";

/// Number of fixed columns (CHROM..INFO)
const FIXED_COLUMNS: usize = 8;

/// VCF parsing errors
#[derive(Error, Debug)]
pub enum VcfParseError {
    #[error("Failed to open VCF file {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Failed to read VCF header: {0}")]
    Header(String),

    #[error("Data line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Study/file context attached to every produced record
#[derive(Debug, Clone)]
pub struct VcfReadOptions {
    pub study_id: String,
    pub file_id: String,
    pub aggregation: Aggregation,
    pub include_src: IncludeSrc,
}

/// BufRead adapter keeping a copy of every byte consumed since the last clear
struct LineCapture<R> {
    inner: R,
    consumed: Vec<u8>,
}

impl<R> LineCapture<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            consumed: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.consumed.clear();
    }

    /// Consumed text without the line terminator
    fn line(&self) -> String {
        String::from_utf8_lossy(&self.consumed)
            .trim_end_matches(['\n', '\r'])
            .to_string()
    }
}

impl<R: Read> Read for LineCapture<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for LineCapture<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        if let Ok(buf) = self.inner.fill_buf() {
            let n = amt.min(buf.len());
            self.consumed.extend_from_slice(&buf[..n]);
        }
        self.inner.consume(amt);
    }
}

/// Lazily reads a VCF stream, one decomposed record at a time
pub struct VariantReader<R> {
    reader: vcf::io::Reader<LineCapture<R>>,
    record: vcf::Record,
    samples: Vec<String>,
    options: VcfReadOptions,
    /// Data lines read so far (header excluded)
    line_number: usize,
    pending: VecDeque<VariantRecord>,

    /// Non-variant sites (ALT = ".") skipped so far
    pub skipped_count: usize,
}

impl VariantReader<Box<dyn BufRead>> {
    /// Open a plain or gzip-compressed VCF file
    ///
    /// # Example
    /// ```no_run
    /// use variant_pipeline::config::IncludeSrc;
    /// use variant_pipeline::models::Aggregation;
    /// use variant_pipeline::parsers::{VariantReader, VcfReadOptions};
    ///
    /// let options = VcfReadOptions {
    ///     study_id: "7".to_string(),
    ///     file_id: "5".to_string(),
    ///     aggregation: Aggregation::None,
    ///     include_src: IncludeSrc::No,
    /// };
    /// let reader = VariantReader::open("small20.vcf.gz", options)?;
    /// for record in reader {
    ///     println!("{}", record?.id());
    /// }
    /// # Ok::<(), variant_pipeline::parsers::VcfParseError>(())
    /// ```
    pub fn open(path: impl AsRef<Path>, options: VcfReadOptions) -> Result<Self, VcfParseError> {
        let path = path.as_ref();

        let file = File::open(path).map_err(|e| VcfParseError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        // MultiGzDecoder reads both BGZF and plain gzip members
        let inner: Box<dyn BufRead> = if is_gzip(path) {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        Self::new(inner, options)
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz" || ext == "bgz")
}

impl<R: BufRead> VariantReader<R> {
    /// Wrap an uncompressed VCF stream and read its header
    pub fn new(inner: R, options: VcfReadOptions) -> Result<Self, VcfParseError> {
        let mut reader = vcf::io::Reader::new(LineCapture::new(inner));
        let header = reader
            .read_header()
            .map_err(|e| VcfParseError::Header(e.to_string()))?;

        let samples: Vec<String> = header.sample_names().iter().cloned().collect();

        Ok(Self {
            reader,
            record: vcf::Record::default(),
            samples,
            options,
            line_number: 0,
            pending: Default::default(),
            skipped_count: 0,
        })
    }

    /// Sample names in column order
    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    fn malformed(&self, reason: impl Into<String>) -> VcfParseError {
        VcfParseError::Malformed {
            line: self.line_number,
            reason: reason.into(),
        }
    }

    /// Read the next data record; `Ok(None)` at end of stream
    fn next_record(&mut self) -> Result<Option<String>, VcfParseError> {
        loop {
            self.reader.get_mut().clear();
            let result = self.reader.read_record(&mut self.record);
            let line = self.reader.get_ref().line();

            match result {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.line_number += 1;
                    return Ok(Some(line));
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    self.line_number += 1;
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Err(self.malformed(format!(
                        "expected at least {} columns: {}",
                        FIXED_COLUMNS, e
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Decompose the current record into one record per alternate allele
    fn decompose(&self, line: &str) -> Result<Vec<VariantRecord>, VcfParseError> {
        let record = &self.record;
        let raw_column = |i: usize| line.split('\t').nth(i).unwrap_or_default();

        let chromosome = record.reference_sequence_name();
        if chromosome.is_empty() {
            return Err(self.malformed("empty chromosome"));
        }

        let position = match record.variant_start() {
            Some(Ok(position)) => position.get() as u64,
            _ => {
                return Err(self.malformed(format!("invalid position '{}'", raw_column(1))));
            }
        };

        let ids: Vec<String> = record.ids().iter().map(str::to_string).collect();

        let reference = record.reference_bases();
        if reference.is_empty() || reference == "." {
            return Err(self.malformed("empty reference allele"));
        }

        // noodles reports both an empty column and "." as no alternates
        let alternate_bases = record.alternate_bases();
        if alternate_bases.is_empty() {
            return match raw_column(4) {
                "." => Ok(Vec::new()),
                _ => Err(self.malformed("empty alternate allele")),
            };
        }
        let alternates = alternate_bases
            .iter()
            .map(|alt| alt.map(str::to_string))
            .collect::<io::Result<Vec<String>>>()
            .map_err(|e| self.malformed(e.to_string()))?;
        if alternates.iter().any(|alt| alt.is_empty()) {
            return Err(self.malformed(format!(
                "empty alternate allele in '{}'",
                alternate_bases.as_ref()
            )));
        }

        let mut format = Vec::new();
        let mut samples_data = BTreeMap::new();

        if !self.options.aggregation.is_aggregated() {
            let columns = record.samples();
            let found = if columns.is_empty() {
                FIXED_COLUMNS
            } else {
                FIXED_COLUMNS + 1 + columns.iter().count()
            };
            let expected = if self.samples.is_empty() {
                FIXED_COLUMNS
            } else {
                FIXED_COLUMNS + 1 + self.samples.len()
            };
            if found != expected {
                return Err(self.malformed(format!(
                    "expected {} columns for {} samples, found {}",
                    expected,
                    self.samples.len(),
                    found
                )));
            }

            if !self.samples.is_empty() {
                format = columns.keys().iter().map(str::to_string).collect();
                let gt_index = format.iter().position(|key| key == "GT");

                for (sample, values) in self.samples.iter().zip(columns.iter()) {
                    let genotype = gt_index
                        .and_then(|i| values.as_ref().split(':').nth(i))
                        .unwrap_or(".");
                    samples_data.insert(sample.clone(), genotype.to_string());
                }
            }
        }

        let src = match self.options.include_src {
            IncludeSrc::No => None,
            IncludeSrc::First8Columns => Some(
                line.split('\t')
                    .take(FIXED_COLUMNS)
                    .collect::<Vec<_>>()
                    .join("\t"),
            ),
            IncludeSrc::Full => Some(line.to_string()),
        };

        let records = alternates
            .iter()
            .map(|alternate| {
                let mut entry = SourceEntry::new(
                    self.options.study_id.clone(),
                    self.options.file_id.clone(),
                    alternates.clone(),
                );
                entry.format = format.clone();
                entry.samples_data = samples_data.clone();
                if let Some(src) = &src {
                    entry.attributes.insert(SRC_ATTRIBUTE.to_string(), src.clone());
                }

                let mut record = VariantRecord::new(chromosome, position, reference, alternate.clone());
                record.ids = ids.clone();
                record.add_source_entry(entry);
                record
            })
            .collect();

        Ok(records)
    }
}

impl<R: BufRead> Iterator for VariantReader<R> {
    type Item = Result<VariantRecord, VcfParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }

            let line = match self.next_record() {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            };

            match self.decompose(&line) {
                Ok(records) if records.is_empty() => {
                    debug!("Line {}: non-variant site skipped", self.line_number);
                    self.skipped_count += 1;
                }
                Ok(records) => self.pending.extend(records),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "##fileformat=VCFv4.2\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\tS3\n";

    fn options(aggregation: Aggregation, include_src: IncludeSrc) -> VcfReadOptions {
        VcfReadOptions {
            study_id: "7".to_string(),
            file_id: "5".to_string(),
            aggregation,
            include_src,
        }
    }

    fn read_all(body: &str, options: VcfReadOptions) -> Result<Vec<VariantRecord>, VcfParseError> {
        let text = format!("{}{}", HEADER, body);
        VariantReader::new(text.as_bytes(), options)?.collect()
    }

    #[test]
    fn test_reads_samples_from_header() {
        let reader = VariantReader::new(HEADER.as_bytes(), options(Aggregation::None, IncludeSrc::No)).unwrap();
        assert_eq!(reader.samples(), &["S1", "S2", "S3"]);
    }

    #[test]
    fn test_splits_multiallelic_site() {
        let records = read_all(
            "20\t100\trs1\tC\tA,T\t.\tPASS\t.\tGT\t0|0\t1|2\t0|1\n",
            options(Aggregation::None, IncludeSrc::No),
        )
        .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id(), "20:100:C:A");
        assert_eq!(records[1].id(), "20:100:C:T");
        assert_eq!(records[0].ids, vec!["rs1".to_string()]);

        let entry = records[1].source_entry("7", "5").unwrap();
        assert_eq!(entry.alternates, vec!["A".to_string(), "T".to_string()]);
        assert_eq!(entry.samples_data["S2"], "1|2");
        assert_eq!(entry.allele_index(&records[1].alternate), Some(2));
    }

    #[test]
    fn test_empty_alternate_is_malformed() {
        let result = read_all(
            "20\t100\t.\tC\t\t.\tPASS\t.\tGT\t0|0\t0|0\t0|0\n",
            options(Aggregation::None, IncludeSrc::No),
        );
        assert!(matches!(result, Err(VcfParseError::Malformed { line: 1, .. })));
    }

    #[test]
    fn test_non_variant_site_skipped() {
        let text = format!(
            "{}20\t100\t.\tC\t.\t.\tPASS\t.\tGT\t0|0\t0|0\t0|0\n20\t200\t.\tG\tA\t.\tPASS\t.\tGT\t0|1\t0|0\t0|0\n",
            HEADER
        );
        let mut reader = VariantReader::new(text.as_bytes(), options(Aggregation::None, IncludeSrc::No)).unwrap();
        let records: Vec<_> = reader.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].position, 200);
        assert_eq!(reader.skipped_count, 1);
    }

    #[test]
    fn test_sample_column_count_checked() {
        let result = read_all(
            "20\t100\t.\tC\tA\t.\tPASS\t.\tGT\t0|0\t0|1\n",
            options(Aggregation::None, IncludeSrc::No),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_position() {
        let result = read_all(
            "20\tabc\t.\tC\tA\t.\tPASS\t.\tGT\t0|0\t0|1\t1|1\n",
            options(Aggregation::None, IncludeSrc::No),
        );
        match result {
            Err(VcfParseError::Malformed { reason, .. }) => assert!(reason.contains("abc")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_truncated_line_reports_its_number() {
        let result = read_all(
            "20\t100\t.\tC\tA\t.\tPASS\t.\tGT\t0|0\t0|1\t1|1\n20\t200\t.\tG\n",
            options(Aggregation::None, IncludeSrc::No),
        );
        assert!(matches!(result, Err(VcfParseError::Malformed { line: 2, .. })));
    }

    #[test]
    fn test_blank_lines_and_missing_ids() {
        let records = read_all(
            "20\t100\t.\tC\tA\t.\tPASS\t.\tGT\t0|0\t0|1\t1|1\n\n20\t200\trs2;rs3\tG\tT\t.\tPASS\t.\tGT\t0|0\t0|0\t0|1\n",
            options(Aggregation::None, IncludeSrc::No),
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].ids.is_empty());
        assert_eq!(records[1].ids, vec!["rs2".to_string(), "rs3".to_string()]);
        assert_eq!(records[1].position, 200);
    }

    #[test]
    fn test_aggregated_ignores_samples() {
        let records = read_all(
            "20\t100\t.\tC\tA\t.\tPASS\tAC=3\tGT\t0|0\n",
            options(Aggregation::Basic, IncludeSrc::No),
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].source_entry("7", "5").unwrap().samples_data.is_empty());
    }

    #[test]
    fn test_include_src() {
        let line = "20\t100\t.\tC\tA\t.\tPASS\tDP=4\tGT:DP\t0|0:1\t0|1:2\t1|1:3";
        let body = format!("{}\n", line);

        let first8 = read_all(&body, options(Aggregation::None, IncludeSrc::First8Columns)).unwrap();
        let entry = first8[0].source_entry("7", "5").unwrap();
        assert_eq!(entry.attributes[SRC_ATTRIBUTE], "20\t100\t.\tC\tA\t.\tPASS\tDP=4");
        assert_eq!(entry.format, vec!["GT".to_string(), "DP".to_string()]);
        assert_eq!(entry.samples_data["S3"], "1|1");

        let full = read_all(&body, options(Aggregation::None, IncludeSrc::Full)).unwrap();
        assert_eq!(full[0].source_entry("7", "5").unwrap().attributes[SRC_ATTRIBUTE], line);

        let none = read_all(&body, options(Aggregation::None, IncludeSrc::No)).unwrap();
        assert!(none[0].source_entry("7", "5").unwrap().attributes.is_empty());
    }
}
