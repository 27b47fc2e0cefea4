// ==============================================================================
// tests/common/mod.rs - Shared Integration Test Fixtures
// ==============================================================================
// Description: Generated VCF inputs, job parameters and a call-counting gateway
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

#![allow(dead_code)]

use std::cell::Cell;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use url::Url;

use variant_pipeline::compression::{is_gzip_path, open_input, OutputStream};
use variant_pipeline::config::VariantOptions;
use variant_pipeline::error::StorageError;
use variant_pipeline::parameters::{keys, JobParameters};
use variant_pipeline::storage::{Cohorts, LocalVariantStorage, VariantDbAdaptor, VariantStorage};

/// Study 7, file 5: three samples, one multi-allelic site, one non-variant
/// site; decomposes into 5 records
pub const STUDY_7_VCF: &str = "##fileformat=VCFv4.2\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\tS2\tS3\n\
20\t60343\t.\tG\tA\t.\tPASS\t.\tGT\t0|0\t0|1\t0|0\n\
20\t61098\trs6078030\tC\tA,T\t.\tPASS\t.\tGT\t0|1\t1|2\t2|2\n\
20\t61270\t.\tA\tC\t.\tPASS\t.\tGT\t0|0\t0|0\t1|1\n\
20\t62000\t.\tT\t.\t.\tPASS\t.\tGT\t0|0\t0|0\t0|0\n\
21\t9000\t.\tC\tG\t.\tPASS\t.\tGT\t0|1\t./.\t0|0\n";

pub const STUDY_7_RECORDS: usize = 5;

/// Study 8, file 6: two samples; 20:61098 C>T is shared with study 7
pub const STUDY_8_VCF: &str = "##fileformat=VCFv4.2\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS4\tS5\n\
20\t61098\t.\tC\tT\t.\tPASS\t.\tGT\t0|1\t0|0\n\
20\t70000\t.\tG\tC\t.\tPASS\t.\tGT\t1|1\t0|1\n";

pub const STUDY_8_RECORDS: usize = 2;

/// Aggregated study: no sample columns, frequencies in INFO
pub const AGGREGATED_VCF: &str = "##fileformat=VCFv4.2\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
1\t1000\t.\tA\tG\t.\tPASS\tAC=3;AN=10\n\
1\t2000\t.\tT\tC,G\t.\tPASS\tAC=1,2;AN=10\n";

/// Biallelic study with `records` sites on chromosome 22 and three samples
pub fn generated_vcf(records: usize) -> String {
    let genotypes = ["0|0", "0|1", "1|1", "1|0"];
    let bases = ["A", "C", "G", "T"];

    let mut text = String::from(
        "##fileformat=VCFv4.2\n\
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tG1\tG2\tG3\n",
    );
    for i in 0..records {
        let reference = bases[i % 4];
        let alternate = bases[(i + 1) % 4];
        text.push_str(&format!(
            "22\t{}\trs{}\t{}\t{}\t.\tPASS\t.\tGT\t{}\t{}\t{}\n",
            16_000_000 + i * 10,
            i + 1,
            reference,
            alternate,
            genotypes[i % 4],
            genotypes[(i + 1) % 4],
            genotypes[(i + 2) % 4],
        ));
    }
    text
}

pub fn write_text_file(path: &Path, text: &str) -> PathBuf {
    let mut out = OutputStream::create(path, is_gzip_path(path)).unwrap();
    out.write_all(text.as_bytes()).unwrap();
    out.finish().unwrap();
    path.to_path_buf()
}

pub fn count_lines(path: &Path) -> usize {
    open_input(path).unwrap().lines().count()
}

/// Parameters of a variantJob run over `input`, all stats steps enabled
pub fn job_parameters(input: &Path, output_dir: &Path, study_id: &str, file_id: &str) -> JobParameters {
    JobParameters::new()
        .with(keys::INPUT, input.to_string_lossy())
        .with(keys::OUTPUT_DIR, output_dir.to_string_lossy())
        .with(keys::DB_NAME, "batch")
        .with(keys::STUDY_ID, study_id)
        .with(keys::FILE_ID, file_id)
        .with(keys::STUDY_NAME, format!("Study {}", study_id))
        .with(keys::COMPRESS_EXTENSION, ".gz")
        .with(keys::COMPRESS_GENOTYPES, "true")
}

/// Local gateway that counts the calls it delegates
pub struct CountingStorage {
    pub inner: LocalVariantStorage,
    pub transform_calls: Cell<usize>,
    pub load_calls: Cell<usize>,
    pub post_load_calls: Cell<usize>,
    pub create_stats_calls: Cell<usize>,
}

impl CountingStorage {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            inner: LocalVariantStorage::new(home),
            transform_calls: Cell::new(0),
            load_calls: Cell::new(0),
            post_load_calls: Cell::new(0),
            create_stats_calls: Cell::new(0),
        }
    }
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

impl VariantStorage for CountingStorage {
    fn extract(&self, input: &Url, output_dir: &Url, options: &VariantOptions) -> Result<(), StorageError> {
        self.inner.extract(input, output_dir, options)
    }

    fn pre_transform(&self, input: &Url, options: &VariantOptions) -> Result<(), StorageError> {
        self.inner.pre_transform(input, options)
    }

    fn transform(
        &self,
        input: &Url,
        pedigree: Option<&Url>,
        output_dir: &Url,
        options: &VariantOptions,
    ) -> Result<(), StorageError> {
        bump(&self.transform_calls);
        self.inner.transform(input, pedigree, output_dir, options)
    }

    fn post_transform(&self, input: &Url, output_dir: &Url, options: &VariantOptions) -> Result<(), StorageError> {
        self.inner.post_transform(input, output_dir, options)
    }

    fn pre_load(&self, transformed: &Url, output_dir: &Url, options: &VariantOptions) -> Result<(), StorageError> {
        self.inner.pre_load(transformed, output_dir, options)
    }

    fn load(&self, transformed: &Url, options: &VariantOptions) -> Result<(), StorageError> {
        bump(&self.load_calls);
        self.inner.load(transformed, options)
    }

    fn post_load(&self, transformed: &Url, output_dir: &Url, options: &VariantOptions) -> Result<(), StorageError> {
        bump(&self.post_load_calls);
        self.inner.post_load(transformed, output_dir, options)
    }

    fn create_stats(
        &self,
        db: &dyn VariantDbAdaptor,
        stats_uri: &Url,
        cohorts: Option<&Cohorts>,
        options: &VariantOptions,
    ) -> Result<Url, StorageError> {
        bump(&self.create_stats_calls);
        self.inner.create_stats(db, stats_uri, cohorts, options)
    }

    fn load_stats(&self, db: &dyn VariantDbAdaptor, stats_uri: &Url, options: &VariantOptions) -> Result<(), StorageError> {
        self.inner.load_stats(db, stats_uri, options)
    }

    fn get_db_adaptor(&self, db_name: &str) -> Result<Box<dyn VariantDbAdaptor>, StorageError> {
        self.inner.get_db_adaptor(db_name)
    }
}
