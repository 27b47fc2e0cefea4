// ==============================================================================
// tests/variant_exporter.rs - Variant Exporter Integration Tests
// ==============================================================================
// Description: Loads generated studies through the job, then exports them
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

mod common;

use std::io::BufRead;
use std::path::Path;
use tempfile::{tempdir, TempDir};

use common::*;
use variant_pipeline::compression::open_input;
use variant_pipeline::engine::{ExitStatus, JobLauncher};
use variant_pipeline::exporter::VariantExporter;
use variant_pipeline::jobs::variant_job;
use variant_pipeline::parameters::create_uri;
use variant_pipeline::repository::InMemoryJobRepository;
use variant_pipeline::storage::{Region, VariantQuery, VariantStorage};

/// Storage with study 7 (file 5) and study 8 (file 6) loaded and stats computed
fn loaded_storage() -> (TempDir, CountingStorage) {
    let dir = tempdir().unwrap();
    let storage = CountingStorage::new(dir.path().join("home"));
    let launcher = JobLauncher::new(InMemoryJobRepository::new());

    for (name, vcf, study, file) in [("s7.vcf.gz", STUDY_7_VCF, "7", "5"), ("s8.vcf.gz", STUDY_8_VCF, "8", "6")] {
        let input = write_text_file(&dir.path().join(name), vcf);
        let params = job_parameters(&input, &dir.path().join("out"), study, file);
        let execution = launcher.run(&variant_job(), params, &storage).unwrap();
        assert_eq!(execution.status, ExitStatus::Completed, "{:?}", execution.failure);
    }
    (dir, storage)
}

fn data_lines(path: &Path) -> Vec<String> {
    open_input(path)
        .unwrap()
        .lines()
        .map(|l| l.unwrap())
        .filter(|l| !l.starts_with('#'))
        .collect()
}

#[test]
fn test_two_studies_export_two_files() {
    let (dir, storage) = loaded_storage();
    let db = storage.get_db_adaptor("batch").unwrap();
    let query = VariantQuery::new().studies(["7", "8"]).files(["5", "6"]);

    let exporter = VariantExporter::new(dir.path().join("dump"), "hsapiens");
    let summary = exporter.export_from_db(db.as_ref(), &query).unwrap();

    assert_eq!(summary.files.len(), 2);
    assert_eq!(summary.failed_variants, 0);
    assert_eq!(summary.files[0], dir.path().join("dump").join("7_5.vcf.gz"));
    assert_eq!(summary.files[1], dir.path().join("dump").join("8_6.vcf.gz"));

    for (file, study) in summary.files.iter().zip(["7", "8"]) {
        let expected = db.count(&VariantQuery::new().studies([study])).unwrap();
        assert_eq!(data_lines(file).len() as u64, expected);
        assert_eq!(summary.written[study], expected);
    }
    assert_eq!(
        summary.total_written() as usize,
        STUDY_7_RECORDS + STUDY_8_RECORDS
    );
}

#[test]
fn test_multiallelic_site_is_split_and_remapped() {
    let (dir, storage) = loaded_storage();
    let db = storage.get_db_adaptor("batch").unwrap();
    let query = VariantQuery::new().studies(["7"]);

    let summary = VariantExporter::new(dir.path().join("dump"), "hsapiens")
        .export_from_db(db.as_ref(), &query)
        .unwrap();
    assert_eq!(summary.files.len(), 1);

    let lines = data_lines(&summary.files[0]);
    let site: Vec<&String> = lines.iter().filter(|l| l.starts_with("20\t61098\t")).collect();
    assert_eq!(site.len(), 2);
    assert_eq!(
        *site[0],
        "20\t61098\trs6078030\tC\tA,<*>\t.\t.\tAC=2,3;AN=6;AF=0.3333,0.5\tGT\t0|1\t1|2\t2|2"
    );
    assert_eq!(
        *site[1],
        "20\t61098\trs6078030\tC\tT,<*>\t.\t.\tAC=3,2;AN=6;AF=0.5,0.3333\tGT\t0|2\t2|1\t1|1"
    );

    // Number=A fields carry one value per ALT allele
    for line in &lines {
        let columns: Vec<&str> = line.split('\t').collect();
        let alternates = columns[4].split(',').count();
        for (key, values) in columns[7].split(';').filter_map(|field| field.split_once('=')) {
            if key == "AC" || key == "AF" {
                assert_eq!(values.split(',').count(), alternates, "{}", line);
            }
        }
    }

    // Biallelic sites carry no symbolic allele; missing calls stay missing
    let missing = lines.iter().find(|l| l.starts_with("21\t9000\t")).unwrap();
    assert!(missing.contains("\tG\t"));
    assert!(missing.ends_with("GT\t0|1\t./.\t0|0"));
}

#[test]
fn test_header_lists_study_samples() {
    let (dir, storage) = loaded_storage();
    let db = storage.get_db_adaptor("batch").unwrap();

    let summary = VariantExporter::new(dir.path().join("dump"), "hsapiens")
        .export_from_db(db.as_ref(), &VariantQuery::new().studies(["8"]))
        .unwrap();
    let header: Vec<String> = open_input(&summary.files[0])
        .unwrap()
        .lines()
        .map(|l| l.unwrap())
        .take_while(|l| l.starts_with('#'))
        .collect();

    assert_eq!(header[0], "##fileformat=VCFv4.2");
    assert!(header.iter().any(|l| l.starts_with("##fileDate=")));
    assert!(header.iter().any(|l| l == "##species=hsapiens"));
    assert!(header.iter().any(|l| l.starts_with("##ALT=<ID=*")));
    assert!(header.iter().any(|l| l.starts_with("##FORMAT=<ID=GT")));
    assert_eq!(
        header.last().unwrap(),
        "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS4\tS5"
    );
}

#[test]
fn test_region_and_reference_filters() {
    let (dir, storage) = loaded_storage();
    let db = storage.get_db_adaptor("batch").unwrap();

    let region: Region = "20:61000-62000".parse().unwrap();
    let query = VariantQuery::new().studies(["7"]).region(region);
    let summary = VariantExporter::new(dir.path().join("region"), "hsapiens")
        .export_from_db(db.as_ref(), &query)
        .unwrap();
    let lines = data_lines(&summary.files[0]);
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| l.starts_with("20\t61")));

    let query = VariantQuery::new().studies(["7"]).reference("A");
    let summary = VariantExporter::new(dir.path().join("reference"), "hsapiens")
        .export_from_db(db.as_ref(), &query)
        .unwrap();
    let lines = data_lines(&summary.files[0]);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].starts_with("20\t61270\t"));
}

#[test]
fn test_export_with_no_matching_study_writes_nothing() {
    let (dir, storage) = loaded_storage();
    let db = storage.get_db_adaptor("batch").unwrap();

    let summary = VariantExporter::new(dir.path().join("none"), "hsapiens")
        .export_from_db(db.as_ref(), &VariantQuery::new().studies(["42"]))
        .unwrap();
    assert!(summary.files.is_empty());
    assert_eq!(summary.failed_variants, 0);
}

#[test]
fn test_create_uri_is_idempotent() {
    let dir = tempdir().unwrap();
    let raw = dir.path().join("nested").join("..").join("input.vcf.gz");

    let once = create_uri(&raw.to_string_lossy()).unwrap();
    let twice = create_uri(once.as_str()).unwrap();
    assert_eq!(once, twice);
    assert_eq!(once.scheme(), "file");
    assert!(once.path().ends_with("/input.vcf.gz"));

    let relative = create_uri("relative/input.vcf").unwrap();
    assert_eq!(create_uri(relative.as_str()).unwrap(), relative);
    assert!(relative.path().ends_with("/relative/input.vcf"));
}
