// ==============================================================================
// main.rs - VCF Dump Tool
// ==============================================================================
// Description: Exports stored variants of some studies/files as one VCF per study
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};

use variant_pipeline::exporter::VariantExporter;
use variant_pipeline::storage::local::{LocalVariantStorage, DEFAULT_STORAGE_HOME};
use variant_pipeline::storage::{Region, VariantQuery, VariantStorage};

const EXAMPLE: &str = "vcf-dump hsapiens batch 7 5,6 ./";

#[derive(Parser, Debug)]
#[command(
    name = "vcf-dump",
    version,
    about = "Export stored variants as one gzipped VCF per study",
    override_usage = "vcf-dump <species> <dbName> <studiesCSV> <filesCSV> <outputDir>"
)]
struct Args {
    /// Species written to the ##species header line
    species: String,

    /// Variant database name
    db_name: String,

    /// Comma-separated study ids
    studies: String,

    /// Comma-separated file ids
    files: String,

    /// Directory receiving the VCF files
    output_dir: PathBuf,

    /// Root directory of the local variant databases
    #[arg(long, env = "VARIANT_STORAGE_HOME", default_value = DEFAULT_STORAGE_HOME)]
    storage_home: PathBuf,

    /// Only export variants in this region (chr, chr:pos or chr:start-end)
    #[arg(long)]
    region: Option<String>,
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .init();

    dotenvy::dotenv().ok();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.print()?;
            return Ok(());
        }
        Err(_) => {
            println!("Usage: vcf-dump <species> <dbName> <studiesCSV> <filesCSV> <outputDir>");
            println!("Example: {}", EXAMPLE);
            return Ok(());
        }
    };

    let mut query = VariantQuery::new()
        .studies(split_csv(&args.studies))
        .files(split_csv(&args.files));
    if let Some(region) = &args.region {
        let region: Region = region.parse().map_err(anyhow::Error::msg)?;
        query = query.region(region);
    }

    info!(
        "Exporting studies {:?}, files {:?} of database '{}'",
        query.studies, query.files, args.db_name
    );

    let storage = LocalVariantStorage::new(&args.storage_home);
    let db = storage
        .get_db_adaptor(&args.db_name)
        .with_context(|| format!("Failed to open variant database '{}'", args.db_name))?;

    let exporter = VariantExporter::new(&args.output_dir, &args.species);
    let summary = exporter.export_from_db(db.as_ref(), &query)?;

    for file in &summary.files {
        info!("Exported {}", file.display());
    }
    info!(
        "{} variants written, {} variants failed",
        summary.total_written(),
        summary.failed_variants
    );
    Ok(())
}
