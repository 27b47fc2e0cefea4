// ==============================================================================
// storage/statistics.rs - Cohort Statistics
// ==============================================================================
// Description: Allele/genotype counting per cohort for decomposed variants
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Counting rules for the record representing allele k of a site:
//   - reference count   : alleles equal to 0
//   - alternate count   : alleles equal to k
//   - allele number (AN): all called alleles, other alternates included
//   - missing           : "." alleles; a genotype with no called allele is a
//                         missing genotype
//   - genotype counts   : keyed by the unphased genotype re-mapped to
//                         {0 = ref, 1 = this alt, 2 = other}
// Unparsable genotypes count as missing genotypes.
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::genotype::Genotype;
use crate::models::{CohortStats, SourceEntry, VariantRecord, VariantSource, DEFAULT_COHORT};
use crate::storage::Cohorts;

/// One line of a statistics file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStatsRecord {
    pub chromosome: String,
    pub position: u64,
    pub reference: String,
    pub alternate: String,
    pub study_id: String,
    pub file_id: String,
    pub cohort_stats: BTreeMap<String, CohortStats>,
}

impl VariantStatsRecord {
    /// `chrom:pos:ref:alt` of the variant these stats belong to
    pub fn variant_id(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.chromosome, self.position, self.reference, self.alternate
        )
    }
}

/// The default cohort: every sample of the file
pub fn default_cohorts(source: &VariantSource) -> Cohorts {
    let mut cohorts = Cohorts::new();
    cohorts.insert(DEFAULT_COHORT.to_string(), source.samples.clone());
    cohorts
}

/// Statistics of one cohort for the alternate `alternate` of `entry`;
/// `None` when `alternate` is not one of the entry's alleles
pub fn cohort_stats(
    entry: &SourceEntry,
    reference: &str,
    alternate: &str,
    samples: &[String],
) -> Option<CohortStats> {
    let mut stats = CohortStats::default();
    let allele = entry.allele_index(alternate)?;

    for sample in samples {
        let genotype = match entry.samples_data.get(sample).map(|gt| gt.parse::<Genotype>()) {
            Some(Ok(genotype)) => genotype,
            Some(Err(e)) => {
                debug!("Sample {}: unusable genotype ({}), counted as missing", sample, e);
                stats.missing_genotypes += 1;
                continue;
            }
            None => {
                stats.missing_genotypes += 1;
                continue;
            }
        };

        if genotype.is_missing() {
            stats.missing_genotypes += 1;
        }
        let missing = genotype.missing() as u32;
        stats.missing_alleles += missing;
        stats.allele_number += genotype.alleles().len() as u32 - missing;
        stats.ref_allele_count += genotype.count(0) as u32;
        stats.alt_allele_count += genotype.count(allele) as u32;

        *stats
            .genotype_counts
            .entry(genotype.remap(allele).normalized())
            .or_insert(0) += 1;
    }

    if stats.allele_number > 0 {
        let total = stats.allele_number as f64;
        stats.ref_allele_freq = stats.ref_allele_count as f64 / total;
        stats.alt_allele_freq = stats.alt_allele_count as f64 / total;
    }

    if stats.alt_allele_freq <= stats.ref_allele_freq {
        stats.maf = stats.alt_allele_freq;
        stats.minor_allele = alternate.to_string();
    } else {
        stats.maf = stats.ref_allele_freq;
        stats.minor_allele = reference.to_string();
    }

    Some(stats)
}

/// Statistics of every cohort for one study/file entry of a record;
/// `None` when the record has no entry for that file, or when the entry's
/// allele list does not contain the record's alternate
pub fn variant_stats(
    record: &VariantRecord,
    study_id: &str,
    file_id: &str,
    cohorts: &Cohorts,
) -> Option<VariantStatsRecord> {
    let entry = record.source_entry(study_id, file_id)?;

    if entry.allele_index(&record.alternate).is_none() {
        warn!(
            "Variant {}: alternate '{}' missing from the allele list of study {} file {}, no stats",
            record.id(),
            record.alternate,
            study_id,
            file_id
        );
        return None;
    }

    let cohort_stats = cohorts
        .iter()
        .filter_map(|(name, samples)| {
            cohort_stats(entry, &record.reference, &record.alternate, samples)
                .map(|stats| (name.clone(), stats))
        })
        .collect();

    Some(VariantStatsRecord {
        chromosome: record.chromosome.clone(),
        position: record.position,
        reference: record.reference.clone(),
        alternate: record.alternate.clone(),
        study_id: study_id.to_string(),
        file_id: file_id.to_string(),
        cohort_stats,
    })
}
