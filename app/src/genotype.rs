// ==============================================================================
// genotype.rs - VCF Genotype Parsing and Allele Re-mapping
// ==============================================================================
// Description: Parses GT strings and re-maps allele indices for split multi-allelic sites
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================
// Algorithm:
//   A decomposed record keeps the genotypes of the original site, whose allele
//   indices point into [REF, ALT1, ALT2, ...]. When the record representing
//   ALTk is written as a single-ALT line, every allele index is re-mapped:
//   - 0        → 0 (reference)
//   - k        → 1 (this alternate)
//   - other    → 2 (symbolic "other alternate", written as <*>)
//   - missing  → missing (".")
// ==============================================================================

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Allele index used for alternates other than the one a record represents
pub const OTHER_ALLELE_INDEX: usize = 2;

/// Errors that can occur while parsing a genotype string
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenotypeError {
    #[error("Empty genotype")]
    Empty,

    #[error("Invalid allele '{0}'")]
    InvalidAllele(String),

    #[error("Allele index {index} out of range ({allele_count} alleles at this site)")]
    AlleleOutOfRange { index: usize, allele_count: usize },
}

/// Parsed genotype: one entry per chromosome copy, `None` for a missing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Genotype {
    alleles: Vec<Option<usize>>,
    phased: bool,
}

impl Genotype {
    pub fn new(alleles: Vec<Option<usize>>, phased: bool) -> Self {
        Self { alleles, phased }
    }

    pub fn alleles(&self) -> &[Option<usize>] {
        &self.alleles
    }

    pub fn is_phased(&self) -> bool {
        self.phased
    }

    pub fn is_missing(&self) -> bool {
        self.alleles.iter().all(Option::is_none)
    }

    /// Check every called allele against the number of alleles at the site
    /// (reference included).
    pub fn validate(&self, allele_count: usize) -> Result<(), GenotypeError> {
        for index in self.alleles.iter().flatten() {
            if *index >= allele_count {
                return Err(GenotypeError::AlleleOutOfRange {
                    index: *index,
                    allele_count,
                });
            }
        }
        Ok(())
    }

    /// Re-map allele indices onto {ref, this alternate, other}
    ///
    /// # Arguments
    /// * `alternate_allele` - index of the represented alternate in the
    ///   original allele list (1-based, since 0 is the reference)
    ///
    /// # Example
    /// ```
    /// use variant_pipeline::genotype::Genotype;
    ///
    /// // Site C → A,T; record for T (allele 2)
    /// let gt: Genotype = "1|2".parse().unwrap();
    /// assert_eq!(gt.remap(2).to_string(), "2|1");
    /// ```
    pub fn remap(&self, alternate_allele: usize) -> Genotype {
        let alleles = self
            .alleles
            .iter()
            .map(|allele| {
                allele.map(|index| match index {
                    0 => 0,
                    i if i == alternate_allele => 1,
                    _ => OTHER_ALLELE_INDEX,
                })
            })
            .collect();

        Genotype {
            alleles,
            phased: self.phased,
        }
    }

    /// Whether any call uses the symbolic "other alternate" index
    pub fn uses_other_allele(&self) -> bool {
        self.alleles
            .iter()
            .any(|allele| *allele == Some(OTHER_ALLELE_INDEX))
    }

    /// Number of copies of `allele` in this genotype
    pub fn count(&self, allele: usize) -> usize {
        self.alleles.iter().filter(|a| **a == Some(allele)).count()
    }

    /// Number of missing calls
    pub fn missing(&self) -> usize {
        self.alleles.iter().filter(|a| a.is_none()).count()
    }

    /// Unphased, sorted form used as a genotype-count key ("0/1" for "1|0")
    pub fn normalized(&self) -> String {
        let mut alleles = self.alleles.clone();
        alleles.sort_by_key(|a| a.map(|i| i as i64).unwrap_or(-1));
        Genotype::new(alleles, false).to_string()
    }
}

impl FromStr for Genotype {
    type Err = GenotypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(GenotypeError::Empty);
        }

        let phased = s.contains('|');
        let alleles = s
            .split(['|', '/'])
            .map(|allele| match allele {
                "." => Ok(None),
                _ => allele
                    .parse::<usize>()
                    .map(Some)
                    .map_err(|_| GenotypeError::InvalidAllele(allele.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Genotype { alleles, phased })
    }
}

impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = if self.phased { "|" } else { "/" };
        let rendered: Vec<String> = self
            .alleles
            .iter()
            .map(|allele| match allele {
                Some(index) => index.to_string(),
                None => ".".to_string(),
            })
            .collect();
        write!(f, "{}", rendered.join(separator))
    }
}
