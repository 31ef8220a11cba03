use anyhow::Context;
use coitrees::{COITree, Interval, IntervalTree};
use rustc_hash::FxHashMap as HashMap;
use std::path::Path;

use crate::parsing::noodles_helper::LoadedBed;

/// A coding exon on one chromosome, 1-based inclusive
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CodingExon {
    pub first: u64,
    pub last: u64
}

/// Coding exons for a single chromosome with an interval tree over them
pub struct ChromosomeExons {
    /// The exons, in load order; tree metadata indexes into this
    exons: Vec<CodingExon>,
    /// Tree over the exons with 1-based inclusive coordinates
    exon_tree: COITree<usize, usize>
}

impl std::fmt::Debug for ChromosomeExons {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // COITree does not have Debug
        f.debug_struct("ChromosomeExons").field("exons", &self.exons).finish()
    }
}

impl ChromosomeExons {
    fn new(exons: Vec<CodingExon>) -> anyhow::Result<Self> {
        let coi_intervals: Vec<Interval<usize>> = exons.iter().enumerate()
            .map(|(exon_index, exon)| {
                let first = i32::try_from(exon.first)
                    .with_context(|| format!("Exon start {} does not fit in the interval tree", exon.first))?;
                let last = i32::try_from(exon.last)
                    .with_context(|| format!("Exon end {} does not fit in the interval tree", exon.last))?;
                Ok(Interval::new(first, last, exon_index))
            })
            .collect::<anyhow::Result<_>>()?;
        let exon_tree = COITree::new(&coi_intervals);
        Ok(Self {
            exons,
            exon_tree
        })
    }

    /// Returns the index of an exon that fully contains the 1-based inclusive range `first..=last`.
    /// If multiple exons contain it, the lowest index is returned so the answer is stable.
    pub fn containing_exon(&self, first: u64, last: u64) -> Option<usize> {
        let (Ok(first), Ok(last)) = (i32::try_from(first), i32::try_from(last)) else {
            return None;
        };
        let mut best: Option<usize> = None;
        self.exon_tree.query(first, last, |node| {
            if node.first <= first && node.last >= last {
                let exon_index: usize = node.metadata.clone();
                best = Some(best.map_or(exon_index, |b| b.min(exon_index)));
            }
        });
        best
    }

    /// Returns the exon at a given index
    pub fn exon(&self, exon_index: usize) -> Option<&CodingExon> {
        self.exons.get(exon_index)
    }

    pub fn len(&self) -> usize {
        self.exons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exons.is_empty()
    }
}

/// Read-only coding exon boundaries keyed by chromosome.
/// A chromosome that is absent means there is no context for it, which is different from a chromosome with no exon at a locus.
#[derive(Debug, Default)]
pub struct TranscriptLookup {
    chromosomes: HashMap<String, ChromosomeExons>
}

impl TranscriptLookup {
    /// Builds the lookup from in-memory exons.
    /// # Arguments
    /// * `exons` - (chromosome, exon) pairs in any order
    /// # Errors
    /// * if an exon has first > last or coordinates that do not fit the interval tree
    pub fn from_exons<I: IntoIterator<Item = (String, CodingExon)>>(exons: I) -> anyhow::Result<Self> {
        let mut grouped: HashMap<String, Vec<CodingExon>> = Default::default();
        for (chrom, exon) in exons.into_iter() {
            anyhow::ensure!(exon.first > 0 && exon.first <= exon.last, "Invalid coding exon {chrom}:{}-{}", exon.first, exon.last);
            grouped.entry(chrom).or_default().push(exon);
        }

        let chromosomes = grouped.into_iter()
            .map(|(chrom, exons)| {
                let chrom_exons = ChromosomeExons::new(exons)
                    .with_context(|| format!("Error while building exon tree for {chrom}:"))?;
                Ok((chrom, chrom_exons))
            })
            .collect::<anyhow::Result<_>>()?;
        Ok(Self {
            chromosomes
        })
    }

    /// Loads coding exons from a BED file, one exon per row.
    /// # Arguments
    /// * `bed_fn` - path to the .bed(.gz) file
    pub fn from_bed(bed_fn: &Path) -> anyhow::Result<Self> {
        let loaded_bed = LoadedBed::preload_bed_file(bed_fn)?;
        let mut exons = vec![];
        for (chrom, intervals) in loaded_bed.chrom_lookup().iter() {
            for (first, last) in intervals.iter() {
                // noodles gives us 1-based inclusive positions, which is what we store
                exons.push((chrom.clone(), CodingExon { first: first.get() as u64, last: last.get() as u64 }));
            }
        }
        Self::from_exons(exons)
            .with_context(|| format!("Error while loading {bed_fn:?}:"))
    }

    /// Returns the exons for a chromosome, None if the chromosome has no context
    pub fn chromosome(&self, chrom: &str) -> Option<&ChromosomeExons> {
        self.chromosomes.get(chrom)
    }

    pub fn has_chromosome(&self, chrom: &str) -> bool {
        self.chromosomes.contains_key(chrom)
    }

    /// Total number of exons across all chromosomes
    pub fn num_exons(&self) -> usize {
        self.chromosomes.values().map(|c| c.len()).sum()
    }
}
