use anyhow::Context;
use indexmap::IndexMap;
use log::debug;
use noodles::bed::io::reader::Builder as BedBuilder;
use noodles::bed::{io::Reader as BedReader, Record as BedRecord};
use noodles::core::Position;
use std::io::BufReader;
use std::path::Path;

/// Wrapper function that handles both bgzip compressed and uncompressed BED files
/// # Arguments
/// * `filename` - path to the .bed(.gz) file to open
pub fn open_bed_file(filename: &Path) -> anyhow::Result<BedReader<3, BufReader<Box<dyn std::io::Read>>>> {
    let is_compressed = filename.extension().unwrap_or_default() == "gz";
    let buf_reader: Box<dyn std::io::Read> = if is_compressed {
        #[allow(clippy::default_constructed_unit_structs)]
        let bgzf_reader = noodles::bgzf::io::reader::Builder::default()
            .build_from_path(filename)
            .with_context(|| format!("Error while loading {filename:?}:"))?;
        Box::new(bgzf_reader)
    } else {
        Box::new(
            std::fs::File::open(filename)
                .with_context(|| format!("Error while opening {filename:?}:"))?
        )
    };

    #[allow(clippy::default_constructed_unit_structs)]
    let bed_reader = BedBuilder::<3>::default()
        .build_from_reader(buf_reader);
    Ok(bed_reader)
}

/// A BED3 file held in memory, chromosomes in file order and each chromosome's intervals sorted.
/// Intervals are 1-based inclusive, as noodles reports them.
#[derive(Debug, Default)]
pub struct LoadedBed {
    /// Map from chromosome to the sorted (first, last) pairs
    chrom_lookup: IndexMap<String, Vec<(Position, Position)>>
}

impl LoadedBed {
    /// Loads an entire BED file, sorting any chromosome whose intervals are out of order.
    /// # Arguments
    /// * `filename` - path to the .bed(.gz) file to open
    /// # Errors
    /// * if the file cannot be opened
    /// * if a row is missing its start or end
    pub fn preload_bed_file(filename: &Path) -> anyhow::Result<Self> {
        debug!("Pre-loading {filename:?}...");
        let mut bed_handle = open_bed_file(filename)?;

        let mut record = BedRecord::<3>::default();
        let mut chrom_lookup: IndexMap<String, Vec<(Position, Position)>> = Default::default();
        while bed_handle.read_record(&mut record)
            .with_context(|| format!("Error while reading {filename:?}:"))? > 0 {
            let chrom = record.reference_sequence_name().to_string();
            let first = record.feature_start()
                .with_context(|| format!("Error while parsing start for record: {record:?}"))?;
            let last = record.feature_end()
                .unwrap_or(Err(std::io::Error::other("Missing end")))
                .with_context(|| format!("Error while parsing end for record: {record:?}"))?;
            chrom_lookup.entry(chrom).or_default().push((first, last));
        }

        for (chrom, intervals) in chrom_lookup.iter_mut() {
            let num_entries = intervals.len();
            if !intervals.is_sorted() {
                debug!("Sorting {num_entries} BED entries for {chrom}...");
                intervals.sort();
            } else {
                debug!("Found {num_entries} sorted BED entries for {chrom}.");
            }
        }

        Ok(Self {
            chrom_lookup
        })
    }

    /// Total intervals across all chromosomes
    pub fn num_intervals(&self) -> usize {
        self.chrom_lookup.values().map(|v| v.len()).sum()
    }

    // getters
    pub fn chrom_lookup(&self) -> &IndexMap<String, Vec<(Position, Position)>> {
        &self.chrom_lookup
    }
}
