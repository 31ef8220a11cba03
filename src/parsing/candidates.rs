use anyhow::Context;
use indexmap::IndexMap;
use log::{debug, warn};
use std::fs::File;
use std::path::Path;

use crate::data_types::candidate::CandidateRecord;
use crate::partition::Partition;

/// Candidates read from a file, grouped into one partition per chromosome
#[derive(Debug, Default)]
pub struct LoadedCandidates {
    /// Partitions in order of first appearance
    pub partitions: Vec<Partition>,
    /// Rows that could not be parsed at all
    pub unparsed_rows: u64
}

/// Loads a candidate table and splits it into chromosome partitions.
/// The file is tab-delimited unless it ends in .csv, and may be gzip compressed.
/// Rows with a missing chromosome stay with the partition they appear in so they are reported as malformed there.
/// # Arguments
/// * `filename` - path to the candidate table with a header row
/// # Errors
/// * if the file cannot be opened or the header cannot be read
pub fn load_candidate_partitions(filename: &Path) -> anyhow::Result<LoadedCandidates> {
    debug!("Loading candidates from {filename:?}...");
    let is_compressed = filename.extension().unwrap_or_default() == "gz";
    let stem = if is_compressed { filename.file_stem().map(Path::new) } else { Some(filename) };
    let delimiter = if stem.and_then(|s| s.extension()).unwrap_or_default() == "csv" { b',' } else { b'\t' };

    let file = File::open(filename)
        .with_context(|| format!("Error while opening {filename:?}:"))?;
    let reader: Box<dyn std::io::Read> = if is_compressed {
        Box::new(flate2::read::MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .comment(Some(b'#'))
        .from_reader(reader);

    let mut grouped: IndexMap<String, Partition> = Default::default();
    let mut last_chrom: Option<String> = None;
    let mut unparsed_rows = 0;
    for (row_index, result) in csv_reader.deserialize::<CandidateRecord>().enumerate() {
        let candidate = match result {
            Ok(c) => c,
            Err(e) => {
                warn!("Skipping unparseable row {} in {filename:?}: {e}", row_index + 1);
                unparsed_rows += 1;
                continue;
            }
        };

        let chrom = match candidate.chrom.as_deref().map(|c| c.trim()).filter(|c| !c.is_empty() && *c != ".") {
            Some(c) => c.to_string(),
            None => last_chrom.clone().unwrap_or_else(|| ".".to_string())
        };
        let next_id = grouped.len();
        grouped.entry(chrom.clone())
            .or_insert_with(|| Partition::new(next_id, chrom.clone(), vec![]))
            .push(candidate);
        last_chrom = Some(chrom);
    }

    let partitions: Vec<Partition> = grouped.into_values().collect();
    debug!("Loaded {} partitions from {filename:?}", partitions.len());
    Ok(LoadedCandidates {
        partitions,
        unparsed_rows
    })
}
