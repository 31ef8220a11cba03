use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;
use strum::IntoEnumIterator;

use crate::data_types::pipeline_stats::PipelineStats;
use crate::partition::PartitionResult;
use crate::stages::StageKind;
use crate::util::json_io::save_json;

/// Per-partition section of the run summary
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PartitionSummary {
    pub partition_id: usize,
    pub label: String,
    pub stats: PipelineStats,
    /// Ids are scoped to the partition
    pub passing_phase_sets: BTreeSet<u32>
}

/// Accumulates partition results into a single report for the run
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct RunSummary {
    /// Rows in the input that could not be read as candidates at all
    pub unparsed_rows: u64,
    /// Sum over all partitions
    pub totals: PipelineStats,
    pub partitions: Vec<PartitionSummary>
}

/// One row per stage in the stage table
#[derive(Serialize)]
struct StageRow {
    stage_index: usize,
    stage: String,
    suppressed: u64,
    /// Fraction of all records that entered the chain
    suppressed_fraction: Option<f64>
}

impl RunSummary {
    pub fn new(unparsed_rows: u64) -> Self {
        Self {
            unparsed_rows,
            ..Default::default()
        }
    }

    /// Adds a finished partition to the summary
    pub fn add_partition(&mut self, result: &PartitionResult) {
        self.totals += result.stats;
        self.partitions.push(PartitionSummary {
            partition_id: result.partition_id,
            label: result.label.clone(),
            stats: result.stats,
            passing_phase_sets: result.passing_phase_sets.clone()
        });
    }

    /// Saves the full summary as JSON, gzip if the name ends in .gz
    /// # Errors
    /// * if the file cannot be created or written
    pub fn write_json(&self, filename: &Path) -> anyhow::Result<()> {
        save_json(self, filename)
    }

    /// Writes the per-stage suppression counts as a small table
    /// # Arguments
    /// * `filename` - the filename for the output (tsv/csv)
    pub fn write_stage_table(&self, filename: &Path) -> csv::Result<()> {
        // modify the delimiter to "," if it ends with .csv
        let is_csv: bool = filename.extension().unwrap_or_default() == "csv";
        let delimiter: u8 = if is_csv { b',' } else { b'\t' };
        let mut csv_writer: csv::Writer<File> = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_path(filename)?;

        let entered = self.totals.accepted + self.totals.mnv_created;
        for stage in StageKind::iter() {
            let suppressed = self.totals.suppressed_at(stage);
            let suppressed_fraction = if entered > 0 {
                Some(suppressed as f64 / entered as f64)
            } else {
                None
            };
            csv_writer.serialize(StageRow {
                stage_index: stage as usize + 1,
                stage: stage.to_string(),
                suppressed,
                suppressed_fraction
            })?;
        }
        csv_writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::json_io::load_json;

    fn result(partition_id: usize, label: &str, accepted: u64, dedup_indel: u64) -> PartitionResult {
        let mut stats = PipelineStats {
            accepted,
            emitted: accepted - dedup_indel,
            ..Default::default()
        };
        stats.suppressed[StageKind::DedupIndel as usize] = dedup_indel;
        PartitionResult {
            partition_id,
            label: label.to_string(),
            records: vec![],
            stats,
            passing_phase_sets: [1, 3].into_iter().collect(),
            audit: vec![]
        }
    }

    #[test]
    fn test_summary_json() {
        let mut summary = RunSummary::new(2);
        summary.add_partition(&result(0, "1", 10, 2));
        summary.add_partition(&result(1, "2", 5, 1));
        assert_eq!(summary.totals.accepted, 15);
        assert_eq!(summary.totals.suppressed_at(StageKind::DedupIndel), 3);
        assert!(summary.totals.is_balanced());

        let out_fn = std::env::temp_dir().join("varphase_test_summary.json.gz");
        summary.write_json(&out_fn).unwrap();
        let loaded: RunSummary = load_json(&out_fn).unwrap();
        assert_eq!(loaded, summary);
        std::fs::remove_file(&out_fn).unwrap();
    }

    #[test]
    fn test_stage_table() {
        let mut summary = RunSummary::new(0);
        summary.add_partition(&result(0, "1", 10, 2));
        let out_fn = std::env::temp_dir().join("varphase_test_stages.csv");
        summary.write_stage_table(&out_fn).unwrap();

        let contents = std::fs::read_to_string(&out_fn).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "stage_index,stage,suppressed,suppressed_fraction");
        assert_eq!(lines[1], "1,DedupRealign,0,0.0");
        assert_eq!(lines[2], "2,DedupIndel,2,0.2");
        std::fs::remove_file(&out_fn).unwrap();
    }
}
