/*!
# Window buffer
Sliding, position-ordered record window shared by every stage.
*/

use std::collections::VecDeque;

use crate::data_types::variants::VariantRecord;
use crate::stages::PipelineError;

/// Position-ordered records held by one stage, all on a single chromosome.
/// A record is inside the window while `current_position - record.end() <= buffer_distance`.
/// Eviction is measured from the record end, not its position, so a long deletion is held while any of its bases is within the distance.
/// Input positions never decrease, so a record that left the window can never be in it again.
#[derive(Debug)]
pub struct WindowBuffer {
    /// Maximum distance from the end of a held record to the current position
    buffer_distance: u64,
    /// The chromosome of the last accepted record
    chromosome: Option<String>,
    /// The position of the last accepted record
    last_position: u64,
    /// The held records, sorted by position
    records: VecDeque<VariantRecord>
}

impl WindowBuffer {
    pub fn new(buffer_distance: u64) -> Self {
        Self {
            buffer_distance,
            chromosome: None,
            last_position: 0,
            records: Default::default()
        }
    }

    /// Checks that a record respects the input order and tracks it as the newest position.
    /// Returns true if the record starts a new chromosome, in which case the caller must close everything held.
    /// # Errors
    /// * if the record is on the current chromosome but before the last accepted position
    pub fn check_order(&mut self, record: &VariantRecord) -> Result<bool, PipelineError> {
        match self.chromosome.as_deref() {
            Some(chrom) if chrom == record.chromosome() => {
                if record.position() < self.last_position {
                    return Err(PipelineError::OrderingViolation {
                        chromosome: chrom.to_string(),
                        previous: self.last_position,
                        position: record.position()
                    });
                }
                self.last_position = record.position();
                Ok(false)
            },
            _ => {
                let changed = self.chromosome.is_some();
                self.chromosome = Some(record.chromosome().to_string());
                self.last_position = record.position();
                Ok(changed)
            }
        }
    }

    /// Returns true if `record` can no longer interact with anything at `position`.
    /// Uses `record.end()`, which equals the position for SNVs and insertions.
    pub fn is_out_of_window(&self, record: &VariantRecord, position: u64) -> bool {
        record.end() + self.buffer_distance < position
    }

    /// Removes records from the front while they are out of window relative to `position`.
    /// Release is strictly from the front so output order matches buffer order.
    pub fn drain_closed(&mut self, position: u64) -> Vec<VariantRecord> {
        let mut closed = vec![];
        while let Some(front) = self.records.front() {
            if !self.is_out_of_window(front, position) {
                break;
            }
            if let Some(record) = self.records.pop_front() {
                closed.push(record);
            }
        }
        closed
    }

    /// Removes every held record; the order tracking is preserved
    pub fn drain_all(&mut self) -> Vec<VariantRecord> {
        self.records.drain(..).collect()
    }

    /// Appends a record that is already at or after every held position
    pub fn push_back(&mut self, record: VariantRecord) {
        debug_assert!(self.records.back().is_none_or(|b| b.position() <= record.position()));
        self.records.push_back(record);
    }

    /// Inserts a record after every held record with a position <= its own, returning the index
    pub fn insert_sorted(&mut self, record: VariantRecord) -> usize {
        let index = self.records.partition_point(|r| r.position() <= record.position());
        self.records.insert(index, record);
        index
    }

    /// Index of the first held record matching the predicate
    pub fn find<F: FnMut(&VariantRecord) -> bool>(&self, predicate: F) -> Option<usize> {
        self.records.iter().position(predicate)
    }

    pub fn remove(&mut self, index: usize) -> Option<VariantRecord> {
        self.records.remove(index)
    }

    pub fn get(&self, index: usize) -> Option<&VariantRecord> {
        self.records.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut VariantRecord> {
        self.records.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariantRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut VariantRecord> {
        self.records.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // getters
    pub fn buffer_distance(&self) -> u64 {
        self.buffer_distance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::candidate::CandidateRecord;

    fn snv(chrom: &str, position: u64) -> VariantRecord {
        CandidateRecord::new(chrom, position, "A", "C", "SOMATIC").to_record(position).unwrap()
    }

    #[test]
    fn test_check_order() {
        let mut buffer = WindowBuffer::new(150);
        assert!(!buffer.check_order(&snv("1", 100)).unwrap());
        assert!(!buffer.check_order(&snv("1", 100)).unwrap());
        assert!(!buffer.check_order(&snv("1", 200)).unwrap());
        assert_eq!(
            buffer.check_order(&snv("1", 199)),
            Err(PipelineError::OrderingViolation { chromosome: "1".to_string(), previous: 200, position: 199 })
        );
        assert!(buffer.check_order(&snv("2", 5)).unwrap());
    }

    #[test]
    fn test_drain_closed() {
        let mut buffer = WindowBuffer::new(150);
        buffer.push_back(snv("1", 100));
        buffer.push_back(snv("1", 120));
        buffer.push_back(snv("1", 300));

        // exactly at the distance is still in window
        assert!(buffer.drain_closed(250).is_empty());
        let closed = buffer.drain_closed(251);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].position(), 100);
        assert_eq!(buffer.drain_closed(1000).len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_insert_sorted() {
        let mut buffer = WindowBuffer::new(150);
        buffer.push_back(snv("1", 100));
        buffer.push_back(snv("1", 120));
        assert_eq!(buffer.insert_sorted(snv("1", 110)), 1);
        assert_eq!(buffer.insert_sorted(snv("1", 120)), 3);
        let positions: Vec<u64> = buffer.iter().map(|r| r.position()).collect();
        assert_eq!(positions, vec![100, 110, 120, 120]);
        assert_eq!(buffer.drain_all().len(), 4);
        assert!(buffer.is_empty());
    }
}
