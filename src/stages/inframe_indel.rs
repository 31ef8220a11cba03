/*!
Stage 6, in-frame hints between frameshift indels that share a coding exon.
*/

use log::trace;
use std::sync::Arc;

use crate::data_types::transcripts::TranscriptLookup;
use crate::data_types::variants::VariantRecord;
use crate::stages::window_buffer::WindowBuffer;
use crate::stages::{PipelineError, StageContext, StageKind, VariantStage};

/// Stage 6: links frameshift indels in one coding exon whose combined length change keeps the frame
#[derive(Debug)]
pub struct PhasedInframeIndel {
    buffer: WindowBuffer,
    transcripts: Arc<TranscriptLookup>
}

impl PhasedInframeIndel {
    pub fn new(buffer_distance: u64, transcripts: Arc<TranscriptLookup>) -> Self {
        Self {
            buffer: WindowBuffer::new(buffer_distance),
            transcripts
        }
    }

    /// Pairs the record with a buffered frameshift in the same exon that has no hint yet.
    /// Each in-frame set is a pair whose summed length change is a multiple of 3, a hinted indel is never reused.
    fn link(&mut self, record: &mut VariantRecord, ctx: &mut StageContext) {
        let Some(exons) = self.transcripts.chromosome(record.chromosome()) else {
            ctx.missing_context(StageKind::PhasedInframeIndel, record.chromosome());
            return;
        };
        let Some(exon_index) = exons.containing_exon(record.position(), record.end()) else {
            return;
        };

        let length_change = record.length_change();
        let buffer_distance = self.buffer.buffer_distance();
        let position = record.position();
        let partner = self.buffer.iter_mut()
            .find(|b| {
                b.is_frameshift() &&
                    b.inframe_hint().is_none() &&
                    b.end() + buffer_distance >= position &&
                    (b.length_change() + length_change).rem_euclid(3) == 0 &&
                    exons.containing_exon(b.position(), b.end()) == Some(exon_index)
            });
        let Some(partner) = partner else {
            return;
        };

        let hint = ctx.ids_mut().inframe_hint();
        partner.set_inframe_hint(hint);
        record.set_inframe_hint(hint);
        trace!("In-frame indels at {}:{} and {} share hint {hint}", record.chromosome(), partner.position(), record.position());
        ctx.stats_mut().inframe_links += 2;
    }
}

impl VariantStage for PhasedInframeIndel {
    fn kind(&self) -> StageKind {
        StageKind::PhasedInframeIndel
    }

    fn accept(&mut self, mut record: VariantRecord, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) -> Result<(), PipelineError> {
        if self.buffer.check_order(&record)? {
            out.extend(self.buffer.drain_all());
        } else {
            out.extend(self.buffer.drain_closed(record.position()));
        }
        if record.is_frameshift() {
            self.link(&mut record, ctx);
        }
        self.buffer.push_back(record);
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut StageContext, out: &mut Vec<VariantRecord>) {
        out.extend(self.buffer.drain_all());
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::transcripts::CodingExon;
    use crate::stages::test_util::{record, run_stage};

    fn lookup() -> Arc<TranscriptLookup> {
        Arc::new(TranscriptLookup::from_exons([
            ("1".to_string(), CodingExon { first: 2951, last: 3100 }),
            ("1".to_string(), CodingExon { first: 3201, last: 3300 })
        ]).unwrap())
    }

    #[test]
    fn test_inframe_pair() {
        let mut ctx = StageContext::new(false);
        let mut stage = PhasedInframeIndel::new(150, lookup());
        let out = run_stage(&mut stage, &mut ctx, vec![
            record("1", 3000, "AT", "A", "SOMATIC"),
            record("1", 3005, "C", "T", "SOMATIC"),
            record("1", 3010, "G", "GACGT", "SOMATIC")
        ]);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].inframe_hint(), Some(1));
        assert_eq!(out[1].inframe_hint(), None);
        assert_eq!(out[2].inframe_hint(), Some(1));
        assert_eq!(ctx.stats().inframe_links, 2);
    }

    #[test]
    fn test_not_inframe() {
        let mut ctx = StageContext::new(false);
        let mut stage = PhasedInframeIndel::new(150, lookup());
        let out = run_stage(&mut stage, &mut ctx, vec![
            // -1 and -1 do not restore the frame
            record("1", 3000, "AT", "A", "SOMATIC"),
            record("1", 3010, "GT", "G", "SOMATIC"),
            // different exons
            record("1", 3090, "GT", "G", "SOMATIC"),
            // outside any exon
            record("1", 3150, "G", "GAC", "SOMATIC"),
            record("1", 3210, "G", "GAC", "SOMATIC")
        ]);
        assert!(out.iter().all(|r| r.inframe_hint().is_none()));
        assert_eq!(ctx.stats().missing_context, 0);
    }

    #[test]
    fn test_hinted_indel_not_reused() {
        let mut ctx = StageContext::new(false);
        let mut stage = PhasedInframeIndel::new(150, lookup());
        let out = run_stage(&mut stage, &mut ctx, vec![
            record("1", 3000, "AT", "A", "SOMATIC"),
            record("1", 3010, "G", "GACGT", "SOMATIC"),
            // -1 would fit with +4 pairwise, but -1 +4 -1 is not in frame
            record("1", 3020, "CT", "C", "SOMATIC"),
            record("1", 3030, "C", "CA", "SOMATIC")
        ]);
        let hints: Vec<Option<u32>> = out.iter().map(|r| r.inframe_hint()).collect();
        assert_eq!(hints, vec![Some(1), Some(1), Some(2), Some(2)]);
        assert_eq!(ctx.stats().inframe_links, 4);

        // every hint group restores the frame
        for hint in [1, 2] {
            let total: i64 = out.iter()
                .filter(|r| r.inframe_hint() == Some(hint))
                .map(|r| r.length_change())
                .sum();
            assert_eq!(total.rem_euclid(3), 0);
        }
    }

    #[test]
    fn test_missing_chromosome() {
        let mut ctx = StageContext::new(false);
        let mut stage = PhasedInframeIndel::new(150, lookup());
        let out = run_stage(&mut stage, &mut ctx, vec![
            record("7", 3000, "AT", "A", "SOMATIC"),
            record("7", 3010, "G", "GACGT", "SOMATIC"),
            record("7", 3011, "A", "G", "SOMATIC")
        ]);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|r| r.inframe_hint().is_none()));
        // only the frameshift indels needed context
        assert_eq!(ctx.stats().missing_context, 2);
    }
}
