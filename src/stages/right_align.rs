use log::trace;
use std::sync::Arc;

use crate::data_types::transcripts::TranscriptLookup;
use crate::data_types::variants::VariantRecord;
use crate::stages::window_buffer::WindowBuffer;
use crate::stages::{PipelineError, StageContext, StageKind, VariantStage};

/// Stage 7: shifts indels through their microhomology to the rightmost equivalent anchor.
/// Shifted records can pass records that arrived after them, so the buffer is kept sorted on insert.
#[derive(Debug)]
pub struct RightAlignMicrohomology {
    buffer: WindowBuffer,
    transcripts: Arc<TranscriptLookup>
}

impl RightAlignMicrohomology {
    pub fn new(buffer_distance: u64, transcripts: Arc<TranscriptLookup>) -> Self {
        Self {
            buffer: WindowBuffer::new(buffer_distance),
            transcripts
        }
    }

    fn right_align(&self, record: &mut VariantRecord, ctx: &mut StageContext) {
        let Some(exons) = self.transcripts.chromosome(record.chromosome()) else {
            ctx.missing_context(StageKind::RightAlignMicrohomology, record.chromosome());
            return;
        };
        let Some(shifted) = record.right_shifted() else {
            return;
        };
        // never move an event out of the coding exon it would land in
        if exons.containing_exon(shifted.position, shifted.end()).is_none() {
            trace!("Not shifting {}:{}, {} is outside coding exons", record.chromosome(), record.position(), shifted.position);
            return;
        }
        trace!("Right-aligned {}:{} to {}", record.chromosome(), record.position(), shifted.position);
        record.apply_shift(shifted);
        ctx.stats_mut().right_aligned += 1;
    }
}

impl VariantStage for RightAlignMicrohomology {
    fn kind(&self) -> StageKind {
        StageKind::RightAlignMicrohomology
    }

    fn accept(&mut self, mut record: VariantRecord, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) -> Result<(), PipelineError> {
        // the window advances on the incoming position, before any shift
        if self.buffer.check_order(&record)? {
            out.extend(self.buffer.drain_all());
        } else {
            out.extend(self.buffer.drain_closed(record.position()));
        }
        if record.is_indel() && !record.evidence().microhomology.is_empty() {
            self.right_align(&mut record, ctx);
        }
        self.buffer.insert_sorted(record);
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut StageContext, out: &mut Vec<VariantRecord>) {
        out.extend(self.buffer.drain_all());
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
