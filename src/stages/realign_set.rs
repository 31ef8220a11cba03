use log::trace;

use crate::data_types::variants::VariantRecord;
use crate::stages::dedup::prefer_incoming;
use crate::stages::window_buffer::WindowBuffer;
use crate::stages::{PipelineError, StageContext, StageKind, VariantStage};

/// Two records describe the same event if they are identical after right-alignment, or if they report the same alternate haplotype
fn is_same_event(a: &VariantRecord, b: &VariantRecord) -> bool {
    if a.key() == b.key() {
        return true;
    }
    match (a.evidence().read_context.as_ref(), b.evidence().read_context.as_ref()) {
        (Some(ra), Some(rb)) => a.chromosome() == b.chromosome() && ra == rb,
        _ => false
    }
}

/// Stage 8: gives each group of alternate representations one realignment set and keeps a single representative
#[derive(Debug)]
pub struct LocalRealignSet {
    buffer: WindowBuffer
}

impl LocalRealignSet {
    pub fn new(buffer_distance: u64) -> Self {
        Self { buffer: WindowBuffer::new(buffer_distance) }
    }

    fn new_set(ctx: &mut StageContext) -> u32 {
        ctx.stats_mut().realignment_sets += 1;
        ctx.ids_mut().realignment_set()
    }
}

impl VariantStage for LocalRealignSet {
    fn kind(&self) -> StageKind {
        StageKind::LocalRealignSet
    }

    fn accept(&mut self, mut record: VariantRecord, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) -> Result<(), PipelineError> {
        if self.buffer.check_order(&record)? {
            out.extend(self.buffer.drain_all());
        } else {
            out.extend(self.buffer.drain_closed(record.position()));
        }

        let Some(index) = self.buffer.find(|b| is_same_event(b, &record)) else {
            // anchors collapsed upstream still form a set with a single survivor
            if record.collapsed_realignments() > 0 && record.realignment_set().is_none() {
                record.set_realignment_set(Self::new_set(ctx));
            }
            self.buffer.push_back(record);
            return Ok(());
        };

        let existing_set = self.buffer.get(index).and_then(|b| b.realignment_set());
        let set_id = match existing_set {
            Some(set_id) => set_id,
            None => Self::new_set(ctx)
        };
        record.set_realignment_set(set_id);

        let replace = self.buffer.get(index).is_some_and(|b| prefer_incoming(b, &record));
        if replace {
            if let Some(mut loser) = self.buffer.remove(index) {
                trace!("Realignment set {set_id}: {}:{} replaced by {}", loser.chromosome(), loser.position(), record.position());
                loser.set_realignment_set(set_id);
                record.add_collapsed_realignments(loser.collapsed_realignments() + 1);
                ctx.suppress(StageKind::LocalRealignSet, loser, Some(record.record_id()));
            }
            self.buffer.push_back(record);
        } else if let Some(survivor) = self.buffer.get_mut(index) {
            trace!("Realignment set {set_id}: {}:{} absorbed by {}", record.chromosome(), record.position(), survivor.position());
            survivor.set_realignment_set(set_id);
            survivor.add_collapsed_realignments(record.collapsed_realignments() + 1);
            let survivor_id = survivor.record_id();
            ctx.suppress(StageKind::LocalRealignSet, record, Some(survivor_id));
        }
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut StageContext, out: &mut Vec<VariantRecord>) {
        out.extend(self.buffer.drain_all());
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
