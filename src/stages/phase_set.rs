/*!
# Local phase sets
Final stage of the chain.
Records linked by an in-frame hint, a realignment set, or a shared haplotype tag form connected components, and each component gets one phase set id.
Records leave the stage as soon as they fall out of the window; the component state outlives them until its last held member is gone.
*/

use log::trace;
use rustc_hash::FxHashMap as HashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::data_types::variants::VariantRecord;
use crate::stages::window_buffer::WindowBuffer;
use crate::stages::{PipelineError, StageContext, StageKind, VariantStage};

/// Decides whether a record is worth reporting, a phase set passes when any member is reportable
pub type Reportability = Arc<dyn Fn(&VariantRecord) -> bool + Send + Sync>;

/// Default reportability, a record with no soft filters
pub fn default_reportability() -> Reportability {
    Arc::new(|r: &VariantRecord| r.is_passing())
}

/// Tracking for one open phase set
#[derive(Clone, Debug, Default)]
struct ComponentState {
    /// Members still held in the buffer, the component is closed when this reaches 0
    held: usize,
    /// True once any member has been emitted under this id
    released: bool,
    /// True if any member so far is reportable
    passing: bool,
    /// Ids of merged components that had already emitted members under their own id
    aliases: Vec<u32>
}

/// Two records are linked when they share an in-frame hint, a realignment set, or a haplotype tag
fn is_linked(a: &VariantRecord, b: &VariantRecord) -> bool {
    let shared_hint = a.inframe_hint().is_some() && a.inframe_hint() == b.inframe_hint();
    let shared_set = a.realignment_set().is_some() && a.realignment_set() == b.realignment_set();
    shared_hint || shared_set || a.shares_haplotype(b)
}

/// Stage 9: assigns phase sets to connected components of linked records.
/// `unphased_filtered` is decided when a record leaves the window, from the members seen up to then.
pub struct LocalPhaseSet {
    buffer: WindowBuffer,
    components: HashMap<u32, ComponentState>,
    reportable: Reportability
}

impl LocalPhaseSet {
    pub fn new(buffer_distance: u64, reportable: Reportability) -> Self {
        Self {
            buffer: WindowBuffer::new(buffer_distance),
            components: Default::default(),
            reportable
        }
    }

    /// Releases the records that are out of window at `position`
    fn release_closed(&mut self, position: u64, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) {
        for record in self.buffer.drain_closed(position).into_iter() {
            self.finalize(record, ctx, out);
        }
    }

    fn release_all(&mut self, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) {
        for record in self.buffer.drain_all().into_iter() {
            self.finalize(record, ctx, out);
        }
    }

    /// Marks a released record with its component state and forwards it, closing the component with its last held member
    fn finalize(&mut self, mut record: VariantRecord, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) {
        if let Some(id) = record.phase_set() {
            if let Some(state) = self.components.get_mut(&id) {
                record.set_unphased_filtered(!state.passing);
                state.released = true;
                state.held -= 1;
                if state.held == 0 {
                    if let Some(state) = self.components.remove(&id) {
                        Self::close(id, state, ctx);
                    }
                }
            }
        }
        out.push(record);
    }

    /// Records the outcome of a component that can no longer grow
    fn close(id: u32, state: ComponentState, ctx: &mut StageContext) {
        trace!("Phase set {id} closed, passing={}, aliases={:?}", state.passing, state.aliases);
        ctx.stats_mut().phase_sets += 1 + state.aliases.len() as u64;
        if state.passing {
            ctx.add_passing_phase_set(id);
            for alias in state.aliases.into_iter() {
                ctx.add_passing_phase_set(alias);
            }
        }
    }

    /// Joins the record to every linked component, merging them into one.
    /// The surviving id is the lowest id that was already emitted, otherwise the lowest id.
    fn assign(&mut self, record: &mut VariantRecord, ctx: &mut StageContext) {
        let linked: BTreeSet<u32> = self.buffer.iter()
            .filter(|b| !self.buffer.is_out_of_window(b, record.position()) && is_linked(b, record))
            .filter_map(|b| b.phase_set())
            .collect();

        let reportable = (self.reportable)(record);
        let target = linked.iter().copied()
            .find(|id| self.components.get(id).is_some_and(|c| c.released))
            .or_else(|| linked.first().copied());
        let Some(target) = target else {
            let id = ctx.ids_mut().phase_set();
            self.components.insert(id, ComponentState {
                held: 1,
                passing: reportable,
                ..Default::default()
            });
            record.set_phase_set(id);
            return;
        };

        let mut merged = self.components.remove(&target).unwrap_or_default();
        for &id in linked.iter().filter(|&&id| id != target) {
            if let Some(other) = self.components.remove(&id) {
                trace!("Merging phase set {id} into {target}");
                merged.held += other.held;
                merged.passing |= other.passing;
                if other.released {
                    // emitted members keep their id, it now names the same component
                    merged.released = true;
                    merged.aliases.push(id);
                }
                merged.aliases.extend(other.aliases);
            }
        }
        if linked.len() > 1 {
            for b in self.buffer.iter_mut() {
                if b.phase_set().is_some_and(|id| id != target && linked.contains(&id)) {
                    b.set_phase_set(target);
                }
            }
        }

        merged.held += 1;
        merged.passing |= reportable;
        self.components.insert(target, merged);
        record.set_phase_set(target);
    }
}

impl VariantStage for LocalPhaseSet {
    fn kind(&self) -> StageKind {
        StageKind::LocalPhaseSet
    }

    fn accept(&mut self, mut record: VariantRecord, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) -> Result<(), PipelineError> {
        if self.buffer.check_order(&record)? {
            self.release_all(ctx, out);
        } else {
            self.release_closed(record.position(), ctx, out);
        }
        self.assign(&mut record, ctx);
        self.buffer.push_back(record);
        Ok(())
    }

    fn flush(&mut self, ctx: &mut StageContext, out: &mut Vec<VariantRecord>) {
        self.release_all(ctx, out);
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
