//! Batch partitioning: split the (barrier-finalized) pass sequence into
//! maximal runs that share a queue family.
//!
//! A `SyncPass`'s family is not its own — it takes the family of the
//! following executor pass — so this module looks forward past any run
//! of `SyncPass`es to the next user pass when deciding whether a new
//! batch should start.

use slotmap::SlotMap;

use crate::gpu::QueueFamilyKind;
use crate::ids::PassId;
use crate::pass::Pass;
use crate::sync::PassSlot;

/// A maximal contiguous run of the compiled pass sequence scheduled on one
/// queue family. `first_pass` is an index into the `&[PassSlot]` the
/// partitioner was given; the run extends up to (but not including) the
/// next batch's `first_pass`, or the end of the sequence for the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    /// Index of this batch's first pass in the compiled sequence.
    pub first_pass: usize,
    /// Queue family every pass in this run is scheduled on.
    pub family: QueueFamilyKind,
}

/// Partition the compiled pass sequence into queue-family batches. Empty
/// input yields an empty batch list.
pub fn partition(sequence: &[PassSlot], passes: &SlotMap<PassId, Pass>) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Option<QueueFamilyKind> = None;

    for i in 0..sequence.len() {
        let family = family_of(sequence, i, passes);
        if current != Some(family) {
            batches.push(Batch {
                first_pass: i,
                family,
            });
            current = Some(family);
        }
    }

    batches
}

/// The queue family owning the batch that contains `pos`.
pub fn family_group_of(batches: &[Batch], pos: usize) -> usize {
    batches
        .iter()
        .rposition(|b| b.first_pass <= pos)
        .expect("every pass position is covered by some batch")
}

fn family_of(sequence: &[PassSlot], pos: usize, passes: &SlotMap<PassId, Pass>) -> QueueFamilyKind {
    match sequence[pos] {
        PassSlot::User(pass_id) => passes[pass_id].kind().queue_family(),
        PassSlot::Sync(_) => sequence[pos + 1..]
            .iter()
            .find_map(|slot| match slot {
                PassSlot::User(pass_id) => Some(passes[*pass_id].kind().queue_family()),
                PassSlot::Sync(_) => None,
            })
            .expect("a SyncPass is always followed by a user pass: barrier insertion never leaves a trailing SyncPass"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::QueueFamilyKind::{Compute, Graphics, Transfer};

    fn fake_passes() -> (SlotMap<PassId, Pass>, Vec<PassId>) {
        let mut passes = SlotMap::with_key();
        let c1 = passes.insert(Pass::new("c1", crate::pass::PassKind::Compute));
        let r1 = passes.insert(Pass::new("r1", crate::pass::PassKind::Render));
        let c2 = passes.insert(Pass::new("c2", crate::pass::PassKind::Compute));
        (passes, vec![c1, r1, c2])
    }

    #[test]
    fn splits_on_family_change() {
        let (passes, ids) = fake_passes();
        let sequence: Vec<PassSlot> = ids.iter().map(|&p| PassSlot::User(p)).collect();
        let batches = partition(&sequence, &passes);
        assert_eq!(
            batches,
            vec![
                Batch { first_pass: 0, family: Compute },
                Batch { first_pass: 1, family: Graphics },
                Batch { first_pass: 2, family: Compute },
            ]
        );
    }

    #[test]
    fn sync_pass_inherits_following_family() {
        let mut passes = SlotMap::with_key();
        let t1 = passes.insert(Pass::new("t1", crate::pass::PassKind::Transfer));
        let c1 = passes.insert(Pass::new("c1", crate::pass::PassKind::Compute));
        let mut arena: SlotMap<PassId, crate::sync::SyncPassState> = SlotMap::with_key();
        let sync_id = arena.insert(crate::sync::SyncPassState::default());

        let sequence = vec![PassSlot::User(t1), PassSlot::Sync(sync_id), PassSlot::User(c1)];
        let batches = partition(&sequence, &passes);
        assert_eq!(
            batches,
            vec![
                Batch { first_pass: 0, family: Transfer },
                Batch { first_pass: 1, family: Compute },
            ]
        );
        assert_eq!(family_group_of(&batches, 1), 1);
        assert_eq!(family_group_of(&batches, 0), 0);
    }

    #[test]
    fn empty_sequence_yields_no_batches() {
        let passes: SlotMap<PassId, Pass> = SlotMap::with_key();
        assert!(partition(&[], &passes).is_empty());
    }
}
