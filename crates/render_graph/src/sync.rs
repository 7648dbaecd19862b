//! Synchronization: insert the minimal set of `SyncPass`es carrying the
//! barriers required by every def→use and use→def transition.
//!
//! Two design choices shape this module:
//!
//! - Cross-queue-family transitions emit a release barrier (at the
//!   source family's `SyncPass`) and a matching acquire barrier (at the
//!   destination family's `SyncPass`) instead of one barrier with both
//!   family fields set.
//! - The pass list is never mutated via linked-list splicing; a
//!   `Vec<PassSlot>` is built once, with `SyncPass` entries interleaved
//!   at the right positions, and `SyncPass` state lives in its own
//!   `SlotMap` distinct from user passes, indexed rather than pointed to.
//!
//! Two hard restrictions are kept until a caller needs more: a live
//! range with zero uses is rejected
//! ([`CompileError::UnusedDefUnsupported`]), and more than one live range
//! per attachment is rejected ([`CompileError::DoubleDefUnsupported`]).

use ash::vk;
use slotmap::SlotMap;

use crate::attachment::Attachment;
use crate::error::CompileError;
use crate::gpu::{BufferMemoryBarrier, GpuDevice, ImageMemoryBarrier};
use crate::ids::{AttachmentId, DefId, PassId, UseId};
use crate::liveness::Liveness;
use crate::pass::{AttachmentRef, Pass};
use crate::realize::RealizedResources;

/// One entry in the finalized, post-compile pass sequence: either a
/// caller-declared pass or a compiler-synthesized `SyncPass`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassSlot {
    /// A caller-declared pass, by id into the graph's user pass `SlotMap`.
    User(PassId),
    /// A synthesized `SyncPass`, by id into [`SyncArena`].
    Sync(PassId),
}

/// Accumulated barriers for one synthesized `SyncPass`. Recorded as a
/// single `ALL_COMMANDS -> ALL_COMMANDS` pipeline barrier.
#[derive(Debug, Default, Clone)]
pub struct SyncPassState {
    /// Accumulated image memory barriers.
    pub image_barriers: Vec<ImageMemoryBarrier>,
    /// Accumulated buffer memory barriers.
    pub buffer_barriers: Vec<BufferMemoryBarrier>,
}

/// The arena owning every synthesized `SyncPass`'s state, keyed by the
/// `PassId`s referenced from [`PassSlot::Sync`].
pub type SyncArena = SlotMap<PassId, SyncPassState>;

/// Insert barrier passes and return the finalized pass sequence plus the
/// arena of synthesized `SyncPass` state.
pub fn insert_barriers(
    pass_order: &[PassId],
    passes: &SlotMap<PassId, Pass>,
    attachments: &SlotMap<AttachmentId, Attachment>,
    liveness: &Liveness,
    realized: &RealizedResources,
    def_refs: &SlotMap<DefId, (PassId, AttachmentRef)>,
    _use_refs: &SlotMap<UseId, (PassId, AttachmentRef)>,
    device: &dyn GpuDevice,
) -> Result<(Vec<PassSlot>, SyncArena), CompileError> {
    let mut sequence: Vec<PassSlot> = pass_order.iter().map(|&p| PassSlot::User(p)).collect();
    let mut arena: SyncArena = SlotMap::with_key();

    for attachment_id in liveness.attachments() {
        let ranges = liveness.ranges_of(attachment_id);

        if ranges.len() > 1 {
            return Err(CompileError::DoubleDefUnsupported {
                attachment: attachment_id,
            });
        }
        let Some(range) = ranges.first() else {
            continue;
        };
        if range.uses.is_empty() {
            return Err(CompileError::UnusedDefUnsupported {
                attachment: attachment_id,
            });
        }

        let def_pass_kind = passes[range.def_pass].kind();
        let (_, first_use_pass, _first_use_id) = range.first_use().unwrap();
        let def_family = device.queue_family(def_pass_kind.queue_family());
        let use_family = device.queue_family(passes[first_use_pass].kind().queue_family());

        let def_pos = position_of(&sequence, range.def_pass);

        if def_family == use_family {
            let use_pos = position_of(&sequence, first_use_pass);
            let sync_pos = find_or_insert_sync(&mut sequence, &mut arena, def_pos + 1, use_pos);
            push_barrier(
                &mut arena[sync_slot_id(&sequence, sync_pos)],
                attachments,
                attachment_id,
                realized,
                def_refs,
                BarrierRole::SameFamily,
                range.def,
                def_family,
                use_family,
            )?;
        } else {
            // Release, right after the def, on the source family's batch.
            let release_pos = find_or_insert_sync(&mut sequence, &mut arena, def_pos + 1, def_pos + 1);
            push_barrier(
                &mut arena[sync_slot_id(&sequence, release_pos)],
                attachments,
                attachment_id,
                realized,
                def_refs,
                BarrierRole::Release,
                range.def,
                def_family,
                use_family,
            )?;

            // Acquire, right before the first use, on the destination
            // family's batch. Recompute use_pos: the release insertion may
            // have shifted it by one.
            let use_pos = position_of(&sequence, first_use_pass);
            let acquire_pos = find_or_insert_sync(&mut sequence, &mut arena, release_pos + 1, use_pos);
            push_barrier(
                &mut arena[sync_slot_id(&sequence, acquire_pos)],
                attachments,
                attachment_id,
                realized,
                def_refs,
                BarrierRole::Acquire,
                range.def,
                def_family,
                use_family,
            )?;
        }
    }

    Ok((sequence, arena))
}

fn position_of(sequence: &[PassSlot], pass: PassId) -> usize {
    sequence
        .iter()
        .position(|slot| matches!(slot, PassSlot::User(p) if *p == pass))
        .expect("pass must be present in the compiled sequence")
}

fn sync_slot_id(sequence: &[PassSlot], pos: usize) -> PassId {
    match sequence[pos] {
        PassSlot::Sync(id) => id,
        PassSlot::User(_) => unreachable!("find_or_insert_sync always leaves a Sync slot at pos"),
    }
}

/// Scan `[scan_start, insert_before)` for an existing `SyncPass`; reuse it
/// if found, otherwise synthesize a new one and splice it in at
/// `insert_before`. Returns the position of the (possibly reused) sync
/// slot in the, possibly now one-longer, sequence.
fn find_or_insert_sync(
    sequence: &mut Vec<PassSlot>,
    arena: &mut SyncArena,
    scan_start: usize,
    insert_before: usize,
) -> usize {
    if scan_start <= insert_before {
        for pos in scan_start..insert_before.min(sequence.len()) {
            if matches!(sequence[pos], PassSlot::Sync(_)) {
                return pos;
            }
        }
    }
    let id = arena.insert(SyncPassState::default());
    let at = insert_before.min(sequence.len());
    sequence.insert(at, PassSlot::Sync(id));
    at
}

/// Which half of a barrier [`push_barrier`] is synthesizing. A same-family
/// transition carries both the release (write) and acquire (read) access
/// scopes on its one barrier; a cross-family transition splits them across
/// the release and acquire `SyncPass`es of the pair, since queue family
/// ownership transfer barriers must be recorded on both queues with
/// complementary access masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BarrierRole {
    /// No queue family change: one barrier carries both the write-release
    /// and read-acquire access scopes.
    SameFamily,
    /// The source half of a cross-family pair: write access only.
    Release,
    /// The destination half of a cross-family pair: read access only.
    Acquire,
}

#[allow(clippy::too_many_arguments)]
fn push_barrier(
    state: &mut SyncPassState,
    attachments: &SlotMap<AttachmentId, Attachment>,
    attachment_id: AttachmentId,
    realized: &RealizedResources,
    def_refs: &SlotMap<DefId, (PassId, AttachmentRef)>,
    role: BarrierRole,
    def_id: DefId,
    src_family: u32,
    dst_family: u32,
) -> Result<(), CompileError> {
    let is_transfer = role != BarrierRole::SameFamily;
    let (queue_family_src, queue_family_dst) = if is_transfer {
        (src_family, dst_family)
    } else {
        (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED)
    };
    let (src_access_mask, dst_access_mask) = match role {
        BarrierRole::SameFamily => (vk::AccessFlags::MEMORY_WRITE, vk::AccessFlags::MEMORY_READ),
        BarrierRole::Release => (vk::AccessFlags::MEMORY_WRITE, vk::AccessFlags::empty()),
        BarrierRole::Acquire => (vk::AccessFlags::empty(), vk::AccessFlags::MEMORY_READ),
    };

    match &attachments[attachment_id] {
        Attachment::Image(_) => {
            let (_, def_ref) = &def_refs[def_id];
            let AttachmentRef::Image(def) = def_ref else {
                return Err(CompileError::TypeMismatch {
                    attachment: attachment_id,
                });
            };
            let image = realized
                .image_of(attachment_id)
                .expect("image must be realized before barrier insertion");

            state.image_barriers.push(ImageMemoryBarrier {
                image,
                old_layout: def.layout,
                new_layout: def.layout,
                src_access_mask,
                dst_access_mask,
                src_queue_family: queue_family_src,
                dst_queue_family: queue_family_dst,
                base_layer: def.view.base_layer,
                layer_count: def.view.layer_count,
            });
            Ok(())
        }
        Attachment::Buffer(buffer) => {
            let buf = realized
                .buffer_of(attachment_id)
                .expect("buffer must be realized before barrier insertion");
            state.buffer_barriers.push(BufferMemoryBarrier {
                buffer: buf,
                offset: 0,
                size: buffer.size,
                src_access_mask,
                dst_access_mask,
                src_queue_family: queue_family_src,
                dst_queue_family: queue_family_dst,
            });
            Ok(())
        }
        Attachment::Surface(_) => unreachable!("surface attachments never carry defs/uses"),
    }
}
