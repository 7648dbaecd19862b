//! Liveness analysis: per-attachment live ranges over the pass list.
//!
//! Walks the caller-declared pass order by plain positional index,
//! tracking each attachment's live range by [`DefId`]/[`UseId`] rather
//! than a borrowed `AttachmentDef`/`AttachmentUse` reference.

use slotmap::{SecondaryMap, SlotMap};

use crate::attachment::Attachment;
use crate::error::CompileError;
use crate::ids::{AttachmentId, DefId, PassId, UseId};
use crate::pass::Pass;

/// One contiguous span `[begin, end)` over the pass list during which an
/// attachment is live: defined once at `begin` and read zero or more times
/// up to (and closing at) its last use.
#[derive(Debug, Clone)]
pub struct LiveRange {
    /// Position of the defining pass in the compiled pass order.
    pub begin: usize,
    /// Exclusive end position: one past the last use (or `begin + 1` if unused).
    pub end: usize,
    /// The pass and def that opened this live range.
    pub def_pass: PassId,
    /// The def id, used to look up its realized view/buffer post-compile.
    pub def: DefId,
    /// `(position, pass, use)` triples, in pass-list order.
    pub uses: Vec<(usize, PassId, UseId)>,
}

impl LiveRange {
    /// Position of the first use, or `None` if this range has no uses.
    pub fn first_use(&self) -> Option<(usize, PassId, UseId)> {
        self.uses.first().copied()
    }

    /// Position of the last use, or `None` if this range has no uses.
    pub fn last_use(&self) -> Option<(usize, PassId, UseId)> {
        self.uses.last().copied()
    }
}

/// Every attachment's live ranges, in declaration order.
#[derive(Debug, Default)]
pub struct Liveness {
    ranges: SecondaryMap<AttachmentId, Vec<LiveRange>>,
}

impl Liveness {
    /// Live ranges for one attachment, empty if it was never defined.
    pub fn ranges_of(&self, attachment: AttachmentId) -> &[LiveRange] {
        self.ranges.get(attachment).map_or(&[], Vec::as_slice)
    }

    /// Every attachment that has at least one live range.
    pub fn attachments(&self) -> impl Iterator<Item = AttachmentId> + '_ {
        self.ranges.keys()
    }
}

/// Walk the pass list in order, opening and closing live ranges as defs and
/// uses are encountered.
pub fn analyze(
    pass_order: &[PassId],
    passes: &SlotMap<PassId, Pass>,
    pass_def_ids: &SecondaryMap<PassId, Vec<DefId>>,
    pass_use_ids: &SecondaryMap<PassId, Vec<UseId>>,
    attachments: &SlotMap<AttachmentId, Attachment>,
) -> Result<Liveness, CompileError> {
    let mut liveness = Liveness::default();

    for (i, &pass_id) in pass_order.iter().enumerate() {
        let pass = &passes[pass_id];
        let def_ids = pass_def_ids.get(pass_id).map_or(&[][..], Vec::as_slice);
        let use_ids = pass_use_ids.get(pass_id).map_or(&[][..], Vec::as_slice);

        let mut defined_here = std::collections::HashSet::new();

        for (def_ref, &def_id) in pass.defs().iter().zip(def_ids) {
            let attachment = def_ref.attachment();
            if !attachments.contains_key(attachment) {
                return Err(CompileError::UnknownAttachment {
                    pass: pass_id,
                    attachment,
                });
            }
            if !defined_here.insert(attachment) {
                return Err(CompileError::DoubleDef {
                    pass: pass_id,
                    attachment,
                });
            }

            let ranges = liveness.ranges.entry(attachment).unwrap().or_default();
            if let Some(prev) = ranges.last_mut() {
                if prev.uses.is_empty() {
                    log::warn!(
                        "attachment {attachment:?} has a def with no intervening use before pass {i}; treating the unused def's live range as a single pass"
                    );
                    prev.end = prev.begin + 1;
                } else {
                    prev.end = prev.uses.last().unwrap().0 + 1;
                }
            }
            ranges.push(LiveRange {
                begin: i,
                end: i + 1,
                def_pass: pass_id,
                def: def_id,
                uses: Vec::new(),
            });
        }

        for (use_ref, &use_id) in pass.uses().iter().zip(use_ids) {
            let attachment = use_ref.attachment();
            if !attachments.contains_key(attachment) {
                return Err(CompileError::UnknownAttachment {
                    pass: pass_id,
                    attachment,
                });
            }
            if defined_here.contains(&attachment) {
                return Err(CompileError::UseOfOwnDef {
                    pass: pass_id,
                    attachment,
                });
            }
            let Some(ranges) = liveness.ranges.get_mut(attachment) else {
                return Err(CompileError::UseBeforeDef {
                    pass: pass_id,
                    attachment,
                });
            };
            let Some(current) = ranges.last_mut() else {
                return Err(CompileError::UseBeforeDef {
                    pass: pass_id,
                    attachment,
                });
            };
            current.uses.push((i, pass_id, use_id));
            current.end = i + 1;
        }
    }

    for id in attachments.keys() {
        match liveness.ranges.get(id) {
            None => log::warn!("attachment {id:?} is never defined by any pass"),
            Some(ranges) => {
                if let Some(last) = ranges.last() {
                    if last.uses.is_empty() {
                        log::warn!("attachment {id:?}'s final def is never used");
                    }
                }
            }
        }
    }

    Ok(liveness)
}
