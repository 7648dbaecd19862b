//! The debug-dump text table: a per-attachment, per-pass grid plus the
//! resolved command-batch listing, for inspecting what a compile produced.
//!
//! This is a pure function returning a `String`; whether (and where) it is
//! printed is a caller/[`crate::config::GraphCompileConfig`] decision, not
//! this crate's.

use slotmap::SlotMap;
use std::fmt::Write as _;

use crate::attachment::Attachment;
use crate::batch::{self, Batch};
use crate::ids::{AttachmentId, PassId};
use crate::pass::Pass;
use crate::sync::PassSlot;

/// Render the attachment/pass table plus the per-batch listing. One
/// column per attachment that ever appears as a def or use, one row per
/// pass in the finalized sequence (caller-declared passes keep their
/// name; synthesized barrier passes are labeled `sync`).
pub fn dump(
    attachments: &SlotMap<AttachmentId, Attachment>,
    passes: &SlotMap<PassId, Pass>,
    sequence: &[PassSlot],
    batches: &[Batch],
) -> String {
    let columns: Vec<AttachmentId> = attachments
        .iter()
        .filter(|(_, a)| !matches!(a, Attachment::Surface(_)))
        .map(|(id, _)| id)
        .collect();

    let mut out = String::new();
    let _ = write!(out, "pass");
    for &col in &columns {
        let _ = write!(out, "\t{}", attachments[col].name());
    }
    let _ = writeln!(out);

    for &slot in sequence {
        match slot {
            PassSlot::User(pass_id) => {
                let pass = &passes[pass_id];
                let _ = write!(out, "{}", pass.name());
                for &col in &columns {
                    let cell = if pass.defs().iter().any(|d| d.attachment() == col) {
                        "Def"
                    } else if pass.uses().iter().any(|u| u.attachment() == col) {
                        "Use"
                    } else {
                        ""
                    };
                    let _ = write!(out, "\t{cell}");
                }
                let _ = writeln!(out);
            }
            PassSlot::Sync(_) => {
                let _ = write!(out, "sync");
                for _ in &columns {
                    let _ = write!(out, "\t");
                }
                let _ = writeln!(out);
            }
        }
    }

    for (i, b) in batches.iter().enumerate() {
        let end = batches.get(i + 1).map_or(sequence.len(), |next| next.first_pass);
        let names: Vec<&str> = sequence[b.first_pass..end]
            .iter()
            .map(|slot| match slot {
                PassSlot::User(pass_id) => passes[*pass_id].name(),
                PassSlot::Sync(_) => "sync",
            })
            .collect();
        let family_group = batch::family_group_of(batches, b.first_pass);
        let _ = writeln!(
            out,
            "Command batch #{i} : family group #{family_group}: {}",
            names.join(", ")
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::PassKind;

    #[test]
    fn empty_graph_dumps_header_only() {
        let attachments: SlotMap<AttachmentId, Attachment> = SlotMap::with_key();
        let passes: SlotMap<PassId, Pass> = SlotMap::with_key();
        let out = dump(&attachments, &passes, &[], &[]);
        assert_eq!(out.trim(), "pass");
    }

    #[test]
    fn columns_and_rows_match_declared_passes() {
        let mut attachments: SlotMap<AttachmentId, Attachment> = SlotMap::with_key();
        let img = attachments.insert(Attachment::Image(crate::attachment::ImageAttachment::new(
            "image1",
            crate::gpu::ImageShape::D2,
            ash::vk::Format::R8G8B8A8_UNORM,
            crate::gpu::Extent3D { width: 1, height: 1, depth: 1 },
            1,
        )));
        let mut passes: SlotMap<PassId, Pass> = SlotMap::with_key();
        let c1 = passes.insert(Pass::new("c1", PassKind::Compute));
        passes[c1]
            .add_def(
                c1,
                crate::pass::AttachmentRefBuilder::descriptor_image(
                    img,
                    ash::vk::ImageLayout::GENERAL,
                    ash::vk::ImageUsageFlags::STORAGE,
                    crate::pass::ImageViewSpec {
                        view_type: crate::gpu::ViewType::D2,
                        base_layer: 0,
                        layer_count: 1,
                        format: ash::vk::Format::R8G8B8A8_UNORM,
                    },
                    ash::vk::DescriptorType::STORAGE_IMAGE,
                ),
                false,
            )
            .unwrap();

        let sequence = vec![PassSlot::User(c1)];
        let batches = batch::partition(&sequence, &passes);
        let out = dump(&attachments, &passes, &sequence, &batches);
        assert!(out.contains("image1"));
        assert!(out.contains("c1\tDef"));
        assert!(out.contains("Command batch #0 : family group #0: c1"));
    }
}
