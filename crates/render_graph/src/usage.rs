//! Usage aggregation: per-attachment union of usage flags, format sets,
//! and range checks.
//!
//! Two common pitfalls are deliberately avoided here:
//!
//! - A format-match check that iterates an empty range, or inverts its
//!   condition, never actually fires. Here every collected format is
//!   checked against the attachment's pixel format, and a mismatch fails
//!   the compile.
//! - A buffer range check written as `offset + size >= buffer.size` would
//!   reject a use that exactly covers the tail of the buffer. Here the
//!   arithmetically correct `offset + size <= buffer.size` is enforced.

use std::collections::{HashMap, HashSet};

use ash::vk;
use slotmap::SlotMap;

use crate::attachment::Attachment;
use crate::error::CompileError;
use crate::gpu::ImageShape;
use crate::ids::{AttachmentId, DefId, PassId, UseId};
use crate::liveness::Liveness;
use crate::pass::AttachmentRef;

/// Aggregated usage for one image attachment across all of its live ranges.
#[derive(Debug, Default, Clone)]
pub struct ImageUsageInfo {
    /// Union of every def/use's `vk::ImageUsageFlags`.
    pub overall_flags: vk::ImageUsageFlags,
    /// Formats every def requested.
    pub write_formats: HashSet<vk::Format>,
    /// Formats every use requested.
    pub read_formats: HashSet<vk::Format>,
}

/// Aggregated usage for one buffer attachment.
#[derive(Debug, Default, Clone)]
pub struct BufferUsageInfo {
    /// Union of every def/use's `vk::BufferUsageFlags`.
    pub overall_flags: vk::BufferUsageFlags,
}

/// Per-attachment aggregated usage, dispatched on the attachment's variant.
#[derive(Debug, Clone)]
pub enum AttachmentUsage {
    /// Image attachment usage.
    Image(ImageUsageInfo),
    /// Buffer attachment usage.
    Buffer(BufferUsageInfo),
}

/// Whether `shape` admits views of type `view_type`.
fn image_and_view_compatible(shape: ImageShape, view_type: crate::gpu::ViewType) -> bool {
    use crate::gpu::ViewType as V;
    match shape {
        ImageShape::D1 => matches!(view_type, V::D1 | V::D1Array),
        ImageShape::D2 => matches!(view_type, V::D2 | V::D2Array | V::Cube | V::CubeArray),
        ImageShape::D3 => matches!(view_type, V::D3),
        ImageShape::Cube => matches!(view_type, V::Cube | V::CubeArray | V::D2 | V::D2Array),
    }
}

/// Aggregate usage over every attachment the liveness pass found a live
/// range for.
///
/// `def_refs`/`use_refs` are the graph's id-indexed storage of every
/// registered [`AttachmentRef`] (see `crate::graph::RenderGraph`); this
/// module never touches `Pass` directly so it can run after liveness
/// analysis without re-borrowing the pass list.
pub fn aggregate(
    attachments: &SlotMap<AttachmentId, Attachment>,
    liveness: &Liveness,
    def_refs: &SlotMap<DefId, (PassId, AttachmentRef)>,
    use_refs: &SlotMap<UseId, (PassId, AttachmentRef)>,
) -> Result<HashMap<AttachmentId, AttachmentUsage>, CompileError> {
    let mut result = HashMap::new();

    for attachment_id in liveness.attachments() {
        let attachment = &attachments[attachment_id];
        let ranges = liveness.ranges_of(attachment_id);

        match attachment {
            Attachment::Surface(_) => {
                // Surface images are never caller-declared defs/uses
                // (rejected by OnSurfaceDef), so they never appear in
                // liveness output.
                unreachable!("surface attachments do not carry defs/uses");
            }
            Attachment::Image(image) => {
                let mut usage = ImageUsageInfo::default();
                for range in ranges {
                    let (_, def_ref) = &def_refs[range.def];
                    let AttachmentRef::Image(def) = def_ref else {
                        return Err(CompileError::TypeMismatch {
                            attachment: attachment_id,
                        });
                    };
                    check_image_ref(attachment_id, def, image.shape, image.layers)?;
                    usage.overall_flags |= def.usage;
                    usage.write_formats.insert(def.view.format);

                    for &(_, _, use_id) in &range.uses {
                        let (_, use_ref) = &use_refs[use_id];
                        let AttachmentRef::Image(use_img) = use_ref else {
                            return Err(CompileError::TypeMismatch {
                                attachment: attachment_id,
                            });
                        };
                        check_image_ref(attachment_id, use_img, image.shape, image.layers)?;
                        usage.overall_flags |= use_img.usage;
                        usage.read_formats.insert(use_img.view.format);
                    }
                }

                for format in usage.write_formats.iter().chain(usage.read_formats.iter()) {
                    if *format != image.format {
                        return Err(CompileError::FormatMismatch {
                            attachment: attachment_id,
                        });
                    }
                }

                result.insert(attachment_id, AttachmentUsage::Image(usage));
            }
            Attachment::Buffer(buffer) => {
                let mut usage = BufferUsageInfo::default();
                for range in ranges {
                    let (_, def_ref) = &def_refs[range.def];
                    let AttachmentRef::Buffer(def) = def_ref else {
                        return Err(CompileError::TypeMismatch {
                            attachment: attachment_id,
                        });
                    };
                    check_buffer_range(attachment_id, def, buffer.size)?;
                    usage.overall_flags |= def.usage;

                    for &(_, _, use_id) in &range.uses {
                        let (_, use_ref) = &use_refs[use_id];
                        let AttachmentRef::Buffer(use_buf) = use_ref else {
                            return Err(CompileError::TypeMismatch {
                                attachment: attachment_id,
                            });
                        };
                        check_buffer_range(attachment_id, use_buf, buffer.size)?;
                        usage.overall_flags |= use_buf.usage;
                    }
                }
                result.insert(attachment_id, AttachmentUsage::Buffer(usage));
            }
        }
    }

    Ok(result)
}

fn check_image_ref(
    attachment_id: AttachmentId,
    r#ref: &crate::pass::ImageRef,
    shape: ImageShape,
    layers: u32,
) -> Result<(), CompileError> {
    if !image_and_view_compatible(shape, r#ref.view.view_type) {
        return Err(CompileError::IncompatibleView {
            attachment: attachment_id,
        });
    }
    if r#ref.view.layer_count == 0 || r#ref.view.base_layer + r#ref.view.layer_count > layers {
        return Err(CompileError::LayerOutOfRange {
            attachment: attachment_id,
            base_layer: r#ref.view.base_layer,
            layer_count: r#ref.view.layer_count,
            layers,
        });
    }
    Ok(())
}

fn check_buffer_range(
    attachment_id: AttachmentId,
    r#ref: &crate::pass::BufferRef,
    buffer_size: u64,
) -> Result<(), CompileError> {
    if r#ref.offset + r#ref.size > buffer_size {
        return Err(CompileError::BufferOutOfRange {
            attachment: attachment_id,
            offset: r#ref.offset,
            size: r#ref.size,
            buffer_size,
        });
    }
    Ok(())
}
