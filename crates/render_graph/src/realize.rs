//! Resource realization: allocate the backing images, buffers, and
//! per-def/per-use image views.
//!
//! Image creation dispatches on `(pixel format is color vs. depth) ×
//! (image shape)`; `crate::gpu::GpuDevice::create_image` takes that
//! dispatch itself (a `match` over [`crate::gpu::ImageShape`] inside the
//! backend), so this module just assembles the creation descriptors and
//! stores the resulting handles, id-indexed rather than by pointer.

use slotmap::{SecondaryMap, SlotMap};

use crate::attachment::Attachment;
use crate::error::CompileError;
use crate::gpu::{
    BufferCreateDesc, BufferHandle, GpuDevice, ImageCreateDesc, ImageHandle, ImageViewCreateDesc,
    ImageViewHandle,
};
use crate::ids::{AttachmentId, DefId, PassId, UseId, ViewId};
use crate::liveness::Liveness;
use crate::pass::AttachmentRef;
use crate::usage::AttachmentUsage;

/// Every resource [`crate::graph::RenderGraph::compile`] realized,
/// queryable by [`crate::graph::RenderGraph::image_view_of`]/
/// [`crate::graph::RenderGraph::buffer_of`].
#[derive(Debug, Default)]
pub struct RealizedResources {
    images: SecondaryMap<AttachmentId, ImageHandle>,
    buffers: SecondaryMap<AttachmentId, BufferHandle>,
    views: SlotMap<ViewId, ImageViewHandle>,
    def_views: SecondaryMap<DefId, ViewId>,
    use_views: SecondaryMap<UseId, ViewId>,
    def_buffers: SecondaryMap<DefId, BufferHandle>,
    use_buffers: SecondaryMap<UseId, BufferHandle>,
}

impl RealizedResources {
    /// The realized image backing an image attachment, if any.
    pub fn image_of(&self, attachment: AttachmentId) -> Option<ImageHandle> {
        self.images.get(attachment).copied()
    }

    /// The realized buffer backing a buffer attachment, if any.
    pub fn buffer_of(&self, attachment: AttachmentId) -> Option<BufferHandle> {
        self.buffers.get(attachment).copied()
    }

    /// The view realized for a given def (one view per def, never shared
    /// with another def or use).
    pub fn view_of_def(&self, def: DefId) -> Option<ImageViewHandle> {
        self.def_views.get(def).and_then(|v| self.views.get(*v)).copied()
    }

    /// The view realized for a given use.
    pub fn view_of_use(&self, r#use: UseId) -> Option<ImageViewHandle> {
        self.use_views.get(r#use).and_then(|v| self.views.get(*v)).copied()
    }

    /// The buffer realized for a given def.
    pub fn buffer_of_def(&self, def: DefId) -> Option<BufferHandle> {
        self.def_buffers.get(def).copied()
    }

    /// The buffer realized for a given use.
    pub fn buffer_of_use(&self, r#use: UseId) -> Option<BufferHandle> {
        self.use_buffers.get(r#use).copied()
    }
}

/// Allocate every attachment's backing resource(s) and per-def/per-use views.
pub fn realize(
    device: &mut dyn GpuDevice,
    attachments: &SlotMap<AttachmentId, Attachment>,
    liveness: &Liveness,
    usage: &std::collections::HashMap<AttachmentId, AttachmentUsage>,
    def_refs: &SlotMap<DefId, (PassId, AttachmentRef)>,
    use_refs: &SlotMap<UseId, (PassId, AttachmentRef)>,
) -> Result<RealizedResources, CompileError> {
    let mut resources = RealizedResources::default();

    for attachment_id in liveness.attachments() {
        let attachment = &attachments[attachment_id];
        let ranges = liveness.ranges_of(attachment_id);
        let Some(usage) = usage.get(&attachment_id) else {
            continue;
        };

        match (attachment, usage) {
            (Attachment::Buffer(buffer), AttachmentUsage::Buffer(usage)) => {
                let handle = device.create_buffer(&BufferCreateDesc {
                    size: buffer.size,
                    usage: usage.overall_flags,
                })?;
                resources.buffers.insert(attachment_id, handle);
                for range in ranges {
                    resources.def_buffers.insert(range.def, handle);
                    for &(_, _, use_id) in &range.uses {
                        resources.use_buffers.insert(use_id, handle);
                    }
                }
            }
            (Attachment::Image(image), AttachmentUsage::Image(usage)) => {
                let handle = device.create_image(&ImageCreateDesc {
                    shape: image.shape,
                    format: image.format,
                    extent: image.extent,
                    layers: image.layers,
                    usage: usage.overall_flags,
                })?;
                resources.images.insert(attachment_id, handle);

                for range in ranges {
                    let (_, def_ref) = &def_refs[range.def];
                    let AttachmentRef::Image(def) = def_ref else {
                        // Already caught by C4; a mismatch here is a compiler bug.
                        return Err(CompileError::TypeMismatch {
                            attachment: attachment_id,
                        });
                    };
                    let view = device.create_image_view(
                        handle,
                        &ImageViewCreateDesc {
                            view_type: def.view.view_type,
                            format: def.view.format,
                            base_layer: def.view.base_layer,
                            layer_count: def.view.layer_count,
                        },
                    )?;
                    let view_id = resources.views.insert(view);
                    resources.def_views.insert(range.def, view_id);

                    for &(_, _, use_id) in &range.uses {
                        let (_, use_ref) = &use_refs[use_id];
                        let AttachmentRef::Image(use_img) = use_ref else {
                            return Err(CompileError::TypeMismatch {
                                attachment: attachment_id,
                            });
                        };
                        let view = device.create_image_view(
                            handle,
                            &ImageViewCreateDesc {
                                view_type: use_img.view.view_type,
                                format: use_img.view.format,
                                base_layer: use_img.view.base_layer,
                                layer_count: use_img.view.layer_count,
                            },
                        )?;
                        let view_id = resources.views.insert(view);
                        resources.use_views.insert(use_id, view_id);
                    }
                }
            }
            _ => {
                // Variant disagreement between attachment and usage was
                // already rejected by C4 (`TypeMismatch`); getting here
                // means compile skipped that check, which is a compiler bug.
                return Err(CompileError::TypeMismatch {
                    attachment: attachment_id,
                });
            }
        }
    }

    Ok(resources)
}
