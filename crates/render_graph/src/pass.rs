//! Passes: the caller-declared units of work in a graph, and the
//! attachment references (defs/uses) they register.
//!
//! An image or buffer def/use can combine independent capabilities (a
//! framebuffer binding, a descriptor binding, both, or neither), so
//! rather than a class hierarchy per combination, [`ImageRef`] carries
//! an optional framebuffer binding and an optional descriptor binding
//! side by side, and [`AttachmentRefBuilder`] exposes one constructor
//! function per combination callers actually need.

use std::collections::HashSet;

use ash::vk;

use crate::error::CompileError;
use crate::ids::AttachmentId;

/// View type + layer range shared by every image ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageViewSpec {
    /// Requested view type.
    pub view_type: crate::gpu::ViewType,
    /// First array layer.
    pub base_layer: u32,
    /// Array layer count.
    pub layer_count: u32,
    /// Requested view format; must match the attachment's format.
    pub format: vk::Format,
}

/// Framebuffer attachment binding, present on framebuffer-bound image
/// refs (including input attachments, which are framebuffer- and
/// descriptor-bound at once).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferBinding {
    /// Binding index within the owning `RenderPass`'s framebuffer.
    pub binding: u32,
}

/// Descriptor binding, present on descriptor-bound refs: sampled/storage
/// images, buffers, and input attachments (which are both framebuffer-
/// and descriptor-bound).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Descriptor type this ref is bound as.
    pub descriptor_type: vk::DescriptorType,
}

/// An image def or use: layout/usage the pass needs, a view spec, and
/// zero or more of {framebuffer binding, descriptor binding}.
#[derive(Debug, Clone)]
pub struct ImageRef {
    /// Attachment this ref points at. Must be an `Attachment::Image` or
    /// `Attachment::Surface`; anything else fails usage aggregation with
    /// `TypeMismatch`.
    pub attachment: AttachmentId,
    /// Layout the pass needs the image in while this ref is active.
    pub layout: vk::ImageLayout,
    /// Usage bits this ref contributes to the attachment's aggregated
    /// usage flags.
    pub usage: vk::ImageUsageFlags,
    /// View type/format/layer range.
    pub view: ImageViewSpec,
    /// Present when this ref is bound to a framebuffer slot.
    pub framebuffer: Option<FramebufferBinding>,
    /// Present when this ref is bound to a descriptor set slot.
    pub descriptor: Option<DescriptorBinding>,
}

/// A buffer def or use.
#[derive(Debug, Clone)]
pub struct BufferRef {
    /// Attachment this ref points at. Must be an `Attachment::Buffer`.
    pub attachment: AttachmentId,
    /// Usage bits this ref contributes to the attachment's aggregated
    /// usage flags.
    pub usage: vk::BufferUsageFlags,
    /// Byte offset into the buffer this ref covers.
    pub offset: u64,
    /// Byte size this ref covers.
    pub size: u64,
    /// Buffers are always descriptor-bound, unlike images.
    pub descriptor: DescriptorBinding,
}

/// An attachment reference: either an image ref or a buffer ref. Whether
/// it is a def or a use is determined by which set ([`Pass::defs`] or
/// [`Pass::uses`]) it was added to, not by its type.
#[derive(Debug, Clone)]
pub enum AttachmentRef {
    /// An image ref.
    Image(ImageRef),
    /// A buffer ref.
    Buffer(BufferRef),
}

impl AttachmentRef {
    /// The attachment this ref points at, regardless of variant.
    pub fn attachment(&self) -> AttachmentId {
        match self {
            AttachmentRef::Image(r) => r.attachment,
            AttachmentRef::Buffer(r) => r.attachment,
        }
    }
}

/// Convenience constructors for each combination of framebuffer/descriptor
/// binding an [`AttachmentRef`] can carry.
pub struct AttachmentRefBuilder;

impl AttachmentRefBuilder {
    /// A plain image ref bound to neither a framebuffer nor a descriptor
    /// set.
    pub fn image(
        attachment: AttachmentId,
        layout: vk::ImageLayout,
        usage: vk::ImageUsageFlags,
        view: ImageViewSpec,
    ) -> AttachmentRef {
        AttachmentRef::Image(ImageRef {
            attachment,
            layout,
            usage,
            view,
            framebuffer: None,
            descriptor: None,
        })
    }

    /// A framebuffer-bound color or depth/stencil attachment ref.
    pub fn framebuffer_image(
        attachment: AttachmentId,
        layout: vk::ImageLayout,
        usage: vk::ImageUsageFlags,
        view: ImageViewSpec,
        binding: u32,
    ) -> AttachmentRef {
        AttachmentRef::Image(ImageRef {
            attachment,
            layout,
            usage,
            view,
            framebuffer: Some(FramebufferBinding { binding }),
            descriptor: None,
        })
    }

    /// A descriptor-bound sampled/storage image ref.
    pub fn descriptor_image(
        attachment: AttachmentId,
        layout: vk::ImageLayout,
        usage: vk::ImageUsageFlags,
        view: ImageViewSpec,
        descriptor_type: vk::DescriptorType,
    ) -> AttachmentRef {
        AttachmentRef::Image(ImageRef {
            attachment,
            layout,
            usage,
            view,
            framebuffer: None,
            descriptor: Some(DescriptorBinding { descriptor_type }),
        })
    }

    /// An input attachment: simultaneously framebuffer-bound (as a
    /// read-only color/depth input) and descriptor-bound as
    /// `INPUT_ATTACHMENT`. Layout and usage are fixed by the
    /// input-attachment contract, not caller-supplied.
    pub fn input_attachment(
        attachment: AttachmentId,
        binding: u32,
        base_layer: u32,
        layer_count: u32,
        format: vk::Format,
    ) -> AttachmentRef {
        AttachmentRef::Image(ImageRef {
            attachment,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            usage: vk::ImageUsageFlags::INPUT_ATTACHMENT,
            view: ImageViewSpec {
                view_type: crate::gpu::ViewType::D2,
                base_layer,
                layer_count,
                format,
            },
            framebuffer: Some(FramebufferBinding { binding }),
            descriptor: Some(DescriptorBinding {
                descriptor_type: vk::DescriptorType::INPUT_ATTACHMENT,
            }),
        })
    }

    /// A buffer ref.
    pub fn buffer(
        attachment: AttachmentId,
        usage: vk::BufferUsageFlags,
        offset: u64,
        size: u64,
        descriptor_type: vk::DescriptorType,
    ) -> AttachmentRef {
        AttachmentRef::Buffer(BufferRef {
            attachment,
            usage,
            offset,
            size,
            descriptor: DescriptorBinding { descriptor_type },
        })
    }
}

/// The three kinds of caller-declared pass, plus the queue family each
/// compiles onto. `OnSurface` shares `Render`'s framebuffer-bound def
/// rules but additionally carries the [`AttachmentId`] of the one
/// [`crate::attachment::SurfaceAttachment`] it presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Runs on the graphics queue; defs must be framebuffer-bound images.
    Render,
    /// Runs on the graphics queue; defs must be framebuffer-bound images,
    /// and it presents the named surface attachment at the end of the
    /// frame.
    OnSurface {
        /// The single surface attachment this pass presents.
        surface: AttachmentId,
    },
    /// Runs on the compute queue; no def-shape restrictions.
    Compute,
    /// Runs on the transfer queue; no def-shape restrictions.
    Transfer,
}

impl PassKind {
    /// The queue family this pass kind schedules onto.
    pub fn queue_family(self) -> crate::gpu::QueueFamilyKind {
        match self {
            PassKind::Render | PassKind::OnSurface { .. } => crate::gpu::QueueFamilyKind::Graphics,
            PassKind::Compute => crate::gpu::QueueFamilyKind::Compute,
            PassKind::Transfer => crate::gpu::QueueFamilyKind::Transfer,
        }
    }

    /// Whether this kind validates defs as framebuffer-bound color/depth
    /// attachments; `false` for compute/transfer passes, which place no
    /// shape restriction on their defs.
    pub fn is_render_like(self) -> bool {
        matches!(self, PassKind::Render | PassKind::OnSurface { .. })
    }
}

/// Per-frame recording callback a pass runs once the graph has scheduled
/// barriers around it: an optional closure the recorder invokes at the
/// right point in the command stream.
pub type PassBody = Box<dyn FnMut(&mut crate::record::FrameContext<'_>)>;

/// The framebuffer-bound render target a `Render`/`OnSurface` pass
/// records into: `begin_render_pass`'s three arguments. Render pass and
/// framebuffer construction is out of scope for this crate, so the
/// caller builds them and attaches the resulting handles here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    /// The render pass this pass records into.
    pub render_pass: crate::gpu::RenderPassHandle,
    /// The framebuffer this pass records into.
    pub framebuffer: crate::gpu::FramebufferHandle,
    /// The full render area the recorder begins the render pass over.
    pub render_area: crate::gpu::Extent2D,
}

/// A caller-declared pass: a name, a kind, the defs/uses it has
/// registered, and the work it records.
pub struct Pass {
    name: String,
    kind: PassKind,
    defs: Vec<AttachmentRef>,
    uses: Vec<AttachmentRef>,
    has_depth_attachment: bool,
    taken_bindings: HashSet<u32>,
    body: Option<PassBody>,
    render_target: Option<RenderTarget>,
}

impl std::fmt::Debug for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pass")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("defs", &self.defs.len())
            .field("uses", &self.uses.len())
            .finish()
    }
}

impl Pass {
    /// Declare a new, empty pass. `id` is supplied by
    /// [`crate::graph::RenderGraph::add_pass`] once the pass is inserted
    /// into the graph's slot map; until then the pass does not know its
    /// own id.
    pub fn new(name: impl Into<String>, kind: PassKind) -> Self {
        Self {
            name: name.into(),
            kind,
            defs: Vec::new(),
            uses: Vec::new(),
            has_depth_attachment: false,
            taken_bindings: HashSet::new(),
            body: None,
            render_target: None,
        }
    }

    /// Attach the per-frame recording closure (see [`PassBody`]).
    pub fn with_body(mut self, body: impl FnMut(&mut crate::record::FrameContext<'_>) + 'static) -> Self {
        self.body = Some(Box::new(body));
        self
    }

    /// Attach the render pass/framebuffer/render area a `Render`/
    /// `OnSurface` pass records into (must be set before the first
    /// `record()` call; `Compute`/`Transfer` passes ignore it).
    pub fn with_render_target(mut self, target: RenderTarget) -> Self {
        self.render_target = Some(target);
        self
    }

    /// Pass name, used by [`crate::debug_dump`] and error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pass kind.
    pub fn kind(&self) -> PassKind {
        self.kind
    }

    /// Registered defs, in declaration order.
    pub fn defs(&self) -> &[AttachmentRef] {
        &self.defs
    }

    /// Registered uses, in declaration order.
    pub fn uses(&self) -> &[AttachmentRef] {
        &self.uses
    }

    /// Whether a framebuffer-bound depth/stencil def has already been
    /// registered.
    pub fn has_depth_attachment(&self) -> bool {
        self.has_depth_attachment
    }

    /// The render target attached via [`Pass::with_render_target`], if any.
    pub fn render_target(&self) -> Option<RenderTarget> {
        self.render_target
    }

    /// Mutable access to the recording closure, for the recorder to
    /// invoke once per frame without consuming it (the closure must be
    /// available again on the next `record()` call).
    pub(crate) fn body_mut(&mut self) -> Option<&mut PassBody> {
        self.body.as_mut()
    }

    /// Register a def, applying `Render`/`OnSurface`'s framebuffer shape
    /// checks where this pass kind requires them; `pass_id` is only used
    /// to fill in the error's `pass` field.
    pub fn add_def(
        &mut self,
        pass_id: crate::ids::PassId,
        r#ref: AttachmentRef,
        is_depth_format: bool,
    ) -> Result<(), CompileError> {
        if matches!(self.kind, PassKind::OnSurface { .. }) {
            return Err(CompileError::OnSurfaceDef { pass: pass_id });
        }
        if self.kind.is_render_like() {
            self.validate_render_def(pass_id, &r#ref, is_depth_format)?;
        } else if let AttachmentRef::Image(img) = &r#ref {
            if img.descriptor.is_none() && img.framebuffer.is_some() {
                return Err(CompileError::RenderPassInvalidDef {
                    pass: pass_id,
                    reason: "Compute/TransferPass cannot define a framebuffer-only image".into(),
                });
            }
        }
        if self.defs.iter().any(|d| d.attachment() == r#ref.attachment()) {
            return Err(CompileError::DoubleDef {
                pass: pass_id,
                attachment: r#ref.attachment(),
            });
        }
        self.defs.push(r#ref);
        Ok(())
    }

    /// Register a use. No pass kind places shape restrictions on uses,
    /// so there is nothing further to validate here beyond duplicate
    /// detection.
    pub fn add_use(
        &mut self,
        pass_id: crate::ids::PassId,
        r#ref: AttachmentRef,
    ) -> Result<(), CompileError> {
        if self.uses.iter().any(|u| u.attachment() == r#ref.attachment()) {
            return Err(CompileError::DuplicateRef {
                pass: pass_id,
                attachment: r#ref.attachment(),
            });
        }
        self.uses.push(r#ref);
        Ok(())
    }

    fn validate_render_def(
        &mut self,
        pass_id: crate::ids::PassId,
        r#ref: &AttachmentRef,
        is_depth_format: bool,
    ) -> Result<(), CompileError> {
        let AttachmentRef::Image(img) = r#ref else {
            return Err(CompileError::RenderPassInvalidDef {
                pass: pass_id,
                reason: "RenderPass cannot define a buffer".into(),
            });
        };
        let Some(fb) = img.framebuffer else {
            return Err(CompileError::RenderPassInvalidDef {
                pass: pass_id,
                reason: "RenderPass can only define framebuffer images".into(),
            });
        };

        if is_depth_format {
            if self.has_depth_attachment {
                return Err(CompileError::RenderPassInvalidDef {
                    pass: pass_id,
                    reason: "RenderPass cannot have more than one depth attachment".into(),
                });
            }
            if !img.usage.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT) {
                return Err(CompileError::RenderPassInvalidDef {
                    pass: pass_id,
                    reason: "depth attachment has invalid usage info".into(),
                });
            }
            self.has_depth_attachment = true;
        } else if !img.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT) {
            return Err(CompileError::RenderPassInvalidDef {
                pass: pass_id,
                reason: "color attachment has invalid usage info".into(),
            });
        }

        if self.taken_bindings.contains(&fb.binding) {
            return Err(CompileError::FramebufferBindingConflict {
                pass: pass_id,
                binding: fb.binding,
            });
        }
        self.taken_bindings.insert(fb.binding);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn on_surface_pass_rejects_every_def() {
        let mut attachments: SlotMap<AttachmentId, ()> = SlotMap::with_key();
        let surface = attachments.insert(());
        let mut pass_ids: SlotMap<crate::ids::PassId, ()> = SlotMap::with_key();
        let pass_id = pass_ids.insert(());

        let mut pass = Pass::new("present", PassKind::OnSurface { surface });
        let r#ref = AttachmentRefBuilder::framebuffer_image(
            surface,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ImageViewSpec {
                view_type: crate::gpu::ViewType::D2,
                base_layer: 0,
                layer_count: 1,
                format: vk::Format::B8G8R8A8_SRGB,
            },
            0,
        );
        let err = pass.add_def(pass_id, r#ref, false).unwrap_err();
        assert!(matches!(err, CompileError::OnSurfaceDef { .. }));
    }

    #[test]
    fn framebuffer_binding_conflict_is_detected() {
        let mut attachments: SlotMap<AttachmentId, ()> = SlotMap::with_key();
        let a1 = attachments.insert(());
        let a2 = attachments.insert(());
        let mut pass_ids: SlotMap<crate::ids::PassId, ()> = SlotMap::with_key();
        let pass_id = pass_ids.insert(());

        let mut pass = Pass::new("opaque", PassKind::Render);
        let view = ImageViewSpec {
            view_type: crate::gpu::ViewType::D2,
            base_layer: 0,
            layer_count: 1,
            format: vk::Format::B8G8R8A8_SRGB,
        };
        pass.add_def(
            pass_id,
            AttachmentRefBuilder::framebuffer_image(
                a1,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
                view,
                0,
            ),
            false,
        )
        .unwrap();
        let err = pass
            .add_def(
                pass_id,
                AttachmentRefBuilder::framebuffer_image(
                    a2,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT,
                    view,
                    0,
                ),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::FramebufferBindingConflict { binding: 0, .. }));
    }

    #[test]
    fn compute_pass_rejects_a_framebuffer_only_def() {
        let mut attachments: SlotMap<AttachmentId, ()> = SlotMap::with_key();
        let a1 = attachments.insert(());
        let mut pass_ids: SlotMap<crate::ids::PassId, ()> = SlotMap::with_key();
        let pass_id = pass_ids.insert(());

        let mut pass = Pass::new("compute", PassKind::Compute);
        let r#ref = AttachmentRefBuilder::framebuffer_image(
            a1,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
            ImageViewSpec {
                view_type: crate::gpu::ViewType::D2,
                base_layer: 0,
                layer_count: 1,
                format: vk::Format::B8G8R8A8_SRGB,
            },
            0,
        );
        let err = pass.add_def(pass_id, r#ref, false).unwrap_err();
        assert!(matches!(err, CompileError::RenderPassInvalidDef { .. }));
    }
}
