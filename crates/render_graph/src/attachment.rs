//! Logical attachments: the images and buffers a graph reads and writes.
//!
//! An [`Attachment`] is a *description*, not a resource. `RenderGraph`
//! does not allocate anything for it until `compile()` walks the defs
//! and uses that reference it; before that, an attachment is just a
//! name plus the shape/format/size the caller wants it realized with.

use ash::vk;

use crate::gpu::{Extent3D, ImageShape};

/// A 2D/3D/cube/array image attachment's static parameters.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    /// Caller-facing name, used only for [`crate::debug_dump`] output and
    /// error messages.
    pub name: String,
    /// Image shape (1D/2D/3D/cube).
    pub shape: ImageShape,
    /// Pixel format.
    pub format: vk::Format,
    /// Image extents.
    pub extent: Extent3D,
    /// Array layer count. Must be at least 1; cube images must have a
    /// layer count that is a positive multiple of 6.
    pub layers: u32,
}

impl ImageAttachment {
    /// Describe a new image attachment. Does not allocate.
    pub fn new(
        name: impl Into<String>,
        shape: ImageShape,
        format: vk::Format,
        extent: Extent3D,
        layers: u32,
    ) -> Self {
        Self {
            name: name.into(),
            shape,
            format,
            extent,
            layers,
        }
    }
}

/// A buffer attachment's static parameters.
#[derive(Debug, Clone)]
pub struct BufferAttachment {
    /// Caller-facing name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

impl BufferAttachment {
    /// Describe a new buffer attachment. Does not allocate.
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// The swapchain image presented at the end of a frame. Exactly one of
/// these may be registered per graph; it can only be the subject of
/// an `OnSurfacePass`, never a caller-declared def or use (see
/// [`crate::error::CompileError::OnSurfaceDef`]).
#[derive(Debug, Clone)]
pub struct SurfaceAttachment {
    /// Caller-facing name.
    pub name: String,
    /// Pixel format of the presentable images.
    pub format: vk::Format,
    /// Extents of the presentable images.
    pub extent: Extent3D,
}

impl SurfaceAttachment {
    /// Describe the surface attachment. Does not allocate.
    pub fn new(name: impl Into<String>, format: vk::Format, extent: Extent3D) -> Self {
        Self {
            name: name.into(),
            format,
            extent,
        }
    }
}

/// An [`crate::ids::AttachmentId`]'s underlying description: exactly one
/// of image, buffer, or surface.
#[derive(Debug, Clone)]
pub enum Attachment {
    /// An image attachment.
    Image(ImageAttachment),
    /// A buffer attachment.
    Buffer(BufferAttachment),
    /// The graph's single surface attachment.
    Surface(SurfaceAttachment),
}

impl Attachment {
    /// The caller-facing name, regardless of variant.
    pub fn name(&self) -> &str {
        match self {
            Attachment::Image(a) => &a.name,
            Attachment::Buffer(a) => &a.name,
            Attachment::Surface(a) => &a.name,
        }
    }

    /// `true` if this is an image or surface attachment (both realize to
    /// a `vk::Image`); `false` for buffers.
    pub fn is_image_like(&self) -> bool {
        !matches!(self, Attachment::Buffer(_))
    }
}
