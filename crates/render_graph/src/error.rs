//! Error taxonomy for the render-graph compiler.
//!
//! Every fallible operation in this crate returns `Result<_, CompileError>`
//! (or, for the GPU-facing layer, `Result<_, GpuError>`, which
//! `CompileError::Gpu` wraps). No panics on malformed input graphs;
//! `unwrap`/`expect` are reserved for invariants an earlier compile phase
//! has already checked, and for test code.

use crate::ids::{AttachmentId, PassId};
use thiserror::Error;

/// Errors raised by the thin GPU-API collaborator (image/buffer/view
/// creation, queue-family lookup). See `crate::gpu`.
#[derive(Error, Debug)]
pub enum GpuError {
    /// The backend's underlying API call failed.
    #[error("GPU API call failed: {0}")]
    Api(String),

    /// No memory type satisfying the requested properties was found.
    #[error("no suitable memory type for the requested allocation")]
    NoSuitableMemoryType,
}

/// Errors that can abort [`crate::graph::RenderGraph::compile`].
///
/// Each variant names the condition and carries the ids needed to
/// reconstruct it. All errors abort `compile()` immediately; no partial
/// graph state is retained by the caller.
#[derive(Error, Debug)]
pub enum CompileError {
    /// A def/use references an attachment this graph does not own.
    #[error("pass {pass:?} references attachment {attachment:?}, which this graph does not own")]
    UnknownAttachment {
        /// The pass holding the dangling reference.
        pass: PassId,
        /// The attachment id that could not be resolved.
        attachment: AttachmentId,
    },

    /// Two defs of the same attachment appear in one pass.
    #[error("pass {pass:?} defines attachment {attachment:?} twice")]
    DoubleDef {
        /// The offending pass.
        pass: PassId,
        /// The attachment defined twice.
        attachment: AttachmentId,
    },

    /// A pass uses an attachment it also defines.
    #[error("pass {pass:?} uses attachment {attachment:?}, which it also defines")]
    UseOfOwnDef {
        /// The offending pass.
        pass: PassId,
        /// The attachment in question.
        attachment: AttachmentId,
    },

    /// A use appears with no open live range for its attachment.
    #[error("pass {pass:?} uses attachment {attachment:?} before any pass defines it")]
    UseBeforeDef {
        /// The offending pass.
        pass: PassId,
        /// The attachment used too early.
        attachment: AttachmentId,
    },

    /// A buffer ref was found on an image attachment, or vice versa.
    #[error("attachment {attachment:?} is referenced with the wrong ref variant (image vs. buffer)")]
    TypeMismatch {
        /// The attachment whose defs/uses disagree on variant.
        attachment: AttachmentId,
    },

    /// The image's type does not admit the requested view type.
    #[error("attachment {attachment:?}: image type does not admit the requested view type")]
    IncompatibleView {
        /// The attachment in question.
        attachment: AttachmentId,
    },

    /// `baseLayer + layerCount` overruns the image, or `layerCount == 0`.
    #[error("attachment {attachment:?}: layer range out of bounds (base {base_layer} + count {layer_count} > {layers}, or count is zero)")]
    LayerOutOfRange {
        /// The attachment in question.
        attachment: AttachmentId,
        /// Requested base layer.
        base_layer: u32,
        /// Requested layer count.
        layer_count: u32,
        /// Total layers the image has.
        layers: u32,
    },

    /// `offset + size` overruns the buffer.
    #[error("attachment {attachment:?}: buffer range out of bounds (offset {offset} + size {size} > {buffer_size})")]
    BufferOutOfRange {
        /// The attachment in question.
        attachment: AttachmentId,
        /// Requested byte offset.
        offset: u64,
        /// Requested byte size.
        size: u64,
        /// Total buffer size.
        buffer_size: u64,
    },

    /// A view's format does not exactly match the attachment's pixel format.
    #[error("attachment {attachment:?}: view format does not match the attachment's pixel format")]
    FormatMismatch {
        /// The attachment in question.
        attachment: AttachmentId,
    },

    /// A def was added to an `OnSurfacePass`.
    #[error("pass {pass:?}: surface images cannot be user-declared as defs")]
    OnSurfaceDef {
        /// The offending pass.
        pass: PassId,
    },

    /// A def violates its pass kind's shape rules: a `RenderPass`'s
    /// framebuffer/depth/color rules, or a `ComputePass`/`TransferPass`
    /// rejecting a framebuffer-only ref.
    #[error("pass {pass:?}: invalid def: {reason}")]
    RenderPassInvalidDef {
        /// The offending pass.
        pass: PassId,
        /// Human-readable reason.
        reason: String,
    },

    /// Two defs in one `RenderPass` share a framebuffer binding index.
    #[error("pass {pass:?}: binding index {binding} is already taken")]
    FramebufferBindingConflict {
        /// The offending pass.
        pass: PassId,
        /// The colliding binding index.
        binding: u32,
    },

    /// The same ref was added to a pass twice.
    #[error("pass {pass:?}: attachment {attachment:?} is already registered")]
    DuplicateRef {
        /// The offending pass.
        pass: PassId,
        /// The attachment already registered.
        attachment: AttachmentId,
    },

    /// A live range has no uses; the compiler does not support this yet.
    #[error("attachment {attachment:?} has a def with no use; unused defs are not supported")]
    UnusedDefUnsupported {
        /// The attachment in question.
        attachment: AttachmentId,
    },

    /// An attachment has more than one live range; not supported yet.
    #[error("attachment {attachment:?} is defined more than once with no intervening use; this is not supported")]
    DoubleDefUnsupported {
        /// The attachment in question.
        attachment: AttachmentId,
    },

    /// The GPU collaborator failed to realize a resource.
    #[error("resource realization failed: {0}")]
    Gpu(#[from] GpuError),
}
