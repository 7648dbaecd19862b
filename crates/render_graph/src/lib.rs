//! # render_graph
//!
//! A render-graph compiler for a low-level, Vulkan-style GPU API.
//!
//! Callers declare a sequence of passes — compute, graphics, transfer,
//! and a terminal on-surface pass — each declaring which logical
//! *attachments* (images or buffers) it produces (defs) and consumes
//! (uses). [`graph::RenderGraph::compile`] analyzes the declared graph,
//! allocates the concrete GPU resources and views backing every
//! attachment, partitions the pass sequence into queue-family batches,
//! and inserts the minimal set of barrier passes required for
//! correctness. [`graph::RenderGraph::record`] then walks the finalized
//! pass sequence each frame and emits a command stream for an external
//! executor to replay.
//!
//! ## Pipeline
//!
//! 1. [`liveness`] — per-attachment live ranges over the pass list.
//! 2. [`usage`] — aggregated usage flags and format checks per attachment.
//! 3. [`realize`] — backing images, views, and buffers.
//! 4. [`batch`] — queue-family-homogeneous batches.
//! 5. [`sync`] — synthesized barrier passes.
//! 6. [`record`] — per-frame command stream.
//!
//! The underlying GPU API wrapper, windowing/surface layer,
//! physical-device selection, shader/pipeline creation, and descriptor
//! pool management are external collaborators; this crate programs
//! against the minimal surface described in [`gpu`].

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod attachment;
pub mod batch;
pub mod config;
pub mod debug_dump;
pub mod error;
pub mod gpu;
pub mod graph;
pub mod ids;
pub mod liveness;
pub mod logging;
pub mod pass;
pub mod realize;
pub mod record;
pub mod swapchain;
pub mod sync;
pub mod usage;

/// Common imports for crate users.
pub mod prelude {
    pub use crate::attachment::{BufferAttachment, ImageAttachment, SurfaceAttachment};
    pub use crate::config::GraphCompileConfig;
    pub use crate::error::CompileError;
    pub use crate::gpu::{Extent2D, Extent3D, GpuDevice, ImageShape, QueueFamilyKind, ViewType};
    pub use crate::graph::RenderGraph;
    pub use crate::ids::{AttachmentId, DefId, PassId, UseId, ViewId};
    pub use crate::pass::{AttachmentRefBuilder, Pass, PassKind};
    pub use crate::record::{Command, FrameContext};
    pub use crate::swapchain::{SurfaceBackend, SwapChain, SwapChainCreateInfo};
}
