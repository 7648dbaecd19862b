//! The `RenderGraph` facade: the single entry point a caller builds a
//! frame's work against.
//!
//! [`RenderGraph`] is a single concrete struct that owns every
//! id-indexed collection the compiler phases read; there is no
//! abstract-base/single-subclass split to preserve here.
//!
//! `Pass` does not know its own id until [`RenderGraph::add_pass`]
//! inserts it; likewise a `Pass`'s defs/uses are stored
//! twice — once inside the `Pass` itself (declaration order, used by
//! [`crate::debug_dump`]) and once in this graph's own `def_refs`/
//! `use_refs` id-indexed storage, which is what [`crate::liveness`],
//! [`crate::usage`], [`crate::realize`], and [`crate::sync`] consume.

use slotmap::{SecondaryMap, SlotMap};

use crate::attachment::{Attachment, BufferAttachment, ImageAttachment, SurfaceAttachment};
use crate::batch::{self, Batch};
use crate::config::GraphCompileConfig;
use crate::error::{CompileError, GpuError};
use crate::gpu::{Extent3D, GpuDevice, ImageShape, SemaphoreHandle};
use crate::ids::{AttachmentId, DefId, PassId, UseId};
use crate::liveness::{self, Liveness};
use crate::pass::{AttachmentRef, Pass};
use crate::realize::{self, RealizedResources};
use crate::record::{self, Command};
use crate::sync::{self, PassSlot, SyncArena};
use crate::usage;

use ash::vk;

/// Everything a successful [`RenderGraph::compile`] produced. Dropped and
/// rebuilt wholesale by the next `compile()` call; a failed compile must
/// not leave partial graph state behind, so a failed attempt simply
/// leaves the previous `Compiled` (or `None`) in place.
struct Compiled {
    sequence: Vec<PassSlot>,
    batches: Vec<Batch>,
    arena: SyncArena,
    resources: RealizedResources,
}

/// The render graph: owns every attachment and pass the caller declares,
/// and produces a schedule (`compile`) and, once per frame, a command
/// stream (`record`) from it.
pub struct RenderGraph {
    attachments: SlotMap<AttachmentId, Attachment>,
    passes: SlotMap<PassId, Pass>,
    pass_order: Vec<PassId>,
    def_refs: SlotMap<DefId, (PassId, AttachmentRef)>,
    use_refs: SlotMap<UseId, (PassId, AttachmentRef)>,
    pass_def_ids: SecondaryMap<PassId, Vec<DefId>>,
    pass_use_ids: SecondaryMap<PassId, Vec<UseId>>,
    compiled: Option<Compiled>,
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderGraph {
    /// An empty graph with no attachments or passes.
    pub fn new() -> Self {
        Self {
            attachments: SlotMap::with_key(),
            passes: SlotMap::with_key(),
            pass_order: Vec::new(),
            def_refs: SlotMap::with_key(),
            use_refs: SlotMap::with_key(),
            pass_def_ids: SecondaryMap::new(),
            pass_use_ids: SecondaryMap::new(),
            compiled: None,
        }
    }

    /// Register a new image attachment. Describes the resource; nothing
    /// is allocated until [`RenderGraph::compile`] realizes it.
    pub fn create_new_image_attachment(
        &mut self,
        name: impl Into<String>,
        shape: ImageShape,
        format: vk::Format,
        extent: Extent3D,
        layers: u32,
    ) -> AttachmentId {
        self.attachments
            .insert(Attachment::Image(ImageAttachment::new(name, shape, format, extent, layers)))
    }

    /// Register a new buffer attachment.
    pub fn create_new_buffer_attachment(&mut self, name: impl Into<String>, size: u64) -> AttachmentId {
        self.attachments
            .insert(Attachment::Buffer(BufferAttachment::new(name, size)))
    }

    /// Register the graph's surface attachment: the presentable image an
    /// `OnSurfacePass` presents at the end of the frame. Modeling the
    /// presented image as an ordinary [`AttachmentId`] lets
    /// `PassKind::OnSurface` carry it like any other attachment
    /// reference, while still rejecting it as a def (`OnSurfaceDef`).
    pub fn create_surface_attachment(
        &mut self,
        name: impl Into<String>,
        format: vk::Format,
        extent: Extent3D,
    ) -> AttachmentId {
        self.attachments
            .insert(Attachment::Surface(SurfaceAttachment::new(name, format, extent)))
    }

    /// Borrow an attachment's description.
    pub fn attachment(&self, id: AttachmentId) -> Option<&Attachment> {
        self.attachments.get(id)
    }

    /// Register a pass, appending it to the compiled pass order. Returns
    /// the id the pass did not know about at construction time.
    pub fn add_pass(&mut self, pass: Pass) -> PassId {
        let id = self.passes.insert(pass);
        self.pass_order.push(id);
        self.compiled = None;
        id
    }

    /// Borrow a registered pass.
    pub fn pass(&self, id: PassId) -> Option<&Pass> {
        self.passes.get(id)
    }

    /// Register a def on `pass`. Validates and records the ref on the
    /// `Pass` itself, then mirrors it into this graph's id-indexed storage so
    /// [`crate::liveness::analyze`] can walk it without borrowing `Pass`
    /// directly.
    pub fn add_def(
        &mut self,
        pass: PassId,
        r#ref: AttachmentRef,
        is_depth_format: bool,
    ) -> Result<DefId, CompileError> {
        self.passes[pass].add_def(pass, r#ref.clone(), is_depth_format)?;
        let def_id = self.def_refs.insert((pass, r#ref));
        self.pass_def_ids.entry(pass).unwrap().or_default().push(def_id);
        self.compiled = None;
        Ok(def_id)
    }

    /// Register a use on `pass`.
    pub fn add_use(&mut self, pass: PassId, r#ref: AttachmentRef) -> Result<UseId, CompileError> {
        self.passes[pass].add_use(pass, r#ref.clone())?;
        let use_id = self.use_refs.insert((pass, r#ref));
        self.pass_use_ids.entry(pass).unwrap().or_default().push(use_id);
        self.compiled = None;
        Ok(use_id)
    }

    /// Run the full compile pipeline over the declared graph: liveness
    /// analysis, usage aggregation, resource realization, barrier
    /// insertion, and queue-family batching, in that order. On success,
    /// returns the debug-dump table when `config.emit_debug_dump` is
    /// set; on failure, no partial state is retained — the graph's
    /// previous compiled state, if any, is left untouched.
    pub fn compile(
        &mut self,
        device: &mut dyn GpuDevice,
        config: &GraphCompileConfig,
    ) -> Result<Option<String>, CompileError> {
        let liveness = self.run_liveness()?;
        let usage = usage::aggregate(&self.attachments, &liveness, &self.def_refs, &self.use_refs)?;
        let resources = realize::realize(
            device,
            &self.attachments,
            &liveness,
            &usage,
            &self.def_refs,
            &self.use_refs,
        )?;
        let (sequence, arena) = sync::insert_barriers(
            &self.pass_order,
            &self.passes,
            &self.attachments,
            &liveness,
            &resources,
            &self.def_refs,
            &self.use_refs,
            device,
        )?;
        self.log_barriers(&arena, config);
        let batches = batch::partition(&sequence, &self.passes);

        let dump = config
            .emit_debug_dump
            .then(|| crate::debug_dump::dump(&self.attachments, &self.passes, &sequence, &batches));

        self.compiled = Some(Compiled {
            sequence,
            batches,
            arena,
            resources,
        });

        Ok(dump)
    }

    fn run_liveness(&self) -> Result<Liveness, CompileError> {
        liveness::analyze(
            &self.pass_order,
            &self.passes,
            &self.pass_def_ids,
            &self.pass_use_ids,
            &self.attachments,
        )
    }

    fn log_barriers(&self, arena: &SyncArena, config: &GraphCompileConfig) {
        use crate::config::BarrierLogLevel;
        match config.barrier_log_level {
            BarrierLogLevel::Quiet => {}
            BarrierLogLevel::PerSyncPass => {
                for (id, state) in arena.iter() {
                    log::debug!(
                        "sync pass {id:?}: {} image barrier(s), {} buffer barrier(s)",
                        state.image_barriers.len(),
                        state.buffer_barriers.len()
                    );
                }
            }
            BarrierLogLevel::PerBarrier => {
                for (id, state) in arena.iter() {
                    for barrier in &state.image_barriers {
                        log::trace!("sync pass {id:?}: image barrier {barrier:?}");
                    }
                    for barrier in &state.buffer_barriers {
                        log::trace!("sync pass {id:?}: buffer barrier {barrier:?}");
                    }
                }
            }
        }
    }

    /// The view realized for a def, once compiled. `None` before the
    /// first successful `compile()`, or if `def` names a buffer def.
    pub fn view_of_def(&self, def: DefId) -> Option<crate::gpu::ImageViewHandle> {
        self.compiled.as_ref()?.resources.view_of_def(def)
    }

    /// The view realized for a use, once compiled.
    pub fn view_of_use(&self, r#use: UseId) -> Option<crate::gpu::ImageViewHandle> {
        self.compiled.as_ref()?.resources.view_of_use(r#use)
    }

    /// The buffer realized for a def, once compiled.
    pub fn buffer_of_def(&self, def: DefId) -> Option<crate::gpu::BufferHandle> {
        self.compiled.as_ref()?.resources.buffer_of_def(def)
    }

    /// The buffer realized for a use, once compiled.
    pub fn buffer_of_use(&self, r#use: UseId) -> Option<crate::gpu::BufferHandle> {
        self.compiled.as_ref()?.resources.buffer_of_use(r#use)
    }

    /// The image realized for an attachment, once compiled.
    pub fn image_of(&self, attachment: AttachmentId) -> Option<crate::gpu::ImageHandle> {
        self.compiled.as_ref()?.resources.image_of(attachment)
    }

    /// The buffer realized for an attachment, once compiled.
    pub fn buffer_of(&self, attachment: AttachmentId) -> Option<crate::gpu::BufferHandle> {
        self.compiled.as_ref()?.resources.buffer_of(attachment)
    }

    /// Record one frame's command stream, delegating to
    /// [`crate::record::record`] over the sequence/batches/arena the last
    /// successful [`RenderGraph::compile`] produced.
    ///
    /// `acquired_image` is the `(index, acquire semaphore)` pair from
    /// [`crate::swapchain::SwapChain::acquire_next_image`], when this
    /// graph has an `OnSurfacePass`.
    ///
    /// # Panics
    ///
    /// Panics if called before any successful `compile()`.
    pub fn record(
        &mut self,
        device: &mut dyn GpuDevice,
        acquired_image: Option<(u32, SemaphoreHandle)>,
    ) -> Result<Vec<Command>, GpuError> {
        let compiled = self
            .compiled
            .as_ref()
            .expect("RenderGraph::record called before a successful compile()");
        record::record(
            device,
            &mut self.passes,
            &compiled.sequence,
            &compiled.arena,
            &compiled.batches,
            &compiled.resources,
            acquired_image,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::testing::FakeDevice;
    use crate::gpu::{Extent2D, ViewType};
    use crate::pass::{AttachmentRefBuilder, ImageViewSpec, PassKind};

    fn view(format: vk::Format) -> ImageViewSpec {
        ImageViewSpec {
            view_type: ViewType::D2,
            base_layer: 0,
            layer_count: 1,
            format,
        }
    }

    #[test]
    fn empty_graph_compiles_to_an_empty_schedule() {
        let mut graph = RenderGraph::new();
        let mut device = FakeDevice::new();
        let dump = graph.compile(&mut device, &GraphCompileConfig::default()).unwrap();
        assert!(dump.is_none() || dump.unwrap().trim() == "pass");
        let commands = graph.record(&mut device, None).unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn linear_compute_to_render_to_compute_realizes_resources_and_barriers() {
        let mut graph = RenderGraph::new();
        let format = vk::Format::R8G8B8A8_UNORM;
        let image = graph.create_new_image_attachment(
            "ping",
            ImageShape::D2,
            format,
            Extent3D { width: 64, height: 64, depth: 1 },
            1,
        );

        let c1 = graph.add_pass(Pass::new("produce", PassKind::Compute));
        graph
            .add_def(
                c1,
                AttachmentRefBuilder::descriptor_image(
                    image,
                    vk::ImageLayout::GENERAL,
                    vk::ImageUsageFlags::STORAGE,
                    view(format),
                    vk::DescriptorType::STORAGE_IMAGE,
                ),
                false,
            )
            .unwrap();

        let c2 = graph.add_pass(Pass::new("consume", PassKind::Compute));
        graph
            .add_use(
                c2,
                AttachmentRefBuilder::descriptor_image(
                    image,
                    vk::ImageLayout::GENERAL,
                    vk::ImageUsageFlags::STORAGE,
                    view(format),
                    vk::DescriptorType::STORAGE_IMAGE,
                ),
            )
            .unwrap();

        let mut device = FakeDevice::new();
        let config = GraphCompileConfig {
            emit_debug_dump: true,
            barrier_log_level: crate::config::BarrierLogLevel::PerBarrier,
        };
        let dump = graph.compile(&mut device, &config).unwrap().unwrap();
        assert!(dump.contains("produce"));
        assert!(dump.contains("consume"));
        assert_eq!(device.image_count(), 1);

        let commands = graph.record(&mut device, None).unwrap();
        // One batch: both passes and the interleaved sync pass share the
        // compute family, so a single Execute is emitted.
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn use_before_def_fails_compile() {
        let mut graph = RenderGraph::new();
        let format = vk::Format::R8G8B8A8_UNORM;
        let image = graph.create_new_image_attachment(
            "img",
            ImageShape::D2,
            format,
            Extent3D { width: 1, height: 1, depth: 1 },
            1,
        );
        let c1 = graph.add_pass(Pass::new("reader", PassKind::Compute));
        graph
            .add_use(
                c1,
                AttachmentRefBuilder::descriptor_image(
                    image,
                    vk::ImageLayout::GENERAL,
                    vk::ImageUsageFlags::STORAGE,
                    view(format),
                    vk::DescriptorType::STORAGE_IMAGE,
                ),
            )
            .unwrap();

        let mut device = FakeDevice::new();
        let err = graph
            .compile(&mut device, &GraphCompileConfig::default())
            .unwrap_err();
        assert!(matches!(err, CompileError::UseBeforeDef { .. }));
    }

    #[test]
    fn on_surface_pass_presents_at_the_end_of_its_batch() {
        let mut graph = RenderGraph::new();
        let format = vk::Format::B8G8R8A8_SRGB;
        let surface = graph.create_surface_attachment(
            "swapchain",
            format,
            Extent3D { width: 800, height: 600, depth: 1 },
        );

        let present = graph.add_pass(
            Pass::new("present", PassKind::OnSurface { surface }).with_render_target(
                crate::pass::RenderTarget {
                    render_pass: crate::gpu::RenderPassHandle(1),
                    framebuffer: crate::gpu::FramebufferHandle(1),
                    render_area: Extent2D { width: 800, height: 600 },
                },
            ),
        );
        // An OnSurfacePass rejects defs outright; nothing further to
        // register for the surface attachment itself.
        let err = graph
            .add_def(
                present,
                AttachmentRefBuilder::framebuffer_image(
                    surface,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                    vk::ImageUsageFlags::COLOR_ATTACHMENT,
                    view(format),
                    0,
                ),
                false,
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::OnSurfaceDef { .. }));

        let mut device = FakeDevice::new();
        graph.compile(&mut device, &GraphCompileConfig::default()).unwrap();
        let acquire_sem = device.create_semaphore().unwrap();
        let commands = graph.record(&mut device, Some((2, acquire_sem))).unwrap();
        assert_eq!(commands.len(), 2);
        assert!(matches!(commands[1], Command::Present { .. }));
    }
}
