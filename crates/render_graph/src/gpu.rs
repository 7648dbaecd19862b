//! The thin GPU-API surface the compiler programs against.
//!
//! This crate treats the device, queues, command buffers, images, image
//! views, buffers, semaphores, fences, render passes, framebuffers, and
//! swapchain as an external collaborator. None of it is the subject of
//! this crate — the render-graph compiler only needs a handful of
//! operations from it (allocate an image/buffer, create a view, look up
//! a queue family, record a barrier), so this module defines exactly
//! that surface as a trait plus opaque, generation-free handles, in the
//! style of a Vulkan RAII wrapper layer.
//!
//! Two implementations ship with the crate: [`ash_backend::AshDevice`],
//! a real (if minimal) Vulkan backend built on `ash`, and
//! [`testing::FakeDevice`], an in-process bookkeeping backend used by
//! this crate's own test suite and by callers who want to unit test
//! their render graphs without a GPU.

use ash::vk;
use std::fmt;

use crate::error::GpuError;

/// Which queue family a pass is scheduled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueFamilyKind {
    /// RenderPass / OnSurfacePass.
    Graphics,
    /// ComputePass.
    Compute,
    /// TransferPass.
    Transfer,
}

/// Image shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageShape {
    /// One-dimensional image.
    D1,
    /// Two-dimensional image.
    D2,
    /// Three-dimensional image.
    D3,
    /// Cube image (six 2D faces).
    Cube,
}

/// View type a def/use can request. Compatibility with [`ImageShape`] is
/// enforced by [`crate::usage`] before any view is realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewType {
    /// 1D view.
    D1,
    /// 1D array view.
    D1Array,
    /// 2D view.
    D2,
    /// 2D array view.
    D2Array,
    /// 3D view.
    D3,
    /// Cube view.
    Cube,
    /// Cube array view.
    CubeArray,
}

/// Width/height/depth in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3D {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth in texels (1 for non-volume images).
    pub depth: u32,
}

/// 2D render area, used by the recorder to begin a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent2D {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
}

/// Parameters for realizing the backing image of an [`crate::attachment::ImageAttachment`].
#[derive(Debug, Clone)]
pub struct ImageCreateDesc {
    /// Image shape.
    pub shape: ImageShape,
    /// Pixel format.
    pub format: vk::Format,
    /// Extents.
    pub extent: Extent3D,
    /// Array layer count.
    pub layers: u32,
    /// Aggregated usage flags (the union of every def/use on this attachment).
    pub usage: vk::ImageUsageFlags,
}

/// Parameters for one realized image view (one per def, one per use).
#[derive(Debug, Clone)]
pub struct ImageViewCreateDesc {
    /// View type.
    pub view_type: ViewType,
    /// View format.
    pub format: vk::Format,
    /// First array layer the view exposes.
    pub base_layer: u32,
    /// Number of array layers the view exposes.
    pub layer_count: u32,
}

/// Parameters for realizing the backing buffer of a [`crate::attachment::BufferAttachment`].
#[derive(Debug, Clone)]
pub struct BufferCreateDesc {
    /// Size in bytes.
    pub size: u64,
    /// Aggregated usage flags.
    pub usage: vk::BufferUsageFlags,
}

/// Opaque handle to a realized image, scoped to the [`GpuDevice`] that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub u64);

/// Opaque handle to a realized image view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewHandle(pub u64);

/// Opaque handle to a realized buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// Opaque handle to a render pass object. Render passes are built by the
/// caller (shader/pipeline creation is out of scope for this crate) and
/// attached to a `RenderPass`/`OnSurfacePass` at construction time; the
/// compiler never creates one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPassHandle(pub u64);

/// Opaque handle to a framebuffer, caller-constructed like [`RenderPassHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub u64);

/// Opaque handle to a device queue, scoped to the family it was retrieved
/// from (see [`crate::record::QueueDescription`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle(pub u64);

/// Opaque handle to a binary semaphore, used to order a [`crate::record::Command::Execute`]
/// against the [`crate::record::Command::Present`] (or batch) that depends on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemaphoreHandle(pub u64);

/// Opaque handle to a fence. Not driven by the compiler itself — host-side
/// frame pacing is a caller concern — carried only so the external GPU API
/// surface has a concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(pub u64);

/// An image memory barrier, as emitted by a `SyncPass`.
#[derive(Debug, Clone, Copy)]
pub struct ImageMemoryBarrier {
    /// Image the barrier applies to.
    pub image: ImageHandle,
    /// Layout before the barrier.
    pub old_layout: vk::ImageLayout,
    /// Layout after the barrier.
    pub new_layout: vk::ImageLayout,
    /// Access scope before the barrier.
    pub src_access_mask: vk::AccessFlags,
    /// Access scope after the barrier.
    pub dst_access_mask: vk::AccessFlags,
    /// Source queue family (ownership transfer), or `QUEUE_FAMILY_IGNORED`.
    pub src_queue_family: u32,
    /// Destination queue family (ownership transfer), or `QUEUE_FAMILY_IGNORED`.
    pub dst_queue_family: u32,
    /// Base array layer the barrier covers.
    pub base_layer: u32,
    /// Layer count the barrier covers.
    pub layer_count: u32,
}

/// A buffer memory barrier, as emitted by a `SyncPass`.
#[derive(Debug, Clone, Copy)]
pub struct BufferMemoryBarrier {
    /// Buffer the barrier applies to.
    pub buffer: BufferHandle,
    /// Byte offset the barrier covers.
    pub offset: u64,
    /// Byte size the barrier covers.
    pub size: u64,
    /// Access scope before the barrier.
    pub src_access_mask: vk::AccessFlags,
    /// Access scope after the barrier.
    pub dst_access_mask: vk::AccessFlags,
    /// Source queue family (ownership transfer), or `QUEUE_FAMILY_IGNORED`.
    pub src_queue_family: u32,
    /// Destination queue family (ownership transfer), or `QUEUE_FAMILY_IGNORED`.
    pub dst_queue_family: u32,
}

/// The GPU device as seen by the compiler: enough to realize resources
/// and look up queue families. Kept as a trait so the crate's
/// own tests, and callers who want to unit test their graphs, can swap
/// in [`testing::FakeDevice`] instead of a real Vulkan instance.
pub trait GpuDevice: fmt::Debug {
    /// Allocate a device-local image per [`ImageCreateDesc`].
    fn create_image(&mut self, desc: &ImageCreateDesc) -> Result<ImageHandle, GpuError>;

    /// Create a view over a previously realized image.
    fn create_image_view(
        &mut self,
        image: ImageHandle,
        desc: &ImageViewCreateDesc,
    ) -> Result<ImageViewHandle, GpuError>;

    /// Allocate a device-local, exclusive-sharing buffer.
    fn create_buffer(&mut self, desc: &BufferCreateDesc) -> Result<BufferHandle, GpuError>;

    /// Resolve the queue family index backing a queue family kind.
    fn queue_family(&self, kind: QueueFamilyKind) -> u32;

    /// Resolve the queue the recorder should submit a family's batches to.
    fn queue(&self, kind: QueueFamilyKind) -> QueueHandle;

    /// Allocate a primary command buffer on `family`'s pool. One is
    /// allocated per command batch produced by [`crate::batch::partition`].
    fn create_command_buffer(
        &mut self,
        family: QueueFamilyKind,
    ) -> Result<Box<dyn CommandBuffer>, GpuError>;

    /// Create an unsignaled binary semaphore.
    fn create_semaphore(&mut self) -> Result<SemaphoreHandle, GpuError>;

    /// Record and submit a one-off command buffer containing exactly these
    /// image barriers on `family`'s queue, and block until it completes.
    /// Used once by [`crate::swapchain::SwapChain::create`] to transition a
    /// freshly acquired swapchain's images to `PRESENT_SRC_KHR` and a depth
    /// buffer to its attachment layout, with a throwaway command pool and
    /// a fence it waits on inline.
    fn transition_images_and_wait(
        &mut self,
        family: QueueFamilyKind,
        image_barriers: &[ImageMemoryBarrier],
    ) -> Result<(), GpuError>;
}

/// The command-recording surface the frame recorder drives each frame.
pub trait CommandBuffer: fmt::Debug {
    /// Begin recording.
    fn begin(&mut self);
    /// Stop recording.
    fn end(&mut self);
    /// Begin a render pass over the full render area of `framebuffer`.
    fn begin_render_pass(
        &mut self,
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        render_area: Extent2D,
    );
    /// End the current render pass.
    fn end_render_pass(&mut self);
    /// Emit a single `ALL_COMMANDS -> ALL_COMMANDS` pipeline barrier
    /// carrying the given image and buffer memory barriers.
    fn pipeline_barrier(
        &mut self,
        image_barriers: &[ImageMemoryBarrier],
        buffer_barriers: &[BufferMemoryBarrier],
    );
}

/// A real (if minimal) `ash`-backed [`GpuDevice`], in the style of a
/// `render::vulkan::buffer`/`texture`/`sync` RAII wrapper layer.
///
/// Construction of the underlying `ash::Device`/`ash::Instance`/physical
/// device selection is out of scope for this crate; callers supply an
/// already-initialized `ash::Device` plus the three queue family indices
/// it was created with.
#[allow(unsafe_code)]
pub mod ash_backend {
    use super::{
        BufferCreateDesc, BufferHandle, CommandBuffer, Extent2D, FramebufferHandle, GpuDevice,
        ImageCreateDesc, ImageHandle, ImageViewCreateDesc, ImageViewHandle,
        ImageMemoryBarrier, BufferMemoryBarrier, QueueFamilyKind, QueueHandle, RenderPassHandle,
        SemaphoreHandle,
    };
    use crate::error::GpuError;
    use ash::vk;
    use ash::vk::Handle;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::fmt;
    use std::rc::Rc;

    struct AllocatedImage {
        image: vk::Image,
        memory: vk::DeviceMemory,
    }

    struct AllocatedBuffer {
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
    }

    /// `RenderPassHandle`/`FramebufferHandle` registration: the caller
    /// constructs these objects (shader/pipeline creation is out of scope),
    /// hands them to [`AshDevice::register_render_pass`]/
    /// [`AshDevice::register_framebuffer`], and attaches the returned opaque
    /// handle to a `RenderPass`/`OnSurfacePass`. [`AshCommandBuffer`] looks
    /// them back up when it begins a render pass.
    #[derive(Default)]
    struct HandleRegistry {
        render_passes: HashMap<u64, vk::RenderPass>,
        framebuffers: HashMap<u64, vk::Framebuffer>,
    }

    /// Owns every image/buffer/view the compiler has realized against a
    /// live `ash::Device`, and frees them on drop (RAII, matching
    /// `render::vulkan::buffer::Buffer`).
    pub struct AshDevice {
        device: ash::Device,
        instance: ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_family: u32,
        compute_family: u32,
        transfer_family: u32,
        graphics_queue: vk::Queue,
        compute_queue: vk::Queue,
        transfer_queue: vk::Queue,
        graphics_pool: Option<vk::CommandPool>,
        compute_pool: Option<vk::CommandPool>,
        transfer_pool: Option<vk::CommandPool>,
        next_id: u64,
        images: HashMap<u64, AllocatedImage>,
        buffers: HashMap<u64, AllocatedBuffer>,
        views: HashMap<u64, vk::ImageView>,
        semaphores: HashMap<u64, vk::Semaphore>,
        handles: Rc<RefCell<HandleRegistry>>,
    }

    impl fmt::Debug for AshDevice {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("AshDevice")
                .field("images", &self.images.len())
                .field("buffers", &self.buffers.len())
                .field("views", &self.views.len())
                .finish()
        }
    }

    impl AshDevice {
        /// Wrap an already-initialized device, its queue family indices, and
        /// the one queue retrieved per family.
        #[allow(clippy::too_many_arguments)]
        pub fn new(
            device: ash::Device,
            instance: ash::Instance,
            physical_device: vk::PhysicalDevice,
            graphics_family: u32,
            compute_family: u32,
            transfer_family: u32,
            graphics_queue: vk::Queue,
            compute_queue: vk::Queue,
            transfer_queue: vk::Queue,
        ) -> Self {
            Self {
                device,
                instance,
                physical_device,
                graphics_family,
                compute_family,
                transfer_family,
                graphics_queue,
                compute_queue,
                transfer_queue,
                graphics_pool: None,
                compute_pool: None,
                transfer_pool: None,
                next_id: 1,
                images: HashMap::new(),
                buffers: HashMap::new(),
                views: HashMap::new(),
                semaphores: HashMap::new(),
                handles: Rc::new(RefCell::new(HandleRegistry::default())),
            }
        }

        /// Register a caller-constructed render pass, returning the opaque
        /// handle a `RenderPass`/`OnSurfacePass` carries.
        pub fn register_render_pass(&mut self, render_pass: vk::RenderPass) -> RenderPassHandle {
            let id = self.fresh_id();
            self.handles.borrow_mut().render_passes.insert(id, render_pass);
            RenderPassHandle(id)
        }

        /// Register a caller-constructed framebuffer, returning the opaque
        /// handle a `RenderPass`/`OnSurfacePass` def carries.
        pub fn register_framebuffer(&mut self, framebuffer: vk::Framebuffer) -> FramebufferHandle {
            let id = self.fresh_id();
            self.handles.borrow_mut().framebuffers.insert(id, framebuffer);
            FramebufferHandle(id)
        }

        fn pool_for(&mut self, family: QueueFamilyKind) -> Result<vk::CommandPool, GpuError> {
            let (slot, family_index) = match family {
                QueueFamilyKind::Graphics => (&mut self.graphics_pool, self.graphics_family),
                QueueFamilyKind::Compute => (&mut self.compute_pool, self.compute_family),
                QueueFamilyKind::Transfer => (&mut self.transfer_pool, self.transfer_family),
            };
            if let Some(pool) = slot {
                return Ok(*pool);
            }
            let create_info = vk::CommandPoolCreateInfo::builder()
                .queue_family_index(family_index)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            let pool = unsafe {
                self.device
                    .create_command_pool(&create_info, None)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?
            };
            *slot = Some(pool);
            Ok(pool)
        }

        fn fresh_id(&mut self) -> u64 {
            let id = self.next_id;
            self.next_id += 1;
            id
        }

        fn find_memory_type(
            &self,
            type_filter: u32,
            properties: vk::MemoryPropertyFlags,
        ) -> Result<u32, GpuError> {
            let mem_properties = unsafe {
                self.instance
                    .get_physical_device_memory_properties(self.physical_device)
            };
            for i in 0..mem_properties.memory_type_count {
                if (type_filter & (1 << i)) != 0
                    && (mem_properties.memory_types[i as usize].property_flags & properties)
                        == properties
                {
                    return Ok(i);
                }
            }
            Err(GpuError::NoSuitableMemoryType)
        }

        fn image_view_type(vt: super::ViewType) -> vk::ImageViewType {
            match vt {
                super::ViewType::D1 => vk::ImageViewType::TYPE_1D,
                super::ViewType::D1Array => vk::ImageViewType::TYPE_1D_ARRAY,
                super::ViewType::D2 => vk::ImageViewType::TYPE_2D,
                super::ViewType::D2Array => vk::ImageViewType::TYPE_2D_ARRAY,
                super::ViewType::D3 => vk::ImageViewType::TYPE_3D,
                super::ViewType::Cube => vk::ImageViewType::CUBE,
                super::ViewType::CubeArray => vk::ImageViewType::CUBE_ARRAY,
            }
        }

        fn image_type(shape: super::ImageShape) -> vk::ImageType {
            match shape {
                super::ImageShape::D1 => vk::ImageType::TYPE_1D,
                super::ImageShape::D2 | super::ImageShape::Cube => vk::ImageType::TYPE_2D,
                super::ImageShape::D3 => vk::ImageType::TYPE_3D,
            }
        }

        fn aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
            match format {
                vk::Format::D16_UNORM
                | vk::Format::D32_SFLOAT
                | vk::Format::X8_D24_UNORM_PACK32 => vk::ImageAspectFlags::DEPTH,
                vk::Format::D16_UNORM_S8_UINT
                | vk::Format::D24_UNORM_S8_UINT
                | vk::Format::D32_SFLOAT_S8_UINT => {
                    vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
                }
                _ => vk::ImageAspectFlags::COLOR,
            }
        }
    }

    impl GpuDevice for AshDevice {
        fn create_image(&mut self, desc: &ImageCreateDesc) -> Result<ImageHandle, GpuError> {
            let flags = if desc.shape == super::ImageShape::Cube {
                vk::ImageCreateFlags::CUBE_COMPATIBLE
            } else {
                vk::ImageCreateFlags::empty()
            };

            let create_info = vk::ImageCreateInfo::builder()
                .flags(flags)
                .image_type(Self::image_type(desc.shape))
                .format(desc.format)
                .extent(vk::Extent3D {
                    width: desc.extent.width,
                    height: desc.extent.height,
                    depth: desc.extent.depth,
                })
                .mip_levels(1)
                .array_layers(desc.layers)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(desc.usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);

            let image = unsafe {
                self.device
                    .create_image(&create_info, None)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?
            };

            let requirements = unsafe { self.device.get_image_memory_requirements(image) };
            let memory_type = self.find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;
            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type);
            let memory = unsafe {
                self.device
                    .allocate_memory(&alloc_info, None)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?
            };
            unsafe {
                self.device
                    .bind_image_memory(image, memory, 0)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?;
            }

            let id = ash::vk::Handle::as_raw(image);
            self.images.insert(id, AllocatedImage { image, memory });
            Ok(ImageHandle(id))
        }

        fn create_image_view(
            &mut self,
            image: ImageHandle,
            desc: &ImageViewCreateDesc,
        ) -> Result<ImageViewHandle, GpuError> {
            let allocated = self
                .images
                .get(&image.0)
                .ok_or_else(|| GpuError::Api("unknown image handle".into()))?;

            let create_info = vk::ImageViewCreateInfo::builder()
                .image(allocated.image)
                .view_type(Self::image_view_type(desc.view_type))
                .format(desc.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: Self::aspect_mask(desc.format),
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: desc.base_layer,
                    layer_count: desc.layer_count,
                });

            let view = unsafe {
                self.device
                    .create_image_view(&create_info, None)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?
            };

            let id = ash::vk::Handle::as_raw(view);
            self.views.insert(id, view);
            Ok(ImageViewHandle(id))
        }

        fn create_buffer(&mut self, desc: &BufferCreateDesc) -> Result<BufferHandle, GpuError> {
            let create_info = vk::BufferCreateInfo::builder()
                .size(desc.size)
                .usage(desc.usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = unsafe {
                self.device
                    .create_buffer(&create_info, None)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?
            };

            let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
            let memory_type = self.find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;
            let alloc_info = vk::MemoryAllocateInfo::builder()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type);
            let memory = unsafe {
                self.device
                    .allocate_memory(&alloc_info, None)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?
            };
            unsafe {
                self.device
                    .bind_buffer_memory(buffer, memory, 0)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?;
            }

            let id = ash::vk::Handle::as_raw(buffer);
            self.buffers.insert(id, AllocatedBuffer { buffer, memory });
            Ok(BufferHandle(id))
        }

        fn queue_family(&self, kind: QueueFamilyKind) -> u32 {
            match kind {
                QueueFamilyKind::Graphics => self.graphics_family,
                QueueFamilyKind::Compute => self.compute_family,
                QueueFamilyKind::Transfer => self.transfer_family,
            }
        }

        fn queue(&self, kind: QueueFamilyKind) -> QueueHandle {
            // ash::vk::Queue wraps a raw, non-null dispatchable handle; its
            // bit pattern is a stable enough identity for the opaque handle
            // threaded through `Command::Execute`.
            let queue = match kind {
                QueueFamilyKind::Graphics => self.graphics_queue,
                QueueFamilyKind::Compute => self.compute_queue,
                QueueFamilyKind::Transfer => self.transfer_queue,
            };
            QueueHandle(ash::vk::Handle::as_raw(queue))
        }

        fn create_command_buffer(
            &mut self,
            family: QueueFamilyKind,
        ) -> Result<Box<dyn CommandBuffer>, GpuError> {
            let pool = self.pool_for(family)?;
            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let buffers = unsafe {
                self.device
                    .allocate_command_buffers(&alloc_info)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?
            };
            Ok(Box::new(AshCommandBuffer {
                device: self.device.clone(),
                command_buffer: buffers[0],
                handles: Rc::clone(&self.handles),
            }))
        }

        fn create_semaphore(&mut self) -> Result<SemaphoreHandle, GpuError> {
            let create_info = vk::SemaphoreCreateInfo::builder();
            let semaphore = unsafe {
                self.device
                    .create_semaphore(&create_info, None)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?
            };
            let id = self.fresh_id();
            self.semaphores.insert(id, semaphore);
            Ok(SemaphoreHandle(id))
        }

        fn transition_images_and_wait(
            &mut self,
            family: QueueFamilyKind,
            image_barriers: &[ImageMemoryBarrier],
        ) -> Result<(), GpuError> {
            let pool = self.pool_for(family)?;
            let alloc_info = vk::CommandBufferAllocateInfo::builder()
                .command_pool(pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let buffers = unsafe {
                self.device
                    .allocate_command_buffers(&alloc_info)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?
            };
            let command_buffer = buffers[0];

            let barriers: Vec<_> = image_barriers
                .iter()
                .map(|b| {
                    vk::ImageMemoryBarrier::builder()
                        .old_layout(b.old_layout)
                        .new_layout(b.new_layout)
                        .src_access_mask(b.src_access_mask)
                        .dst_access_mask(b.dst_access_mask)
                        .src_queue_family_index(b.src_queue_family)
                        .dst_queue_family_index(b.dst_queue_family)
                        .image(vk::Image::from_raw(b.image.0))
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            base_mip_level: 0,
                            level_count: 1,
                            base_array_layer: b.base_layer,
                            layer_count: b.layer_count,
                        })
                        .build()
                })
                .collect();

            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe {
                self.device
                    .begin_command_buffer(command_buffer, &begin_info)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?;
                self.device.cmd_pipeline_barrier(
                    command_buffer,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &barriers,
                );
                self.device
                    .end_command_buffer(command_buffer)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?;
            }

            let queue = match family {
                QueueFamilyKind::Graphics => self.graphics_queue,
                QueueFamilyKind::Compute => self.compute_queue,
                QueueFamilyKind::Transfer => self.transfer_queue,
            };
            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            let fence_info = vk::FenceCreateInfo::builder();
            let fence = unsafe {
                self.device
                    .create_fence(&fence_info, None)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?
            };
            unsafe {
                self.device
                    .queue_submit(queue, &[submit_info.build()], fence)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?;
                self.device
                    .wait_for_fences(&[fence], true, u64::MAX)
                    .map_err(|e| GpuError::Api(format!("{e:?}")))?;
                self.device.destroy_fence(fence, None);
                self.device.free_command_buffers(pool, &command_buffers);
            }

            Ok(())
        }
    }

    impl Drop for AshDevice {
        fn drop(&mut self) {
            unsafe {
                for view in self.views.values() {
                    self.device.destroy_image_view(*view, None);
                }
                for image in self.images.values() {
                    self.device.destroy_image(image.image, None);
                    self.device.free_memory(image.memory, None);
                }
                for buffer in self.buffers.values() {
                    self.device.destroy_buffer(buffer.buffer, None);
                    self.device.free_memory(buffer.memory, None);
                }
                for semaphore in self.semaphores.values() {
                    self.device.destroy_semaphore(*semaphore, None);
                }
                for pool in [self.graphics_pool, self.compute_pool, self.transfer_pool]
                    .into_iter()
                    .flatten()
                {
                    self.device.destroy_command_pool(pool, None);
                }
            }
        }
    }

    /// A real command buffer, recording into a pool owned by [`AshDevice`].
    /// Render pass/framebuffer handles are resolved against the device's
    /// shared [`HandleRegistry`] at `begin_render_pass` time.
    struct AshCommandBuffer {
        device: ash::Device,
        command_buffer: vk::CommandBuffer,
        handles: Rc<RefCell<HandleRegistry>>,
    }

    impl fmt::Debug for AshCommandBuffer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("AshCommandBuffer").finish()
        }
    }

    fn access_mask_to_stage(access: vk::AccessFlags) -> vk::PipelineStageFlags {
        // SyncPasses always barrier ALL_COMMANDS -> ALL_COMMANDS; the
        // access masks carried on each barrier are what actually scope it.
        let _ = access;
        vk::PipelineStageFlags::ALL_COMMANDS
    }

    impl CommandBuffer for AshCommandBuffer {
        fn begin(&mut self) {
            let begin_info = vk::CommandBufferBeginInfo::builder();
            unsafe {
                self.device
                    .begin_command_buffer(self.command_buffer, &begin_info)
                    .expect("vkBeginCommandBuffer failed");
            }
        }

        fn end(&mut self) {
            unsafe {
                self.device
                    .end_command_buffer(self.command_buffer)
                    .expect("vkEndCommandBuffer failed");
            }
        }

        fn begin_render_pass(
            &mut self,
            render_pass: RenderPassHandle,
            framebuffer: FramebufferHandle,
            render_area: Extent2D,
        ) {
            let handles = self.handles.borrow();
            let render_pass = *handles
                .render_passes
                .get(&render_pass.0)
                .expect("render pass handle was never registered");
            let framebuffer = *handles
                .framebuffers
                .get(&framebuffer.0)
                .expect("framebuffer handle was never registered");
            drop(handles);

            let begin_info = vk::RenderPassBeginInfo::builder()
                .render_pass(render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: vk::Extent2D {
                        width: render_area.width,
                        height: render_area.height,
                    },
                });
            unsafe {
                self.device.cmd_begin_render_pass(
                    self.command_buffer,
                    &begin_info,
                    vk::SubpassContents::INLINE,
                );
            }
        }

        fn end_render_pass(&mut self) {
            unsafe {
                self.device.cmd_end_render_pass(self.command_buffer);
            }
        }

        fn pipeline_barrier(
            &mut self,
            image_barriers: &[ImageMemoryBarrier],
            buffer_barriers: &[BufferMemoryBarrier],
        ) {
            let images: Vec<_> = image_barriers
                .iter()
                .map(|b| {
                    vk::ImageMemoryBarrier::builder()
                        .old_layout(b.old_layout)
                        .new_layout(b.new_layout)
                        .src_access_mask(b.src_access_mask)
                        .dst_access_mask(b.dst_access_mask)
                        .src_queue_family_index(b.src_queue_family)
                        .dst_queue_family_index(b.dst_queue_family)
                        .image(vk::Image::from_raw(b.image.0))
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            base_mip_level: 0,
                            level_count: 1,
                            base_array_layer: b.base_layer,
                            layer_count: b.layer_count,
                        })
                        .build()
                })
                .collect();
            let buffers: Vec<_> = buffer_barriers
                .iter()
                .map(|b| {
                    vk::BufferMemoryBarrier::builder()
                        .src_access_mask(b.src_access_mask)
                        .dst_access_mask(b.dst_access_mask)
                        .src_queue_family_index(b.src_queue_family)
                        .dst_queue_family_index(b.dst_queue_family)
                        .buffer(vk::Buffer::from_raw(b.buffer.0))
                        .offset(b.offset)
                        .size(b.size)
                        .build()
                })
                .collect();

            let src_stage = image_barriers
                .iter()
                .map(|b| access_mask_to_stage(b.src_access_mask))
                .chain(buffer_barriers.iter().map(|b| access_mask_to_stage(b.src_access_mask)))
                .next()
                .unwrap_or(vk::PipelineStageFlags::ALL_COMMANDS);

            unsafe {
                self.device.cmd_pipeline_barrier(
                    self.command_buffer,
                    src_stage,
                    vk::PipelineStageFlags::ALL_COMMANDS,
                    vk::DependencyFlags::empty(),
                    &[],
                    &buffers,
                    &images,
                );
            }
        }
    }
}

/// A fake [`GpuDevice`]/[`CommandBuffer`] used by this crate's tests and
/// by callers who want to unit test render graphs without a GPU. It
/// hands out unique handles and records what it was asked to do; it
/// allocates no real memory.
pub mod testing {
    use super::{
        BufferCreateDesc, BufferHandle, BufferMemoryBarrier, CommandBuffer, Extent2D,
        FramebufferHandle, GpuDevice, ImageCreateDesc, ImageHandle, ImageMemoryBarrier,
        ImageViewCreateDesc, ImageViewHandle, QueueFamilyKind, QueueHandle, RenderPassHandle,
        SemaphoreHandle,
    };
    use crate::error::GpuError;

    /// Graphics/compute/transfer family indices a [`FakeDevice`] reports.
    /// Graphics and compute share a family, the common "universal queue"
    /// topology on real hardware; transfer gets its own dedicated family,
    /// so only a transfer/compute or transfer/graphics edge needs a real
    /// queue family ownership transfer.
    pub const GRAPHICS_FAMILY: u32 = 0;
    /// See [`GRAPHICS_FAMILY`].
    pub const COMPUTE_FAMILY: u32 = 0;
    /// See [`GRAPHICS_FAMILY`].
    pub const TRANSFER_FAMILY: u32 = 1;

    /// Queue handles a [`FakeDevice`] reports, one per family.
    pub const GRAPHICS_QUEUE: QueueHandle = QueueHandle(100);
    /// See [`GRAPHICS_QUEUE`].
    pub const COMPUTE_QUEUE: QueueHandle = QueueHandle(101);
    /// See [`GRAPHICS_QUEUE`].
    pub const TRANSFER_QUEUE: QueueHandle = QueueHandle(102);

    /// In-process bookkeeping [`GpuDevice`]. Every `create_*` call just
    /// hands out the next id; nothing is actually allocated.
    #[derive(Debug, Default)]
    pub struct FakeDevice {
        next_id: u64,
        pub(crate) images_created: Vec<ImageCreateDesc>,
        pub(crate) views_created: Vec<(ImageHandle, ImageViewCreateDesc)>,
        pub(crate) buffers_created: Vec<BufferCreateDesc>,
        /// Queue family each allocated command buffer was requested on, in order.
        pub(crate) command_buffers_created: Vec<QueueFamilyKind>,
        pub(crate) semaphores_created: u32,
        /// `(family, barrier count)` for every `transition_images_and_wait` call.
        pub(crate) transitions_recorded: Vec<(QueueFamilyKind, usize)>,
    }

    impl FakeDevice {
        /// Construct an empty fake device.
        pub fn new() -> Self {
            Self::default()
        }

        fn fresh_id(&mut self) -> u64 {
            self.next_id += 1;
            self.next_id
        }

        /// Number of distinct images realized so far.
        pub fn image_count(&self) -> usize {
            self.images_created.len()
        }

        /// Number of distinct views realized so far.
        pub fn view_count(&self) -> usize {
            self.views_created.len()
        }

        /// Number of distinct buffers realized so far.
        pub fn buffer_count(&self) -> usize {
            self.buffers_created.len()
        }
    }

    impl GpuDevice for FakeDevice {
        fn create_image(&mut self, desc: &ImageCreateDesc) -> Result<ImageHandle, GpuError> {
            let id = self.fresh_id();
            self.images_created.push(desc.clone());
            Ok(ImageHandle(id))
        }

        fn create_image_view(
            &mut self,
            image: ImageHandle,
            desc: &ImageViewCreateDesc,
        ) -> Result<ImageViewHandle, GpuError> {
            let id = self.fresh_id();
            self.views_created.push((image, desc.clone()));
            Ok(ImageViewHandle(id))
        }

        fn create_buffer(&mut self, desc: &BufferCreateDesc) -> Result<BufferHandle, GpuError> {
            let id = self.fresh_id();
            self.buffers_created.push(desc.clone());
            Ok(BufferHandle(id))
        }

        fn queue_family(&self, kind: QueueFamilyKind) -> u32 {
            match kind {
                QueueFamilyKind::Graphics => GRAPHICS_FAMILY,
                QueueFamilyKind::Compute => COMPUTE_FAMILY,
                QueueFamilyKind::Transfer => TRANSFER_FAMILY,
            }
        }

        fn queue(&self, kind: QueueFamilyKind) -> QueueHandle {
            match kind {
                QueueFamilyKind::Graphics => GRAPHICS_QUEUE,
                QueueFamilyKind::Compute => COMPUTE_QUEUE,
                QueueFamilyKind::Transfer => TRANSFER_QUEUE,
            }
        }

        fn create_command_buffer(
            &mut self,
            family: QueueFamilyKind,
        ) -> Result<Box<dyn CommandBuffer>, GpuError> {
            self.command_buffers_created.push(family);
            Ok(Box::new(FakeCommandBuffer::new()))
        }

        fn create_semaphore(&mut self) -> Result<SemaphoreHandle, GpuError> {
            self.semaphores_created += 1;
            Ok(SemaphoreHandle(u64::from(self.semaphores_created)))
        }

        fn transition_images_and_wait(
            &mut self,
            family: QueueFamilyKind,
            image_barriers: &[ImageMemoryBarrier],
        ) -> Result<(), GpuError> {
            self.transitions_recorded.push((family, image_barriers.len()));
            Ok(())
        }
    }

    /// A [`CommandBuffer`] that records what it was told to do, for
    /// assertions in tests.
    #[derive(Debug, Default)]
    pub struct FakeCommandBuffer {
        /// Whether `begin` was called more recently than `end`.
        pub recording: bool,
        /// `(render_pass, framebuffer)` pairs begun, in order.
        pub render_passes_begun: Vec<(RenderPassHandle, FramebufferHandle, Extent2D)>,
        /// Number of `end_render_pass` calls.
        pub render_passes_ended: u32,
        /// Every barrier call, as `(image_barriers, buffer_barriers)` lengths.
        pub barriers: Vec<(usize, usize)>,
    }

    impl FakeCommandBuffer {
        /// Construct an idle fake command buffer.
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl CommandBuffer for FakeCommandBuffer {
        fn begin(&mut self) {
            self.recording = true;
        }

        fn end(&mut self) {
            self.recording = false;
        }

        fn begin_render_pass(
            &mut self,
            render_pass: RenderPassHandle,
            framebuffer: FramebufferHandle,
            render_area: Extent2D,
        ) {
            self.render_passes_begun
                .push((render_pass, framebuffer, render_area));
        }

        fn end_render_pass(&mut self) {
            self.render_passes_ended += 1;
        }

        fn pipeline_barrier(
            &mut self,
            image_barriers: &[ImageMemoryBarrier],
            buffer_barriers: &[BufferMemoryBarrier],
        ) {
            self.barriers
                .push((image_barriers.len(), buffer_barriers.len()));
        }
    }
}
