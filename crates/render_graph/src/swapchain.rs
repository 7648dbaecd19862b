//! SwapChain binding: exposes the windowing layer's presentable images
//! as the on-surface pass's color attachment, and owns the one depth
//! buffer a frame's final render pass typically wants.
//!
//! The underlying window/surface layer and physical-device selection
//! are out of scope for this crate, so [`SurfaceBackend`] stands in for
//! the windowing layer exactly as [`crate::gpu::GpuDevice`] stands in
//! for the device: a trait naming the handful of queries and calls this
//! module needs, with no shipped real implementation (only
//! [`testing::FakeSurface`]).

use std::fmt;

use ash::vk;

use crate::error::GpuError;
use crate::gpu::{
    Extent2D, GpuDevice, ImageHandle, ImageMemoryBarrier, ImageViewCreateDesc, ImageViewHandle,
    QueueFamilyKind, SemaphoreHandle, ViewType,
};

/// Opaque handle to a windowing-layer swapchain object, scoped to the
/// [`SurfaceBackend`] that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapchainHandle(pub u64);

/// Parameters [`SurfaceBackend::create_swapchain`] needs: the surface's
/// current extent, how many images to request, and the present
/// mode/composite alpha [`SwapChain::create`] has already chosen.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainCreateDesc {
    /// Requested presentable image count.
    pub image_count: u32,
    /// Pixel format of the presentable images.
    pub format: vk::Format,
    /// Extent of the presentable images (the surface's current extent).
    pub extent: Extent2D,
    /// Chosen present mode.
    pub present_mode: vk::PresentModeKHR,
    /// Chosen composite alpha flag.
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

/// The external windowing/surface/physical-device collaborator this
/// module programs against. Not implemented against a real window
/// system by this crate; callers supply their own backend.
pub trait SurfaceBackend: fmt::Debug {
    /// Present modes the surface supports, in driver-reported order.
    fn available_present_modes(&self) -> Vec<vk::PresentModeKHR>;
    /// Composite alpha flags the surface supports.
    fn supported_composite_alpha(&self) -> vk::CompositeAlphaFlagsKHR;
    /// The surface's current extent (e.g. the window's framebuffer size).
    fn current_extent(&self) -> Extent2D;
    /// The surface's preferred presentable pixel format.
    fn preferred_format(&self) -> vk::Format;

    /// Create (or recreate) the windowing-layer swapchain object.
    fn create_swapchain(&mut self, desc: &SwapchainCreateDesc) -> Result<SwapchainHandle, GpuError>;
    /// Tear down a previously created swapchain.
    fn destroy_swapchain(&mut self, handle: SwapchainHandle);
    /// The presentable images backing `handle`, in presentation-index order.
    fn swapchain_images(&self, handle: SwapchainHandle) -> Vec<ImageHandle>;
    /// Acquire the next presentable image, signaling `semaphore` once it
    /// is ready. Returns `(image index, suboptimal)`; `suboptimal = true`
    /// (or an out-of-date error, surfaced as [`GpuError`]) tells the
    /// caller to call [`SwapChain::recreate`].
    fn acquire_next_image(
        &mut self,
        handle: SwapchainHandle,
        semaphore: SemaphoreHandle,
    ) -> Result<(u32, bool), GpuError>;
}

/// Preferred present mode / depth buffer / image count a caller wants.
#[derive(Debug, Clone, Copy)]
pub struct SwapChainCreateInfo {
    /// Requested presentable image count (a lower bound; the surface may
    /// require more).
    pub image_count: u32,
    /// Whether [`SwapChain::create`] also allocates a depth image/view
    /// sized to the surface's current extent.
    pub create_depth_buffer: bool,
    /// Depth format to request when `create_depth_buffer` is set.
    pub depth_format: vk::Format,
}

/// The realized swapchain: presentable color views, an optional depth
/// view, the chosen present mode/composite alpha, and the acquire
/// semaphore `acquire_next_image` signals.
pub struct SwapChain {
    handle: SwapchainHandle,
    info: SwapChainCreateInfo,
    format: vk::Format,
    extent: Extent2D,
    present_mode: vk::PresentModeKHR,
    composite_alpha: vk::CompositeAlphaFlagsKHR,
    color_images: Vec<ImageHandle>,
    color_views: Vec<ImageViewHandle>,
    depth_image: Option<ImageHandle>,
    depth_view: Option<ImageViewHandle>,
    acquire_semaphore: SemaphoreHandle,
}

impl fmt::Debug for SwapChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapChain")
            .field("images", &self.color_images.len())
            .field("has_depth", &self.depth_view.is_some())
            .field("present_mode", &self.present_mode)
            .finish()
    }
}

/// Prefer `MAILBOX`, else `IMMEDIATE`, else `FIFO`.
fn choose_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else if available.contains(&vk::PresentModeKHR::IMMEDIATE) {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// First supported of opaque/pre-multiplied/post-multiplied/inherit.
fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    const CANDIDATES: [vk::CompositeAlphaFlagsKHR; 4] = [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ];
    CANDIDATES
        .into_iter()
        .find(|&flag| supported.contains(flag))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

impl SwapChain {
    /// Create a swapchain against `surface`, choosing present mode and
    /// composite alpha, optionally allocating a depth image/view, and
    /// transitioning every color image to `PRESENT_SRC_KHR` once via
    /// [`GpuDevice::transition_images_and_wait`].
    pub fn create(
        device: &mut dyn GpuDevice,
        surface: &mut dyn SurfaceBackend,
        info: SwapChainCreateInfo,
    ) -> Result<Self, GpuError> {
        let extent = surface.current_extent();
        let format = surface.preferred_format();
        let present_mode = choose_present_mode(&surface.available_present_modes());
        let composite_alpha = choose_composite_alpha(surface.supported_composite_alpha());

        let handle = surface.create_swapchain(&SwapchainCreateDesc {
            image_count: info.image_count,
            format,
            extent,
            present_mode,
            composite_alpha,
        })?;

        let color_images = surface.swapchain_images(handle);
        let mut color_views = Vec::with_capacity(color_images.len());
        for &image in &color_images {
            let view = device.create_image_view(
                image,
                &ImageViewCreateDesc {
                    view_type: ViewType::D2,
                    format,
                    base_layer: 0,
                    layer_count: 1,
                },
            )?;
            color_views.push(view);
        }

        let mut barriers: Vec<ImageMemoryBarrier> = color_images
            .iter()
            .map(|&image| ImageMemoryBarrier {
                image,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                src_access_mask: vk::AccessFlags::empty(),
                dst_access_mask: vk::AccessFlags::MEMORY_READ,
                src_queue_family: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
                base_layer: 0,
                layer_count: 1,
            })
            .collect();

        let (depth_image, depth_view) = if info.create_depth_buffer {
            let image = device.create_image(&crate::gpu::ImageCreateDesc {
                shape: crate::gpu::ImageShape::D2,
                format: info.depth_format,
                extent: crate::gpu::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
                layers: 1,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            })?;
            let view = device.create_image_view(
                image,
                &ImageViewCreateDesc {
                    view_type: ViewType::D2,
                    format: info.depth_format,
                    base_layer: 0,
                    layer_count: 1,
                },
            )?;
            barriers.push(ImageMemoryBarrier {
                image,
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                src_access_mask: vk::AccessFlags::empty(),
                dst_access_mask: vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
                src_queue_family: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family: vk::QUEUE_FAMILY_IGNORED,
                base_layer: 0,
                layer_count: 1,
            });
            (Some(image), Some(view))
        } else {
            (None, None)
        };

        device.transition_images_and_wait(QueueFamilyKind::Graphics, &barriers)?;

        let acquire_semaphore = device.create_semaphore()?;

        Ok(Self {
            handle,
            info,
            format,
            extent,
            present_mode,
            composite_alpha,
            color_images,
            color_views,
            depth_image,
            depth_view,
            acquire_semaphore,
        })
    }

    /// The color attachments the `OnSurfacePass` presents, in presentation order.
    pub fn attachments(&self) -> &[ImageViewHandle] {
        &self.color_views
    }

    /// The realized depth view, if [`SwapChainCreateInfo::create_depth_buffer`] was set.
    pub fn depth_attachment(&self) -> Option<ImageViewHandle> {
        self.depth_view
    }

    /// `true` if a depth buffer was realized.
    pub fn has_depth_attachment(&self) -> bool {
        self.depth_view.is_some()
    }

    /// The present mode chosen at creation.
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// The composite alpha flag chosen at creation.
    pub fn composite_alpha(&self) -> vk::CompositeAlphaFlagsKHR {
        self.composite_alpha
    }

    /// Presentable pixel format.
    pub fn pixel_format(&self) -> vk::Format {
        self.format
    }

    /// Current surface extent this swapchain was built against.
    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    /// The semaphore `acquire_next_image` signals.
    pub fn acquire_semaphore(&self) -> SemaphoreHandle {
        self.acquire_semaphore
    }

    /// Acquire the next presentable image, binding [`Self::acquire_semaphore`].
    pub fn acquire_next_image(
        &mut self,
        surface: &mut dyn SurfaceBackend,
    ) -> Result<(u32, bool), GpuError> {
        surface.acquire_next_image(self.handle, self.acquire_semaphore)
    }

    /// Tear down the current swapchain (and depth resources) and rebuild
    /// it with the same creation parameters against the same surface;
    /// call on out-of-date/suboptimal acquire results or window resize.
    pub fn recreate(
        &mut self,
        device: &mut dyn GpuDevice,
        surface: &mut dyn SurfaceBackend,
    ) -> Result<(), GpuError> {
        surface.destroy_swapchain(self.handle);
        let rebuilt = Self::create(device, surface, self.info)?;
        *self = rebuilt;
        Ok(())
    }
}

/// A fake [`SurfaceBackend`], used by this crate's own tests and by
/// callers who want to unit test swapchain-dependent graphs without a
/// window system.
pub mod testing {
    use super::{SurfaceBackend, SwapchainCreateDesc, SwapchainHandle};
    use crate::error::GpuError;
    use crate::gpu::{Extent2D, ImageHandle, SemaphoreHandle};
    use ash::vk;

    /// An in-process [`SurfaceBackend`] reporting a fixed set of
    /// capabilities and a fixed image count, with no real window behind it.
    #[derive(Debug)]
    pub struct FakeSurface {
        present_modes: Vec<vk::PresentModeKHR>,
        composite_alpha: vk::CompositeAlphaFlagsKHR,
        extent: Extent2D,
        format: vk::Format,
        image_count: u32,
        next_id: u64,
        next_image_id: u64,
        acquire_cursor: u32,
    }

    impl FakeSurface {
        /// Construct a fake surface supporting every present mode and
        /// composite alpha flag, at the given extent/format/image count.
        pub fn new(extent: Extent2D, format: vk::Format, image_count: u32) -> Self {
            Self {
                present_modes: vec![
                    vk::PresentModeKHR::FIFO,
                    vk::PresentModeKHR::MAILBOX,
                    vk::PresentModeKHR::IMMEDIATE,
                ],
                composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE
                    | vk::CompositeAlphaFlagsKHR::INHERIT,
                extent,
                format,
                image_count,
                next_id: 1,
                next_image_id: 1,
                acquire_cursor: 0,
            }
        }

        /// Restrict the reported present modes (e.g. to exercise the
        /// `FIFO`-only fallback).
        pub fn with_present_modes(mut self, modes: Vec<vk::PresentModeKHR>) -> Self {
            self.present_modes = modes;
            self
        }
    }

    impl SurfaceBackend for FakeSurface {
        fn available_present_modes(&self) -> Vec<vk::PresentModeKHR> {
            self.present_modes.clone()
        }

        fn supported_composite_alpha(&self) -> vk::CompositeAlphaFlagsKHR {
            self.composite_alpha
        }

        fn current_extent(&self) -> Extent2D {
            self.extent
        }

        fn preferred_format(&self) -> vk::Format {
            self.format
        }

        fn create_swapchain(
            &mut self,
            _desc: &SwapchainCreateDesc,
        ) -> Result<SwapchainHandle, GpuError> {
            let id = self.next_id;
            self.next_id += 1;
            Ok(SwapchainHandle(id))
        }

        fn destroy_swapchain(&mut self, _handle: SwapchainHandle) {}

        fn swapchain_images(&self, _handle: SwapchainHandle) -> Vec<ImageHandle> {
            (0..self.image_count)
                .map(|i| ImageHandle(1000 + u64::from(i)))
                .collect()
        }

        fn acquire_next_image(
            &mut self,
            _handle: SwapchainHandle,
            _semaphore: SemaphoreHandle,
        ) -> Result<(u32, bool), GpuError> {
            let index = self.acquire_cursor % self.image_count.max(1);
            self.acquire_cursor += 1;
            let _ = self.next_image_id;
            Ok((index, false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::testing::FakeDevice;
    use crate::swapchain::testing::FakeSurface;

    fn extent() -> Extent2D {
        Extent2D { width: 800, height: 600 }
    }

    #[test]
    fn prefers_mailbox_present_mode() {
        let mut device = FakeDevice::new();
        let mut surface = FakeSurface::new(extent(), vk::Format::B8G8R8A8_SRGB, 3);
        let swapchain = SwapChain::create(
            &mut device,
            &mut surface,
            SwapChainCreateInfo {
                image_count: 3,
                create_depth_buffer: false,
                depth_format: vk::Format::UNDEFINED,
            },
        )
        .unwrap();
        assert_eq!(swapchain.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(swapchain.attachments().len(), 3);
        assert!(!swapchain.has_depth_attachment());
    }

    #[test]
    fn falls_back_to_fifo_when_only_fifo_is_available() {
        let mut device = FakeDevice::new();
        let mut surface = FakeSurface::new(extent(), vk::Format::B8G8R8A8_SRGB, 2)
            .with_present_modes(vec![vk::PresentModeKHR::FIFO]);
        let swapchain = SwapChain::create(
            &mut device,
            &mut surface,
            SwapChainCreateInfo {
                image_count: 2,
                create_depth_buffer: false,
                depth_format: vk::Format::UNDEFINED,
            },
        )
        .unwrap();
        assert_eq!(swapchain.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn optional_depth_buffer_is_realized() {
        let mut device = FakeDevice::new();
        let mut surface = FakeSurface::new(extent(), vk::Format::B8G8R8A8_SRGB, 2);
        let swapchain = SwapChain::create(
            &mut device,
            &mut surface,
            SwapChainCreateInfo {
                image_count: 2,
                create_depth_buffer: true,
                depth_format: vk::Format::D32_SFLOAT,
            },
        )
        .unwrap();
        assert!(swapchain.has_depth_attachment());
        assert!(swapchain.depth_attachment().is_some());
    }

    #[test]
    fn recreate_rebuilds_against_the_same_surface() {
        let mut device = FakeDevice::new();
        let mut surface = FakeSurface::new(extent(), vk::Format::B8G8R8A8_SRGB, 2);
        let mut swapchain = SwapChain::create(
            &mut device,
            &mut surface,
            SwapChainCreateInfo {
                image_count: 2,
                create_depth_buffer: false,
                depth_format: vk::Format::UNDEFINED,
            },
        )
        .unwrap();
        swapchain.recreate(&mut device, &mut surface).unwrap();
        assert_eq!(swapchain.attachments().len(), 2);
    }
}
