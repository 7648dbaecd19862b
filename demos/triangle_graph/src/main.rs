//! Smallest possible render graph: one `OnSurfacePass` that clears the
//! swapchain image and presents it.
//!
//! There is no real window system wired up here — windowing/surface
//! selection is out of scope for `render_graph` itself (see its crate
//! docs) — so this demo drives the library against the fake GPU/surface
//! backends it ships for testing, the same way a caller would exercise
//! their own graph construction code before wiring a real `ash::Device`
//! and window through [`render_graph::gpu::ash_backend::AshDevice`] /
//! a real [`render_graph::swapchain::SurfaceBackend`].

use ash::vk;
use render_graph::gpu::testing::FakeDevice;
use render_graph::gpu::{Extent2D, FramebufferHandle, RenderPassHandle};
use render_graph::pass::RenderTarget;
use render_graph::prelude::*;
use render_graph::swapchain::testing::FakeSurface;
use render_graph::swapchain::{SwapChain, SwapChainCreateInfo};

fn main() {
    render_graph::logging::init();

    let mut device = FakeDevice::new();
    let mut surface = FakeSurface::new(
        Extent2D { width: 1280, height: 720 },
        vk::Format::B8G8R8A8_SRGB,
        3,
    );

    let swapchain = SwapChain::create(
        &mut device,
        &mut surface,
        SwapChainCreateInfo {
            image_count: 3,
            create_depth_buffer: false,
            depth_format: vk::Format::UNDEFINED,
        },
    )
    .expect("swapchain creation failed");
    log::info!(
        "created swapchain: {} images, present mode {:?}",
        swapchain.attachments().len(),
        swapchain.present_mode()
    );

    let mut graph = RenderGraph::new();
    let surface_attachment = graph.create_surface_attachment(
        "swapchain",
        swapchain.pixel_format(),
        render_graph::gpu::Extent3D { width: 1280, height: 720, depth: 1 },
    );

    // Render pass/framebuffer construction is out of scope for this crate
    // (the caller owns shader/pipeline/render-pass creation); stand in with
    // placeholder handles, as a real caller would plug in their own.
    let render_target = RenderTarget {
        render_pass: RenderPassHandle(1),
        framebuffer: FramebufferHandle(1),
        render_area: Extent2D { width: 1280, height: 720 },
    };

    graph.add_pass(
        Pass::new("present_triangle", PassKind::OnSurface { surface: surface_attachment })
            .with_render_target(render_target)
            .with_body(|ctx| {
                // A real pass would bind the triangle pipeline and issue a
                // single `vkCmdDraw(3, 1, 0, 0)` here; recording into
                // arbitrary pipeline/descriptor state is out of scope.
                let _ = ctx.render_pass;
            }),
    );

    let config = GraphCompileConfig {
        emit_debug_dump: true,
        barrier_log_level: render_graph::config::BarrierLogLevel::Quiet,
    };
    let dump = graph
        .compile(&mut device, &config)
        .expect("compile failed")
        .expect("debug dump was requested");
    println!("{dump}");

    let commands = graph
        .record(&mut device, Some((0, swapchain.acquire_semaphore())))
        .expect("record failed");
    log::info!("recorded {} command(s) for this frame", commands.len());
}
