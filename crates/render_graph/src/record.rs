//! Per-frame recording: walk the finalized batch list and emit a command
//! stream an external executor submits/presents.
//!
//! A recording pass only ever needs to look up the view/buffer its own
//! defs/uses were realized to, so [`FrameContext`] hands it a narrow
//! `&RealizedResources` borrow rather than the whole graph — that also
//! keeps the recorder from holding two live mutable views of the graph
//! at once.
//!
//! Batch-level submit ordering (waiting on the previous batch's
//! semaphore before issuing the next) is left as a designated extension
//! point; this module does not wire it. The one piece of semaphore
//! wiring it does own is the swapchain acquire/present pair.

use slotmap::SlotMap;

use crate::batch::Batch;
use crate::error::GpuError;
use crate::gpu::{CommandBuffer, GpuDevice, QueueFamilyKind, QueueHandle, RenderPassHandle, SemaphoreHandle};
use crate::ids::PassId;
use crate::pass::{Pass, PassKind};
use crate::realize::RealizedResources;
use crate::sync::{PassSlot, SyncArena};

/// A queue family plus the concrete queue a [`Command`] submits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDescription {
    /// Which queue family this command submits to.
    pub family: QueueFamilyKind,
    /// The concrete queue within that family.
    pub queue: QueueHandle,
}

/// Semaphores to wait on before, and signal after, an `Execute` submit.
#[derive(Debug, Default, Clone)]
pub struct SubmitPayload {
    /// Semaphores this submit waits on before executing.
    pub wait_semaphores: Vec<SemaphoreHandle>,
    /// Semaphores this submit signals once execution completes.
    pub signal_semaphores: Vec<SemaphoreHandle>,
}

/// The swapchain image index and the semaphore a `Present` waits on.
#[derive(Debug, Clone, Copy)]
pub struct PresentPayload {
    /// Index of the swapchain image to present.
    pub image_index: u32,
    /// Semaphore the present call waits on before presenting.
    pub wait_semaphore: SemaphoreHandle,
}

/// One entry of `record()`'s output command stream.
#[derive(Debug)]
pub enum Command {
    /// Submit a recorded command buffer to a queue.
    Execute {
        /// Queue this batch submits to.
        queue: QueueDescription,
        /// The recorded command buffer.
        command_buffer: Box<dyn CommandBuffer>,
        /// Wait/signal semaphores for this submit.
        submit: SubmitPayload,
    },
    /// Present the currently acquired swapchain image.
    Present {
        /// Queue this present call goes through.
        queue: QueueDescription,
        /// Image index and wait semaphore.
        present: PresentPayload,
    },
}

/// What a pass's recording closure sees while it runs: the command buffer
/// it is recording into, a read-only view over every resource `compile()`
/// realized (so a pass can look up its own defs'/uses' views/buffers), and,
/// when the pass is inside a render pass, the handle of that render pass
/// (`None` otherwise).
pub struct FrameContext<'a> {
    /// Views/buffers realized for every attachment.
    pub resources: &'a RealizedResources,
    /// The command buffer currently being recorded into.
    pub command_buffer: &'a mut dyn CommandBuffer,
    /// The render pass this pass is recording inside, if any.
    pub render_pass: Option<RenderPassHandle>,
}

/// Record one frame: for each batch, allocate and record a command
/// buffer over its pass run; if any batch contains the graph's
/// `OnSurfacePass`, append a trailing `Present` command.
///
/// `acquired_image`, when the graph has a surface attachment, is the
/// `(image index, acquire semaphore)` pair the caller obtained from
/// [`crate::swapchain::SwapChain::acquire_next_image`] before calling
/// this function.
pub fn record(
    device: &mut dyn GpuDevice,
    passes: &mut SlotMap<PassId, Pass>,
    sequence: &[PassSlot],
    arena: &SyncArena,
    batches: &[Batch],
    resources: &RealizedResources,
    acquired_image: Option<(u32, SemaphoreHandle)>,
) -> Result<Vec<Command>, GpuError> {
    let mut commands = Vec::with_capacity(batches.len());
    let mut present: Option<(QueueDescription, u32)> = None;
    let mut render_finished: Option<SemaphoreHandle> = None;

    for (i, batch) in batches.iter().enumerate() {
        let end = batches.get(i + 1).map_or(sequence.len(), |next| next.first_pass);
        let mut command_buffer = device.create_command_buffer(batch.family)?;
        command_buffer.begin();
        let mut contains_on_surface = false;

        for &slot in &sequence[batch.first_pass..end] {
            match slot {
                PassSlot::Sync(sync_id) => {
                    let state = &arena[sync_id];
                    command_buffer.pipeline_barrier(&state.image_barriers, &state.buffer_barriers);
                }
                PassSlot::User(pass_id) => {
                    let kind = passes[pass_id].kind();
                    let target = if kind.is_render_like() {
                        Some(passes[pass_id].render_target().expect(
                            "a Render/OnSurface pass must carry a render target, set via Pass::with_render_target",
                        ))
                    } else {
                        None
                    };
                    if let Some(t) = target {
                        command_buffer.begin_render_pass(t.render_pass, t.framebuffer, t.render_area);
                    }

                    let mut ctx = FrameContext {
                        resources,
                        command_buffer: command_buffer.as_mut(),
                        render_pass: target.map(|t| t.render_pass),
                    };
                    if let Some(body) = passes[pass_id].body_mut() {
                        body(&mut ctx);
                    }

                    if target.is_some() {
                        command_buffer.end_render_pass();
                    }
                    if matches!(kind, PassKind::OnSurface { .. }) {
                        contains_on_surface = true;
                    }
                }
            }
        }
        command_buffer.end();

        let queue = QueueDescription {
            family: batch.family,
            queue: device.queue(batch.family),
        };
        let mut submit = SubmitPayload::default();
        if contains_on_surface {
            if let Some((_, acquire_semaphore)) = acquired_image {
                submit.wait_semaphores.push(acquire_semaphore);
            }
            let signal = device.create_semaphore()?;
            submit.signal_semaphores.push(signal);
            render_finished = Some(signal);
            present = Some((queue, acquired_image.map_or(0, |(index, _)| index)));
        }

        commands.push(Command::Execute {
            queue,
            command_buffer,
            submit,
        });
    }

    if let Some((queue, image_index)) = present {
        let wait_semaphore =
            render_finished.expect("render_finished is always set alongside `present`");
        commands.push(Command::Present {
            queue,
            present: PresentPayload {
                image_index,
                wait_semaphore,
            },
        });
    }

    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::testing::FakeDevice;
    use crate::pass::PassKind;

    #[test]
    fn empty_sequence_yields_no_commands() {
        let mut device = FakeDevice::new();
        let mut passes: SlotMap<PassId, Pass> = SlotMap::with_key();
        let arena: SyncArena = SlotMap::with_key();
        let resources = RealizedResources::default();
        let commands = record(&mut device, &mut passes, &[], &arena, &[], &resources, None).unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn compute_pass_runs_without_render_pass_scaffolding() {
        let mut device = FakeDevice::new();
        let mut passes: SlotMap<PassId, Pass> = SlotMap::with_key();
        let ran = std::rc::Rc::new(std::cell::Cell::new(false));
        let ran_clone = ran.clone();
        let c1 = passes.insert(Pass::new("c1", PassKind::Compute).with_body(move |_ctx| {
            ran_clone.set(true);
        }));

        let sequence = vec![PassSlot::User(c1)];
        let batches = crate::batch::partition(&sequence, &passes);
        let arena: SyncArena = SlotMap::with_key();
        let resources = RealizedResources::default();

        let commands =
            record(&mut device, &mut passes, &sequence, &arena, &batches, &resources, None).unwrap();
        assert_eq!(commands.len(), 1);
        assert!(ran.get());
    }

    #[test]
    fn on_surface_batch_emits_trailing_present() {
        let mut device = FakeDevice::new();
        let mut attachments: SlotMap<crate::ids::AttachmentId, ()> = SlotMap::with_key();
        let surface = attachments.insert(());
        let mut passes: SlotMap<PassId, Pass> = SlotMap::with_key();
        let target = crate::pass::RenderTarget {
            render_pass: crate::gpu::RenderPassHandle(1),
            framebuffer: crate::gpu::FramebufferHandle(1),
            render_area: crate::gpu::Extent2D { width: 64, height: 64 },
        };
        let p1 = passes.insert(
            Pass::new("present", PassKind::OnSurface { surface }).with_render_target(target),
        );

        let sequence = vec![PassSlot::User(p1)];
        let batches = crate::batch::partition(&sequence, &passes);
        let arena: SyncArena = SlotMap::with_key();
        let resources = RealizedResources::default();

        let acquire_sem = device.create_semaphore().unwrap();
        let commands = record(
            &mut device,
            &mut passes,
            &sequence,
            &arena,
            &batches,
            &resources,
            Some((3, acquire_sem)),
        )
        .unwrap();

        assert_eq!(commands.len(), 2);
        assert!(matches!(commands[0], Command::Execute { .. }));
        match &commands[1] {
            Command::Present { present, .. } => assert_eq!(present.image_index, 3),
            Command::Execute { .. } => panic!("expected a trailing Present command"),
        }
    }
}
