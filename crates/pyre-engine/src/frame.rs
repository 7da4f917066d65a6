//! Per-frame-in-flight and per-swapchain-image resources.
//!
//! Frame slots survive swapchain recreation; image slots are rebuilt with
//! every recreation because their count tracks the swapchain image count.
//! The render-finished semaphore is bound to the image, not the frame:
//! acquire order and frame order may disagree, and only the per-image
//! binding guarantees a present waits on the submission that actually
//! rendered that image.

use ash::vk;
use bytemuck::Zeroable;

use crate::frame_commands::QuadCommand;
use crate::vulkan::{Buffer, Descriptors, MemoryManager, VulkanContext, MAX_FRAMES_IN_FLIGHT, MAX_QUADS};

/// Resources owned by one frame in flight.
pub struct FrameSlot {
    /// Persistently mapped SSBO of QuadCommand[MAX_QUADS].
    pub ssbo: Buffer,
    pub descriptor_set: vk::DescriptorSet,
    pub image_available: vk::Semaphore,
    /// Created signaled so the first wait passes.
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    /// Copy up to MAX_QUADS commands into the mapped SSBO. Must only be
    /// called after this slot's fence wait; the GPU no longer reads the
    /// buffer then.
    pub unsafe fn upload_quads(&self, quads: &[QuadCommand]) -> u32 {
        let count = quads.len().min(MAX_QUADS);
        self.ssbo.write(&quads[..count]);
        count as u32
    }
}

/// Resources owned by one swapchain image.
pub struct ImageSlot {
    pub render_finished: vk::Semaphore,
}

/// Build the frame slots: SSBO, descriptor set bound to it, sync objects.
pub unsafe fn create_frame_slots(
    ctx: &VulkanContext,
    memory: &MemoryManager,
    descriptors: &Descriptors,
) -> Result<Vec<FrameSlot>, String> {
    let ssbo_size = (MAX_QUADS * std::mem::size_of::<QuadCommand>()) as vk::DeviceSize;

    let semaphore_info = vk::SemaphoreCreateInfo::default();
    let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

    let mut slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
    for i in 0..MAX_FRAMES_IN_FLIGHT {
        let ssbo = memory.create_storage_buffer(ssbo_size, "quad ssbo")?;
        if ssbo.mapped_ptr().is_none() {
            return Err("quad SSBO is not host-mapped".to_string());
        }
        // The shader may read any slot; zero the whole buffer once so the
        // tail past the live quad count is defined.
        let zeroes = vec![QuadCommand::zeroed(); MAX_QUADS];
        ssbo.write(&zeroes);

        descriptors.bind_ssbo(i, &ssbo);

        let image_available = ctx
            .device
            .create_semaphore(&semaphore_info, None)
            .map_err(|e| format!("Failed to create semaphore: {:?}", e))?;
        let in_flight = ctx
            .device
            .create_fence(&fence_info, None)
            .map_err(|e| format!("Failed to create fence: {:?}", e))?;

        slots.push(FrameSlot {
            ssbo,
            descriptor_set: descriptors.sets[i],
            image_available,
            in_flight,
        });
    }

    Ok(slots)
}

/// Build one render-finished semaphore per swapchain image.
pub unsafe fn create_image_slots(
    ctx: &VulkanContext,
    image_count: usize,
) -> Result<Vec<ImageSlot>, String> {
    let semaphore_info = vk::SemaphoreCreateInfo::default();

    (0..image_count)
        .map(|_| {
            let render_finished = ctx
                .device
                .create_semaphore(&semaphore_info, None)
                .map_err(|e| format!("Failed to create semaphore: {:?}", e))?;
            Ok(ImageSlot { render_finished })
        })
        .collect()
}

/// Destroy frame slots; SSBOs go back through the memory manager.
pub unsafe fn destroy_frame_slots(
    ctx: &VulkanContext,
    memory: &MemoryManager,
    slots: &mut Vec<FrameSlot>,
) {
    for slot in slots.drain(..) {
        if slot.image_available != vk::Semaphore::null() {
            ctx.device.destroy_semaphore(slot.image_available, None);
        }
        if slot.in_flight != vk::Fence::null() {
            ctx.device.destroy_fence(slot.in_flight, None);
        }
        memory.destroy_buffer(slot.ssbo);
    }
}

/// Destroy image slots (on recreation and at cleanup).
pub unsafe fn destroy_image_slots(ctx: &VulkanContext, slots: &mut Vec<ImageSlot>) {
    for slot in slots.drain(..) {
        if slot.render_finished != vk::Semaphore::null() {
            ctx.device.destroy_semaphore(slot.render_finished, None);
        }
    }
}
