//! Command pool and buffer management.
//!
//! One command pool and one primary command buffer per lane, per frame
//! slot. Only lane 0 records today; the layout leaves room for go-wide
//! recording phases without restructuring. One-time uploads go through
//! their owners' transient pools (mesh uploader, headless capture), not
//! through the frame slots.

use ash::vk;

use super::{VulkanContext, MAX_FRAMES_IN_FLIGHT};

/// Pools and primaries for a single frame slot, indexed by lane.
pub struct FrameCommandSet {
    pub pools: Vec<vk::CommandPool>,
    pub primaries: Vec<vk::CommandBuffer>,
}

/// Command buffer manager with per-frame, per-lane pools.
pub struct CommandManager {
    frames: Vec<FrameCommandSet>,
    device: ash::Device,
}

impl CommandManager {
    pub unsafe fn new(ctx: &VulkanContext, lane_count: usize) -> Result<Self, String> {
        let graphics_family = ctx.queue_families.graphics.ok_or("No graphics queue family")?;

        let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let mut pools = Vec::with_capacity(lane_count);
            let mut primaries = Vec::with_capacity(lane_count);

            for _ in 0..lane_count {
                let pool_info = vk::CommandPoolCreateInfo::default()
                    .queue_family_index(graphics_family)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

                let pool = ctx
                    .device
                    .create_command_pool(&pool_info, None)
                    .map_err(|e| format!("Failed to create command pool: {:?}", e))?;

                let alloc_info = vk::CommandBufferAllocateInfo::default()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1);

                let primary = ctx
                    .device
                    .allocate_command_buffers(&alloc_info)
                    .map_err(|e| format!("Failed to allocate command buffer: {:?}", e))?[0];

                pools.push(pool);
                primaries.push(primary);
            }

            frames.push(FrameCommandSet { pools, primaries });
        }

        Ok(Self {
            frames,
            device: ctx.device.clone(),
        })
    }

    /// The primary command buffer for a frame slot and lane.
    pub fn primary(&self, frame_index: usize, lane: usize) -> vk::CommandBuffer {
        self.frames[frame_index].primaries[lane]
    }

    /// Reset a frame's primary for re-recording.
    pub unsafe fn reset_primary(&self, frame_index: usize, lane: usize) -> Result<(), String> {
        self.device
            .reset_command_buffer(
                self.frames[frame_index].primaries[lane],
                vk::CommandBufferResetFlags::empty(),
            )
            .map_err(|e| format!("Failed to reset command buffer: {:?}", e))
    }

    /// Destroy all command pools.
    pub unsafe fn destroy(&mut self) {
        for frame in &self.frames {
            for &pool in &frame.pools {
                if pool != vk::CommandPool::null() {
                    self.device.destroy_command_pool(pool, None);
                }
            }
        }
        self.frames.clear();
    }
}
