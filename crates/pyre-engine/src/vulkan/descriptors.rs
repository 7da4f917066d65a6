//! Descriptor layout, pool, and the per-frame quad SSBO sets.
//!
//! One set layout, one binding: a storage buffer visible to the vertex
//! stage. One set per frame slot, written once at init against that
//! frame's SSBO and never updated again.

use ash::vk;

use super::{Buffer, VulkanContext, MAX_FRAMES_IN_FLIGHT};

pub struct Descriptors {
    pub set_layout: vk::DescriptorSetLayout,
    pub sets: Vec<vk::DescriptorSet>,
    pool: vk::DescriptorPool,
    device: ash::Device,
}

impl Descriptors {
    pub unsafe fn new(ctx: &VulkanContext) -> Result<Self, String> {
        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        let set_layout = ctx
            .device
            .create_descriptor_set_layout(&layout_info, None)
            .map_err(|e| format!("Failed to create descriptor set layout: {:?}", e))?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: MAX_FRAMES_IN_FLIGHT as u32,
        }];

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(MAX_FRAMES_IN_FLIGHT as u32);

        let pool = ctx
            .device
            .create_descriptor_pool(&pool_info, None)
            .map_err(|e| format!("Failed to create descriptor pool: {:?}", e))?;

        let layouts = [set_layout; MAX_FRAMES_IN_FLIGHT];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let sets = ctx
            .device
            .allocate_descriptor_sets(&alloc_info)
            .map_err(|e| format!("Failed to allocate descriptor sets: {:?}", e))?;

        Ok(Self {
            set_layout,
            sets,
            pool,
            device: ctx.device.clone(),
        })
    }

    /// Statically bind a frame's SSBO to its set.
    pub unsafe fn bind_ssbo(&self, frame_index: usize, ssbo: &Buffer) {
        let buffer_info = [vk::DescriptorBufferInfo {
            buffer: ssbo.handle,
            offset: 0,
            range: ssbo.size,
        }];

        let write = vk::WriteDescriptorSet::default()
            .dst_set(self.sets[frame_index])
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(&buffer_info);

        self.device.update_descriptor_sets(&[write], &[]);
    }

    pub unsafe fn destroy(&mut self) {
        if self.pool != vk::DescriptorPool::null() {
            self.device.destroy_descriptor_pool(self.pool, None);
            self.pool = vk::DescriptorPool::null();
        }
        if self.set_layout != vk::DescriptorSetLayout::null() {
            self.device.destroy_descriptor_set_layout(self.set_layout, None);
            self.set_layout = vk::DescriptorSetLayout::null();
        }
        self.sets.clear();
    }
}
