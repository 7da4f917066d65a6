//! GPU memory management using gpu-allocator.
//!
//! Two buffer families: persistently mapped host-visible buffers (SSBOs,
//! staging, readback) and device-local buffers filled by staged upload.
//! The memory-type walk lives inside the allocator.

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{VulkanContext, DEPTH_FORMAT};

/// GPU buffer with associated memory.
pub struct Buffer {
    pub handle: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

impl Buffer {
    /// Pointer to the persistently mapped memory, if host-visible.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr() as *mut u8)
    }

    /// Write data to the mapped buffer.
    ///
    /// # Safety
    /// Buffer must be mappable and data must fit.
    pub unsafe fn write<T: Copy>(&self, data: &[T]) {
        if let Some(ptr) = self.mapped_ptr() {
            std::ptr::copy_nonoverlapping(
                data.as_ptr() as *const u8,
                ptr,
                std::mem::size_of_val(data),
            );
        }
    }

    /// Read back from the mapped buffer into `out`.
    ///
    /// # Safety
    /// Buffer must be mappable and `out` must not exceed its size.
    pub unsafe fn read(&self, out: &mut [u8]) {
        if let Some(ptr) = self.mapped_ptr() {
            std::ptr::copy_nonoverlapping(ptr as *const u8, out.as_mut_ptr(), out.len());
        }
    }
}

/// GPU image with associated memory and view.
pub struct Image {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
}

/// Memory manager wrapping gpu-allocator.
pub struct MemoryManager {
    allocator: Arc<Mutex<Allocator>>,
    device: ash::Device,
}

impl MemoryManager {
    pub unsafe fn new(ctx: &VulkanContext) -> Result<Self, String> {
        let mut debug_settings = gpu_allocator::AllocatorDebugSettings::default();
        debug_settings.log_memory_information = cfg!(debug_assertions);
        debug_settings.log_leaks_on_shutdown = true;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: ctx.instance.clone(),
            device: ctx.device.clone(),
            physical_device: ctx.physical_device,
            debug_settings,
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| format!("Failed to create allocator: {:?}", e))?;

        Ok(Self {
            allocator: Arc::new(Mutex::new(allocator)),
            device: ctx.device.clone(),
        })
    }

    /// Create a buffer with the specified usage and memory location.
    /// CpuToGpu buffers come back persistently mapped.
    pub unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Buffer, String> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = self
            .device
            .create_buffer(&buffer_info, None)
            .map_err(|e| format!("Failed to create buffer: {:?}", e))?;

        let requirements = self.device.get_buffer_memory_requirements(handle);

        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                self.device.destroy_buffer(handle, None);
                format!("Failed to allocate buffer memory: {:?}", e)
            })?;

        self.device
            .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
            .map_err(|e| format!("Failed to bind buffer memory: {:?}", e))?;

        Ok(Buffer {
            handle,
            allocation: Some(allocation),
            size,
            usage,
        })
    }

    /// Create a host-visible staging buffer (transfer source).
    pub unsafe fn create_staging_buffer(
        &self,
        size: vk::DeviceSize,
        name: &str,
    ) -> Result<Buffer, String> {
        self.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            name,
        )
    }

    /// Create a host-visible readback buffer (transfer destination).
    pub unsafe fn create_readback_buffer(
        &self,
        size: vk::DeviceSize,
        name: &str,
    ) -> Result<Buffer, String> {
        self.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            name,
        )
    }

    /// Create a persistently mapped storage buffer.
    pub unsafe fn create_storage_buffer(
        &self,
        size: vk::DeviceSize,
        name: &str,
    ) -> Result<Buffer, String> {
        self.create_buffer(
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            MemoryLocation::CpuToGpu,
            name,
        )
    }

    /// Create a device-local buffer and fill it by staged upload: exact-size
    /// staging, one-time copy on the graphics queue, wait, free staging.
    pub unsafe fn create_device_local_buffer(
        &self,
        ctx: &VulkanContext,
        pool: vk::CommandPool,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
        name: &str,
    ) -> Result<Buffer, String> {
        let size = bytes.len() as vk::DeviceSize;

        let dst = self.create_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        )?;

        let staging = self.create_staging_buffer(size, "staging")?;
        staging.write(bytes);

        let result = self.copy_buffer_once(ctx, pool, staging.handle, dst.handle, size);
        self.destroy_buffer(staging);

        match result {
            Ok(()) => Ok(dst),
            Err(e) => {
                self.destroy_buffer(dst);
                Err(e)
            }
        }
    }

    /// Record and submit a one-time buffer copy, waiting for completion.
    unsafe fn copy_buffer_once(
        &self,
        ctx: &VulkanContext,
        pool: vk::CommandPool,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<(), String> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = self
            .device
            .allocate_command_buffers(&alloc_info)
            .map_err(|e| format!("Failed to allocate copy command buffer: {:?}", e))?[0];

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        self.device
            .begin_command_buffer(cmd, &begin_info)
            .map_err(|e| format!("Failed to begin copy command buffer: {:?}", e))?;

        let region = vk::BufferCopy::default().size(size);
        self.device.cmd_copy_buffer(cmd, src, dst, &[region]);

        self.device
            .end_command_buffer(cmd)
            .map_err(|e| format!("Failed to end copy command buffer: {:?}", e))?;

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        let submit_result = self
            .device
            .queue_submit(ctx.graphics_queue, &[submit_info], vk::Fence::null())
            .map_err(|e| format!("Failed to submit copy: {:?}", e))
            .and_then(|_| {
                self.device
                    .queue_wait_idle(ctx.graphics_queue)
                    .map_err(|e| format!("Failed to wait for copy: {:?}", e))
            });

        self.device.free_command_buffers(pool, &command_buffers);
        submit_result
    }

    /// Create the depth attachment for the given extent.
    pub unsafe fn create_depth_image(
        &self,
        extent: vk::Extent2D,
        name: &str,
    ) -> Result<Image, String> {
        let extent3 = vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .extent(extent3)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let handle = self
            .device
            .create_image(&image_info, None)
            .map_err(|e| format!("Failed to create depth image: {:?}", e))?;

        let requirements = self.device.get_image_memory_requirements(handle);

        let allocation = self
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| {
                self.device.destroy_image(handle, None);
                format!("Failed to allocate depth memory: {:?}", e)
            })?;

        self.device
            .bind_image_memory(handle, allocation.memory(), allocation.offset())
            .map_err(|e| format!("Failed to bind depth memory: {:?}", e))?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(DEPTH_FORMAT)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = self
            .device
            .create_image_view(&view_info, None)
            .map_err(|e| format!("Failed to create depth view: {:?}", e))?;

        Ok(Image {
            handle,
            view,
            allocation: Some(allocation),
            format: DEPTH_FORMAT,
            extent: extent3,
        })
    }

    /// Destroy a buffer. Null handles are a no-op.
    pub unsafe fn destroy_buffer(&self, mut buffer: Buffer) {
        if buffer.handle != vk::Buffer::null() {
            self.device.destroy_buffer(buffer.handle, None);
        }
        if let Some(allocation) = buffer.allocation.take() {
            let _ = self.allocator.lock().free(allocation);
        }
    }

    /// Destroy an image and its view. Null handles are a no-op.
    pub unsafe fn destroy_image(&self, mut image: Image) {
        if image.view != vk::ImageView::null() {
            self.device.destroy_image_view(image.view, None);
        }
        if image.handle != vk::Image::null() {
            self.device.destroy_image(image.handle, None);
        }
        if let Some(allocation) = image.allocation.take() {
            let _ = self.allocator.lock().free(allocation);
        }
    }
}
