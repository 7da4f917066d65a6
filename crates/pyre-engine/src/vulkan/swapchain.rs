//! Swapchain creation, destruction, and the owned depth attachment.
//!
//! Recreation is handled by the engine: device-wait, destroy the old
//! context, reset the swapchain arena, create a new one. Consumers never
//! hold references into a destroyed context.

use ash::vk;

use super::{Image, MemoryManager, SurfaceConfig, VulkanContext};

/// The swapchain and everything scoped to it.
pub struct SwapchainContext {
    pub handle: vk::SwapchainKHR,
    /// Non-owning: the images belong to the swapchain.
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub depth: Image,
    /// Whether the images were created with TRANSFER_SRC (needed by the
    /// headless exporter; probed, not assumed).
    pub supports_transfer_src: bool,
}

impl SwapchainContext {
    pub unsafe fn new(
        ctx: &VulkanContext,
        memory: &MemoryManager,
        desired_width: u32,
        desired_height: u32,
    ) -> Result<Self, String> {
        let surface = SurfaceConfig::query(ctx)?;
        let extent = surface.extent(desired_width, desired_height);

        let min_images = surface.capabilities.min_image_count;
        let max_images = if surface.capabilities.max_image_count == 0 {
            u32::MAX
        } else {
            surface.capabilities.max_image_count
        };
        let image_count = (min_images + 1).min(max_images);

        let supports_transfer_src = surface
            .capabilities
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_SRC);

        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        if supports_transfer_src {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }

        let family_indices = [
            ctx.queue_families.graphics.unwrap_or(0),
            ctx.queue_families.present.unwrap_or(0),
        ];
        let sharing_mode = if ctx.queue_families.split() {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(surface.format.format)
            .image_color_space(surface.format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(sharing_mode)
            .pre_transform(surface.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(surface.present_mode)
            .clipped(true);

        if sharing_mode == vk::SharingMode::CONCURRENT {
            create_info = create_info.queue_family_indices(&family_indices);
        }

        let handle = ctx
            .swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| format!("Failed to create swapchain: {:?}", e))?;

        let images = ctx
            .swapchain_loader
            .get_swapchain_images(handle)
            .map_err(|e| format!("Failed to get swapchain images: {:?}", e))?;

        let image_views = Self::create_image_views(ctx, &images, surface.format.format)?;

        let depth = memory.create_depth_image(extent, "depth")?;

        log::debug!(
            "swapchain: {}x{}, {} images, format {:?}, present {:?}",
            extent.width,
            extent.height,
            images.len(),
            surface.format.format,
            surface.present_mode
        );

        Ok(Self {
            handle,
            images,
            image_views,
            format: surface.format.format,
            extent,
            depth,
            supports_transfer_src,
        })
    }

    unsafe fn create_image_views(
        ctx: &VulkanContext,
        images: &[vk::Image],
        format: vk::Format,
    ) -> Result<Vec<vk::ImageView>, String> {
        images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                ctx.device
                    .create_image_view(&create_info, None)
                    .map_err(|e| format!("Failed to create image view: {:?}", e))
            })
            .collect()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Destroy views, depth attachment, and the swapchain itself. Null
    /// handles are skipped so a partially built context tears down clean.
    pub unsafe fn destroy(mut self, ctx: &VulkanContext, memory: &MemoryManager) {
        for view in self.image_views.drain(..) {
            if view != vk::ImageView::null() {
                ctx.device.destroy_image_view(view, None);
            }
        }

        memory.destroy_image(std::mem::replace(
            &mut self.depth,
            Image {
                handle: vk::Image::null(),
                view: vk::ImageView::null(),
                allocation: None,
                format: vk::Format::UNDEFINED,
                extent: vk::Extent3D::default(),
            },
        ));

        if self.handle != vk::SwapchainKHR::null() {
            ctx.swapchain_loader.destroy_swapchain(self.handle, None);
        }
    }
}
