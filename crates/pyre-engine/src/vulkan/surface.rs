//! Surface format, present mode, and extent selection.
//!
//! Queried fresh before every swapchain (re)creation, since capabilities
//! change with the window.

use ash::vk;

use super::VulkanContext;

/// Snapshot of the surface's capabilities and the choices made from them.
pub struct SurfaceConfig {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
}

impl SurfaceConfig {
    pub unsafe fn query(ctx: &VulkanContext) -> Result<Self, String> {
        let capabilities = ctx
            .surface_loader
            .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
            .map_err(|e| format!("Failed to get surface capabilities: {:?}", e))?;

        let formats = ctx
            .surface_loader
            .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
            .map_err(|e| format!("Failed to get surface formats: {:?}", e))?;

        let format = choose_surface_format(ctx, &formats);

        let present_modes = ctx
            .surface_loader
            .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)
            .map_err(|e| format!("Failed to get present modes: {:?}", e))?;

        let present_mode = choose_present_mode(&present_modes);

        Ok(Self {
            format,
            present_mode,
            capabilities,
        })
    }

    /// The extent to create the swapchain at, clamped to capabilities.
    pub fn extent(&self, desired_width: u32, desired_height: u32) -> vk::Extent2D {
        if self.capabilities.current_extent.width != u32::MAX {
            self.capabilities.current_extent
        } else {
            vk::Extent2D {
                width: desired_width.clamp(
                    self.capabilities.min_image_extent.width,
                    self.capabilities.max_image_extent.width,
                ),
                height: desired_height.clamp(
                    self.capabilities.min_image_extent.height,
                    self.capabilities.max_image_extent.height,
                ),
            }
        }
    }
}

/// Choose the surface format: SRGB B8G8R8A8, then UNORM B8G8R8A8, then the
/// first format the implementation accepts for color-attachment usage.
unsafe fn choose_surface_format(
    ctx: &VulkanContext,
    formats: &[vk::SurfaceFormatKHR],
) -> vk::SurfaceFormatKHR {
    for format in formats {
        if format.format == vk::Format::B8G8R8A8_SRGB
            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        {
            return *format;
        }
    }

    for format in formats {
        if format.format == vk::Format::B8G8R8A8_UNORM
            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        {
            return *format;
        }
    }

    for format in formats {
        let supported = ctx
            .instance
            .get_physical_device_image_format_properties(
                ctx.physical_device,
                format.format,
                vk::ImageType::TYPE_2D,
                vk::ImageTiling::OPTIMAL,
                vk::ImageUsageFlags::COLOR_ATTACHMENT,
                vk::ImageCreateFlags::empty(),
            )
            .is_ok();
        if supported {
            return *format;
        }
    }

    formats.first().copied().unwrap_or(vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    })
}

/// MAILBOX if present, else FIFO (always available).
fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        return vk::PresentModeKHR::MAILBOX;
    }
    vk::PresentModeKHR::FIFO
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_mode_prefers_mailbox() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_clamps_when_surface_leaves_it_open() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR::default();
        capabilities.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        capabilities.min_image_extent = vk::Extent2D { width: 64, height: 64 };
        capabilities.max_image_extent = vk::Extent2D { width: 2048, height: 2048 };

        let config = SurfaceConfig {
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            capabilities,
        };

        assert_eq!(
            config.extent(1280, 720),
            vk::Extent2D { width: 1280, height: 720 }
        );
        assert_eq!(
            config.extent(1, 9999),
            vk::Extent2D { width: 64, height: 2048 }
        );
    }

    #[test]
    fn test_fixed_extent_wins() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR::default();
        capabilities.current_extent = vk::Extent2D { width: 800, height: 600 };

        let config = SurfaceConfig {
            format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            capabilities,
        };

        assert_eq!(config.extent(1280, 720), vk::Extent2D { width: 800, height: 600 });
    }
}
