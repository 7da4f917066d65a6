//! Vulkan 1.3 backend: context, swapchain, buffers, pipelines, recording.

pub mod commands;
pub mod context;
pub mod descriptors;
pub mod memory;
pub mod pipelines;
pub mod recorder;
pub mod surface;
pub mod swapchain;

pub use commands::CommandManager;
pub use context::VulkanContext;
pub use descriptors::Descriptors;
pub use memory::{Buffer, Image, MemoryManager};
pub use pipelines::Pipelines;
pub use surface::SurfaceConfig;
pub use swapchain::SwapchainContext;

use ash::vk;
use std::ffi::CStr;

pub const APP_NAME: &CStr = c"pyre";
pub const ENGINE_NAME: &CStr = c"pyre";
pub const ENGINE_VERSION: u32 = vk::make_api_version(0, 0, 1, 0);
pub const REQUIRED_VK_VERSION: u32 = vk::API_VERSION_1_3;

/// Frame slots cycled round-robin.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// SSBO capacity per frame slot; quads past this are dropped.
pub const MAX_QUADS: usize = 4096;

/// Depth attachment format, fixed.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;
