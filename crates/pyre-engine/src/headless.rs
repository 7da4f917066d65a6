//! Headless capture: render, blit to a readback buffer, write BMP files.
//!
//! Single-threaded variant of the frame loop: no worker lanes, no hot
//! reload, no input, simulated dt of 1/60. Each frame submits the normal
//! render command buffer plus a capture buffer (present-src to
//! transfer-src, copy to buffer, back to present-src) in one submit, so
//! one fence covers both; then the staging bytes go out as a 54-byte
//! header, 32-bpp, top-down BGRA BMP.

use ash::vk;
use std::fs;
use std::path::Path;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::vulkan::recorder::image_barrier;
use crate::vulkan::MAX_FRAMES_IN_FLIGHT;

/// Simulated frame delta for capture runs.
pub const HEADLESS_DT: f32 = 1.0 / 60.0;

/// BMP file header (BITMAPFILEHEADER + BITMAPINFOHEADER) size.
pub const BMP_HEADER_SIZE: usize = 54;

impl Engine {
    /// Render `frame_count` frames and write `frame_XXXX.bmp` files under
    /// `out_dir`. Runs on the calling thread only.
    pub fn run_headless(&mut self, frame_count: u32, out_dir: &Path) -> Result<(), EngineError> {
        fs::create_dir_all(out_dir)
            .map_err(|e| EngineError::Capture(format!("create {}: {}", out_dir.display(), e)))?;

        let (extent, supports_transfer) = {
            let swapchain = self
                .swapchain
                .as_ref()
                .ok_or_else(|| EngineError::Capture("no swapchain".to_string()))?;
            (swapchain.extent, swapchain.supports_transfer_src)
        };
        if !supports_transfer {
            return Err(EngineError::Capture(
                "surface does not support TRANSFER_SRC".to_string(),
            ));
        }

        let byte_len = extent.width as usize * extent.height as usize * 4;

        let staging = unsafe {
            self.memory
                .create_readback_buffer(byte_len as vk::DeviceSize, "capture readback")
        }
        .map_err(EngineError::GpuAlloc)?;

        // Capture pool + buffer, reset and re-recorded per frame.
        let capture = unsafe { self.create_capture_commands() }.map_err(EngineError::Capture);
        let (capture_pool, capture_cmd) = match capture {
            Ok(pair) => pair,
            Err(e) => {
                unsafe { self.memory.destroy_buffer(staging) };
                return Err(e);
            }
        };

        // Readback scratch lives in the swapchain arena: its size tracks
        // the extent and its lifetime ends with the swapchain.
        // SAFETY: the block address is stable (arena blocks never move)
        // and the arena is not reset during this run.
        let scratch_ptr = self.swapchain_arena.alloc_bytes(byte_len).as_mut_ptr();

        let mut result = Ok(());
        for frame in 0..frame_count {
            let path = out_dir.join(format!("frame_{:04}.bmp", frame));
            result = self.headless_frame(capture_cmd, &staging, extent, scratch_ptr, byte_len, &path);
            if let Err(e) = &result {
                log::error!("headless frame {} failed: {}", frame, e);
                break;
            }
        }

        self.ctx.wait_idle();
        unsafe {
            self.ctx.device.destroy_command_pool(capture_pool, None);
            self.memory.destroy_buffer(staging);
        }

        result
    }

    unsafe fn create_capture_commands(&self) -> Result<(vk::CommandPool, vk::CommandBuffer), String> {
        let graphics_family = self
            .ctx
            .queue_families
            .graphics
            .ok_or("No graphics queue family")?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = self
            .ctx
            .device
            .create_command_pool(&pool_info, None)
            .map_err(|e| format!("Failed to create capture pool: {:?}", e))?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = self
            .ctx
            .device
            .allocate_command_buffers(&alloc_info)
            .map_err(|e| format!("Failed to allocate capture buffer: {:?}", e))?[0];

        Ok((pool, cmd))
    }

    /// One headless iteration: update, render + capture in one submit,
    /// fence wait, file write, present.
    fn headless_frame(
        &mut self,
        capture_cmd: vk::CommandBuffer,
        staging: &crate::vulkan::Buffer,
        extent: vk::Extent2D,
        scratch_ptr: *mut u8,
        byte_len: usize,
        path: &Path,
    ) -> Result<(), EngineError> {
        let frame_index = self.current_frame;

        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[self.frames[frame_index].in_flight], true, u64::MAX)
                .map_err(|e| EngineError::Capture(format!("fence wait: {:?}", e)))?;
        }

        self.begin_module_frame(HEADLESS_DT);

        let data = self.collect_frame_data(frame_index);

        let acquire = {
            let swapchain = self
                .swapchain
                .as_ref()
                .ok_or_else(|| EngineError::Capture("no swapchain".to_string()))?;
            unsafe {
                self.ctx.swapchain_loader.acquire_next_image(
                    swapchain.handle,
                    u64::MAX,
                    self.frames[frame_index].image_available,
                    vk::Fence::null(),
                )
            }
        };

        let image_index = match acquire {
            Ok((index, _suboptimal)) => index as usize,
            Err(e) => return Err(EngineError::Capture(format!("acquire: {:?}", e))),
        };

        let render_cmd = self.record_frame(frame_index, image_index, &data)?;

        unsafe { self.record_capture(capture_cmd, image_index, staging, extent) }
            .map_err(EngineError::Capture)?;

        unsafe {
            self.ctx
                .device
                .reset_fences(&[self.frames[frame_index].in_flight])
                .map_err(|e| EngineError::Capture(format!("fence reset: {:?}", e)))?;
        }

        // Both buffers in one submit so the fence covers the copy too.
        self.submit(frame_index, image_index, &[render_cmd, capture_cmd])?;

        unsafe {
            self.ctx
                .device
                .wait_for_fences(&[self.frames[frame_index].in_flight], true, u64::MAX)
                .map_err(|e| EngineError::Capture(format!("capture wait: {:?}", e)))?;
        }

        // SAFETY: scratch points at a live swapchain-arena block of
        // byte_len bytes; the GPU finished writing staging above.
        let scratch = unsafe { std::slice::from_raw_parts_mut(scratch_ptr, byte_len) };
        unsafe { staging.read(scratch) };

        let bmp = encode_bmp(extent.width, extent.height, scratch);
        fs::write(path, bmp)
            .map_err(|e| EngineError::Capture(format!("write {}: {}", path.display(), e)))?;
        log::info!("wrote {}", path.display());

        // Release the image back to the presentation engine.
        let _ = self.present(image_index)?;

        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(())
    }

    /// Record the capture buffer: present-src -> transfer-src, copy image
    /// to buffer, transfer-src -> present-src.
    unsafe fn record_capture(
        &self,
        cmd: vk::CommandBuffer,
        image_index: usize,
        staging: &crate::vulkan::Buffer,
        extent: vk::Extent2D,
    ) -> Result<(), String> {
        let device = &self.ctx.device;
        let image = self
            .swapchain
            .as_ref()
            .ok_or("no swapchain")?
            .images[image_index];

        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .map_err(|e| format!("reset capture buffer: {:?}", e))?;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device
            .begin_command_buffer(cmd, &begin_info)
            .map_err(|e| format!("begin capture buffer: {:?}", e))?;

        let to_transfer = [image_barrier(
            image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        )];
        let dep_info = vk::DependencyInfo::default().image_memory_barriers(&to_transfer);
        device.cmd_pipeline_barrier2(cmd, &dep_info);

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });

        device.cmd_copy_image_to_buffer(
            cmd,
            image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            staging.handle,
            &[region],
        );

        let to_present = [image_barrier(
            image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            vk::AccessFlags2::empty(),
        )];
        let dep_info = vk::DependencyInfo::default().image_memory_barriers(&to_present);
        device.cmd_pipeline_barrier2(cmd, &dep_info);

        device
            .end_command_buffer(cmd)
            .map_err(|e| format!("end capture buffer: {:?}", e))
    }
}

/// Encode BGRA pixels as a 32-bpp top-down BMP (negative height).
pub fn encode_bmp(width: u32, height: u32, bgra: &[u8]) -> Vec<u8> {
    let data_len = bgra.len() as u32;
    let file_len = BMP_HEADER_SIZE as u32 + data_len;

    let mut out = Vec::with_capacity(file_len as usize);

    // BITMAPFILEHEADER
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&file_len.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(BMP_HEADER_SIZE as u32).to_le_bytes());

    // BITMAPINFOHEADER
    out.extend_from_slice(&40u32.to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    // Negative height marks top-down row order.
    out.extend_from_slice(&(-(height as i32)).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&32u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes()); // BI_RGB
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(&2835i32.to_le_bytes());
    out.extend_from_slice(&2835i32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());

    out.extend_from_slice(bgra);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_54_bytes() {
        let bmp = encode_bmp(2, 2, &[0u8; 16]);
        assert_eq!(bmp.len(), 54 + 16);
        assert_eq!(&bmp[0..2], b"BM");
        assert_eq!(
            u32::from_le_bytes(bmp[10..14].try_into().unwrap()),
            BMP_HEADER_SIZE as u32
        );
    }

    #[test]
    fn test_header_fields() {
        let bmp = encode_bmp(1280, 720, &vec![0u8; 1280 * 720 * 4]);

        let file_len = u32::from_le_bytes(bmp[2..6].try_into().unwrap());
        assert_eq!(file_len as usize, bmp.len());

        let width = i32::from_le_bytes(bmp[18..22].try_into().unwrap());
        let height = i32::from_le_bytes(bmp[22..26].try_into().unwrap());
        assert_eq!(width, 1280);
        assert_eq!(height, -720, "top-down rows need negative height");

        let bpp = u16::from_le_bytes(bmp[28..30].try_into().unwrap());
        assert_eq!(bpp, 32);

        let compression = u32::from_le_bytes(bmp[30..34].try_into().unwrap());
        assert_eq!(compression, 0);
    }

    #[test]
    fn test_pixel_bytes_round_trip() {
        let pixels: Vec<u8> = (0..64u8).collect();
        let bmp = encode_bmp(4, 4, &pixels);
        assert_eq!(&bmp[BMP_HEADER_SIZE..], pixels.as_slice());
    }
}
