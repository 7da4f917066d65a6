//! Frame recorder: one primary command buffer per frame.
//!
//! Protocol: begin → layout barriers (color, depth) → dynamic rendering
//! (clear, quad instanced draw, ordered mesh draws) → present barrier →
//! end. Mesh commands with out-of-range or unloaded handles emit no GPU
//! work. Draw order is strictly append order; opaque only, no sorting.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use super::Pipelines;
use crate::frame_commands::MeshCommand;
use crate::mesh::MeshTable;

/// The 80-byte push-constant block of the mesh pipeline.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct MeshPush {
    pub mvp: [f32; 16],
    pub tint: [f32; 4],
}

/// Everything one frame's recording needs.
pub struct RecordParams<'a> {
    pub cmd: vk::CommandBuffer,
    pub image: vk::Image,
    pub image_view: vk::ImageView,
    pub depth_image: vk::Image,
    pub depth_view: vk::ImageView,
    pub extent: vk::Extent2D,
    pub pipelines: &'a Pipelines,
    pub meshes: &'a MeshTable,
    pub descriptor_set: vk::DescriptorSet,
    pub clear_color: [f32; 4],
    pub quad_count: u32,
    pub mesh_commands: &'a [MeshCommand],
    pub view: Mat4,
    pub proj: Mat4,
}

/// Record one frame. Any Vulkan error is a record failure.
pub unsafe fn record_frame(device: &ash::Device, p: &RecordParams) -> Result<(), String> {
    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    device
        .begin_command_buffer(p.cmd, &begin_info)
        .map_err(|e| format!("Failed to begin command buffer: {:?}", e))?;

    // Swapchain image: UNDEFINED -> COLOR_ATTACHMENT_OPTIMAL.
    // Depth image: UNDEFINED -> DEPTH_STENCIL_ATTACHMENT_OPTIMAL.
    let to_attachment = [
        image_barrier(
            p.image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::AccessFlags2::empty(),
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        ),
        image_barrier(
            p.depth_image,
            vk::ImageAspectFlags::DEPTH,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::PipelineStageFlags2::TOP_OF_PIPE,
            vk::AccessFlags2::empty(),
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS,
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
    ];

    let dep_info = vk::DependencyInfo::default().image_memory_barriers(&to_attachment);
    device.cmd_pipeline_barrier2(p.cmd, &dep_info);

    // Dynamic rendering: clear color and depth, store color only.
    let color_attachment = vk::RenderingAttachmentInfo::default()
        .image_view(p.image_view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            color: vk::ClearColorValue {
                float32: p.clear_color,
            },
        });

    let depth_attachment = vk::RenderingAttachmentInfo::default()
        .image_view(p.depth_view)
        .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .clear_value(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        });

    let color_attachments = [color_attachment];
    let rendering_info = vk::RenderingInfo::default()
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: p.extent,
        })
        .layer_count(1)
        .color_attachments(&color_attachments)
        .depth_attachment(&depth_attachment);

    device.cmd_begin_rendering(p.cmd, &rendering_info);

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: p.extent.width as f32,
        height: p.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    device.cmd_set_viewport(p.cmd, 0, &[viewport]);

    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: p.extent,
    };
    device.cmd_set_scissor(p.cmd, 0, &[scissor]);

    // Quad path: one instanced draw, six vertices per quad, everything
    // else comes from the SSBO.
    if p.quad_count > 0 {
        device.cmd_bind_pipeline(p.cmd, vk::PipelineBindPoint::GRAPHICS, p.pipelines.quad);
        device.cmd_bind_descriptor_sets(
            p.cmd,
            vk::PipelineBindPoint::GRAPHICS,
            p.pipelines.quad_layout,
            0,
            &[p.descriptor_set],
            &[],
        );
        device.cmd_draw(p.cmd, 6, p.quad_count, 0, 0);
    }

    // Mesh path: strict append order, rebind buffers only on slot change.
    if !p.mesh_commands.is_empty() {
        device.cmd_bind_pipeline(p.cmd, vk::PipelineBindPoint::GRAPHICS, p.pipelines.mesh);

        let mut bound_slot: Option<u32> = None;
        for command in p.mesh_commands {
            let Some(slot) = p.meshes.loaded(command.mesh) else {
                continue;
            };

            if bound_slot != Some(command.mesh) {
                let (Some(vb), Some(ib)) = (&slot.vertex_buffer, &slot.index_buffer) else {
                    continue;
                };
                device.cmd_bind_vertex_buffers(p.cmd, 0, &[vb.handle], &[0]);
                device.cmd_bind_index_buffer(p.cmd, ib.handle, 0, vk::IndexType::UINT32);
                bound_slot = Some(command.mesh);
            }

            let mvp = p.proj * p.view * command.model;
            let push = MeshPush {
                mvp: mvp.to_cols_array(),
                tint: command.tint,
            };
            device.cmd_push_constants(
                p.cmd,
                p.pipelines.mesh_layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&push),
            );

            device.cmd_draw_indexed(p.cmd, slot.index_count, 1, 0, 0, 0);
        }
    }

    device.cmd_end_rendering(p.cmd);

    // Swapchain image: COLOR_ATTACHMENT_OPTIMAL -> PRESENT_SRC_KHR.
    let to_present = [image_barrier(
        p.image,
        vk::ImageAspectFlags::COLOR,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::ImageLayout::PRESENT_SRC_KHR,
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        vk::AccessFlags2::empty(),
    )];

    let dep_info = vk::DependencyInfo::default().image_memory_barriers(&to_present);
    device.cmd_pipeline_barrier2(p.cmd, &dep_info);

    device
        .end_command_buffer(p.cmd)
        .map_err(|e| format!("Failed to end command buffer: {:?}", e))
}

/// Build a synchronization2 image barrier covering the whole image.
pub fn image_barrier(
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_stage_mask: vk::PipelineStageFlags2,
    src_access_mask: vk::AccessFlags2,
    dst_stage_mask: vk::PipelineStageFlags2,
    dst_access_mask: vk::AccessFlags2,
) -> vk::ImageMemoryBarrier2<'static> {
    vk::ImageMemoryBarrier2::default()
        .src_stage_mask(src_stage_mask)
        .src_access_mask(src_access_mask)
        .dst_stage_mask(dst_stage_mask)
        .dst_access_mask(dst_access_mask)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_block_is_80_bytes() {
        assert_eq!(std::mem::size_of::<MeshPush>(), 80);
        assert_eq!(std::mem::size_of::<MeshPush>() as u32, super::super::pipelines::PUSH_CONSTANT_SIZE);
    }

    #[test]
    fn test_mvp_composition_order() {
        // MVP must be proj * view * model so a model-space point runs
        // through model, then view, then projection.
        let model = Mat4::from_translation(glam::Vec3::new(1.0, 0.0, 0.0));
        let view = Mat4::from_translation(glam::Vec3::new(0.0, 0.0, -6.0));
        let proj = crate::camera::projection(1.0);

        let mvp = proj * view * model;
        let direct = proj * (view * (model * glam::Vec4::new(0.0, 0.0, 0.0, 1.0)));
        let composed = mvp * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((direct - composed).length() < 1e-5);
    }
}
