//! The two graphics pipelines, built for dynamic rendering.
//!
//! Quad: bindless — no vertex input, all quads read from the frame's SSBO
//! by instance index. Mesh: interleaved 40-byte vertices, depth tested,
//! MVP + tint in an 80-byte push-constant block. Both declare attachment
//! formats through `PipelineRenderingCreateInfo` and are rebuilt whenever
//! the swapchain format can have changed.

use ash::vk;
use std::io::Cursor;

use super::{VulkanContext, DEPTH_FORMAT};
use crate::mesh::MeshVertex;

// ============================================================================
// SPIR-V bytecode (compiled at build time by glslc)
// ============================================================================

macro_rules! spv {
    ($name:expr) => {
        include_bytes!(concat!(env!("OUT_DIR"), "/spirv/", $name))
    };
}

const QUAD_VERT_SPV: &[u8] = spv!("quad.vert.spv");
const QUAD_FRAG_SPV: &[u8] = spv!("quad.frag.spv");
const MESH_VERT_SPV: &[u8] = spv!("mesh.vert.spv");
const MESH_FRAG_SPV: &[u8] = spv!("mesh.frag.spv");

/// Size of the mesh push-constant block: mat4 MVP + vec4 tint.
pub const PUSH_CONSTANT_SIZE: u32 = 80;

pub struct Pipelines {
    pub quad: vk::Pipeline,
    pub quad_layout: vk::PipelineLayout,
    pub mesh: vk::Pipeline,
    pub mesh_layout: vk::PipelineLayout,
    device: ash::Device,
}

impl Pipelines {
    pub unsafe fn new(
        ctx: &VulkanContext,
        color_format: vk::Format,
        set_layout: vk::DescriptorSetLayout,
    ) -> Result<Self, String> {
        let quad_vert = create_shader_module(&ctx.device, QUAD_VERT_SPV)?;
        let quad_frag = create_shader_module(&ctx.device, QUAD_FRAG_SPV)?;
        let mesh_vert = create_shader_module(&ctx.device, MESH_VERT_SPV)?;
        let mesh_frag = create_shader_module(&ctx.device, MESH_FRAG_SPV)?;

        let result = Self::build(ctx, color_format, set_layout, quad_vert, quad_frag, mesh_vert, mesh_frag);

        ctx.device.destroy_shader_module(quad_vert, None);
        ctx.device.destroy_shader_module(quad_frag, None);
        ctx.device.destroy_shader_module(mesh_vert, None);
        ctx.device.destroy_shader_module(mesh_frag, None);

        result
    }

    unsafe fn build(
        ctx: &VulkanContext,
        color_format: vk::Format,
        set_layout: vk::DescriptorSetLayout,
        quad_vert: vk::ShaderModule,
        quad_frag: vk::ShaderModule,
        mesh_vert: vk::ShaderModule,
        mesh_frag: vk::ShaderModule,
    ) -> Result<Self, String> {
        // Shared fixed state.
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let blend_attachment = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];

        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachment);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [color_format];

        // ------------------------------------------------------------------
        // Quad pipeline
        // ------------------------------------------------------------------

        let quad_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(quad_vert)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(quad_frag)
                .name(c"main"),
        ];

        // Bindless: the vertex shader synthesizes the quad corners.
        let quad_vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let quad_raster = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1.0);

        let quad_depth = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(false)
            .depth_write_enable(false);

        let set_layouts = [set_layout];
        let quad_layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let quad_layout = ctx
            .device
            .create_pipeline_layout(&quad_layout_info, None)
            .map_err(|e| format!("Failed to create quad pipeline layout: {:?}", e))?;

        // Both pipelines draw inside the same rendering instance, so the
        // quad pipeline declares the depth format too; its tests are off.
        let mut quad_rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(DEPTH_FORMAT);

        let quad_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&quad_stages)
            .vertex_input_state(&quad_vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&quad_raster)
            .multisample_state(&multisample)
            .depth_stencil_state(&quad_depth)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(quad_layout)
            .push_next(&mut quad_rendering);

        // ------------------------------------------------------------------
        // Mesh pipeline
        // ------------------------------------------------------------------

        let mesh_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(mesh_vert)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(mesh_frag)
                .name(c"main"),
        ];

        let vertex_bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<MeshVertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];

        let vertex_attributes = [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: 24,
            },
        ];

        let mesh_vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let mesh_raster = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let mesh_depth = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS);

        let push_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: PUSH_CONSTANT_SIZE,
        }];

        let mesh_layout_info =
            vk::PipelineLayoutCreateInfo::default().push_constant_ranges(&push_ranges);
        let mesh_layout = ctx
            .device
            .create_pipeline_layout(&mesh_layout_info, None)
            .map_err(|e| format!("Failed to create mesh pipeline layout: {:?}", e))?;

        let mut mesh_rendering = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(DEPTH_FORMAT);

        let mesh_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&mesh_stages)
            .vertex_input_state(&mesh_vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&mesh_raster)
            .multisample_state(&multisample)
            .depth_stencil_state(&mesh_depth)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(mesh_layout)
            .push_next(&mut mesh_rendering);

        let pipelines = ctx
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[quad_info, mesh_info], None)
            .map_err(|(_, e)| format!("Failed to create graphics pipelines: {:?}", e))?;

        Ok(Self {
            quad: pipelines[0],
            quad_layout,
            mesh: pipelines[1],
            mesh_layout,
            device: ctx.device.clone(),
        })
    }

    pub unsafe fn destroy(&mut self) {
        for pipeline in [self.quad, self.mesh] {
            if pipeline != vk::Pipeline::null() {
                self.device.destroy_pipeline(pipeline, None);
            }
        }
        for layout in [self.quad_layout, self.mesh_layout] {
            if layout != vk::PipelineLayout::null() {
                self.device.destroy_pipeline_layout(layout, None);
            }
        }
        self.quad = vk::Pipeline::null();
        self.mesh = vk::Pipeline::null();
        self.quad_layout = vk::PipelineLayout::null();
        self.mesh_layout = vk::PipelineLayout::null();
    }
}

/// Create a shader module from embedded SPIR-V bytes.
unsafe fn create_shader_module(
    device: &ash::Device,
    bytes: &[u8],
) -> Result<vk::ShaderModule, String> {
    let code = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| format!("Invalid SPIR-V: {:?}", e))?;

    let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

    device
        .create_shader_module(&create_info, None)
        .map_err(|e| format!("Failed to create shader module: {:?}", e))
}
