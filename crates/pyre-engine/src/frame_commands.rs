//! Per-frame draw command record.
//!
//! Built up by module callbacks during `update`, uploaded and recorded by
//! lane 0, cleared at the top of the next frame. Append order is draw
//! order for both command kinds.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::vulkan::MAX_QUADS;

/// One bindless quad. Layout matches the SSBO entry the quad vertex
/// shader indexes by `gl_InstanceIndex`: rect = (x, y, w, h) in clip-space
/// NDC with +y up, then RGBA.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QuadCommand {
    pub rect: [f32; 4],
    pub color: [f32; 4],
}

/// One mesh draw: table handle, column-major model matrix, RGBA tint.
#[derive(Debug, Clone, Copy)]
pub struct MeshCommand {
    pub mesh: u32,
    pub model: Mat4,
    pub tint: [f32; 4],
}

/// Everything the module asked to draw this frame.
pub struct FrameCommands {
    pub clear_color: [f32; 4],
    pub quads: Vec<QuadCommand>,
    pub meshes: Vec<MeshCommand>,
    overflow_warned: bool,
}

impl FrameCommands {
    pub fn new() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            quads: Vec::with_capacity(MAX_QUADS),
            meshes: Vec::new(),
            overflow_warned: false,
        }
    }

    /// Reset for a new frame. Keeps capacity.
    pub fn begin_frame(&mut self) {
        self.clear_color = [0.0, 0.0, 0.0, 1.0];
        self.quads.clear();
        self.meshes.clear();
        self.overflow_warned = false;
    }

    /// Append a quad; past MAX_QUADS the command is dropped and the first
    /// drop per frame logged.
    pub fn push_quad(&mut self, quad: QuadCommand) {
        if self.quads.len() >= MAX_QUADS {
            if !self.overflow_warned {
                log::warn!("quad overflow: frame already holds {} quads, dropping", MAX_QUADS);
                self.overflow_warned = true;
            }
            return;
        }
        self.quads.push(quad);
    }

    pub fn push_mesh(&mut self, command: MeshCommand) {
        self.meshes.push(command);
    }
}

impl Default for FrameCommands {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_command_is_32_bytes() {
        // Fixed to match the GPU-side std430 layout.
        assert_eq!(std::mem::size_of::<QuadCommand>(), 32);
    }

    #[test]
    fn test_append_order_preserved() {
        let mut frame = FrameCommands::new();
        for i in 0..10 {
            frame.push_quad(QuadCommand {
                rect: [i as f32, 0.0, 1.0, 1.0],
                color: [0.0; 4],
            });
        }
        for (i, q) in frame.quads.iter().enumerate() {
            assert_eq!(q.rect[0], i as f32);
        }
    }

    #[test]
    fn test_quad_cap() {
        let mut frame = FrameCommands::new();
        let quad = QuadCommand {
            rect: [0.0; 4],
            color: [0.0; 4],
        };
        for _ in 0..MAX_QUADS + 100 {
            frame.push_quad(quad);
        }
        assert_eq!(frame.quads.len(), MAX_QUADS);
    }

    #[test]
    fn test_begin_frame_resets() {
        let mut frame = FrameCommands::new();
        frame.clear_color = [0.5; 4];
        frame.push_quad(QuadCommand {
            rect: [0.0; 4],
            color: [0.0; 4],
        });
        frame.push_mesh(MeshCommand {
            mesh: 0,
            model: Mat4::IDENTITY,
            tint: [1.0; 4],
        });

        frame.begin_frame();
        assert!(frame.quads.is_empty());
        assert!(frame.meshes.is_empty());
        assert_eq!(frame.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }
}
