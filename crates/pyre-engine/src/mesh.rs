//! Mesh table, built-in cube, glTF decode, and GPU upload.
//!
//! A fixed table of MESH_SLOT_CAP slots, append-only: slots are assigned
//! by a monotonically increasing cursor and never freed. Slot 0 is the
//! built-in unit cube, created at engine init; it doubles as the fallback
//! handle for every mesh-load failure.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::path::Path;
use std::sync::Arc;

use crate::vulkan::{Buffer, MemoryManager, VulkanContext};

/// Fixed mesh table capacity.
pub const MESH_SLOT_CAP: usize = 64;

/// The cube handle; also the fallback for failed loads.
pub const CUBE_HANDLE: u32 = 0;

/// Interleaved vertex: position, normal, color. 40 bytes, bound at
/// binding 0 with attributes at locations 0/1/2.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 4],
}

/// A mesh table entry. Unloaded slots are skipped during recording.
#[derive(Default)]
pub struct MeshSlot {
    pub vertex_buffer: Option<Buffer>,
    pub index_buffer: Option<Buffer>,
    pub index_count: u32,
    pub vertex_count: u32,
    pub loaded: bool,
}

/// Fixed-size, append-only mesh table.
pub struct MeshTable {
    slots: Vec<MeshSlot>,
    next_slot: u32,
}

impl MeshTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MESH_SLOT_CAP);
        slots.resize_with(MESH_SLOT_CAP, MeshSlot::default);
        Self {
            slots,
            next_slot: 0,
        }
    }

    /// Claim the next slot and fill it. Returns the handle; when the table
    /// is exhausted the buffers come back so the caller can release them.
    pub fn insert(
        &mut self,
        vertex_buffer: Buffer,
        index_buffer: Buffer,
        vertex_count: u32,
        index_count: u32,
    ) -> Result<u32, (Buffer, Buffer)> {
        if self.next_slot as usize >= MESH_SLOT_CAP {
            return Err((vertex_buffer, index_buffer));
        }
        let handle = self.next_slot;
        self.next_slot += 1;

        self.slots[handle as usize] = MeshSlot {
            vertex_buffer: Some(vertex_buffer),
            index_buffer: Some(index_buffer),
            index_count,
            vertex_count,
            loaded: true,
        };
        Ok(handle)
    }

    /// The slot for a handle, only if in range and loaded.
    pub fn loaded(&self, handle: u32) -> Option<&MeshSlot> {
        self.slots
            .get(handle as usize)
            .filter(|s| s.loaded)
    }

    pub fn slot_count(&self) -> u32 {
        self.next_slot
    }

    /// Destroy every loaded slot's buffers.
    pub unsafe fn destroy_all(&mut self, memory: &MemoryManager) {
        for slot in &mut self.slots {
            if let Some(vb) = slot.vertex_buffer.take() {
                memory.destroy_buffer(vb);
            }
            if let Some(ib) = slot.index_buffer.take() {
                memory.destroy_buffer(ib);
            }
            slot.loaded = false;
        }
        self.next_slot = 0;
    }
}

impl Default for MeshTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================
// GPU upload
// ============================================================

/// Uploads mesh geometry through its own transient pool, so one-time
/// copies never touch the frame slots' pools.
pub struct MeshUploader {
    device: ash::Device,
    pool: vk::CommandPool,
    memory: Arc<MemoryManager>,
}

impl MeshUploader {
    pub unsafe fn new(ctx: &VulkanContext, memory: Arc<MemoryManager>) -> Result<Self, String> {
        let graphics_family = ctx.queue_families.graphics.ok_or("No graphics queue family")?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let pool = ctx
            .device
            .create_command_pool(&pool_info, None)
            .map_err(|e| format!("Failed to create upload pool: {:?}", e))?;

        Ok(Self {
            device: ctx.device.clone(),
            pool,
            memory,
        })
    }

    /// Stage vertex and index data into device-local buffers.
    pub unsafe fn upload(
        &self,
        ctx: &VulkanContext,
        vertices: &[MeshVertex],
        indices: &[u32],
    ) -> Result<(Buffer, Buffer), String> {
        let vb = self.memory.create_device_local_buffer(
            ctx,
            self.pool,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(vertices),
            "mesh vertices",
        )?;

        let ib = match self.memory.create_device_local_buffer(
            ctx,
            self.pool,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(indices),
            "mesh indices",
        ) {
            Ok(ib) => ib,
            Err(e) => {
                self.memory.destroy_buffer(vb);
                return Err(e);
            }
        };

        Ok((vb, ib))
    }

    /// Release a vertex/index pair that never made it into the table.
    pub unsafe fn destroy_pair(&self, vb: Buffer, ib: Buffer) {
        self.memory.destroy_buffer(vb);
        self.memory.destroy_buffer(ib);
    }

    pub unsafe fn destroy(&mut self) {
        if self.pool != vk::CommandPool::null() {
            self.device.destroy_command_pool(self.pool, None);
            self.pool = vk::CommandPool::null();
        }
    }
}

// ============================================================
// Geometry sources
// ============================================================

/// The built-in unit cube: 24 vertices with per-face normals, 36 indices.
/// Faces are wound clockwise seen from outside; the projection's Y flip
/// turns them counter-clockwise in framebuffer space, which is the mesh
/// pipeline's front face.
pub fn cube_geometry() -> (Vec<MeshVertex>, Vec<u32>) {
    const WHITE: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

    // (normal, four corners counter-clockwise from outside; emitted
    // reversed below)
    let faces: [([f32; 3], [[f32; 3]; 4]); 6] = [
        // +X
        (
            [1.0, 0.0, 0.0],
            [
                [0.5, -0.5, 0.5],
                [0.5, -0.5, -0.5],
                [0.5, 0.5, -0.5],
                [0.5, 0.5, 0.5],
            ],
        ),
        // -X
        (
            [-1.0, 0.0, 0.0],
            [
                [-0.5, -0.5, -0.5],
                [-0.5, -0.5, 0.5],
                [-0.5, 0.5, 0.5],
                [-0.5, 0.5, -0.5],
            ],
        ),
        // +Y
        (
            [0.0, 1.0, 0.0],
            [
                [-0.5, 0.5, 0.5],
                [0.5, 0.5, 0.5],
                [0.5, 0.5, -0.5],
                [-0.5, 0.5, -0.5],
            ],
        ),
        // -Y
        (
            [0.0, -1.0, 0.0],
            [
                [-0.5, -0.5, -0.5],
                [0.5, -0.5, -0.5],
                [0.5, -0.5, 0.5],
                [-0.5, -0.5, 0.5],
            ],
        ),
        // +Z
        (
            [0.0, 0.0, 1.0],
            [
                [-0.5, -0.5, 0.5],
                [0.5, -0.5, 0.5],
                [0.5, 0.5, 0.5],
                [-0.5, 0.5, 0.5],
            ],
        ),
        // -Z
        (
            [0.0, 0.0, -1.0],
            [
                [0.5, -0.5, -0.5],
                [-0.5, -0.5, -0.5],
                [-0.5, 0.5, -0.5],
                [0.5, 0.5, -0.5],
            ],
        ),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, corners) in &faces {
        let base = vertices.len() as u32;
        for corner in corners {
            vertices.push(MeshVertex {
                pos: *corner,
                normal: *normal,
                color: WHITE,
            });
        }
        indices.extend_from_slice(&[base, base + 2, base + 1, base, base + 3, base + 2]);
    }

    (vertices, indices)
}

/// Decode the first primitive of the first mesh in a glTF file into the
/// engine's vertex layout. Missing normals fall back to +Y; vertex color
/// is constant white (tint carries per-draw color).
pub fn load_gltf(path: &Path) -> Result<(Vec<MeshVertex>, Vec<u32>), String> {
    let (document, buffers, _images) = gltf::import(path)
        .map_err(|e| format!("glTF import of {:?} failed: {}", path, e))?;

    let mesh = document
        .meshes()
        .next()
        .ok_or_else(|| format!("glTF {:?} contains no mesh", path))?;

    let primitive = mesh
        .primitives()
        .next()
        .ok_or_else(|| format!("glTF {:?} mesh has no primitives", path))?;

    let reader = primitive.reader(|b| buffers.get(b.index()).map(|d| d.0.as_slice()));

    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .ok_or_else(|| format!("glTF {:?} primitive has no positions", path))?
        .collect();

    if positions.is_empty() {
        return Err(format!("glTF {:?} has empty geometry", path));
    }

    let normals: Vec<[f32; 3]> = match reader.read_normals() {
        Some(iter) => iter.collect(),
        None => vec![[0.0, 1.0, 0.0]; positions.len()],
    };

    let vertices: Vec<MeshVertex> = positions
        .iter()
        .zip(normals.iter())
        .map(|(pos, normal)| MeshVertex {
            pos: *pos,
            normal: *normal,
            color: [1.0, 1.0, 1.0, 1.0],
        })
        .collect();

    let indices: Vec<u32> = match reader.read_indices() {
        Some(iter) => iter.into_u32().collect(),
        None => (0..vertices.len() as u32).collect(),
    };

    if indices.is_empty() {
        return Err(format!("glTF {:?} has no indices", path));
    }

    Ok((vertices, indices))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_vertex_is_40_bytes() {
        assert_eq!(std::mem::size_of::<MeshVertex>(), 40);
    }

    #[test]
    fn test_vertex_attribute_offsets() {
        assert_eq!(std::mem::offset_of!(MeshVertex, pos), 0);
        assert_eq!(std::mem::offset_of!(MeshVertex, normal), 12);
        assert_eq!(std::mem::offset_of!(MeshVertex, color), 24);
    }

    #[test]
    fn test_cube_geometry_counts() {
        let (vertices, indices) = cube_geometry();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn test_cube_normals_are_unit_axes() {
        let (vertices, _) = cube_geometry();
        for v in &vertices {
            let len: f32 = v.normal.iter().map(|c| c * c).sum();
            assert!((len - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_table_append_only_cursor() {
        let mut table = MeshTable::new();
        assert_eq!(table.slot_count(), 0);
        assert!(table.loaded(0).is_none());

        // Handles come out in allocation order.
        for expected in 0..MESH_SLOT_CAP as u32 {
            let handle = table.insert(Buffer::null_test(), Buffer::null_test(), 3, 3);
            assert_eq!(handle.ok(), Some(expected));
        }

        // 65th allocation exceeds the table; the buffers come back.
        assert!(table
            .insert(Buffer::null_test(), Buffer::null_test(), 3, 3)
            .is_err());
        assert_eq!(table.slot_count(), MESH_SLOT_CAP as u32);
    }

    #[test]
    fn test_unloaded_and_out_of_range_skipped() {
        let mut table = MeshTable::new();
        let _ = table.insert(Buffer::null_test(), Buffer::null_test(), 3, 3);

        assert!(table.loaded(0).is_some());
        assert!(table.loaded(1).is_none());
        assert!(table.loaded(MESH_SLOT_CAP as u32).is_none());
        assert!(table.loaded(u32::MAX).is_none());
    }
}

#[cfg(test)]
impl Buffer {
    /// Handle-free stand-in for table tests; never touches the device.
    fn null_test() -> Buffer {
        Buffer {
            handle: ash::vk::Buffer::null(),
            allocation: None,
            size: 0,
            usage: ash::vk::BufferUsageFlags::empty(),
        }
    }
}
