//! Engine API surface: the callback table handed to the game module.
//!
//! The trampolines are plain extern "C" functions reaching a single global
//! host-state slot, the same shape the module side uses for its import
//! table. All module calls happen on lane 0 while the engine is alive, so
//! the mutex is uncontended; it exists to make the global safe to install
//! and tear down.

use glam::Vec3;
use parking_lot::Mutex;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::Arc;

use pyre_common::keys::MAX_KEYS;
use pyre_common::module_api::{qboolean, EngineApi, PYRE_API_VERSION};

use crate::frame_commands::{FrameCommands, MeshCommand, QuadCommand};
use crate::mesh::{self, MeshTable, MeshUploader, CUBE_HANDLE};
use crate::vulkan::VulkanContext;

/// Everything a module callback can touch.
pub struct HostState {
    pub frame: FrameCommands,
    pub eye: Vec3,
    pub target: Vec3,
    pub dt: f32,
    /// Set only across the module's `load` call; `load_mesh` at any other
    /// time falls back to the cube handle.
    pub allow_mesh_load: bool,
    pub keys: [bool; MAX_KEYS],
    pub meshes: MeshTable,
    pub uploader: Option<MeshUploader>,
    /// Cloned context pieces the uploader needs; present while the engine
    /// is alive.
    pub gpu: Option<GpuAccess>,
}

/// The slice of the Vulkan context mesh upload requires.
pub struct GpuAccess {
    pub ctx: Arc<VulkanContext>,
}

impl HostState {
    pub fn new() -> Self {
        Self {
            frame: FrameCommands::new(),
            eye: Vec3::new(0.0, 3.0, 6.0),
            target: Vec3::ZERO,
            dt: 0.0,
            allow_mesh_load: false,
            keys: [false; MAX_KEYS],
            meshes: MeshTable::new(),
            uploader: None,
            gpu: None,
        }
    }
}

static HOST: Mutex<Option<HostState>> = Mutex::new(None);

/// Install the host state. Called once during engine init, before the
/// module's first lifecycle call.
pub fn install(state: HostState) {
    *HOST.lock() = Some(state);
}

/// Remove and return the host state for teardown.
pub fn take() -> Option<HostState> {
    HOST.lock().take()
}

/// Run `f` against the installed host state. Returns None if the engine
/// is not alive.
pub fn with_host<R>(f: impl FnOnce(&mut HostState) -> R) -> Option<R> {
    HOST.lock().as_mut().map(f)
}

/// Record a key transition from the window layer. Lane 0 only.
pub fn set_key(code: u32, down: bool) {
    with_host(|host| {
        if let Some(slot) = host.keys.get_mut(code as usize) {
            *slot = down;
        }
    });
}

/// Build the callback table passed to every module lifecycle call.
pub fn api_table() -> EngineApi {
    EngineApi {
        api_version: PYRE_API_VERSION,
        set_clear_color: Some(cb_set_clear_color),
        draw_quad: Some(cb_draw_quad),
        set_camera: Some(cb_set_camera),
        load_mesh: Some(cb_load_mesh),
        draw_mesh: Some(cb_draw_mesh),
        draw_cube: Some(cb_draw_cube),
        log: Some(cb_log),
        get_dt: Some(cb_get_dt),
        is_key_down: Some(cb_is_key_down),
    }
}

// ============================================================
// Trampolines
// ============================================================

unsafe extern "C" fn cb_set_clear_color(r: f32, g: f32, b: f32, a: f32) {
    with_host(|host| host.frame.clear_color = [r, g, b, a]);
}

unsafe extern "C" fn cb_draw_quad(x: f32, y: f32, w: f32, h: f32, r: f32, g: f32, b: f32, a: f32) {
    with_host(|host| {
        host.frame.push_quad(QuadCommand {
            rect: [x, y, w, h],
            color: [r, g, b, a],
        })
    });
}

unsafe extern "C" fn cb_set_camera(ex: f32, ey: f32, ez: f32, tx: f32, ty: f32, tz: f32) {
    with_host(|host| {
        host.eye = Vec3::new(ex, ey, ez);
        host.target = Vec3::new(tx, ty, tz);
    });
}

unsafe extern "C" fn cb_load_mesh(path: *const c_char) -> u32 {
    if path.is_null() {
        log::warn!("load_mesh: null path, returning cube");
        return CUBE_HANDLE;
    }
    let path = match CStr::from_ptr(path).to_str() {
        Ok(s) => s.to_string(),
        Err(_) => {
            log::warn!("load_mesh: path is not UTF-8, returning cube");
            return CUBE_HANDLE;
        }
    };

    with_host(|host| {
        if !host.allow_mesh_load {
            log::warn!("load_mesh(\"{}\") outside module load, returning cube", path);
            return CUBE_HANDLE;
        }

        let (Some(uploader), Some(gpu)) = (&host.uploader, &host.gpu) else {
            log::warn!("load_mesh(\"{}\") before GPU bring-up, returning cube", path);
            return CUBE_HANDLE;
        };

        if host.meshes.slot_count() as usize >= mesh::MESH_SLOT_CAP {
            log::warn!("load_mesh(\"{}\"): mesh table exhausted, returning cube", path);
            return CUBE_HANDLE;
        }

        let (vertices, indices) = match mesh::load_gltf(std::path::Path::new(&path)) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("load_mesh(\"{}\"): {}, returning cube", path, e);
                return CUBE_HANDLE;
            }
        };

        // Device and queue are alive while the host state is installed;
        // lane 0 is the only caller.
        let (vb, ib) = match uploader.upload(&gpu.ctx, &vertices, &indices) {
            Ok(buffers) => buffers,
            Err(e) => {
                log::warn!("load_mesh(\"{}\"): upload failed: {}, returning cube", path, e);
                return CUBE_HANDLE;
            }
        };

        let vertex_count = vertices.len() as u32;
        let index_count = indices.len() as u32;
        match host.meshes.insert(vb, ib, vertex_count, index_count) {
            Ok(handle) => {
                log::info!(
                    "load_mesh(\"{}\"): handle {} ({} verts, {} indices)",
                    path,
                    handle,
                    vertex_count,
                    index_count
                );
                handle
            }
            Err((vb, ib)) => {
                log::warn!("load_mesh(\"{}\"): mesh table exhausted, returning cube", path);
                uploader.destroy_pair(vb, ib);
                CUBE_HANDLE
            }
        }
    })
    .unwrap_or(CUBE_HANDLE)
}

unsafe extern "C" fn cb_draw_mesh(handle: u32, model: *const f32, r: f32, g: f32, b: f32, a: f32) {
    if model.is_null() {
        return;
    }
    let mut cols = [0.0f32; 16];
    std::ptr::copy_nonoverlapping(model, cols.as_mut_ptr(), 16);

    with_host(|host| {
        host.frame.push_mesh(MeshCommand {
            mesh: handle,
            model: glam::Mat4::from_cols_array(&cols),
            tint: [r, g, b, a],
        })
    });
}

unsafe extern "C" fn cb_draw_cube(model: *const f32, r: f32, g: f32, b: f32, a: f32) {
    cb_draw_mesh(CUBE_HANDLE, model, r, g, b, a);
}

unsafe extern "C" fn cb_log(msg: *const c_char) {
    if msg.is_null() {
        return;
    }
    let msg = CStr::from_ptr(msg).to_string_lossy();
    log::info!(target: "game", "{}", msg);
}

unsafe extern "C" fn cb_get_dt() -> f32 {
    with_host(|host| host.dt).unwrap_or(0.0)
}

unsafe extern "C" fn cb_is_key_down(key: u32) -> qboolean {
    let down = with_host(|host| host.keys.get(key as usize).copied().unwrap_or(false))
        .unwrap_or(false);
    down as qboolean
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_fully_populated() {
        let api = api_table();
        assert_eq!(api.api_version, PYRE_API_VERSION);
        assert!(api.set_clear_color.is_some());
        assert!(api.draw_quad.is_some());
        assert!(api.set_camera.is_some());
        assert!(api.load_mesh.is_some());
        assert!(api.draw_mesh.is_some());
        assert!(api.draw_cube.is_some());
        assert!(api.log.is_some());
        assert!(api.get_dt.is_some());
        assert!(api.is_key_down.is_some());
    }

    #[test]
    fn test_callbacks_without_host_are_inert() {
        // Trampolines must not crash when the engine is gone (a module
        // misbehaving across teardown).
        let _ = take();
        unsafe {
            cb_set_clear_color(1.0, 0.0, 0.0, 1.0);
            assert_eq!(cb_get_dt(), 0.0);
            assert_eq!(cb_is_key_down(0), 0);
            assert_eq!(cb_load_mesh(c"nope.gltf".as_ptr()), CUBE_HANDLE);
        }
    }
}
