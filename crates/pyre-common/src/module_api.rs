// module_api.rs — C-compatible FFI types for the game module interface
//
// These types are shared by the engine host (which builds the callback
// table and resolves the module's exports) and by the game module built as
// a dynamic library. Layout must stay stable across hot reloads of the
// same engine binary.

#![allow(non_camel_case_types)]

use std::os::raw::c_char;

/// Engine API version - must match between engine and game module.
/// The module's `get_api_version` export returns this constant or the
/// load is rejected.
pub const PYRE_API_VERSION: u32 = 1;

/// C-style boolean (int).
pub type qboolean = i32;

/// Callback table the engine passes to every module lifecycle call.
///
/// All function pointers are `Option` so a partially initialized table is
/// representable; the engine always fills every slot. The module calls
/// back through these to append draw commands for the current frame.
///
/// Matrices are 16 consecutive f32 in column-major order.
#[repr(C)]
pub struct EngineApi {
    /// Always `PYRE_API_VERSION` for this engine binary.
    pub api_version: u32,

    /// Overwrite the frame's clear color (RGBA).
    pub set_clear_color: Option<unsafe extern "C" fn(r: f32, g: f32, b: f32, a: f32)>,

    /// Append a quad: rect = (x, y, w, h) in clip-space NDC, +y up.
    pub draw_quad:
        Option<unsafe extern "C" fn(x: f32, y: f32, w: f32, h: f32, r: f32, g: f32, b: f32, a: f32)>,

    /// Overwrite the camera eye and target.
    pub set_camera:
        Option<unsafe extern "C" fn(ex: f32, ey: f32, ez: f32, tx: f32, ty: f32, tz: f32)>,

    /// Register a glTF mesh; only honored during the module's `load` call.
    /// Returns a mesh handle, or the cube handle (0) on failure.
    pub load_mesh: Option<unsafe extern "C" fn(path: *const c_char) -> u32>,

    /// Append a mesh draw: handle, column-major model matrix, RGBA tint.
    pub draw_mesh:
        Option<unsafe extern "C" fn(handle: u32, model: *const f32, r: f32, g: f32, b: f32, a: f32)>,

    /// Shorthand for `draw_mesh(0, model, ...)` - the built-in unit cube.
    pub draw_cube: Option<unsafe extern "C" fn(model: *const f32, r: f32, g: f32, b: f32, a: f32)>,

    /// Forward a message to the engine's log sink.
    pub log: Option<unsafe extern "C" fn(msg: *const c_char)>,

    /// Frame delta in seconds, never negative.
    pub get_dt: Option<unsafe extern "C" fn() -> f32>,

    /// Non-blocking query of the current key state. `key` is a
    /// `crate::keys::Key` discriminant.
    pub is_key_down: Option<unsafe extern "C" fn(key: u32) -> qboolean>,
}

// ============================================================
// Module exports
// ============================================================
//
// The module is a dynamic library exporting exactly six C-callable
// symbols, resolved by name:
//
//   get_api_version  () -> u32
//   get_memory_size  () -> usize
//   load             (api, mem, size)
//   update           (api, mem, size)
//   unload           (api, mem, size)
//   reload           (api, mem, size)
//
// `mem` is an opaque byte buffer owned by the engine, sized once by
// `get_memory_size` and preserved across reloads. The module reinterprets
// those bytes on every call and must not rely on internal pointer
// stability of anything it stores there.

pub type GetApiVersionFn = unsafe extern "C" fn() -> u32;
pub type GetMemorySizeFn = unsafe extern "C" fn() -> usize;
pub type ModuleLifecycleFn = unsafe extern "C" fn(api: *const EngineApi, mem: *mut u8, size: usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_version_is_one() {
        assert_eq!(PYRE_API_VERSION, 1);
    }

    #[test]
    fn test_table_starts_with_version() {
        // The version integer must be the first field so a module can
        // reject a table before trusting any pointer in it.
        let api = EngineApi {
            api_version: PYRE_API_VERSION,
            set_clear_color: None,
            draw_quad: None,
            set_camera: None,
            load_mesh: None,
            draw_mesh: None,
            draw_cube: None,
            log: None,
            get_dt: None,
            is_key_down: None,
        };
        let base = &api as *const EngineApi as usize;
        let version = &api.api_version as *const u32 as usize;
        assert_eq!(base, version);
    }

    #[test]
    fn test_table_is_pointer_dense() {
        // 9 function pointers plus the (padded) version word.
        let ptr = std::mem::size_of::<usize>();
        assert_eq!(std::mem::size_of::<EngineApi>(), ptr + 9 * ptr);
    }
}
