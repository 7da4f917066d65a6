//! Safe wrapper over the engine's callback table.
//!
//! The raw table is `Option`-filled C function pointers; this folds the
//! unwrap-and-unsafe into one place so game code stays plain Rust.

use std::ffi::CString;

use pyre_common::keys::Key;
use pyre_common::module_api::{EngineApi, PYRE_API_VERSION};

pub struct Host<'a> {
    api: &'a EngineApi,
}

impl<'a> Host<'a> {
    pub fn new(api: &'a EngineApi) -> Self {
        Self { api }
    }

    /// Wrap the raw pointer the engine passes across the ABI. Rejects
    /// null and version-mismatched tables.
    ///
    /// # Safety
    /// `api` must point to a live `EngineApi` for the duration of the
    /// current lifecycle call.
    pub unsafe fn from_raw(api: *const EngineApi) -> Option<Host<'a>> {
        if api.is_null() {
            return None;
        }
        let api = &*api;
        if api.api_version != PYRE_API_VERSION {
            return None;
        }
        Some(Host { api })
    }

    pub fn log(&self, msg: &str) {
        if let Some(f) = self.api.log {
            if let Ok(c) = CString::new(msg) {
                unsafe { f(c.as_ptr()) };
            }
        }
    }

    pub fn dt(&self) -> f32 {
        match self.api.get_dt {
            Some(f) => unsafe { f() },
            None => 0.0,
        }
    }

    pub fn key_down(&self, key: Key) -> bool {
        match self.api.is_key_down {
            Some(f) => unsafe { f(key.code()) != 0 },
            None => false,
        }
    }

    pub fn set_clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        if let Some(f) = self.api.set_clear_color {
            unsafe { f(r, g, b, a) };
        }
    }

    pub fn set_camera(&self, eye: [f32; 3], target: [f32; 3]) {
        if let Some(f) = self.api.set_camera {
            unsafe { f(eye[0], eye[1], eye[2], target[0], target[1], target[2]) };
        }
    }

    pub fn draw_quad(&self, x: f32, y: f32, w: f32, h: f32, color: [f32; 4]) {
        if let Some(f) = self.api.draw_quad {
            unsafe { f(x, y, w, h, color[0], color[1], color[2], color[3]) };
        }
    }

    pub fn draw_mesh(&self, handle: u32, model: &[f32; 16], tint: [f32; 4]) {
        if let Some(f) = self.api.draw_mesh {
            unsafe { f(handle, model.as_ptr(), tint[0], tint[1], tint[2], tint[3]) };
        }
    }

    pub fn draw_cube(&self, model: &[f32; 16], tint: [f32; 4]) {
        if let Some(f) = self.api.draw_cube {
            unsafe { f(model.as_ptr(), tint[0], tint[1], tint[2], tint[3]) };
        }
    }

    /// Register a glTF mesh. Only honored inside `load`; elsewhere the
    /// engine returns the cube handle.
    pub fn load_mesh(&self, path: &str) -> u32 {
        if let Some(f) = self.api.load_mesh {
            if let Ok(c) = CString::new(path) {
                return unsafe { f(c.as_ptr()) };
            }
        }
        0
    }
}

/// Stub callback table that records call counts, for exercising game
/// logic without an engine.
#[cfg(test)]
pub mod tests_support {
    use pyre_common::module_api::{qboolean, EngineApi, PYRE_API_VERSION};
    use std::os::raw::c_char;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Mutex, MutexGuard, OnceLock};

    static QUADS: AtomicU32 = AtomicU32::new(0);
    static MESHES: AtomicU32 = AtomicU32::new(0);
    static CLEARS: AtomicU32 = AtomicU32::new(0);
    static DT_BITS: AtomicU32 = AtomicU32::new(0);

    /// The recorders are globals; tests that use them must run one at a
    /// time.
    pub fn serial() -> MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    unsafe extern "C" fn rec_clear(_r: f32, _g: f32, _b: f32, _a: f32) {
        CLEARS.fetch_add(1, Ordering::Relaxed);
    }

    unsafe extern "C" fn rec_quad(
        _x: f32,
        _y: f32,
        _w: f32,
        _h: f32,
        _r: f32,
        _g: f32,
        _b: f32,
        _a: f32,
    ) {
        QUADS.fetch_add(1, Ordering::Relaxed);
    }

    unsafe extern "C" fn rec_camera(_ex: f32, _ey: f32, _ez: f32, _tx: f32, _ty: f32, _tz: f32) {}

    unsafe extern "C" fn rec_load_mesh(_path: *const c_char) -> u32 {
        0
    }

    unsafe extern "C" fn rec_mesh(
        _handle: u32,
        _model: *const f32,
        _r: f32,
        _g: f32,
        _b: f32,
        _a: f32,
    ) {
        MESHES.fetch_add(1, Ordering::Relaxed);
    }

    unsafe extern "C" fn rec_cube(model: *const f32, r: f32, g: f32, b: f32, a: f32) {
        rec_mesh(0, model, r, g, b, a);
    }

    unsafe extern "C" fn rec_log(_msg: *const c_char) {}

    unsafe extern "C" fn rec_dt() -> f32 {
        f32::from_bits(DT_BITS.load(Ordering::Relaxed))
    }

    unsafe extern "C" fn rec_key(_key: u32) -> qboolean {
        0
    }

    /// Reset the recorders and build a table returning the given dt.
    pub fn recording_api(dt: f32) -> EngineApi {
        QUADS.store(0, Ordering::Relaxed);
        MESHES.store(0, Ordering::Relaxed);
        CLEARS.store(0, Ordering::Relaxed);
        DT_BITS.store(dt.to_bits(), Ordering::Relaxed);

        EngineApi {
            api_version: PYRE_API_VERSION,
            set_clear_color: Some(rec_clear),
            draw_quad: Some(rec_quad),
            set_camera: Some(rec_camera),
            load_mesh: Some(rec_load_mesh),
            draw_mesh: Some(rec_mesh),
            draw_cube: Some(rec_cube),
            log: Some(rec_log),
            get_dt: Some(rec_dt),
            is_key_down: Some(rec_key),
        }
    }

    pub struct RecordedCalls {
        pub quads: u32,
        pub meshes: u32,
        pub clears: u32,
    }

    impl RecordedCalls {
        pub fn snapshot() -> Self {
            Self {
                quads: QUADS.load(Ordering::Relaxed),
                meshes: MESHES.load(Ordering::Relaxed),
                clears: CLEARS.load(Ordering::Relaxed),
            }
        }
    }
}
