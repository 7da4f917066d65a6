//! Sample game module logic: a spinning cube over a sky-blue clear, two
//! overlapping corner quads, and WASD camera movement.
//!
//! Everything here operates on a byte buffer owned by the engine and
//! reinterpreted on every call, so state survives hot reloads of the
//! library. No pointers into the buffer are kept anywhere.

pub mod host;

use glam::Mat4;

use host::Host;
use pyre_common::keys::Key;

/// A marker stamped into fresh state so `update` can tell an initialized
/// buffer from the zeroed block the engine hands out.
const STATE_MAGIC: u32 = 0x50595245; // "PYRE"

/// Module state, preserved across hot reloads. Plain data only: the
/// buffer is reinterpreted each call and must not hold internal pointers.
#[repr(C)]
pub struct GameState {
    pub magic: u32,
    pub time: f32,
    pub eye: [f32; 3],
    pub reload_count: u32,
}

impl GameState {
    fn init(&mut self) {
        self.magic = STATE_MAGIC;
        self.time = 0.0;
        self.eye = [0.0, 3.0, 6.0];
        self.reload_count = 0;
    }
}

/// Bytes the engine must allocate for module state.
pub fn memory_size() -> usize {
    std::mem::size_of::<GameState>()
}

/// Reinterpret the engine's byte buffer as game state.
///
/// # Safety
/// `mem` must point to at least `size` bytes, 16-byte aligned, owned by
/// the engine for the module's lifetime.
pub unsafe fn state_from(mem: *mut u8, size: usize) -> Option<&'static mut GameState> {
    if mem.is_null() || size < std::mem::size_of::<GameState>() {
        return None;
    }
    Some(&mut *(mem as *mut GameState))
}

/// Called once per load; the only call during which mesh loading is
/// honored.
pub fn load(host: &Host, state: &mut GameState) {
    state.init();
    host.set_camera(state.eye, [0.0, 0.0, 0.0]);
    host.log("game loaded");
}

/// Called once per frame.
pub fn update(host: &Host, state: &mut GameState) {
    if state.magic != STATE_MAGIC {
        // A reload landed on a buffer this build has never seen.
        state.init();
    }

    let dt = host.dt();
    state.time += dt;

    // Move the eye on the XZ plane; raw key state, no mapping.
    const SPEED: f32 = 4.0;
    if host.key_down(Key::W) {
        state.eye[2] -= SPEED * dt;
    }
    if host.key_down(Key::S) {
        state.eye[2] += SPEED * dt;
    }
    if host.key_down(Key::A) {
        state.eye[0] -= SPEED * dt;
    }
    if host.key_down(Key::D) {
        state.eye[0] += SPEED * dt;
    }

    host.set_camera(state.eye, [0.0, 0.0, 0.0]);
    host.set_clear_color(0.53, 0.81, 0.92, 1.0);

    let model = Mat4::from_rotation_y(state.time);
    host.draw_cube(&model.to_cols_array(), [0.8, 0.4, 0.2, 1.0]);

    // Overlapping quads; the later one wins in the overlap.
    host.draw_quad(-0.9, -0.9, 0.4, 0.4, [1.0, 0.0, 0.0, 1.0]);
    host.draw_quad(-0.7, -0.7, 0.4, 0.4, [0.0, 1.0, 0.0, 1.0]);
}

/// Called before the library is unloaded; state stays behind.
pub fn unload(host: &Host, state: &mut GameState) {
    host.log(&format!("game unloading at t={:.2}", state.time));
}

/// Called after a successful hot reload, against the preserved buffer.
pub fn reload(host: &Host, state: &mut GameState) {
    if state.magic != STATE_MAGIC {
        state.init();
    }
    state.reload_count += 1;
    host.log(&format!(
        "game reloaded ({} times, t={:.2})",
        state.reload_count, state.time
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use host::tests_support::{recording_api, RecordedCalls};

    /// State buffer with the arena's alignment, not Vec<u8>'s.
    fn aligned_state_buffer() -> Vec<u64> {
        vec![0u64; memory_size().div_ceil(8)]
    }

    #[test]
    fn test_state_fits_reported_size() {
        assert!(memory_size() >= std::mem::size_of::<GameState>());
    }

    #[test]
    fn test_state_from_rejects_short_buffer() {
        let mut buf = [0u8; 4];
        unsafe {
            assert!(state_from(buf.as_mut_ptr(), buf.len()).is_none());
            assert!(state_from(std::ptr::null_mut(), 1024).is_none());
        }
    }

    #[test]
    fn test_update_accumulates_time_and_draws() {
        let _serial = host::tests_support::serial();
        let api = recording_api(1.0 / 60.0);
        let host = Host::new(&api);

        let mut buf = aligned_state_buffer();
        let state = unsafe { state_from(buf.as_mut_ptr() as *mut u8, memory_size()) }.unwrap();

        load(&host, state);
        update(&host, state);
        update(&host, state);

        assert!((state.time - 2.0 / 60.0).abs() < 1e-6);

        let calls = RecordedCalls::snapshot();
        // Each update: one cube and two quads.
        assert_eq!(calls.quads, 4);
        assert_eq!(calls.meshes, 2);
        assert_eq!(calls.clears, 2);
    }

    #[test]
    fn test_reload_preserves_time() {
        let _serial = host::tests_support::serial();
        let api = recording_api(0.1);
        let host = Host::new(&api);

        let mut buf = aligned_state_buffer();
        let state = unsafe { state_from(buf.as_mut_ptr() as *mut u8, memory_size()) }.unwrap();

        load(&host, state);
        update(&host, state);
        let t = state.time;

        unload(&host, state);
        reload(&host, state);

        assert_eq!(state.time, t);
        assert_eq!(state.reload_count, 1);
    }
}
