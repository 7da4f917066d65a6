// pyre-game-dll — the game module built as a dynamic library (libgame)
//
// The engine resolves exactly these six C symbols by name, passes its
// callback table and an opaque state buffer to every lifecycle call, and
// may unload and reload this library at any frame boundary. All real
// logic lives in pyre-game; this crate is only the ABI shell.

use pyre_common::module_api::{EngineApi, PYRE_API_VERSION};
use pyre_game::host::Host;

/// Must return the engine's ABI constant or the load is rejected.
#[no_mangle]
pub unsafe extern "C" fn get_api_version() -> u32 {
    PYRE_API_VERSION
}

/// Bytes the engine must allocate for module state. Called once at the
/// initial load; the block is preserved across reloads.
#[no_mangle]
pub unsafe extern "C" fn get_memory_size() -> usize {
    pyre_game::memory_size()
}

#[no_mangle]
pub unsafe extern "C" fn load(api: *const EngineApi, mem: *mut u8, size: usize) {
    dispatch(api, mem, size, pyre_game::load);
}

#[no_mangle]
pub unsafe extern "C" fn update(api: *const EngineApi, mem: *mut u8, size: usize) {
    dispatch(api, mem, size, pyre_game::update);
}

#[no_mangle]
pub unsafe extern "C" fn unload(api: *const EngineApi, mem: *mut u8, size: usize) {
    dispatch(api, mem, size, pyre_game::unload);
}

#[no_mangle]
pub unsafe extern "C" fn reload(api: *const EngineApi, mem: *mut u8, size: usize) {
    dispatch(api, mem, size, pyre_game::reload);
}

/// Validate the table and buffer, then hand off to game logic.
unsafe fn dispatch(
    api: *const EngineApi,
    mem: *mut u8,
    size: usize,
    f: fn(&Host, &mut pyre_game::GameState),
) {
    let Some(host) = Host::from_raw(api) else {
        return;
    };
    let Some(state) = pyre_game::state_from(mem, size) else {
        host.log("game: state buffer too small, skipping call");
        return;
    };
    f(&host, state);
}
