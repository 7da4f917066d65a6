//! Module host: loads the reloadable game library and forwards lifecycle
//! calls.
//!
//! The library bytes are copied to a sidecar path and loaded from there,
//! so the OS lock lands on the copy and a build tool can overwrite the
//! real file while the engine runs. Lane 0 compares the source file's
//! last-write-time each frame; on change the engine device-waits, calls
//! `unload`, swaps the library, and calls `reload` against the preserved
//! state buffer.

use libloading::Library;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::time::SystemTime;

use pyre_common::arena::Arena;
use pyre_common::module_api::{
    EngineApi, GetApiVersionFn, GetMemorySizeFn, ModuleLifecycleFn, PYRE_API_VERSION,
};

use crate::error::EngineError;

/// Platform-specific library file name.
#[cfg(target_os = "windows")]
pub const MODULE_FILE_NAME: &str = "game.dll";
#[cfg(target_os = "macos")]
pub const MODULE_FILE_NAME: &str = "libgame.dylib";
#[cfg(all(unix, not(target_os = "macos")))]
pub const MODULE_FILE_NAME: &str = "libgame.so";

/// The six resolved exports. Raw function pointers copied out of the
/// library; valid exactly as long as `ModuleHost::lib` is alive.
struct ModuleSymbols {
    load: ModuleLifecycleFn,
    update: ModuleLifecycleFn,
    unload: ModuleLifecycleFn,
    reload: ModuleLifecycleFn,
}

pub struct ModuleHost {
    source_path: PathBuf,
    loaded_path: PathBuf,
    lib: Option<Library>,
    symbols: Option<ModuleSymbols>,
    /// The callback table; boxed so its address is stable across reloads.
    api: Box<EngineApi>,
    /// Module state block in the app arena. Address and contents are
    /// preserved across reloads.
    memory: Option<NonNull<u8>>,
    memory_len: usize,
    last_write: Option<SystemTime>,
}

impl ModuleHost {
    /// Locate the module next to the executable or in the working
    /// directory.
    pub fn find_module() -> Option<PathBuf> {
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let path = dir.join(MODULE_FILE_NAME);
                if path.exists() {
                    return Some(path);
                }
            }
        }

        let path = PathBuf::from(MODULE_FILE_NAME);
        if path.exists() {
            return Some(path);
        }

        None
    }

    pub fn new(source_path: PathBuf, api: EngineApi) -> Self {
        let loaded_path = sidecar_path(&source_path);
        Self {
            source_path,
            loaded_path,
            lib: None,
            symbols: None,
            api: Box::new(api),
            memory: None,
            memory_len: 0,
            last_write: None,
        }
    }

    pub fn api_ptr(&self) -> *const EngineApi {
        &*self.api
    }

    pub fn is_loaded(&self) -> bool {
        self.symbols.is_some()
    }

    /// Initial load: read, sidecar, resolve, allocate state, call `load`.
    ///
    /// `before_load` runs after symbol resolution but before the module's
    /// `load` call; the engine uses it to open the mesh-load gate.
    pub fn load(
        &mut self,
        app_arena: &Arena,
        frame_arena: &Arena,
        before_load: impl FnOnce(),
        after_load: impl FnOnce(),
    ) -> Result<(), EngineError> {
        self.swap_library(frame_arena)
            .map_err(EngineError::ModuleLoad)?;

        // Called once, at initial load only; reloads keep the old block.
        let lib = self.lib.as_ref().unwrap();
        let get_memory_size: GetMemorySizeFn = unsafe {
            *lib.get(b"get_memory_size")
                .map_err(|e| EngineError::ModuleLoad(format!("get_memory_size: {}", e)))?
        };

        let size = unsafe { get_memory_size() };
        if size == 0 {
            return Err(EngineError::ModuleLoad(
                "module reports zero state size".to_string(),
            ));
        }

        let block = app_arena.alloc_bytes(size);
        if block.len() != size {
            return Err(EngineError::ModuleLoad(format!(
                "failed to allocate {} byte module state block",
                size
            )));
        }
        self.memory = NonNull::new(block.as_mut_ptr());
        self.memory_len = size;

        log::info!(
            "module loaded: {} ({} byte state)",
            self.source_path.display(),
            size
        );

        before_load();
        self.call(|s| s.load);
        after_load();

        Ok(())
    }

    /// Forward one `update` to the module, if loaded.
    pub fn update(&self) {
        self.call(|s| s.update);
    }

    /// Check the source file's timestamp and hot-reload on change.
    ///
    /// `device_wait` must quiesce the GPU before any module pointer is
    /// invalidated. Failure leaves the previous module unloaded; the
    /// engine keeps running without gameplay updates until a later reload
    /// succeeds.
    pub fn maybe_reload(&mut self, frame_arena: &Arena, device_wait: impl FnOnce()) {
        let Ok(meta) = fs::metadata(&self.source_path) else {
            return;
        };
        let Ok(modified) = meta.modified() else {
            return;
        };

        match self.last_write {
            Some(prev) if modified <= prev => return,
            None => {
                // No baseline yet (load never succeeded); try a fresh load
                // below.
            }
            _ => {}
        }

        log::info!("module changed on disk, reloading");

        device_wait();

        if self.is_loaded() {
            self.call(|s| s.unload);
        }
        self.symbols = None;
        self.lib = None;

        if let Err(e) = self.swap_library(frame_arena) {
            log::warn!("module reload failed: {} (continuing without module)", e);
            return;
        }

        // The state block is never reallocated on reload: a size change
        // would invalidate every pointer the module preserved.
        if let Some(lib) = self.lib.as_ref() {
            // SAFETY: symbol was resolved during swap_library's checks.
            let new_size = unsafe {
                lib.get::<GetMemorySizeFn>(b"get_memory_size")
                    .map(|f| (*f)())
                    .unwrap_or(self.memory_len)
            };
            if new_size != self.memory_len {
                log::warn!(
                    "module state size changed ({} -> {}), keeping old block",
                    self.memory_len,
                    new_size
                );
            }
        }

        self.call(|s| s.reload);
        log::info!("module reloaded");
    }

    /// Read the source bytes through the frame arena, write the sidecar,
    /// load it, resolve and version-check all exports. On success the
    /// timestamp baseline is updated.
    fn swap_library(&mut self, frame_arena: &Arena) -> Result<(), String> {
        let meta = fs::metadata(&self.source_path)
            .map_err(|e| format!("module not found at {}: {}", self.source_path.display(), e))?;
        let len = meta.len() as usize;

        let bytes = frame_arena.alloc_bytes(len);
        if bytes.len() != len {
            return Err(format!("failed to stage {} module bytes", len));
        }

        let mut file = fs::File::open(&self.source_path)
            .map_err(|e| format!("open {}: {}", self.source_path.display(), e))?;
        file.read_exact(bytes)
            .map_err(|e| format!("read {}: {}", self.source_path.display(), e))?;

        fs::write(&self.loaded_path, &*bytes)
            .map_err(|e| format!("write {}: {}", self.loaded_path.display(), e))?;

        // SAFETY: the sidecar is a module we just wrote; resolving its
        // exports is the whole point.
        let lib = unsafe { Library::new(&self.loaded_path) }
            .map_err(|e| format!("load {}: {}", self.loaded_path.display(), e))?;

        let symbols = unsafe { Self::resolve(&lib) }?;

        self.lib = Some(lib);
        self.symbols = Some(symbols);
        self.last_write = meta.modified().ok();
        Ok(())
    }

    /// Resolve all six exports and check the API version.
    unsafe fn resolve(lib: &Library) -> Result<ModuleSymbols, String> {
        let get_api_version: GetApiVersionFn = *lib
            .get(b"get_api_version")
            .map_err(|e| format!("get_api_version: {}", e))?;

        let version = get_api_version();
        if version != PYRE_API_VERSION {
            return Err(format!(
                "module API version {} (expected {})",
                version, PYRE_API_VERSION
            ));
        }

        // get_memory_size is resolved at use sites; check it exists now so
        // a bad module fails the whole load.
        lib.get::<GetMemorySizeFn>(b"get_memory_size")
            .map_err(|e| format!("get_memory_size: {}", e))?;

        let load: ModuleLifecycleFn = *lib.get(b"load").map_err(|e| format!("load: {}", e))?;
        let update: ModuleLifecycleFn = *lib.get(b"update").map_err(|e| format!("update: {}", e))?;
        let unload: ModuleLifecycleFn = *lib.get(b"unload").map_err(|e| format!("unload: {}", e))?;
        let reload: ModuleLifecycleFn = *lib.get(b"reload").map_err(|e| format!("reload: {}", e))?;

        Ok(ModuleSymbols {
            load,
            update,
            unload,
            reload,
        })
    }

    /// Invoke one lifecycle entry with the api table and state block.
    fn call(&self, pick: impl FnOnce(&ModuleSymbols) -> ModuleLifecycleFn) {
        let (Some(symbols), Some(memory)) = (self.symbols.as_ref(), self.memory) else {
            return;
        };
        let f = pick(symbols);
        // SAFETY: the library is alive (symbols and lib are cleared
        // together), the state block outlives the host, and the api table
        // is boxed at a stable address.
        unsafe { f(self.api_ptr(), memory.as_ptr(), self.memory_len) };
    }

    /// Call `unload` and drop the library. Used at engine teardown; the
    /// caller has already device-waited.
    pub fn shutdown(&mut self) {
        if self.is_loaded() {
            self.call(|s| s.unload);
        }
        self.symbols = None;
        self.lib = None;
    }
}

/// The sidecar path: same directory, "_loaded" appended to the stem.
fn sidecar_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "game".to_string());
    let ext = source
        .extension()
        .map(|s| s.to_string_lossy().into_owned());

    let file_name = match ext {
        Some(ext) => format!("{}_loaded.{}", stem, ext),
        None => format!("{}_loaded", stem),
    };

    source.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_path_keeps_extension() {
        let sidecar = sidecar_path(Path::new("/tmp/libgame.so"));
        assert_eq!(sidecar, PathBuf::from("/tmp/libgame_loaded.so"));
    }

    #[test]
    fn test_sidecar_path_without_extension() {
        let sidecar = sidecar_path(Path::new("game"));
        assert_eq!(sidecar, PathBuf::from("game_loaded"));
    }

    #[test]
    fn test_module_file_name_is_platform_shaped() {
        #[cfg(target_os = "windows")]
        assert_eq!(MODULE_FILE_NAME, "game.dll");
        #[cfg(target_os = "macos")]
        assert_eq!(MODULE_FILE_NAME, "libgame.dylib");
        #[cfg(all(unix, not(target_os = "macos")))]
        assert_eq!(MODULE_FILE_NAME, "libgame.so");
    }

    #[test]
    fn test_find_module_missing_is_none() {
        // Running from the test harness there is no module next to the
        // executable or in cwd.
        let dir = std::env::temp_dir().join("pyre-host-test-empty");
        let _ = std::fs::create_dir_all(&dir);
        let prev = std::env::current_dir().unwrap();
        std::env::set_current_dir(&dir).unwrap();
        let found = ModuleHost::find_module();
        std::env::set_current_dir(prev).unwrap();
        // The executable directory is target/debug which may contain the
        // dylib in a full workspace build; only assert when it is absent.
        if let Some(path) = found {
            assert!(path.exists());
        }
    }
}
