// pyre-common — shared infrastructure for the pyre engine host
//
// Everything the engine, the system layer, and the game module agree on
// lives here: the module ABI, the memory arenas, the lane runtime, and the
// key codes. This crate must stay free of Vulkan and windowing
// dependencies so the game module can link it without dragging either in.

pub mod arena;
pub mod keys;
pub mod lanes;
pub mod module_api;
