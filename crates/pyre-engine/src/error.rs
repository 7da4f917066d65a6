//! Engine-boundary error type.
//!
//! The low-level vulkan modules report `Result<T, String>`; this enum is
//! what crosses the engine boundary. Recoverable swapchain conditions are
//! handled inside the frame scheduler and never escape it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Any failure during engine or module bring-up. Cleanup still runs.
    #[error("init failed: {0}")]
    Init(String),

    /// The device was lost; fatal, the loop exits after a final barrier.
    #[error("device lost")]
    DeviceLost,

    /// Command-buffer recording failed; fatal.
    #[error("record failed: {0}")]
    Record(String),

    /// Buffer or image allocation failed.
    #[error("gpu allocation failed: {0}")]
    GpuAlloc(String),

    /// Missing file, unresolved symbol, or API version mismatch.
    #[error("module load failed: {0}")]
    ModuleLoad(String),

    /// glTF decode produced empty or invalid geometry.
    #[error("mesh load failed: {0}")]
    MeshLoad(String),

    /// File output from the headless exporter failed.
    #[error("capture failed: {0}")]
    Capture(String),
}
