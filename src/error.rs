// error.rs: Error types for the instrumentation module.

use thiserror::Error;

use crate::detector::GraphicsRuntime;

/// Failure of a detour backend operation.
#[derive(Debug, Error)]
pub enum DetourError {
    /// The backend returned a non-success status (MinHook `MH_STATUS`).
    #[error("{operation} failed with status {status}")]
    Backend { operation: &'static str, status: i32 },

    #[error("no redirect exists for target {0:#x}")]
    UnknownTarget(usize),
}

/// Reasons a session ends up without a hook installed.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("no hook strategy for {0}")]
    Unsupported(GraphicsRuntime),

    /// Creating the throwaway window, device or swap chain failed.
    #[error("probe failed: {0}")]
    Probe(String),

    #[error("dispatch table has {len} entries, need at least {needed}")]
    DispatchTableTooShort { len: usize, needed: usize },

    #[error("dispatch entry {0} is null")]
    NullEntry(usize),

    #[error(transparent)]
    Detour(#[from] DetourError),

    #[error("session already terminated")]
    Terminated,

    #[error("panicked while {0}")]
    Panicked(&'static str),
}
