//! Attach/detach workflow over an external injector.
//!
//! A successful inject says nothing about the hook: the loader may be mapped
//! while `StartHook` reports failure. [`attach`] leaves the loader mapped in
//! that case so [`detach`] can still run the normal teardown.

use std::path::Path;

use framescope_ipc::contract::{LOADER_START, LOADER_STOP};

use crate::error::HostError;

/// Maps modules into a target process and calls their exports.
pub trait Injector {
    /// Base address of the mapped module; 0 when nothing was mapped.
    fn inject(&mut self, module: &Path) -> Result<usize, HostError>;

    /// Calls `entry` exported by an injected module on a new remote thread.
    fn invoke(&mut self, module: &Path, entry: &str, args: &[usize]) -> Result<i32, HostError>;

    fn eject(&mut self, module: &Path) -> bool;
}

/// Injects the loader and starts a hook session against `window`.
pub fn attach<I: Injector + ?Sized>(
    injector: &mut I,
    loader: &Path,
    window: usize,
) -> Result<(), HostError> {
    let base = injector.inject(loader)?;
    if base == 0 {
        return Err(HostError::InjectFailed(loader.to_path_buf()));
    }
    log::info!("injected {} at {base:#x}", loader.display());

    let status = injector.invoke(loader, LOADER_START, &[window])?;
    if status <= 0 {
        log::warn!("{LOADER_START} returned {status}");
        return Err(HostError::StartRejected(status));
    }
    log::info!("hook session started");
    Ok(())
}

/// Stops the hook session, then ejects the loader.
///
/// The loader is only ejected after `StopHook` reports success; ejecting a
/// module whose detours are still live would leave dangling code pointers in
/// the target.
pub fn detach<I: Injector + ?Sized>(injector: &mut I, loader: &Path) -> Result<(), HostError> {
    let status = injector.invoke(loader, LOADER_STOP, &[])?;
    if status <= 0 {
        log::warn!("{LOADER_STOP} returned {status}, leaving loader mapped");
        return Err(HostError::StopRejected(status));
    }
    if !injector.eject(loader) {
        return Err(HostError::EjectFailed(loader.to_path_buf()));
    }
    log::info!("ejected {}", loader.display());
    Ok(())
}
