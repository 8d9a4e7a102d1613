//! Bootstrap module mapped into the target process by the injector.
//!
//! Exposes exactly two fixed-signature exports:
//!
//! - `StartHook(window) -> i32`: on first call opens the isolated loading
//!   context (private dependencies, then the framescope module) and forwards
//!   to the module's session start. Non-positive when the context cannot be
//!   opened.
//! - `StopHook() -> i32`: stops the session, then unloads the module and its
//!   dependencies so the loader itself can be ejected. A non-positive stop
//!   leaves everything loaded; the call can be retried.

pub mod context;
pub mod error;
pub mod manifest;

pub use context::{LibraryHandle, LibraryLoader, LoadContext};
pub use error::LoaderError;
pub use manifest::{Manifest, ResolutionContext, MANIFEST_FILE_NAME};

/// Status for a start/stop that could not run at all.
pub const STATUS_FAILED: i32 = 0;
pub const STATUS_OK: i32 = 1;

/// Appended to when the loader cannot report through the module.
pub const LOG_FILE_NAME: &str = "framescope_loader.log";

#[cfg(windows)]
pub use self::exports::{StartHook, StopHook};

#[cfg(windows)]
#[allow(non_snake_case)]
mod exports {
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    use winapi::shared::minwindef::{BOOL, DWORD, HINSTANCE, LPVOID, TRUE};
    use winapi::um::libloaderapi::{DisableThreadLibraryCalls, GetModuleFileNameW};
    use winapi::um::winnt::DLL_PROCESS_ATTACH;

    use super::{LOG_FILE_NAME, STATUS_FAILED};
    use crate::context::{LoadContext, WindowsLibraryLoader};
    use crate::error::LoaderError;
    use crate::manifest::ResolutionContext;

    static MODULE_HANDLE: AtomicUsize = AtomicUsize::new(0);

    static CONTEXT: Mutex<Option<LoadContext<WindowsLibraryLoader>>> = Mutex::new(None);

    fn module_dir() -> Option<PathBuf> {
        use std::ffi::OsString;
        use std::os::windows::ffi::OsStringExt;

        let handle = MODULE_HANDLE.load(Ordering::Relaxed);
        if handle == 0 {
            return None;
        }
        let mut buf = [0u16; 1024];
        // SAFETY: the buffer length passed matches the buffer.
        let len = unsafe { GetModuleFileNameW(handle as _, buf.as_mut_ptr(), buf.len() as u32) }
            as usize;
        if len == 0 || len >= buf.len() {
            return None;
        }
        PathBuf::from(OsString::from_wide(&buf[..len]))
            .parent()
            .map(Path::to_path_buf)
    }

    fn report(error: &LoaderError) {
        let path = module_dir().unwrap_or_default().join(LOG_FILE_NAME);
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "[ERROR] {error}");
        }
    }

    fn open_context() -> Result<LoadContext<WindowsLibraryLoader>, LoaderError> {
        let dir = module_dir().ok_or(LoaderError::NoModuleDir)?;
        let resolution = ResolutionContext::load(&dir)?;
        LoadContext::open(WindowsLibraryLoader, resolution)
    }

    fn start(window: usize) -> i32 {
        let mut slot = CONTEXT.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            match open_context() {
                Ok(ctx) => *slot = Some(ctx),
                Err(e) => {
                    report(&e);
                    return STATUS_FAILED;
                }
            }
        }
        match slot.as_ref() {
            Some(ctx) => ctx.start(window),
            None => STATUS_FAILED,
        }
    }

    fn stop() -> i32 {
        let mut slot = CONTEXT.lock().unwrap_or_else(PoisonError::into_inner);
        let status = LoadContext::shutdown(&mut slot);
        if status <= 0 {
            report(&LoaderError::StopFailed(status));
        }
        status
    }

    #[no_mangle]
    pub extern "C" fn StartHook(window: usize) -> i32 {
        std::panic::catch_unwind(|| start(window)).unwrap_or(STATUS_FAILED)
    }

    #[no_mangle]
    pub extern "C" fn StopHook() -> i32 {
        std::panic::catch_unwind(stop).unwrap_or(STATUS_FAILED)
    }

    #[no_mangle]
    pub unsafe extern "system" fn DllMain(hinst: HINSTANCE, reason: DWORD, _: LPVOID) -> BOOL {
        if reason == DLL_PROCESS_ATTACH {
            DisableThreadLibraryCalls(hinst);
            MODULE_HANDLE.store(hinst as usize, Ordering::Relaxed);
        }
        TRUE
    }
}
