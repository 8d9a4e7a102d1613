//! Isolated loading context: private dependencies first, then the module,
//! then its fixed exports. Unloading runs in reverse.

use std::path::Path;

use framescope_ipc::contract::{
    AbiVersionFn, SessionStartFn, SessionStopFn, ABI_VERSION, ABI_VERSION_SYMBOL, SESSION_START,
    SESSION_STOP,
};

use crate::error::LoaderError;
use crate::manifest::{normalize, ResolutionContext};

/// Opaque module handle (`HMODULE` on Windows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryHandle(pub usize);

/// Native library loading primitives.
pub trait LibraryLoader {
    /// Loads exactly `path`; dependencies of the library are searched only
    /// next to it.
    fn load(&self, path: &Path) -> Result<LibraryHandle, LoaderError>;
    fn symbol(&self, library: LibraryHandle, name: &str) -> Result<usize, LoaderError>;
    fn free(&self, library: LibraryHandle);
}

struct EntryPoints {
    start: SessionStartFn,
    stop: SessionStopFn,
}

pub struct LoadContext<L: LibraryLoader> {
    loader: L,
    resolution: ResolutionContext,
    dependencies: Vec<(String, LibraryHandle)>,
    module: Option<LibraryHandle>,
    entry: Option<EntryPoints>,
}

impl<L: LibraryLoader> LoadContext<L> {
    /// Loads everything the manifest names and resolves the module exports.
    /// Whatever was loaded before a failure is released again.
    pub fn open(loader: L, resolution: ResolutionContext) -> Result<Self, LoaderError> {
        let mut ctx = Self {
            loader,
            resolution,
            dependencies: Vec::new(),
            module: None,
            entry: None,
        };

        let names: Vec<String> = ctx.resolution.dependency_names().map(str::to_string).collect();
        for name in names {
            let path = ctx.resolution.resolve(&name)?;
            let handle = ctx.loader.load(path)?;
            log::debug!("loaded dependency {name} from {}", path.display());
            ctx.dependencies.push((name, handle));
        }

        let module = ctx.loader.load(ctx.resolution.module_path())?;
        ctx.module = Some(module);

        // SAFETY: the exports are defined by the contract with exactly these
        // signatures; the version check guards against stale modules.
        unsafe {
            let version: AbiVersionFn =
                std::mem::transmute(ctx.loader.symbol(module, ABI_VERSION_SYMBOL)?);
            let found = version();
            if found != ABI_VERSION {
                return Err(LoaderError::AbiMismatch {
                    expected: ABI_VERSION,
                    found,
                });
            }
            ctx.entry = Some(EntryPoints {
                start: std::mem::transmute::<usize, SessionStartFn>(
                    ctx.loader.symbol(module, SESSION_START)?,
                ),
                stop: std::mem::transmute::<usize, SessionStopFn>(
                    ctx.loader.symbol(module, SESSION_STOP)?,
                ),
            });
        }
        log::info!("loaded {}", ctx.resolution.module_path().display());
        Ok(ctx)
    }

    /// Handle of a preloaded dependency.
    pub fn library(&self, name: &str) -> Result<LibraryHandle, LoaderError> {
        let key = normalize(name);
        self.dependencies
            .iter()
            .find(|(dep, _)| *dep == key)
            .map(|(_, handle)| *handle)
            .ok_or_else(|| LoaderError::Unresolved(name.to_string()))
    }

    /// Calls the module's session start export.
    pub fn start(&self, window: usize) -> i32 {
        match &self.entry {
            // SAFETY: resolved in `open`; the module stays loaded while `self` lives.
            Some(entry) => unsafe { (entry.start)(window) },
            None => 0,
        }
    }

    pub fn stop(&self) -> i32 {
        match &self.entry {
            // SAFETY: as in `start`.
            Some(entry) => unsafe { (entry.stop)() },
            None => 0,
        }
    }

    /// Stops the session held in `slot` and unloads it only when the module
    /// reports success. A failed stop leaves the context in place, since the
    /// module code may still be reachable through a live redirect.
    pub fn shutdown(slot: &mut Option<Self>) -> i32 {
        let Some(ctx) = slot.as_ref() else {
            return crate::STATUS_OK;
        };
        let status = ctx.stop();
        if status > 0 {
            if let Some(ctx) = slot.take() {
                ctx.unload();
            }
        } else {
            log::error!("session stop returned {status}; keeping module loaded");
        }
        status
    }

    /// Frees the module first, then dependencies in reverse load order.
    pub fn unload(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.entry = None;
        if let Some(module) = self.module.take() {
            self.loader.free(module);
        }
        while let Some((name, handle)) = self.dependencies.pop() {
            self.loader.free(handle);
            log::debug!("released dependency {name}");
        }
    }
}

impl<L: LibraryLoader> Drop for LoadContext<L> {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================
// Windows
// ============================================================

/// `LoadLibraryExW` restricted to the library's own directory and System32.
#[cfg(windows)]
pub struct WindowsLibraryLoader;

#[cfg(windows)]
impl LibraryLoader for WindowsLibraryLoader {
    fn load(&self, path: &Path) -> Result<LibraryHandle, LoaderError> {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::errhandlingapi::GetLastError;
        use winapi::um::libloaderapi::{
            LoadLibraryExW, LOAD_LIBRARY_SEARCH_DLL_LOAD_DIR, LOAD_LIBRARY_SEARCH_SYSTEM32,
        };

        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        let handle = unsafe {
            LoadLibraryExW(
                wide.as_ptr(),
                std::ptr::null_mut(),
                LOAD_LIBRARY_SEARCH_DLL_LOAD_DIR | LOAD_LIBRARY_SEARCH_SYSTEM32,
            )
        };
        if handle.is_null() {
            return Err(LoaderError::Load {
                path: path.to_path_buf(),
                code: unsafe { GetLastError() },
            });
        }
        Ok(LibraryHandle(handle as usize))
    }

    fn symbol(&self, library: LibraryHandle, name: &str) -> Result<usize, LoaderError> {
        use winapi::um::libloaderapi::GetProcAddress;

        let cname = std::ffi::CString::new(name)
            .map_err(|_| LoaderError::SymbolNotFound(name.to_string()))?;
        // SAFETY: the handle came from `load` and has not been freed.
        let address = unsafe { GetProcAddress(library.0 as _, cname.as_ptr()) };
        if address.is_null() {
            Err(LoaderError::SymbolNotFound(name.to_string()))
        } else {
            Ok(address as usize)
        }
    }

    fn free(&self, library: LibraryHandle) {
        use winapi::um::libloaderapi::FreeLibrary;

        // SAFETY: each handle is freed exactly once by `LoadContext`.
        unsafe {
            FreeLibrary(library.0 as _);
        }
    }
}
