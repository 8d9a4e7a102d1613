// detour.rs: Redirect records and the backends that patch them in.
//
// A `DetourRecord` owns one installed redirect: calls through the target
// address reach the replacement first, and the trampoline stays callable for
// as long as the record is installed. Install and uninstall are serialized by
// a process-wide lock, and the calling thread is listed in `ThreadExclusions`
// for the duration so the interception routine ignores it mid-swap.
//
// Flow:
//   install()   -> create redirect -> publish trampoline (arm) -> enable
//   uninstall() -> disable -> withdraw trampoline (disarm) -> remove (freed)

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;

use crate::error::DetourError;

/// Serializes every install/uninstall in the process.
static DETOUR_LOCK: Mutex<()> = Mutex::new(());

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Patches redirects in and out of live code.
///
/// # Safety
///
/// Implementations write to executable memory or dispatch tables that other
/// threads may be calling through. Callers must pass addresses of functions
/// with identical signatures and must not remove a redirect whose trampoline
/// is still published.
pub trait DetourBackend: Send + Sync {
    /// Prepares a disabled redirect and returns the trampoline address.
    unsafe fn create(&self, target: usize, replacement: usize) -> Result<usize, DetourError>;
    unsafe fn enable(&self, target: usize) -> Result<(), DetourError>;
    unsafe fn disable(&self, target: usize) -> Result<(), DetourError>;
    /// Frees the redirect; the trampoline is invalid afterwards.
    unsafe fn remove(&self, target: usize) -> Result<(), DetourError>;
}

// ============================================================
// Thread exclusions
// ============================================================

/// Threads whose calls must pass straight through to the original.
#[derive(Debug, Default)]
pub struct ThreadExclusions {
    threads: Mutex<HashSet<ThreadId>>,
}

impl ThreadExclusions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Excludes the calling thread until the guard is dropped.
    pub fn exclude_current(&self) -> ExclusionGuard<'_> {
        let id = std::thread::current().id();
        lock(&self.threads).insert(id);
        ExclusionGuard { owner: self, id }
    }

    pub fn is_excluded(&self, id: ThreadId) -> bool {
        lock(&self.threads).contains(&id)
    }

    pub fn is_current_excluded(&self) -> bool {
        self.is_excluded(std::thread::current().id())
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.threads).is_empty()
    }
}

pub struct ExclusionGuard<'a> {
    owner: &'a ThreadExclusions,
    id: ThreadId,
}

impl Drop for ExclusionGuard<'_> {
    fn drop(&mut self) {
        lock(&self.owner.threads).remove(&self.id);
    }
}

// ============================================================
// Detour record
// ============================================================

pub struct DetourRecord {
    target: usize,
    trampoline: usize,
    replacement: usize,
    installed: bool,
    enabled: bool,
    disarm: Option<fn()>,
    backend: Arc<dyn DetourBackend>,
    exclusions: Arc<ThreadExclusions>,
}

impl DetourRecord {
    /// Installs a redirect from `target` to `replacement`.
    ///
    /// `arm` receives the trampoline before the redirect is enabled, so the
    /// replacement can always reach the original.
    ///
    /// # Safety
    ///
    /// `target` and `replacement` must be functions with the same ABI and
    /// signature, and `replacement` must stay valid while the record lives.
    pub unsafe fn install(
        backend: Arc<dyn DetourBackend>,
        exclusions: Arc<ThreadExclusions>,
        target: usize,
        replacement: usize,
        arm: impl FnOnce(usize),
    ) -> Result<Self, DetourError> {
        let _serial = lock(&DETOUR_LOCK);
        let _excluded = exclusions.exclude_current();

        let trampoline = backend.create(target, replacement)?;
        arm(trampoline);
        if let Err(e) = backend.enable(target) {
            let _ = backend.remove(target);
            return Err(e);
        }
        log::debug!("redirect {target:#x} -> {replacement:#x} (trampoline {trampoline:#x})");

        drop(_excluded);
        Ok(Self {
            target,
            trampoline,
            replacement,
            installed: true,
            enabled: true,
            disarm: None,
            backend,
            exclusions,
        })
    }

    /// Withdraws the published trampoline during uninstall, after the
    /// redirect is disabled and before the backend frees it.
    pub fn on_disarm(mut self, disarm: fn()) -> Self {
        self.disarm = Some(disarm);
        self
    }

    /// Restores the original dispatch. A no-op once uninstalled.
    ///
    /// A failed disable leaves the redirect live and the trampoline
    /// published. A failed remove happens after disarm, and a retry resumes
    /// at the remove step.
    pub fn uninstall(&mut self) -> Result<(), DetourError> {
        if !self.installed {
            return Ok(());
        }
        let _serial = lock(&DETOUR_LOCK);
        let _excluded = self.exclusions.exclude_current();

        // SAFETY: the redirect was created by this backend in `install`.
        unsafe {
            if self.enabled {
                self.backend.disable(self.target)?;
                self.enabled = false;
                if let Some(disarm) = self.disarm {
                    disarm();
                }
            }
            self.backend.remove(self.target)?;
        }
        self.installed = false;
        log::debug!("redirect {:#x} removed", self.target);
        Ok(())
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn trampoline(&self) -> usize {
        self.trampoline
    }

    pub fn replacement(&self) -> usize {
        self.replacement
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }
}

impl Drop for DetourRecord {
    fn drop(&mut self) {
        if let Err(e) = self.uninstall() {
            log::error!("failed to remove redirect {:#x}: {e}", self.target);
        }
    }
}

// ============================================================
// MinHook backend (inline detours)
// ============================================================

#[cfg(windows)]
pub use self::minhook::MinHookBackend;

#[cfg(windows)]
mod minhook {
    use std::ffi::c_void;
    use std::ptr;

    use minhook_sys::{
        MH_CreateHook, MH_DisableHook, MH_EnableHook, MH_Initialize, MH_OK, MH_RemoveHook,
        MH_Uninitialize,
    };

    use super::DetourBackend;
    use crate::error::DetourError;

    /// `MH_ERROR_ALREADY_INITIALIZED`
    const ALREADY_INITIALIZED: i32 = 1;

    fn check(operation: &'static str, status: i32) -> Result<(), DetourError> {
        if status == MH_OK {
            Ok(())
        } else {
            Err(DetourError::Backend { operation, status })
        }
    }

    /// Inline detours through MinHook. Owns the library initialization.
    pub struct MinHookBackend {
        owns_init: bool,
    }

    impl MinHookBackend {
        pub fn initialize() -> Result<Self, DetourError> {
            // SAFETY: MH_Initialize has no preconditions.
            let status = unsafe { MH_Initialize() };
            if status == ALREADY_INITIALIZED {
                return Ok(Self { owns_init: false });
            }
            check("MH_Initialize", status)?;
            Ok(Self { owns_init: true })
        }
    }

    impl DetourBackend for MinHookBackend {
        unsafe fn create(&self, target: usize, replacement: usize) -> Result<usize, DetourError> {
            let mut original = ptr::null_mut::<c_void>();
            check(
                "MH_CreateHook",
                MH_CreateHook(target as *mut c_void, replacement as *mut c_void, &mut original),
            )?;
            Ok(original as usize)
        }

        unsafe fn enable(&self, target: usize) -> Result<(), DetourError> {
            check("MH_EnableHook", MH_EnableHook(target as *mut c_void))
        }

        unsafe fn disable(&self, target: usize) -> Result<(), DetourError> {
            check("MH_DisableHook", MH_DisableHook(target as *mut c_void))
        }

        unsafe fn remove(&self, target: usize) -> Result<(), DetourError> {
            check("MH_RemoveHook", MH_RemoveHook(target as *mut c_void))
        }
    }

    impl Drop for MinHookBackend {
        fn drop(&mut self) {
            if self.owns_init {
                // SAFETY: every record holds an Arc to this backend, so none is left.
                unsafe {
                    MH_Uninitialize();
                }
            }
        }
    }
}

// ============================================================
// Dispatch-slot backend (tests)
// ============================================================


#[cfg(test)]
mod tests {
    use super::slot::SlotBackend;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    extern "C" fn original() -> u32 {
        1
    }

    extern "C" fn replacement() -> u32 {
        2
    }

    fn call(slot: &usize) -> u32 {
        // SAFETY: the slot only ever holds `original` or `replacement`.
        let f: extern "C" fn() -> u32 = unsafe { std::mem::transmute(*slot) };
        f()
    }

    #[test]
    fn test_install_redirects_and_uninstall_restores() {
        let mut table = [0usize, original as usize];
        let backend: Arc<dyn DetourBackend> = Arc::new(unsafe { SlotBackend::new(&mut table[1]) });
        let exclusions = Arc::new(ThreadExclusions::new());

        let armed = AtomicUsize::new(0);
        let mut record = unsafe {
            DetourRecord::install(
                Arc::clone(&backend),
                Arc::clone(&exclusions),
                original as usize,
                replacement as usize,
                |t| armed.store(t, Ordering::SeqCst),
            )
        }
        .unwrap();

        assert!(record.is_installed());
        assert_eq!(armed.load(Ordering::SeqCst), original as usize);
        assert_eq!(record.trampoline(), original as usize);
        assert_eq!(call(&table[1]), 2);

        record.uninstall().unwrap();
        assert!(!record.is_installed());
        assert_eq!(call(&table[1]), 1);
        // second uninstall is a no-op
        record.uninstall().unwrap();
    }

    #[test]
    fn test_drop_uninstalls() {
        let mut table = [original as usize];
        let backend = Arc::new(unsafe { SlotBackend::new(&mut table[0]) });
        {
            let _record = unsafe {
                DetourRecord::install(
                    backend.clone(),
                    Arc::new(ThreadExclusions::new()),
                    original as usize,
                    replacement as usize,
                    |_| {},
                )
            }
            .unwrap();
            assert_eq!(call(&table[0]), 2);
        }
        assert_eq!(call(&table[0]), 1);
        assert_eq!(backend.redirect_count(), 0);
    }

    #[test]
    fn test_failed_create_leaves_table_untouched() {
        let mut table = [original as usize];
        let backend = Arc::new(unsafe { SlotBackend::new(&mut table[0]) });
        let result = unsafe {
            DetourRecord::install(
                backend,
                Arc::new(ThreadExclusions::new()),
                replacement as usize,
                original as usize,
                |_| panic!("must not arm on failure"),
            )
        };
        assert!(matches!(result, Err(DetourError::UnknownTarget(_))));
        assert_eq!(call(&table[0]), 1);
    }

    #[test]
    fn test_installing_thread_is_excluded_only_during_swap() {
        let exclusions = Arc::new(ThreadExclusions::new());
        let mut table = [original as usize];
        let backend = Arc::new(unsafe { SlotBackend::new(&mut table[0]) });

        let seen = std::cell::Cell::new(false);
        let record = unsafe {
            DetourRecord::install(
                backend,
                Arc::clone(&exclusions),
                original as usize,
                replacement as usize,
                |_| seen.set(exclusions.is_current_excluded()),
            )
        }
        .unwrap();

        assert!(seen.get());
        assert!(exclusions.is_empty());
        drop(record);
        assert!(exclusions.is_empty());
    }

    static EVENTS: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    fn log_disarm() {
        lock(&EVENTS).push("disarm");
    }

    /// Logs disable and remove around the slot backend.
    struct LoggedBackend(SlotBackend);

    impl DetourBackend for LoggedBackend {
        unsafe fn create(&self, target: usize, replacement: usize) -> Result<usize, DetourError> {
            self.0.create(target, replacement)
        }

        unsafe fn enable(&self, target: usize) -> Result<(), DetourError> {
            self.0.enable(target)
        }

        unsafe fn disable(&self, target: usize) -> Result<(), DetourError> {
            lock(&EVENTS).push("disable");
            self.0.disable(target)
        }

        unsafe fn remove(&self, target: usize) -> Result<(), DetourError> {
            lock(&EVENTS).push("remove");
            self.0.remove(target)
        }
    }

    #[test]
    fn test_trampoline_is_withdrawn_before_remove() {
        let mut table = [original as usize];
        let backend = Arc::new(LoggedBackend(unsafe { SlotBackend::new(&mut table[0]) }));
        let mut record = unsafe {
            DetourRecord::install(
                backend,
                Arc::new(ThreadExclusions::new()),
                original as usize,
                replacement as usize,
                |_| {},
            )
        }
        .unwrap()
        .on_disarm(log_disarm);

        record.uninstall().unwrap();
        assert_eq!(*lock(&EVENTS), ["disable", "disarm", "remove"]);
        assert_eq!(call(&table[0]), 1);
    }

    #[test]
    fn test_failed_disable_keeps_record_installed_and_armed() {
        let mut table = [original as usize];
        let backend = Arc::new(unsafe { SlotBackend::new(&mut table[0]) });
        let armed = AtomicUsize::new(0);
        let mut record = unsafe {
            DetourRecord::install(
                backend.clone(),
                Arc::new(ThreadExclusions::new()),
                original as usize,
                replacement as usize,
                |t| armed.store(t, Ordering::SeqCst),
            )
        }
        .unwrap();
        assert_eq!(armed.load(Ordering::SeqCst), original as usize);

        backend.set_stuck(true);
        assert!(matches!(
            record.uninstall(),
            Err(DetourError::Backend { operation: "disable", .. })
        ));
        assert!(record.is_installed());
        assert_eq!(call(&table[0]), 2);

        backend.set_stuck(false);
        record.uninstall().unwrap();
        assert!(!record.is_installed());
        assert_eq!(call(&table[0]), 1);
        assert_eq!(backend.redirect_count(), 0);
    }

    #[test]
    fn test_exclusion_is_per_thread() {
        let exclusions = Arc::new(ThreadExclusions::new());
        let _guard = exclusions.exclude_current();
        let other = Arc::clone(&exclusions);
        let excluded_elsewhere = std::thread::spawn(move || other.is_current_excluded())
            .join()
            .unwrap();
        assert!(exclusions.is_current_excluded());
        assert!(!excluded_elsewhere);
    }
}
