// lib.rs: Entry points of the framescope instrumentation module.
//
// The loader resolves three exports from this DLL once it is mapped into the
// target process:
//   framescope_abi_version()        -> contract version, checked before use
//   framescope_session_start(hwnd)  -> detect runtime, probe, hook Present
//   framescope_session_stop()       -> unhook and release the session
//
// Start and stop run on a thread created by the injector, never on the
// target's render thread. The only process-wide session state is the
// `SESSION` slot below.

#![allow(non_snake_case)]

pub mod config;
pub mod detector;
pub mod detour;
pub mod error;
pub mod logging;
pub mod present;
pub mod probe;
pub mod sampler;
pub mod session;
pub mod telemetry;

use std::sync::Mutex;

pub use config::HookConfig;
pub use detector::GraphicsRuntime;
pub use error::{DetourError, HookError};
pub use sampler::{FrameSample, FrameTimingSampler};
pub use session::{HookSession, SessionEnv, SessionState, STATUS_FAILED};

use framescope_ipc::contract::ABI_VERSION;

/// The active session, if any.
static SESSION: Mutex<Option<HookSession>> = Mutex::new(None);

#[no_mangle]
pub extern "C" fn framescope_abi_version() -> u32 {
    ABI_VERSION
}

/// Starts a session unless one is running. Non-positive only when the
/// session could not be created.
#[cfg(windows)]
#[no_mangle]
pub extern "C" fn framescope_session_start(window: usize) -> i32 {
    std::panic::catch_unwind(|| start_session(window)).unwrap_or(STATUS_FAILED)
}

#[no_mangle]
pub extern "C" fn framescope_session_stop() -> i32 {
    std::panic::catch_unwind(stop_session).unwrap_or(STATUS_FAILED)
}

#[cfg(windows)]
fn start_session(window: usize) -> i32 {
    use std::sync::Arc;

    use detector::{DetectOptions, LoadedModules};
    use detour::MinHookBackend;
    use probe::DxgiProber;
    use telemetry::ControlLink;

    let mut slot = SESSION.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if slot.is_some() {
        log::warn!("session already running");
        return session::STATUS_OK;
    }

    let config = HookConfig::load(logging::module_dir().as_deref());
    logging::init(config.level_filter());
    let link = Arc::new(ControlLink::connect(&config));
    logging::attach(Arc::clone(&link));

    let backend = match MinHookBackend::initialize() {
        Ok(backend) => Arc::new(backend),
        Err(e) => {
            log::error!("detour backend unavailable: {e}");
            logging::detach();
            return STATUS_FAILED;
        }
    };

    let mut session = HookSession::new(SessionEnv {
        modules: Box::new(LoadedModules),
        prober: Box::new(DxgiProber),
        backend,
        sink: link,
        detect: DetectOptions {
            timeout: config.detect_timeout(),
            interval: config.detect_interval(),
        },
    });
    let status = session.start(window);
    *slot = Some(session);
    status
}

fn stop_session() -> i32 {
    let mut slot = SESSION.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let status = match slot.as_mut() {
        Some(session) => session.stop(),
        None => session::STATUS_OK,
    };
    // a session whose hook is still live stays registered for a retry
    if status > 0 {
        *slot = None;
        logging::detach();
    }
    status
}

/// DLL entry point: records the module handle for config and log lookup.
#[cfg(windows)]
#[no_mangle]
pub unsafe extern "system" fn DllMain(
    hinst: winapi::shared::minwindef::HINSTANCE,
    reason: winapi::shared::minwindef::DWORD,
    _reserved: winapi::shared::minwindef::LPVOID,
) -> winapi::shared::minwindef::BOOL {
    use winapi::shared::minwindef::TRUE;
    use winapi::um::libloaderapi::DisableThreadLibraryCalls;
    use winapi::um::winnt::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

    match reason {
        DLL_PROCESS_ATTACH => {
            DisableThreadLibraryCalls(hinst);
            logging::set_module_handle(hinst as usize);
        }
        DLL_PROCESS_DETACH => {
            // unhooking under the loader lock is unsafe; stop() must run first
            if let Ok(slot) = SESSION.try_lock() {
                if slot.is_some() {
                    let path = logging::module_dir()
                        .unwrap_or_default()
                        .join(logging::LOG_FILE_NAME);
                    let _ = logging::append_line(&path, "[WARN] unloaded with an active session");
                }
            }
        }
        _ => {}
    }
    TRUE
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use crate::sampler::FrameSample;
    use crate::telemetry::FrameSink;

    static PRESENT_LOCK: Mutex<()> = Mutex::new(());

    /// Serializes tests that touch the process-wide present slots.
    pub(crate) fn present_lock() -> MutexGuard<'static, ()> {
        PRESENT_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[derive(Default)]
    pub(crate) struct SampleRecorder {
        samples: Mutex<Vec<FrameSample>>,
    }

    impl SampleRecorder {
        pub(crate) fn count(&self) -> usize {
            self.samples.lock().unwrap().len()
        }
    }

    impl FrameSink for SampleRecorder {
        fn submit(&self, sample: FrameSample) {
            assert!(sample.elapsed_ms >= 0.0);
            self.samples.lock().unwrap().push(sample);
        }
    }
}
