// session.rs: One instrumentation lifetime inside the target process.
//
//   Uninitialized -> Detecting -> Hooked   <-> Unhooked -> Unhooking -> Terminated
//                              \-> Unhooked --------------------------/
//
// `start` reports success whenever the session itself is alive: an unknown
// runtime, a failed probe or a panic while probing leave it Unhooked.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::detector::{self, DetectOptions, GraphicsRuntime, ModuleProbe};
use crate::detour::{DetourBackend, ThreadExclusions};
use crate::error::HookError;
use crate::present::{self, Interceptor};
use crate::probe::{HookStrategy, Prober};
use crate::telemetry::FrameSink;

/// Status returned by `start`/`stop` while the session is usable.
pub const STATUS_OK: i32 = 1;
/// Status for a start/stop that could not complete.
pub const STATUS_FAILED: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Detecting,
    Hooked,
    Unhooked,
    Unhooking,
    Terminated,
}

/// Platform seams a session runs against.
pub struct SessionEnv {
    pub modules: Box<dyn ModuleProbe>,
    pub prober: Box<dyn Prober>,
    pub backend: Arc<dyn DetourBackend>,
    pub sink: Arc<dyn FrameSink>,
    pub detect: DetectOptions,
}

pub struct HookSession {
    env: SessionEnv,
    state: SessionState,
    runtime: GraphicsRuntime,
    strategy: Option<HookStrategy>,
    exclusions: Arc<ThreadExclusions>,
    interceptor: Arc<Interceptor>,
}

impl HookSession {
    pub fn new(env: SessionEnv) -> Self {
        let exclusions = Arc::new(ThreadExclusions::new());
        let interceptor = Arc::new(Interceptor::new(
            Arc::clone(&env.sink),
            Arc::clone(&exclusions),
        ));
        Self {
            env,
            state: SessionState::Uninitialized,
            runtime: GraphicsRuntime::Unknown,
            strategy: None,
            exclusions,
            interceptor,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn runtime(&self) -> GraphicsRuntime {
        self.runtime
    }

    pub fn strategy(&self) -> Option<&HookStrategy> {
        self.strategy.as_ref()
    }

    /// Detects the runtime, probes and hooks. Blocks for up to the detection
    /// timeout; always returns [`STATUS_OK`].
    pub fn start(&mut self, window: usize) -> i32 {
        if self.state != SessionState::Uninitialized {
            log::warn!("session already started ({:?})", self.state);
            return STATUS_OK;
        }
        log::info!("hook entered");

        self.state = SessionState::Detecting;
        self.runtime = detector::detect(self.env.modules.as_ref(), self.env.detect);
        let Some(api) = HookStrategy::api_for(self.runtime) else {
            log::info!("no hook for {}", self.runtime);
            self.state = SessionState::Unhooked;
            return STATUS_OK;
        };

        let prober = self.env.prober.as_ref();
        let probed = panic::catch_unwind(AssertUnwindSafe(|| {
            HookStrategy::probe(api, prober, window)
        }))
        .unwrap_or(Err(HookError::Panicked("probing")));

        match probed {
            Ok(strategy) => {
                self.strategy = Some(strategy);
                if let Err(e) = self.hook() {
                    log::warn!("hook not installed: {e}");
                }
            }
            Err(e) => {
                log::warn!("hook not installed: {e}");
                self.state = SessionState::Unhooked;
            }
        }
        STATUS_OK
    }

    /// Installs the Present redirect. A no-op while hooked.
    pub fn hook(&mut self) -> Result<(), HookError> {
        match self.state {
            SessionState::Hooked => return Ok(()),
            SessionState::Terminated => return Err(HookError::Terminated),
            _ => {}
        }
        let Some(strategy) = self.strategy.as_mut() else {
            self.state = SessionState::Unhooked;
            return Err(HookError::Unsupported(self.runtime));
        };

        self.interceptor.reset();
        present::activate(Arc::clone(&self.interceptor));
        let backend = &self.env.backend;
        let exclusions = &self.exclusions;
        let result = panic::catch_unwind(AssertUnwindSafe(|| strategy.hook(backend, exclusions)))
            .unwrap_or(Err(HookError::Panicked("hooking")));

        match result {
            Ok(()) => {
                self.state = SessionState::Hooked;
                Ok(())
            }
            Err(e) => {
                present::deactivate();
                self.state = SessionState::Unhooked;
                Err(e)
            }
        }
    }

    /// Restores the original Present. A no-op unless hooked.
    pub fn unhook(&mut self) -> Result<(), HookError> {
        if self.state != SessionState::Hooked {
            return Ok(());
        }
        self.state = SessionState::Unhooking;
        let result = match self.strategy.as_mut() {
            Some(strategy) => strategy.unhook(),
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                present::deactivate();
                self.state = SessionState::Unhooked;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Hooked;
                Err(e)
            }
        }
    }

    /// Unhooks and releases everything the session holds. When the hook cannot
    /// be removed the session stays Hooked, keeps its strategy and returns
    /// [`STATUS_FAILED`]; the caller must not unload the module.
    pub fn stop(&mut self) -> i32 {
        if self.state == SessionState::Terminated {
            return STATUS_OK;
        }
        if let Err(e) = self.unhook() {
            log::error!("failed to remove hook: {e}");
            return STATUS_FAILED;
        }
        self.strategy = None;
        self.state = SessionState::Terminated;
        log::info!("hook stopped");
        STATUS_OK
    }
}

impl Drop for HookSession {
    fn drop(&mut self) {
        self.stop();
    }
}
