// detector.rs: Finds which graphics runtime the target process has loaded.
//
// The loaded-module set is polled on a fixed interval until any known runtime
// module shows up or the timeout elapses. Candidates are evaluated in a fixed
// order and every match overwrites the previous one, so the LAST loaded
// candidate in `EVALUATION_ORDER` wins (d3d9 beats d3d11 when both are
// present).

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsRuntime {
    Direct3D9,
    Direct3D10,
    Direct3D10_1,
    Direct3D11,
    Direct3D11_1,
    Direct3D12,
    Unknown,
}

impl fmt::Display for GraphicsRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GraphicsRuntime::Direct3D9 => "Direct3D 9",
            GraphicsRuntime::Direct3D10 => "Direct3D 10",
            GraphicsRuntime::Direct3D10_1 => "Direct3D 10.1",
            GraphicsRuntime::Direct3D11 => "Direct3D 11",
            GraphicsRuntime::Direct3D11_1 => "Direct3D 11.1",
            GraphicsRuntime::Direct3D12 => "Direct3D 12",
            GraphicsRuntime::Unknown => "unknown runtime",
        };
        f.write_str(name)
    }
}

/// Module base names in evaluation order.
pub const EVALUATION_ORDER: [(&str, GraphicsRuntime); 6] = [
    ("d3d12", GraphicsRuntime::Direct3D12),
    ("d3d11_1", GraphicsRuntime::Direct3D11_1),
    ("d3d11", GraphicsRuntime::Direct3D11),
    ("d3d10_1", GraphicsRuntime::Direct3D10_1),
    ("d3d10", GraphicsRuntime::Direct3D10),
    ("d3d9", GraphicsRuntime::Direct3D9),
];

/// View of the target process's loaded-module set.
pub trait ModuleProbe: Send {
    /// `module` is a base name without extension, e.g. `d3d11`.
    fn is_loaded(&self, module: &str) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct DetectOptions {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            interval: Duration::from_millis(100),
        }
    }
}

/// One pass over `EVALUATION_ORDER`.
pub fn evaluate(modules: &dyn ModuleProbe) -> GraphicsRuntime {
    let mut found = GraphicsRuntime::Unknown;
    for (module, runtime) in EVALUATION_ORDER {
        if modules.is_loaded(module) {
            found = runtime;
        }
    }
    found
}

/// Polls until a runtime is found; `Unknown` once `options.timeout` elapsed.
pub fn detect(modules: &dyn ModuleProbe, options: DetectOptions) -> GraphicsRuntime {
    let deadline = Instant::now() + options.timeout;
    loop {
        let runtime = evaluate(modules);
        if runtime != GraphicsRuntime::Unknown {
            log::info!("detected {runtime}");
            return runtime;
        }
        if Instant::now() >= deadline {
            log::info!("no graphics runtime loaded after {:?}", options.timeout);
            return GraphicsRuntime::Unknown;
        }
        std::thread::sleep(options.interval);
    }
}

/// Loaded modules of the current process via `GetModuleHandleA`.
#[cfg(windows)]
pub struct LoadedModules;

#[cfg(windows)]
impl ModuleProbe for LoadedModules {
    fn is_loaded(&self, module: &str) -> bool {
        use winapi::um::libloaderapi::GetModuleHandleA;

        let Ok(name) = std::ffi::CString::new(format!("{module}.dll")) else {
            return false;
        };
        // SAFETY: `name` is a valid NUL-terminated string; no reference is taken.
        unsafe { !GetModuleHandleA(name.as_ptr()).is_null() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeModules(HashSet<&'static str>);

    impl FakeModules {
        fn with(names: &[&'static str]) -> Self {
            Self(names.iter().copied().collect())
        }
    }

    impl ModuleProbe for FakeModules {
        fn is_loaded(&self, module: &str) -> bool {
            self.0.contains(module)
        }
    }

    /// Reports `d3d11` only from the `after`-th poll on.
    struct LateModules {
        polls: Arc<AtomicUsize>,
        after: usize,
    }

    impl ModuleProbe for LateModules {
        fn is_loaded(&self, module: &str) -> bool {
            // count one poll per pass, on the first candidate
            if module == EVALUATION_ORDER[0].0 {
                self.polls.fetch_add(1, Ordering::SeqCst);
            }
            module == "d3d11" && self.polls.load(Ordering::SeqCst) >= self.after
        }
    }

    fn quick() -> DetectOptions {
        DetectOptions {
            timeout: Duration::from_millis(200),
            interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_last_match_in_order_wins() {
        let modules = FakeModules::with(&["d3d11", "d3d9"]);
        assert_eq!(evaluate(&modules), GraphicsRuntime::Direct3D9);
    }

    #[test]
    fn test_d3d11_beats_d3d12_when_both_loaded() {
        let modules = FakeModules::with(&["d3d12", "d3d11"]);
        assert_eq!(evaluate(&modules), GraphicsRuntime::Direct3D11);
    }

    #[test]
    fn test_single_module() {
        assert_eq!(
            evaluate(&FakeModules::with(&["d3d12"])),
            GraphicsRuntime::Direct3D12
        );
        assert_eq!(
            evaluate(&FakeModules::with(&["d3d11_1"])),
            GraphicsRuntime::Direct3D11_1
        );
    }

    #[test]
    fn test_detect_times_out_with_unknown() {
        let started = Instant::now();
        let runtime = detect(&FakeModules::with(&["opengl32"]), quick());
        assert_eq!(runtime, GraphicsRuntime::Unknown);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn test_detect_keeps_polling_until_module_appears() {
        let polls = Arc::new(AtomicUsize::new(0));
        let modules = LateModules {
            polls: Arc::clone(&polls),
            after: 3,
        };
        assert_eq!(detect(&modules, quick()), GraphicsRuntime::Direct3D11);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }
}
