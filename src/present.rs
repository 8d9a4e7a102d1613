// present.rs: Interception routine for IDXGISwapChain::Present.
//
// The runtime calls `present_detour` with no context of ours, so the active
// interceptor and the trampoline live in process-wide slots that the session
// fills on hook and clears on unhook.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::detour::ThreadExclusions;
use crate::sampler::FrameTimingSampler;
use crate::telemetry::FrameSink;

/// `IDXGISwapChain::Present(this, SyncInterval, Flags) -> HRESULT`
pub type PresentFn =
    unsafe extern "system" fn(swap_chain: *mut c_void, sync_interval: u32, flags: u32) -> i32;

const S_OK: i32 = 0;

/// Address of the original Present, 0 while disarmed.
static TRAMPOLINE: AtomicUsize = AtomicUsize::new(0);

static ACTIVE: RwLock<Option<Arc<Interceptor>>> = RwLock::new(None);

/// Per-session work done on every intercepted present call.
pub struct Interceptor {
    sampler: Mutex<FrameTimingSampler>,
    sink: Arc<dyn FrameSink>,
    exclusions: Arc<ThreadExclusions>,
}

impl Interceptor {
    pub fn new(sink: Arc<dyn FrameSink>, exclusions: Arc<ThreadExclusions>) -> Self {
        Self {
            sampler: Mutex::new(FrameTimingSampler::new()),
            sink,
            exclusions,
        }
    }

    pub fn on_present(&self) {
        if self.exclusions.is_current_excluded() {
            return;
        }
        let sample = self
            .sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe();
        if let Some(sample) = sample {
            self.sink.submit(sample);
        }
    }

    /// Forgets the last timestamp; the next call yields no sample.
    pub fn reset(&self) {
        self.sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }
}

pub fn activate(interceptor: Arc<Interceptor>) {
    *ACTIVE.write().unwrap_or_else(PoisonError::into_inner) = Some(interceptor);
}

pub fn deactivate() {
    ACTIVE.write().unwrap_or_else(PoisonError::into_inner).take();
}

fn active() -> Option<Arc<Interceptor>> {
    ACTIVE.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Publishes the trampoline to the original Present.
pub fn arm(trampoline: usize) {
    TRAMPOLINE.store(trampoline, Ordering::Release);
}

pub fn disarm() {
    TRAMPOLINE.store(0, Ordering::Release);
}

pub fn is_armed() -> bool {
    TRAMPOLINE.load(Ordering::Acquire) != 0
}

/// Replacement for Present. Samples, then calls the original and returns its
/// result unchanged.
pub unsafe extern "system" fn present_detour(
    swap_chain: *mut c_void,
    sync_interval: u32,
    flags: u32,
) -> i32 {
    // a panic must never unwind into the runtime
    let _ = std::panic::catch_unwind(|| {
        if let Some(interceptor) = active() {
            interceptor.on_present();
        }
    });

    match TRAMPOLINE.load(Ordering::Acquire) {
        0 => S_OK,
        original => {
            let original: PresentFn = std::mem::transmute(original);
            original(swap_chain, sync_interval, flags)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detour::slot::SlotBackend;
    use crate::detour::{DetourBackend, DetourRecord};
    use crate::sampler::FrameSample;
    use crate::test_support::{present_lock, SampleRecorder};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "system" fn fake_present(_: *mut c_void, sync_interval: u32, _: u32) -> i32 {
        CALLS.fetch_add(1, Ordering::SeqCst);
        sync_interval as i32 + 100
    }

    fn call_through(slot: &usize) -> i32 {
        let present: PresentFn = unsafe { std::mem::transmute(std::ptr::read_volatile(slot)) };
        unsafe { present(std::ptr::null_mut(), 1, 0) }
    }

    #[test]
    fn test_detour_samples_and_forwards_result() {
        let _serial = present_lock();
        CALLS.store(0, Ordering::SeqCst);

        let mut table = [fake_present as usize];
        let backend: Arc<dyn DetourBackend> = Arc::new(unsafe { SlotBackend::new(&mut table[0]) });
        let exclusions = Arc::new(ThreadExclusions::new());
        let recorder = Arc::new(SampleRecorder::default());
        activate(Arc::new(Interceptor::new(recorder.clone(), exclusions.clone())));

        let mut record = unsafe {
            DetourRecord::install(
                backend,
                exclusions,
                fake_present as usize,
                present_detour as usize,
                arm,
            )
        }
        .unwrap()
        .on_disarm(disarm);

        for _ in 0..5 {
            assert_eq!(call_through(&table[0]), 101);
        }
        assert_eq!(CALLS.load(Ordering::SeqCst), 5);
        assert_eq!(recorder.count(), 4);

        record.uninstall().unwrap();
        assert!(!is_armed());
        deactivate();
        assert_eq!(call_through(&table[0]), 101);
        assert_eq!(recorder.count(), 4);
    }

    #[test]
    fn test_excluded_thread_is_not_sampled() {
        let exclusions = Arc::new(ThreadExclusions::new());
        let recorder = Arc::new(SampleRecorder::default());
        let interceptor = Interceptor::new(recorder.clone(), exclusions.clone());

        {
            let _guard = exclusions.exclude_current();
            interceptor.on_present();
            interceptor.on_present();
        }
        interceptor.on_present();
        interceptor.on_present();
        assert_eq!(recorder.count(), 1);
    }

    #[test]
    fn test_disarmed_detour_reports_success_without_original() {
        let _serial = present_lock();
        disarm();
        CALLS.store(0, Ordering::SeqCst);
        let result = unsafe { present_detour(std::ptr::null_mut(), 0, 0) };
        assert_eq!(result, S_OK);
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_sink_does_not_escape() {
        struct Exploding;
        impl FrameSink for Exploding {
            fn submit(&self, _: FrameSample) {
                panic!("sink failure");
            }
        }

        let _serial = present_lock();
        CALLS.store(0, Ordering::SeqCst);
        arm(fake_present as usize);
        activate(Arc::new(Interceptor::new(
            Arc::new(Exploding),
            Arc::new(ThreadExclusions::new()),
        )));

        for _ in 0..3 {
            assert_eq!(unsafe { present_detour(std::ptr::null_mut(), 2, 0) }, 102);
        }
        assert_eq!(CALLS.load(Ordering::SeqCst), 3);

        deactivate();
        disarm();
    }
}
