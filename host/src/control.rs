//! Host end of the control channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use framescope_ipc::{ControlEvents, ControlHandler, IpcServer};

use crate::error::HostError;
use crate::stats::FrameStats;

/// Log target for text forwarded by the instrumented process.
pub const TARGET_LOG: &str = "framescope::target";

#[derive(Default)]
struct Recording {
    active: AtomicBool,
    frame_times: Mutex<Vec<f64>>,
}

impl Recording {
    fn frame_times(&self) -> MutexGuard<'_, Vec<f64>> {
        self.frame_times.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct HostEvents {
    recording: Arc<Recording>,
}

impl ControlEvents for HostEvents {
    fn on_log(&self, text: &str) {
        log::info!(target: TARGET_LOG, "{text}");
    }

    fn on_frame_time(&self, frame_time_ms: f64) {
        if self.recording.active.load(Ordering::Acquire) {
            self.recording.frame_times().push(frame_time_ms);
        }
    }
}

/// Serves the control channel and records frame times on demand.
///
/// Frame times are kept only between [`ControlServer::begin_recording`] and
/// [`ControlServer::end_recording`]; the instrumented process sends them
/// continuously.
pub struct ControlServer {
    server: IpcServer,
    recording: Arc<Recording>,
}

impl ControlServer {
    pub fn start(channel: &str) -> Result<Self, HostError> {
        let recording = Arc::new(Recording::default());
        let events = HostEvents { recording: Arc::clone(&recording) };
        let server = IpcServer::start(channel, ControlHandler::new(events))?;
        Ok(Self { server, recording })
    }

    pub fn name(&self) -> &str {
        self.server.name()
    }

    pub fn is_connected(&self) -> bool {
        self.server.is_connected()
    }

    /// Blocks until the instrumented process has connected.
    pub fn wait_for_target(&self, timeout: Duration) -> bool {
        self.server.wait_for_client(timeout)
    }

    /// Discards previous samples and starts keeping new ones.
    pub fn begin_recording(&self) {
        self.recording.frame_times().clear();
        self.recording.active.store(true, Ordering::Release);
    }

    /// Stops recording and returns the samples kept since `begin_recording`.
    pub fn end_recording(&self) -> Vec<f64> {
        self.recording.active.store(false, Ordering::Release);
        std::mem::take(&mut *self.recording.frame_times())
    }

    pub fn is_recording(&self) -> bool {
        self.recording.active.load(Ordering::Acquire)
    }

    /// Ends the recording and summarizes it.
    pub fn finish(&self) -> FrameStats {
        let frame_times = self.end_recording();
        log::debug!("recorded {} frame times", frame_times.len());
        FrameStats::from_frame_times(&frame_times)
    }
}
