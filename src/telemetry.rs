// telemetry.rs: Control channel link from the target process to the host.
//
// Every request is a full round trip bounded by the configured request
// timeout. A timed-out request only drops that message. Losing the channel
// marks the link broken and every later call is a silent no-op, so the target
// keeps rendering whatever happens to the host.

use std::sync::atomic::{AtomicBool, Ordering};

use framescope_ipc::control::{self, FRAME_TIME, LOG};
use framescope_ipc::{IpcClient, IpcError};

use crate::config::HookConfig;
use crate::sampler::FrameSample;

/// Destination of frame samples produced on the render thread.
pub trait FrameSink: Send + Sync {
    /// Best effort; must never panic or block unboundedly.
    fn submit(&self, sample: FrameSample);
}

pub struct ControlLink {
    client: Option<IpcClient>,
    healthy: AtomicBool,
    log_frame_times: bool,
}

impl ControlLink {
    /// Connects to the host's control channel. Failure yields a link that is
    /// already broken.
    pub fn connect(config: &HookConfig) -> Self {
        match IpcClient::connect(&config.control_channel, config.connect_timeout()) {
            Ok(client) => Self {
                client: Some(client.with_request_timeout(config.request_timeout())),
                healthy: AtomicBool::new(true),
                log_frame_times: config.log_frame_times,
            },
            Err(e) => {
                log::warn!("control channel '{}' unavailable: {e}", config.control_channel);
                Self::disconnected()
            }
        }
    }

    pub fn disconnected() -> Self {
        Self {
            client: None,
            healthy: AtomicBool::new(false),
            log_frame_times: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
            && self.client.as_ref().is_some_and(IpcClient::is_connected)
    }

    /// Sends a `Log` line; `true` when the host acknowledged it.
    pub fn log(&self, text: &str) -> bool {
        self.request(LOG, text).is_some_and(|r| control::is_ok(&r))
    }

    /// Sends an `FT` sample; `true` when the host acknowledged it.
    pub fn frame_time(&self, frame_time_ms: f64) -> bool {
        let body = control::format_frame_time(frame_time_ms);
        self.request(FRAME_TIME, &body).is_some_and(|r| control::is_ok(&r))
    }

    fn request(&self, header: &str, body: &str) -> Option<String> {
        if !self.healthy.load(Ordering::Acquire) {
            return None;
        }
        let client = self.client.as_ref()?;
        match client.send(header, body) {
            Ok(response) => Some(response),
            Err(e @ (IpcError::Disconnected | IpcError::Io(_))) => {
                self.healthy.store(false, Ordering::Release);
                // lands in the fallback file now that the link is down
                log::warn!("control channel broken: {e}");
                None
            }
            Err(e) => {
                log::debug!("control request '{header}' dropped: {e}");
                None
            }
        }
    }
}

impl FrameSink for ControlLink {
    fn submit(&self, sample: FrameSample) {
        if self.log_frame_times {
            log::trace!("frame time {:.3} ms", sample.elapsed_ms);
        }
        self.frame_time(sample.elapsed_ms);
    }
}
