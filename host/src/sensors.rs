//! Host end of the sensor channel.
//!
//! The monitor process is the client. Commands go out as pushes; readings
//! come back as one message each and are kept only while monitoring.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Child, Command};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use framescope_ipc::control::OK;
use framescope_ipc::{IpcServer, Message, MessageHandler, SensorCommand, SensorKind, SensorReading};

use crate::error::HostError;

#[derive(Default)]
struct Samples {
    monitoring: bool,
    values: BTreeMap<SensorKind, Vec<f32>>,
}

type Shared = Arc<Mutex<Samples>>;

fn lock(samples: &Mutex<Samples>) -> MutexGuard<'_, Samples> {
    samples.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ReadingHandler {
    samples: Shared,
}

impl MessageHandler for ReadingHandler {
    fn handle(&self, message: &Message) -> String {
        match SensorReading::from_message(message) {
            Some(reading) => {
                let mut samples = lock(&self.samples);
                if samples.monitoring {
                    samples.values.entry(reading.kind).or_default().push(reading.value);
                }
            }
            None => log::trace!("ignoring sensor message '{}'", message.header),
        }
        OK.to_string()
    }
}

/// Mean of every sensor kind over one monitoring window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SensorSummary {
    pub cpu_temperature: f32,
    pub cpu_load: f32,
    pub memory_usage: f32,
    pub gpu_temperature: f32,
    pub gpu_hot_spot_temperature: f32,
    pub gpu_memory_usage: f32,
}

impl SensorSummary {
    pub fn get(&self, kind: SensorKind) -> f32 {
        match kind {
            SensorKind::CpuTemperature => self.cpu_temperature,
            SensorKind::CpuLoad => self.cpu_load,
            SensorKind::MemoryUsage => self.memory_usage,
            SensorKind::GpuTemperature => self.gpu_temperature,
            SensorKind::GpuHotSpotTemperature => self.gpu_hot_spot_temperature,
            SensorKind::GpuMemoryUsage => self.gpu_memory_usage,
        }
    }
}

pub struct SensorAggregator {
    server: IpcServer,
    samples: Shared,
    monitor: Option<Child>,
}

impl SensorAggregator {
    /// Claims the sensor channel. The monitor process connects later.
    pub fn start(channel: &str) -> Result<Self, HostError> {
        let samples = Shared::default();
        let server = IpcServer::start(channel, ReadingHandler { samples: Arc::clone(&samples) })?;
        Ok(Self { server, samples, monitor: None })
    }

    pub fn name(&self) -> &str {
        self.server.name()
    }

    /// Spawns the monitor process pointed at this channel.
    pub fn launch_monitor(&mut self, path: &Path) -> Result<(), HostError> {
        let child = Command::new(path)
            .arg("--channel")
            .arg(self.server.name())
            .spawn()
            .map_err(|source| HostError::Spawn { path: path.to_path_buf(), source })?;
        log::info!("launched sensor monitor (pid {})", child.id());
        self.monitor = Some(child);
        Ok(())
    }

    pub fn wait_for_monitor(&self, timeout: Duration) -> bool {
        self.server.wait_for_client(timeout)
    }

    pub fn is_connected(&self) -> bool {
        self.server.is_connected()
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.samples).monitoring
    }

    /// Clears previous samples and tells the monitor to start.
    ///
    /// Returns `false` without side effects when no monitor is connected or a
    /// window is already open.
    pub fn start_monitoring(&self) -> bool {
        if !self.server.is_connected() {
            return false;
        }
        {
            let mut samples = lock(&self.samples);
            if samples.monitoring {
                return false;
            }
            samples.values.clear();
            samples.monitoring = true;
        }
        if let Err(e) = self.push(SensorCommand::Start) {
            log::warn!("failed to start sensor monitor: {e}");
            lock(&self.samples).monitoring = false;
            return false;
        }
        true
    }

    /// Closes the monitoring window; later readings are dropped.
    pub fn stop_monitoring(&self) -> bool {
        {
            let mut samples = lock(&self.samples);
            if !samples.monitoring {
                return false;
            }
            samples.monitoring = false;
        }
        if let Err(e) = self.push(SensorCommand::Stop) {
            log::warn!("failed to stop sensor monitor: {e}");
            return false;
        }
        true
    }

    /// Mean of the readings of `kind`, 0 when there were none.
    pub fn average(&self, kind: SensorKind) -> f32 {
        let samples = lock(&self.samples);
        match samples.values.get(&kind) {
            Some(values) if !values.is_empty() => values.iter().sum::<f32>() / values.len() as f32,
            _ => 0.0,
        }
    }

    pub fn sample_count(&self, kind: SensorKind) -> usize {
        lock(&self.samples).values.get(&kind).map_or(0, Vec::len)
    }

    pub fn summary(&self) -> SensorSummary {
        SensorSummary {
            cpu_temperature: self.average(SensorKind::CpuTemperature),
            cpu_load: self.average(SensorKind::CpuLoad),
            memory_usage: self.average(SensorKind::MemoryUsage),
            gpu_temperature: self.average(SensorKind::GpuTemperature),
            gpu_hot_spot_temperature: self.average(SensorKind::GpuHotSpotTemperature),
            gpu_memory_usage: self.average(SensorKind::GpuMemoryUsage),
        }
    }

    /// Waits up to `timeout` for a launched monitor to exit, then kills it.
    pub fn finish_monitor(&mut self, timeout: Duration) {
        let Some(mut child) = self.monitor.take() else {
            return;
        };
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    log::info!("sensor monitor exited with {status}");
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("failed to poll sensor monitor: {e}");
                    break;
                }
            }
        }
        log::warn!("sensor monitor did not exit, killing it");
        let _ = child.kill();
        let _ = child.wait();
    }

    fn push(&self, command: SensorCommand) -> Result<(), HostError> {
        let message = command.to_message();
        self.server.push(&message.header, &message.body)?;
        Ok(())
    }
}

impl Drop for SensorAggregator {
    fn drop(&mut self) {
        if let Some(mut child) = self.monitor.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
