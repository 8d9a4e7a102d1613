//! Monitoring state machine.
//!
//! ```text
//! WaitingForStart --Start--> Monitoring --Stop--> WaitingForStop --> Terminated
//!        |                        |
//!        +-- Stop / disconnect ---+-------- disconnect ------------> Terminated
//! ```
//!
//! Sampling runs on its own thread and checks the running flag once per
//! iteration and while sleeping. After `Stop` the command loop waits a bounded
//! time for it to exit, then gives up on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use framescope_ipc::{IpcClient, SensorCommand, SensorReading};

use crate::classify::classify;
use crate::error::SensorError;
use crate::hardware::HardwareSource;

/// How often blocking waits re-check for progress.
const POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    WaitingForStart,
    Monitoring,
    WaitingForStop,
    Terminated,
}

/// Where classified readings go.
pub trait ReadingSink: Send + Sync + 'static {
    /// `false` when the reading could not be delivered.
    fn send(&self, reading: SensorReading) -> bool;
}

impl ReadingSink for IpcClient {
    fn send(&self, reading: SensorReading) -> bool {
        let message = reading.to_message();
        self.post(&message.header, &message.body).is_ok()
    }
}

/// Where host commands come from.
pub trait CommandSource {
    /// Next command within `timeout`; `Ok(None)` on timeout.
    fn next_command(&self, timeout: Duration) -> Result<Option<SensorCommand>, SensorError>;
}

impl CommandSource for IpcClient {
    fn next_command(&self, timeout: Duration) -> Result<Option<SensorCommand>, SensorError> {
        let Some(message) = self.recv_push(timeout)? else {
            return Ok(None);
        };
        let command = SensorCommand::from_message(&message);
        if command.is_none() {
            log::debug!("ignoring '{}' on the command channel", message.header);
        }
        Ok(command)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorOptions {
    pub interval: Duration,
    /// Bound on the wait for the sampling thread after `Stop`.
    pub stop_timeout: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

pub struct Monitor<S, K> {
    source: Arc<Mutex<S>>,
    sink: Arc<K>,
    running: Arc<AtomicBool>,
    state: MonitorState,
    options: MonitorOptions,
}

impl<S, K> Monitor<S, K>
where
    S: HardwareSource + 'static,
    K: ReadingSink,
{
    pub fn new(source: S, sink: Arc<K>, options: MonitorOptions) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            sink,
            running: Arc::new(AtomicBool::new(false)),
            state: MonitorState::WaitingForStart,
            options,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Drives the state machine to `Terminated`.
    ///
    /// A closed command channel ends the run early without an error.
    pub fn run<C: CommandSource + ?Sized>(&mut self, commands: &C) -> Result<(), SensorError> {
        log::info!("waiting for start command");
        if !self.wait_for(commands, SensorCommand::Start)? {
            self.state = MonitorState::Terminated;
            return Ok(());
        }

        self.state = MonitorState::Monitoring;
        self.running.store(true, Ordering::Release);
        let sampler = self.spawn_sampler()?;
        log::info!("sampling every {:?}", self.options.interval);

        let result = self.wait_for(commands, SensorCommand::Stop);

        self.state = MonitorState::WaitingForStop;
        self.running.store(false, Ordering::Release);
        log::info!("stopping sampling thread");
        self.join_sampler(sampler);

        self.state = MonitorState::Terminated;
        result.map(|_| ())
    }

    /// `Ok(false)` when the channel closed or a `Stop` arrived first.
    fn wait_for<C: CommandSource + ?Sized>(
        &self,
        commands: &C,
        wanted: SensorCommand,
    ) -> Result<bool, SensorError> {
        loop {
            match commands.next_command(POLL) {
                Ok(Some(command)) if command == wanted => return Ok(true),
                Ok(Some(SensorCommand::Stop)) => {
                    log::info!("stop received before start");
                    return Ok(false);
                }
                Ok(Some(command)) => log::debug!("ignoring repeated {command:?}"),
                Ok(None) => {}
                Err(SensorError::ChannelClosed) | Err(SensorError::Ipc(_)) => {
                    log::warn!("command channel closed");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn spawn_sampler(&self) -> Result<JoinHandle<()>, SensorError> {
        let source = Arc::clone(&self.source);
        let sink = Arc::clone(&self.sink);
        let running = Arc::clone(&self.running);
        let interval = self.options.interval;
        let handle = std::thread::Builder::new()
            .name("sensor-sampler".into())
            .spawn(move || sample_loop(&source, &*sink, &running, interval))?;
        Ok(handle)
    }

    fn join_sampler(&self, sampler: JoinHandle<()>) {
        let deadline = Instant::now() + self.options.stop_timeout;
        while !sampler.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("sampling thread did not stop within {:?}", self.options.stop_timeout);
                return;
            }
            std::thread::sleep(POLL);
        }
        if sampler.join().is_err() {
            log::error!("sampling thread panicked");
        }
        log::info!("sampling thread stopped");
    }
}

fn sample_loop<S: HardwareSource, K: ReadingSink + ?Sized>(
    source: &Mutex<S>,
    sink: &K,
    running: &AtomicBool,
    interval: Duration,
) {
    while running.load(Ordering::Acquire) {
        let sensors = source.lock().unwrap_or_else(PoisonError::into_inner).update();
        match sensors {
            Ok(sensors) => {
                for reading in sensors.iter().filter_map(classify) {
                    if !running.load(Ordering::Acquire) {
                        return;
                    }
                    if !sink.send(reading) {
                        log::warn!("sending {} failed", reading.kind);
                    }
                }
            }
            Err(e) => log::error!("sensor update failed: {e}"),
        }
        sleep_while_running(running, interval);
    }
}

fn sleep_while_running(running: &AtomicBool, interval: Duration) {
    let deadline = Instant::now() + interval;
    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(POLL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    use framescope_ipc::SensorKind;

    use super::*;
    use crate::classify::{HardwareKind, RawSensor, SensorType};

    struct FakeSource {
        updates: Arc<AtomicUsize>,
        fail_first: bool,
    }

    impl HardwareSource for FakeSource {
        fn update(&mut self) -> Result<Vec<RawSensor>, SensorError> {
            let n = self.updates.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && n == 0 {
                return Err(SensorError::Hardware("sensor bus busy".into()));
            }
            Ok(vec![
                RawSensor::new(HardwareKind::Cpu, SensorType::Load, "CPU Total", Some(42.0)),
                RawSensor::new(HardwareKind::Cpu, SensorType::Temperature, "Package", None),
                RawSensor::new(HardwareKind::Other, SensorType::Load, "Fan", Some(1.0)),
            ])
        }
    }

    #[derive(Default)]
    struct Collected(Mutex<Vec<SensorReading>>);

    impl Collected {
        fn len(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    impl ReadingSink for Collected {
        fn send(&self, reading: SensorReading) -> bool {
            self.0.lock().unwrap().push(reading);
            true
        }
    }

    impl CommandSource for mpsc::Receiver<SensorCommand> {
        fn next_command(&self, timeout: Duration) -> Result<Option<SensorCommand>, SensorError> {
            match self.recv_timeout(timeout) {
                Ok(command) => Ok(Some(command)),
                Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
                Err(mpsc::RecvTimeoutError::Disconnected) => Err(SensorError::ChannelClosed),
            }
        }
    }

    fn options() -> MonitorOptions {
        MonitorOptions {
            interval: Duration::from_millis(10),
            stop_timeout: Duration::from_secs(2),
        }
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_samples_only_between_start_and_stop() {
        let updates = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(Collected::default());
        let source = FakeSource { updates: Arc::clone(&updates), fail_first: true };
        let mut monitor = Monitor::new(source, Arc::clone(&sink), options());
        let (tx, rx) = mpsc::channel();

        let runner = std::thread::spawn(move || {
            monitor.run(&rx).unwrap();
            monitor.state()
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(updates.load(Ordering::SeqCst), 0);

        tx.send(SensorCommand::Start).unwrap();
        wait_until(|| sink.len() >= 3);
        tx.send(SensorCommand::Stop).unwrap();

        assert_eq!(runner.join().unwrap(), MonitorState::Terminated);
        let after_stop = sink.len();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(sink.len(), after_stop);

        let readings = sink.0.lock().unwrap();
        assert!(readings.iter().all(|r| *r == SensorReading::new(SensorKind::CpuLoad, 42.0)));
        // the failed first update produced nothing but did not end the loop
        assert!(updates.load(Ordering::SeqCst) > readings.len());
    }

    #[test]
    fn test_stop_before_start_never_samples() {
        let updates = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(Collected::default());
        let source = FakeSource { updates: Arc::clone(&updates), fail_first: false };
        let mut monitor = Monitor::new(source, Arc::clone(&sink), options());
        let (tx, rx) = mpsc::channel();

        tx.send(SensorCommand::Stop).unwrap();
        monitor.run(&rx).unwrap();

        assert_eq!(monitor.state(), MonitorState::Terminated);
        assert_eq!(updates.load(Ordering::SeqCst), 0);
        assert_eq!(sink.len(), 0);
    }

    #[test]
    fn test_closed_channel_terminates() {
        let updates = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(Collected::default());
        let source = FakeSource { updates: Arc::clone(&updates), fail_first: false };
        let mut monitor = Monitor::new(source, sink, options());
        let (tx, rx) = mpsc::channel::<SensorCommand>();

        drop(tx);
        monitor.run(&rx).unwrap();
        assert_eq!(monitor.state(), MonitorState::Terminated);
        assert_eq!(updates.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disconnect_while_monitoring_stops_sampler() {
        let updates = Arc::new(AtomicUsize::new(0));
        let sink = Arc::new(Collected::default());
        let source = FakeSource { updates: Arc::clone(&updates), fail_first: false };
        let mut monitor = Monitor::new(source, Arc::clone(&sink), options());
        let (tx, rx) = mpsc::channel();

        tx.send(SensorCommand::Start).unwrap();
        let runner = std::thread::spawn(move || {
            monitor.run(&rx).unwrap();
            monitor.state()
        });
        wait_until(|| sink.len() >= 1);
        drop(tx);

        assert_eq!(runner.join().unwrap(), MonitorState::Terminated);
        let after = updates.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(updates.load(Ordering::SeqCst), after);
    }
}
