// logging.rs: `log` backend for code running inside the target process.
//
// Records are forwarded to the host as `Log` messages over the attached
// control link. Without a link, or once it broke, lines are appended to
// `framescope_hook.log` next to this module instead. Records emitted by the
// IPC crate are never forwarded: they are produced while a request is already
// in flight on the same link.

use std::cell::Cell;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

use crate::telemetry::ControlLink;

pub const LOG_FILE_NAME: &str = "framescope_hook.log";

/// Target prefix of records that must not travel over the link.
const IPC_TARGET: &str = "framescope_ipc";

/// Module handle of this DLL (used to locate the log and config files).
static MODULE_HANDLE: AtomicUsize = AtomicUsize::new(0);

static LINK: RwLock<Option<Arc<ControlLink>>> = RwLock::new(None);

/// Serializes appends to the fallback file.
static FILE_LOCK: Mutex<()> = Mutex::new(());

static LOGGER: PipeLogger = PipeLogger;

/// Whether `LOGGER` owns the `log` facade; decided on first `init`.
static INSTALLED: OnceCell<bool> = OnceCell::new();

thread_local! {
    /// Set while this thread is forwarding a record.
    static FORWARDING: Cell<bool> = const { Cell::new(false) };
}

/// Stores the module handle (called from DllMain).
pub fn set_module_handle(handle: usize) {
    MODULE_HANDLE.store(handle, Ordering::Relaxed);
}

/// Directory containing this module, if the handle is known.
#[cfg(windows)]
pub fn module_dir() -> Option<PathBuf> {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;
    use winapi::um::libloaderapi::GetModuleFileNameW;

    let handle = MODULE_HANDLE.load(Ordering::Relaxed);
    if handle == 0 {
        return None;
    }
    let mut buf = [0u16; 1024];
    // SAFETY: the buffer length passed matches the buffer.
    let len =
        unsafe { GetModuleFileNameW(handle as _, buf.as_mut_ptr(), buf.len() as u32) } as usize;
    if len == 0 || len >= buf.len() {
        return None;
    }
    let path = PathBuf::from(OsString::from_wide(&buf[..len]));
    path.parent().map(Path::to_path_buf)
}

#[cfg(not(windows))]
pub fn module_dir() -> Option<PathBuf> {
    None
}

fn log_path() -> PathBuf {
    match module_dir() {
        Some(dir) => dir.join(LOG_FILE_NAME),
        None => PathBuf::from(LOG_FILE_NAME),
    }
}

/// Installs the logger on first use and applies `level`.
pub fn init(level: LevelFilter) {
    // another logger may already own the facade when linked as an rlib
    let installed = *INSTALLED.get_or_init(|| log::set_logger(&LOGGER).is_ok());
    if installed {
        log::set_max_level(level);
    }
}

/// Routes records to `link` from now on.
pub fn attach(link: Arc<ControlLink>) {
    *LINK.write().unwrap_or_else(PoisonError::into_inner) = Some(link);
}

/// Stops forwarding; records go to the fallback file.
pub fn detach() {
    LINK.write().unwrap_or_else(PoisonError::into_inner).take();
}

/// Appends one line to `path`.
pub fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let _guard = FILE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")
}

fn format_record(record: &Record) -> String {
    format!("[{}] {}: {}", record.level(), record.target(), record.args())
}

pub struct PipeLogger;

impl PipeLogger {
    /// `true` when the attached link acknowledged the line.
    fn forward(&self, line: &str) -> bool {
        let link = LINK.read().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(link) = link else {
            return false;
        };
        FORWARDING.with(|busy| {
            if busy.replace(true) {
                return false;
            }
            let sent = link.log(line);
            busy.set(false);
            sent
        })
    }
}

impl Log for PipeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level() && !metadata.target().starts_with(IPC_TARGET)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_record(record);
        if !self.forward(&line) {
            let _ = append_line(&log_path(), &line);
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HookConfig;
    use framescope_ipc::{ControlHandler, IpcServer};

    #[test]
    fn test_append_line_keeps_previous_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOG_FILE_NAME);
        append_line(&path, "first").unwrap();
        append_line(&path, "second").unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }

    #[test]
    fn test_ipc_records_are_filtered() {
        log::set_max_level(LevelFilter::Trace);
        let logger = PipeLogger;
        let ipc = Metadata::builder()
            .level(log::Level::Error)
            .target("framescope_ipc::client")
            .build();
        let own = Metadata::builder()
            .level(log::Level::Error)
            .target("framescope::session")
            .build();
        assert!(!logger.enabled(&ipc));
        assert!(logger.enabled(&own));
    }

    #[test]
    fn test_record_is_forwarded_over_attached_link() {
        let channel = format!("framescope-logging-{}", std::process::id());
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let _server = IpcServer::start(&channel, ControlHandler::new(LogSink(sink))).unwrap();

        let config = HookConfig {
            control_channel: channel,
            ..HookConfig::default()
        };
        attach(Arc::new(ControlLink::connect(&config)));
        log::set_max_level(LevelFilter::Trace);

        PipeLogger.log(
            &Record::builder()
                .level(log::Level::Info)
                .target("framescope::session")
                .args(format_args!("hooked {}", 8))
                .build(),
        );
        detach();

        assert_eq!(
            *received.lock().unwrap(),
            vec!["[INFO] framescope::session: hooked 8".to_string()]
        );
    }

    struct LogSink(Arc<Mutex<Vec<String>>>);

    impl framescope_ipc::ControlEvents for LogSink {
        fn on_log(&self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
        fn on_frame_time(&self, _: f64) {}
    }
}
