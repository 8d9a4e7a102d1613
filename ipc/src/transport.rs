//! Platform byte-stream behind a channel name.
//!
//! Windows uses named pipes (`\\.\pipe\<name>`); other platforms use a Unix
//! domain socket `<temp dir>/<name>.sock`, claimed through an advisory lock on
//! `<temp dir>/<name>.lock`. Listeners must be created inside a tokio runtime
//! context.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{IpcError, Result};

/// Pause between connection attempts while the server is absent or busy.
const CONNECT_RETRY: Duration = Duration::from_millis(50);

#[cfg(unix)]
pub(crate) type ServerStream = tokio::net::UnixStream;
#[cfg(unix)]
pub(crate) type ClientStream = tokio::net::UnixStream;

#[cfg(windows)]
pub(crate) type ServerStream = tokio::net::windows::named_pipe::NamedPipeServer;
#[cfg(windows)]
pub(crate) type ClientStream = tokio::net::windows::named_pipe::NamedPipeClient;

// ============================================================
// Unix domain sockets
// ============================================================

#[cfg(unix)]
fn socket_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{name}.sock"))
}

#[cfg(unix)]
fn lock_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{name}.lock"))
}

#[cfg(unix)]
pub(crate) struct Listener {
    inner: tokio::net::UnixListener,
    path: std::path::PathBuf,
    /// Locked for the listener's lifetime; the OS drops the lock if the
    /// process dies. The file itself is left behind.
    _claim: std::fs::File,
}

#[cfg(unix)]
impl Listener {
    /// Claims `name`. Fails with [`IpcError::NameInUse`] while another
    /// server holds it; a socket file left by a dead server is replaced.
    pub(crate) fn bind(name: &str) -> Result<Self> {
        use std::fs::TryLockError;

        let claim = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path(name))?;
        match claim.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(IpcError::NameInUse(name.to_string())),
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }

        let path = socket_path(name);
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let inner = tokio::net::UnixListener::bind(&path)?;
        Ok(Self {
            inner,
            path,
            _claim: claim,
        })
    }

    pub(crate) async fn accept(&mut self) -> Result<ServerStream> {
        let (stream, _addr) = self.inner.accept().await?;
        Ok(stream)
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
pub(crate) async fn connect(name: &str, timeout: Duration) -> Result<ClientStream> {
    let path = socket_path(name);
    let deadline = Instant::now() + timeout;
    loop {
        match tokio::net::UnixStream::connect(&path).await {
            Ok(stream) => return Ok(stream),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                ) =>
            {
                if Instant::now() >= deadline {
                    return Err(IpcError::ConnectTimeout(name.to_string()));
                }
                tokio::time::sleep(CONNECT_RETRY).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// ============================================================
// Windows named pipes
// ============================================================

#[cfg(windows)]
const ERROR_FILE_NOT_FOUND: i32 = 2;
#[cfg(windows)]
const ERROR_ACCESS_DENIED: i32 = 5;
#[cfg(windows)]
const ERROR_PIPE_BUSY: i32 = 231;

#[cfg(windows)]
fn pipe_path(name: &str) -> String {
    format!(r"\\.\pipe\{name}")
}

/// One pipe instance at a time: the next instance is created only after the
/// previous client went away.
#[cfg(windows)]
pub(crate) struct Listener {
    path: String,
    pending: Option<ServerStream>,
}

#[cfg(windows)]
impl Listener {
    pub(crate) fn bind(name: &str) -> Result<Self> {
        use tokio::net::windows::named_pipe::{PipeMode, ServerOptions};

        let path = pipe_path(name);
        let first = ServerOptions::new()
            .first_pipe_instance(true)
            .reject_remote_clients(true)
            .pipe_mode(PipeMode::Byte)
            .create(&path)
            .map_err(|e| match e.raw_os_error() {
                Some(ERROR_ACCESS_DENIED) => IpcError::NameInUse(name.to_string()),
                _ => IpcError::Io(e),
            })?;
        Ok(Self { path, pending: Some(first) })
    }

    pub(crate) async fn accept(&mut self) -> Result<ServerStream> {
        use tokio::net::windows::named_pipe::{PipeMode, ServerOptions};

        let server = match self.pending.take() {
            Some(server) => server,
            None => ServerOptions::new()
                .reject_remote_clients(true)
                .pipe_mode(PipeMode::Byte)
                .create(&self.path)?,
        };
        if let Err(e) = server.connect().await {
            // the instance is unusable after a failed connect
            return Err(e.into());
        }
        Ok(server)
    }
}

#[cfg(windows)]
pub(crate) async fn connect(name: &str, timeout: Duration) -> Result<ClientStream> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let path = pipe_path(name);
    let deadline = Instant::now() + timeout;
    loop {
        match ClientOptions::new().open(&path) {
            Ok(client) => return Ok(client),
            Err(e)
                if matches!(
                    e.raw_os_error(),
                    Some(ERROR_PIPE_BUSY) | Some(ERROR_FILE_NOT_FOUND)
                ) =>
            {
                if Instant::now() >= deadline {
                    return Err(IpcError::ConnectTimeout(name.to_string()));
                }
                tokio::time::sleep(CONNECT_RETRY).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
