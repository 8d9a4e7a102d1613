//! Client endpoint: synchronous request/response over a background read loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tokio_util::codec::Framed;

use crate::error::{IpcError, Result};
use crate::message::{Frame, FrameKind, Message, MessageCodec};
use crate::transport;

/// Default wait for the response to a request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// The request currently awaiting its response: `(seq, waiter)`.
type Pending = Arc<Mutex<Option<(u32, std_mpsc::SyncSender<Message>)>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Client side of a named message channel.
///
/// [`IpcClient::send`] is half-duplex: concurrent callers queue behind the
/// request in flight. Messages pushed by the server are buffered and read
/// with [`IpcClient::recv_push`].
pub struct IpcClient {
    name: String,
    out_tx: mpsc::UnboundedSender<Frame>,
    pending: Pending,
    /// Held for a whole request/response exchange; holds the last sequence number.
    request_lock: Mutex<u32>,
    pushes: Mutex<std_mpsc::Receiver<Message>>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    thread: Option<JoinHandle<()>>,
    request_timeout: Duration,
}

impl IpcClient {
    /// Connects to the server named `name`, retrying until `timeout`.
    pub fn connect(name: &str, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let stream = runtime.block_on(transport::connect(name, timeout))?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = std_mpsc::channel();
        let pending: Pending = Arc::new(Mutex::new(None));
        let connected = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(Notify::new());

        let loop_name = name.to_string();
        let loop_pending = Arc::clone(&pending);
        let loop_connected = Arc::clone(&connected);
        let loop_shutdown = Arc::clone(&shutdown);
        let thread = std::thread::Builder::new()
            .name(format!("ipc-client-{name}"))
            .spawn(move || {
                runtime.block_on(read_loop(
                    loop_name,
                    stream,
                    out_rx,
                    push_tx,
                    loop_pending,
                    loop_connected,
                    loop_shutdown,
                ))
            })?;

        log::debug!("[ipc:{name}] client connected");
        Ok(Self {
            name: name.to_string(),
            out_tx,
            pending,
            request_lock: Mutex::new(0),
            pushes: Mutex::new(push_rx),
            connected,
            shutdown,
            thread: Some(thread),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Sends a request and waits for its response body.
    pub fn send(&self, header: &str, body: &str) -> Result<String> {
        let mut seq = lock(&self.request_lock);
        if !self.is_connected() {
            return Err(IpcError::Disconnected);
        }

        *seq = seq.wrapping_add(1);
        let id = *seq;
        let (tx, rx) = std_mpsc::sync_channel(1);
        *lock(&self.pending) = Some((id, tx));

        if self
            .out_tx
            .send(Frame::request(id, Message::new(header, body)))
            .is_err()
        {
            lock(&self.pending).take();
            return Err(IpcError::Disconnected);
        }

        let result = match rx.recv_timeout(self.request_timeout) {
            Ok(response) => Ok(response.body),
            Err(std_mpsc::RecvTimeoutError::Timeout) => Err(IpcError::Timeout(self.request_timeout)),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(IpcError::Disconnected),
        };
        lock(&self.pending).take();
        result
    }

    /// Sends a one-way message; no response is expected.
    pub fn post(&self, header: &str, body: &str) -> Result<()> {
        let _seq = lock(&self.request_lock);
        if !self.is_connected() {
            return Err(IpcError::Disconnected);
        }
        self.out_tx
            .send(Frame::push(0, Message::new(header, body)))
            .map_err(|_| IpcError::Disconnected)
    }

    /// Waits up to `timeout` for a message pushed by the server.
    ///
    /// `Ok(None)` means nothing arrived in time; [`IpcError::Disconnected`]
    /// means the channel is gone and every buffered push was consumed.
    pub fn recv_push(&self, timeout: Duration) -> Result<Option<Message>> {
        match lock(&self.pushes).recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(std_mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(IpcError::Disconnected),
        }
    }
}

impl Drop for IpcClient {
    fn drop(&mut self) {
        self.shutdown.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        log::debug!("[ipc:{}] client closed", self.name);
    }
}

async fn read_loop<S>(
    name: String,
    stream: S,
    mut out_rx: mpsc::UnboundedReceiver<Frame>,
    push_tx: std_mpsc::Sender<Message>,
    pending: Pending,
    connected: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, MessageCodec);

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,

            outgoing = out_rx.recv() => {
                let Some(frame) = outgoing else { break };
                if let Err(e) = framed.send(frame).await {
                    log::debug!("[ipc:{name}] write failed: {e}");
                    break;
                }
            }

            incoming = framed.next() => match incoming {
                Some(Ok(frame)) => match frame.kind {
                    FrameKind::Response => deliver_response(&pending, frame),
                    FrameKind::Push => {
                        let _ = push_tx.send(frame.message);
                    }
                    FrameKind::Request => {
                        log::debug!("[ipc:{name}] ignoring request frame from server");
                    }
                },
                Some(Err(e)) => {
                    log::debug!("[ipc:{name}] read failed: {e}");
                    break;
                }
                None => break,
            },
        }
    }

    connected.store(false, Ordering::Release);
    // wakes a caller blocked in `send`
    lock(&pending).take();
}

/// Hands a response to the waiting request if the sequence numbers match;
/// late responses to timed-out requests are dropped.
fn deliver_response(pending: &Pending, frame: Frame) {
    let mut slot = lock(pending);
    match slot.take() {
        Some((id, waiter)) if id == frame.seq => {
            let _ = waiter.try_send(frame.message);
        }
        other => *slot = other,
    }
}
