//! Server endpoint: owns the channel name and answers one client at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tokio_util::codec::Framed;

use crate::error::{IpcError, Result};
use crate::message::{Frame, FrameKind, Message, MessageCodec};
use crate::transport::Listener;

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Reacts to messages received by an [`IpcServer`].
///
/// Runs on the server's read loop; only one message is in flight per
/// channel, so implementations must return quickly.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handles one client message and returns the response body.
    ///
    /// For one-way pushes from the client the return value is discarded.
    fn handle(&self, message: &Message) -> String;
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) -> String + Send + Sync + 'static,
{
    fn handle(&self, message: &Message) -> String {
        self(message)
    }
}

/// Server side of a named message channel.
///
/// Creating the server claims the channel name; a second server under the
/// same name fails with [`IpcError::NameInUse`] until this one is dropped.
pub struct IpcServer {
    name: String,
    push_tx: mpsc::UnboundedSender<Message>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    thread: Option<JoinHandle<()>>,
}

impl IpcServer {
    /// Claims `name` and starts the background read loop.
    pub fn start<H: MessageHandler>(name: &str, handler: H) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let listener = runtime.block_on(async { Listener::bind(name) })?;

        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(Notify::new());

        let loop_name = name.to_string();
        let loop_connected = Arc::clone(&connected);
        let loop_shutdown = Arc::clone(&shutdown);
        let thread = std::thread::Builder::new()
            .name(format!("ipc-server-{name}"))
            .spawn(move || {
                runtime.block_on(serve(
                    loop_name,
                    listener,
                    handler,
                    push_rx,
                    loop_connected,
                    loop_shutdown,
                ))
            })?;

        log::debug!("[ipc:{name}] server listening");
        Ok(Self {
            name: name.to_string(),
            push_tx,
            connected,
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Blocks until a client is connected or `timeout` elapses.
    pub fn wait_for_client(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_connected() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        true
    }

    /// Sends a one-way message to the connected client.
    pub fn push(&self, header: &str, body: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(IpcError::Disconnected);
        }
        self.push_tx
            .send(Message::new(header, body))
            .map_err(|_| IpcError::Disconnected)
    }

    /// Stops the read loop and releases the channel name.
    pub fn shutdown(self) {}
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        log::debug!("[ipc:{}] server stopped", self.name);
    }
}

async fn serve<H: MessageHandler>(
    name: String,
    mut listener: Listener,
    handler: H,
    mut push_rx: mpsc::UnboundedReceiver<Message>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) {
    loop {
        let stream = tokio::select! {
            _ = shutdown.notified() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("[ipc:{name}] accept failed: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };

        // pushes queued for a previous client are stale
        while push_rx.try_recv().is_ok() {}

        connected.store(true, Ordering::Release);
        log::debug!("[ipc:{name}] client connected");
        let stop = serve_connection(&name, stream, &handler, &mut push_rx, &shutdown).await;
        connected.store(false, Ordering::Release);
        log::debug!("[ipc:{name}] client disconnected");

        if stop {
            break;
        }
    }
}

/// Serves one client until it disconnects. Returns `true` when the server
/// itself is shutting down.
async fn serve_connection<S, H>(
    name: &str,
    stream: S,
    handler: &H,
    push_rx: &mut mpsc::UnboundedReceiver<Message>,
    shutdown: &Notify,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: MessageHandler,
{
    let mut framed = Framed::new(stream, MessageCodec);
    let mut push_seq: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.notified() => return true,

            pushed = push_rx.recv() => {
                let Some(message) = pushed else { return true };
                push_seq = push_seq.wrapping_add(1);
                if let Err(e) = framed.send(Frame::push(push_seq, message)).await {
                    log::warn!("[ipc:{name}] push failed: {e}");
                    return false;
                }
            }

            incoming = framed.next() => match incoming {
                Some(Ok(frame)) => match frame.kind {
                    FrameKind::Request => {
                        let body = handler.handle(&frame.message);
                        if let Err(e) = framed.send(Frame::response(frame.seq, body)).await {
                            log::warn!("[ipc:{name}] response failed: {e}");
                            return false;
                        }
                    }
                    FrameKind::Push => {
                        let _ = handler.handle(&frame.message);
                    }
                    FrameKind::Response => {
                        log::debug!("[ipc:{name}] ignoring response frame from client");
                    }
                },
                Some(Err(e)) => {
                    log::warn!("[ipc:{name}] read failed: {e}");
                    return false;
                }
                None => return false,
            },
        }
    }
}
