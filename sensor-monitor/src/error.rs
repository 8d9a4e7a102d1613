use framescope_ipc::IpcError;

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error("command channel closed")]
    ChannelClosed,

    #[error("hardware read failed: {0}")]
    Hardware(String),

    #[error("failed to spawn sampling thread: {0}")]
    Spawn(#[from] std::io::Error),
}
