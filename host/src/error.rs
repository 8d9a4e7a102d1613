use std::path::PathBuf;

use framescope_ipc::IpcError;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error("injecting {} returned no base address", .0.display())]
    InjectFailed(PathBuf),

    #[error("StartHook returned status {0}")]
    StartRejected(i32),

    #[error("StopHook returned status {0}")]
    StopRejected(i32),

    #[error("ejecting {} failed", .0.display())]
    EjectFailed(PathBuf),

    #[error("failed to launch sensor monitor {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
