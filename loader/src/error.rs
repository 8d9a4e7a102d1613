use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("cannot read manifest {path}: {source}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid manifest {path}: {source}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("'{name}' resolves to {path}, which does not exist")]
    Missing { name: String, path: PathBuf },

    /// Names outside the manifest are never resolved elsewhere.
    #[error("'{0}' is not listed in the manifest")]
    Unresolved(String),

    #[error("failed to load {path} (error {code})")]
    Load { path: PathBuf, code: u32 },

    #[error("export '{0}' not found")]
    SymbolNotFound(String),

    #[error("module implements contract version {found}, loader expects {expected}")]
    AbiMismatch { expected: u32, found: u32 },

    #[error("session stop failed with status {0}; module left loaded")]
    StopFailed(i32),

    #[error("location of the loader module is unknown")]
    NoModuleDir,
}
