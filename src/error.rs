use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Timer(#[from] tempo_runtime::Error),

    #[error("failed to read config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    InvalidArgument(String),

    #[error("a workload thread panicked -- the report would be incomplete")]
    WorkerPanicked,

    #[error("failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
