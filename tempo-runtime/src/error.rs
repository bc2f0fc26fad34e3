#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "{depth} timer(s) still open on this thread -- stop them before reporting, \
         or the report would wait on this thread's own register"
    )]
    ScopesOpen { depth: u32 },

    #[error("expected thread count must be at least 1")]
    ThreadCountZero,

    #[error("thread count already set ({slots} register slots allocated)")]
    ThreadCountAlreadySet { slots: usize },

    #[error("invalid value {value:?} for {var}")]
    InvalidConfig { var: &'static str, value: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
