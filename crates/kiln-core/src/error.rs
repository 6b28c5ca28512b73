use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid stack config: {reason}")]
    InvalidStack { reason: String },

    // ── Port declarations ──
    #[error("port '{field}' {reason}")]
    InvalidPort { field: &'static str, reason: String },

    /// A value that validation should have rejected reached conversion.
    /// This is a defect, not a user error.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    pub(crate) fn port(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidPort {
            field,
            reason: reason.into(),
        }
    }
}
