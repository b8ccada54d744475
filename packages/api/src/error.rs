/// Errors returned by backend and platform calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[cfg(feature = "remote")]
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid credentials")]
    Unauthorized,

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("expected exactly one row from {table}, got {rows}")]
    NotSingle { table: String, rows: usize },

    #[error("realtime: {0}")]
    Realtime(String),

    #[error("push: {0}")]
    Push(String),

    #[error("config: {0}")]
    Config(String),
}

impl ApiError {
    pub(crate) fn decode(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            what: what.into(),
            source,
        }
    }
}
