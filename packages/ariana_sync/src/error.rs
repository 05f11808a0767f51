use tokio_tungstenite::tungstenite;

/// Socket-level failure. Never surfaces to consumers; the client actor turns
/// it into a state transition and a log line.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("connection closed")]
    Closed,

    #[error("connection refused")]
    Refused,
}

impl TransportError {
    /// True for failures that mean nothing is listening on the other end.
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Refused => true,
            Self::WebSocket(tungstenite::Error::Io(io_err)) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),

    #[error("no home directory to place the default config directory in")]
    NoHomeDir,
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Invalid(Box::new(err))
    }
}
