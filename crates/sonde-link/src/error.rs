use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("not connected")]
    NotConnected,
    #[error("client disconnected")]
    Disconnected,
    #[error("operation timed out")]
    Timeout,
    #[error("unknown flight mode '{0}'")]
    ModeUnknown(String),
    #[error("invalid link endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}
