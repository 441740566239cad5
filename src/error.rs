use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

/// Failures that can stop the server. The aggregation core itself never errors;
/// everything here happens at startup or while serving the socket.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}
