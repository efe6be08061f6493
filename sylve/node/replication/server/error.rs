use std::io::Error as IoError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Socket codec error: {0}")]
    CodecError(bincode::Error),
    #[error("TCP socket error: {0}")]
    SocketError(IoError),
    #[error("Protocol mismatch")]
    ProtocolMismatch,
}

pub type ServerResult<T> = Result<T, ServerError>;
