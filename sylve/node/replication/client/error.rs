use std::io::Error as IoError;

use thiserror::Error;

use crate::node::{auth::AuthError, transfer::TransferError};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Socket codec error: {0}")]
    CodecError(bincode::Error),
    #[error("endpoint unreachable: {0}")]
    EndpointUnreachable(IoError),
    #[error("TCP socket is empty")]
    EmptySocket,
    #[error("Protocol mismatch")]
    ProtocolMismatch,
    #[error("authentication rejected by remote: {0}")]
    AuthenticationFailed(String),
    #[error("remote histories diverged: {0}")]
    RemoteConflict(String),
    #[error("remote error ({code}): {message}")]
    Remote { code: String, message: String },
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl ClientError {
    /// Lift an error frame into the matching local variant
    pub fn from_remote(code: String, message: String) -> ClientError {
        match code.as_str() {
            "authentication_failed" => ClientError::AuthenticationFailed(message),
            "diverged" => ClientError::RemoteConflict(message),
            _ => ClientError::Remote { code, message },
        }
    }

    /// Stable, greppable message code
    pub fn code(&self) -> &str {
        match self {
            ClientError::CodecError(_) => "codec_error",
            ClientError::EndpointUnreachable(_) => "endpoint_unreachable",
            ClientError::EmptySocket => "empty_socket",
            ClientError::ProtocolMismatch => "protocol_mismatch",
            ClientError::AuthenticationFailed(_) => "authentication_failed",
            ClientError::RemoteConflict(_) => "diverged",
            ClientError::Remote { code, .. } => code,
            ClientError::Auth(e) => e.code(),
            ClientError::Transfer(e) => e.code(),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
