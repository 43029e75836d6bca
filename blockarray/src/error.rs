use crate::codec::Command;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArrayError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("device array is not mounted")]
    NotMounted,
    #[error("device array is already mounted")]
    AlreadyMounted,
    #[error("could not connect to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transport failure")]
    Transport(#[from] std::io::Error),
    /// The server executed the request and answered with a nonzero status.
    #[error("device rejected {command:?} with status {status}")]
    Device { command: Command, status: u16 },
}

impl ArrayError {
    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        ArrayError::InvalidArgument(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ArrayError>;
