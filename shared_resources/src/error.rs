use std::io;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FloorError {
    #[error("invalid floor label")]
    BadLabel,
    #[error("already at the destination floor")]
    NoStep,
    #[error("floor outside the serviced range")]
    OutOfRange,
}

#[derive(Debug, Error)]
pub enum ShmError {
    #[error("shared memory object {0} already exists")]
    AlreadyExists(String),
    #[error("unable to access shared memory object {0}")]
    NotFound(String),
    #[error("shm_open failed: {0}")]
    Open(io::Error),
    #[error("ftruncate failed: {0}")]
    Resize(io::Error),
    #[error("mmap failed: {0}")]
    Map(io::Error),
    #[error("pthread initialisation failed: {0}")]
    SyncInit(io::Error),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message does not match the wire grammar: {0:?}")]
    BadMessage(String),
    #[error("message exceeds the 65535 byte frame limit")]
    TooLong,
    #[error(transparent)]
    Io(#[from] io::Error),
}
