use std::convert::From;
use std::sync::mpsc::SendError;

use failure::Fail;

use crate::storage::StorageError;
use crate::worker::Message;

#[derive(Debug, Fail)]
pub enum Error {
    /// The record is missing a required field, or carries a disposition or
    /// action value we do not understand. Not retried.
    #[fail(display = "Malformed record: {}", _0)]
    MalformedRecord(String),

    /// The correlation store or completion ledger could not be read or
    /// written. Nothing was applied; the caller may redeliver the record.
    #[fail(display = "Storage unavailable: {}", _0)]
    StorageUnavailable(String),

    /// Too many notifications are waiting on Original records that have not
    /// arrived. Nothing was applied; the caller may redeliver the record.
    #[fail(display = "Orphan buffer full: {}", _0)]
    OrphanBufferFull(String),

    #[fail(display = "Lock poisoned")]
    LockPoisoned,

    #[fail(display = "Unable to send to worker")]
    Send,

    #[fail(display = "Invalid configuration")]
    InvalidConfig,

    #[fail(display = "Unable to load configuration: {}", _0)]
    Config(String),
}

impl From<SendError<Message>> for Error {
    fn from(_: SendError<Message>) -> Error {
        Error::Send
    }
}

impl<S: StorageError> From<S> for Error {
    fn from(e: S) -> Error {
        Error::StorageUnavailable(format!("{}", e))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Error {
        Error::Config(format!("{}", e))
    }
}
