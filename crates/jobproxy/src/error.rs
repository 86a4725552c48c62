//! # Error Definitions
//!
//! Every way a proxied call can fail, as seen by the caller.
//!
//! Failures on the worker side arrive as plain data and are rehydrated into a
//! [`RemoteError`], so a remote failure is just another catchable `Err`.

use jobwire::SerializedError;

use crate::channel::ChannelError;

/// A failure that happened inside the worker, rebuilt locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    /// The worker's stack, when it sent one. Never a local stack.
    pub stack: Option<String>,
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// Rebuilds a local error from its wire form.
pub fn rehydrate(error: SerializedError) -> RemoteError {
    let SerializedError { name, message, stack } = error;
    let name = if name.is_empty() { "Error".to_string() } else { name };
    RemoteError { name, message, stack }
}

impl From<SerializedError> for RemoteError {
    fn from(error: SerializedError) -> Self {
        rehydrate(error)
    }
}

/// Errors surfaced by proxies and completion objects.
///
/// `Clone` because a terminal error is replayed to every consumer of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The run message could not be sent. The job was never started.
    Channel(ChannelError),
    /// The worker reported a failure.
    Remote(RemoteError),
    /// The job was cancelled before it finished.
    Cancelled,
    /// The job outlived the link's job timeout.
    Timeout,
    /// The channel closed, or the link was dropped, while the job was pending.
    ChannelClosed,
    /// A module proxy was asked for a method it does not expose.
    MethodNotExposed(String),
    /// A result could not be converted into the requested type.
    Decode(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Channel(e) => write!(f, "Channel error: {}", e),
            Self::Remote(e) => write!(f, "Remote failure: {}", e),
            Self::Cancelled => write!(f, "Job cancelled"),
            Self::Timeout => write!(f, "Job timed out"),
            Self::ChannelClosed => write!(f, "Channel closed while job was pending"),
            Self::MethodNotExposed(name) => write!(f, "Method not exposed by worker: {}", name),
            Self::Decode(msg) => write!(f, "Decode error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Channel(e) => Some(e),
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ChannelError> for Error {
    fn from(e: ChannelError) -> Self {
        Self::Channel(e)
    }
}

impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
