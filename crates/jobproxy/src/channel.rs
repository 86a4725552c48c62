//! # Channel Abstraction
//!
//! The only thing a link needs from the outside world: a way to post a message
//! to the worker and a way to read what the worker posts back.
//!
//! ## Philosophy
//!
//! - **Structured, not bytes**: messages cross as structured values. Whether the
//!   channel clones, serializes, or moves them is its own business.
//! - **Synchronous post**: posting either hands the message off or fails right
//!   away. A call never hangs on a channel that could not take its message.

use jobwire::Handle;
use jobwire::MasterMessage;
use jobwire::Value;

/// Errors that occur at the channel layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The other side is gone.
    Closed,
    /// The message could not be put into the channel's native form.
    Serialize(String),
    /// Generic I/O error or internal channel failure.
    Io(String),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Channel closed"),
            Self::Serialize(msg) => write!(f, "Failed to serialize message: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ChannelError {}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// A duplex message channel to a worker.
///
/// This trait is designed to be object-safe (`Arc<dyn Channel>`).
///
/// # Invariants
/// - `post_message` must not block waiting for the worker.
/// - `post_message` must move every handle in `transfer` along with the message.
/// - `recv` returns `Ok(None)` once, when the channel is closed for good.
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    /// Posts a message to the worker.
    fn post_message(&self, message: MasterMessage, transfer: Vec<Handle>) -> Result<()>;

    /// Waits for the next message from the worker.
    ///
    /// The data is returned raw; classification is up to the reader.
    async fn recv(&self) -> Result<Option<Value>>;
}
