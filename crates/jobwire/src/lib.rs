//! # JobWire
//!
//! The message vocabulary spoken between a coordinating process and a worker.
//!
//! ## Philosophy
//!
//! - **Closed Variants**: Every message kind is a variant of a tagged enum. Inbound
//!   data is classified once, at the edge, and matched exhaustively afterwards.
//! - **Shape Fidelity**: The serde representation is the wire shape. A `run`
//!   message serializes to `{ "type": "run", "uid": 1, "method": "add", "args": [..] }`
//!   and nothing else.
//! - **No Codec**: Payloads are structured values. How they cross the boundary
//!   is the channel's business.

pub mod error;
pub mod message;
pub mod transfer;


pub use error::SerializedError;
pub use message::JobUid;
pub use message::MasterMessage;
pub use message::ResultType;
pub use message::WorkerMessage;
pub use transfer::transfer;
pub use transfer::Arg;
pub use transfer::Handle;
pub use transfer::TransferDescriptor;

pub use serde_json::Value;
