//! # JobProxy
//!
//! Call functions that run inside a worker as if they were local.
//!
//! A [`Link`] owns one duplex [`Channel`] to a worker. Proxies created from it
//! ([`ProxyFunction`], [`ProxyModule`]) tag every call with a fresh [`JobUid`],
//! send a `run` message, and hand back an [`ObservablePromise`]: await it for a
//! single result, or consume it as a stream when the worker produces values
//! incrementally. The worker decides which, per job, with its `running` message.
//!
//! ## Architecture
//!
//! - **One pump per link**: a background task reads the channel and routes each
//!   message to the correlator registered under its uid.
//! - **Listener = table entry**: a job's listener is its entry in the link's job
//!   table. Removing the entry is the one and only detach.
//! - **Hot results**: the completion object records every event from the moment
//!   the call is made, whether or not anyone is looking yet.

pub mod channel;
pub mod correlator;
pub mod error;
pub mod link;
pub mod port;
pub mod prepare;
pub mod promise;
pub mod proxy;
pub mod uid;


pub use channel::Channel;
pub use channel::ChannelError;
pub use error::Error;
pub use error::RemoteError;
pub use error::Result;
pub use link::Link;
pub use link::LinkBuilder;
pub use promise::JobStatus;
pub use promise::JobStream;
pub use promise::ObservablePromise;
pub use promise::Subscription;
pub use proxy::ProxyFunction;
pub use proxy::ProxyModule;
pub use uid::JobCounter;

pub use jobwire::transfer;
pub use jobwire::Arg;
pub use jobwire::Handle;
pub use jobwire::JobUid;
pub use jobwire::Value;
