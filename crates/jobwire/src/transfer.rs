//! # Transfer Descriptors
//!
//! Some arguments reference resources that must be moved across the channel
//! rather than copied. The caller marks such an argument by wrapping it with
//! [`transfer`], naming the handles to move alongside the value to send.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// A reference to a movable resource owned by the channel's host.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub u64);

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

/// A value to send plus the handles to move with it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferDescriptor {
    pub send: Value,
    pub transferables: Vec<Handle>,
}

/// Marks `send` as travelling by transfer of `transferables`.
pub fn transfer(send: impl Into<Value>, transferables: impl IntoIterator<Item = Handle>) -> TransferDescriptor {
    TransferDescriptor {
        send: send.into(),
        transferables: transferables.into_iter().collect(),
    }
}

/// A single call argument as handed to a proxy.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Sent as-is.
    Plain(Value),
    /// Sent as the inner value, with its handles moved.
    Transfer(TransferDescriptor),
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Plain(value)
    }
}

impl From<TransferDescriptor> for Arg {
    fn from(descriptor: TransferDescriptor) -> Self {
        Self::Transfer(descriptor)
    }
}

macro_rules! plain_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Arg {
                fn from(value: $t) -> Self {
                    Self::Plain(Value::from(value))
                }
            }
        )*
    };
}

plain_from!(bool, i32, i64, u32, u64, f64, String, &str);
