//! # Argument Preparation
//!
//! Splits call arguments into the values to send and the handles to move.

use std::collections::HashSet;

use jobwire::Arg;
use jobwire::Handle;
use jobwire::Value;

/// Arguments ready for a `run` message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prepared {
    pub args: Vec<Value>,
    /// Handles to move, deduplicated, in first-seen order.
    pub transferables: Vec<Handle>,
}

/// Unwraps transfer descriptors and gathers their handles.
///
/// The same handle may be named by several arguments; the channel must only be
/// told to move it once.
pub fn prepare_arguments(raw: impl IntoIterator<Item = Arg>) -> Prepared {
    let mut prepared = Prepared::default();
    let mut seen = HashSet::new();

    for arg in raw {
        match arg {
            Arg::Plain(value) => prepared.args.push(value),
            Arg::Transfer(descriptor) => {
                prepared.args.push(descriptor.send);
                for handle in descriptor.transferables {
                    if seen.insert(handle) {
                        prepared.transferables.push(handle);
                    }
                }
            }
        }
    }

    prepared
}
