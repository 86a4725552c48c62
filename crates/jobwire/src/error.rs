//! # Serialized Errors
//!
//! Errors cannot cross a channel as live objects. They travel as plain data
//! and are rebuilt on the receiving side.

use serde::Deserialize;
use serde::Serialize;

/// The plain-data form of an error: `{ name, message, stack }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

fn default_name() -> String {
    "Error".to_string()
}

impl SerializedError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into(), stack: None }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Flattens any error into plain data, keeping its source chain as the stack.
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(e) = source {
            chain.push(format!("caused by: {}", e));
            source = e.source();
        }

        Self {
            name: default_name(),
            message: error.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }
}
