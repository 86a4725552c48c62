//! # Channel Messages
//!
//! One outbound kind (`run`) and three inbound kinds (`running`, `result`, `error`).
//!
//! ## Invariants
//! - Every message carries the uid of exactly one job.
//! - Classification never panics: data that is not a recognized worker message
//!   yields `None` and is left alone.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::SerializedError;

/// Strong type for job identifiers.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobUid(pub u64);

impl std::fmt::Display for JobUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Messages sent from the coordinating side to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MasterMessage {
    /// Run the default exported function (`method == None`) or a named method.
    Run {
        uid: JobUid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        args: Vec<Value>,
    },
}

impl MasterMessage {
    pub fn uid(&self) -> JobUid {
        match self {
            Self::Run { uid, .. } => *uid,
        }
    }

    /// Classifies raw inbound data on the worker side.
    pub fn from_data(data: Value) -> Option<Self> {
        serde_json::from_value(data).ok()
    }
}

/// How the worker will deliver the outcome of a job.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    /// A single `result` message settles the job.
    Promise,
    /// Zero or more values, then a `result` with `complete: true`.
    Observable,
}

/// Messages sent from the worker back to the coordinating side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    /// The job started; declares its completion model.
    Running {
        uid: JobUid,
        #[serde(rename = "resultType")]
        result_type: ResultType,
    },
    /// A value for the job. Under promise semantics this is the whole answer.
    Result {
        uid: JobUid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default)]
        complete: bool,
    },
    /// The job failed remotely.
    Error {
        uid: JobUid,
        error: SerializedError,
    },
}

impl WorkerMessage {
    pub fn uid(&self) -> JobUid {
        match self {
            Self::Running { uid, .. } => *uid,
            Self::Result { uid, .. } => *uid,
            Self::Error { uid, .. } => *uid,
        }
    }

    /// Classifies raw inbound data.
    ///
    /// Returns `None` for unknown `type` tags, a missing or non-integer `uid`,
    /// or anything that is not an object. Such data is a protocol violation
    /// from the point of view of a job, and is ignored rather than fatal.
    pub fn from_data(data: Value) -> Option<Self> {
        serde_json::from_value(data).ok()
    }

    pub fn running(uid: JobUid, result_type: ResultType) -> Self {
        Self::Running { uid, result_type }
    }

    pub fn result(uid: JobUid, payload: Option<Value>, complete: bool) -> Self {
        Self::Result { uid, payload, complete }
    }

    pub fn error(uid: JobUid, error: SerializedError) -> Self {
        Self::Error { uid, error }
    }
}
