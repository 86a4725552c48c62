//! # Response Correlation
//!
//! Matches worker messages to the jobs that are waiting for them.
//!
//! Each pending job has a [`Correlator`] in its link's [`Jobs`] table. The entry
//! is the job's listener: the pump routes every classified message to the
//! entry with the same uid, and removing the entry detaches the listener.
//!
//! ## Invariants
//!
//! - The completion model of a job (promise or stream) is whatever its
//!   `running` message declared. Without one, results are treated as a stream
//!   and errors as a rejection.
//! - A job's entry is removed exactly once: by its terminal message, by
//!   cancellation, by timeout, or by channel closure. Whichever removes the
//!   entry is the only one allowed to fire the terminal event.
//! - Completion callbacks never run while a table shard is locked.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tracing::debug;
use tracing::trace;

use jobwire::JobUid;
use jobwire::ResultType;
use jobwire::Value;
use jobwire::WorkerMessage;

use crate::error::Error;
use crate::error::rehydrate;
use crate::promise::Completer;

/// Tracing target for per-message logs.
pub(crate) const MESSAGES: &str = "jobproxy::messages";

/// What a message means for a job's completion object.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Action {
    /// Nothing to deliver yet.
    Wait,
    /// Settle the promise slot with a value.
    Resolve(Value),
    /// Settle the promise slot with an error.
    Reject(Error),
    /// Emit one stream value.
    Next(Value),
    /// Emit a trailing value, if any, then complete the stream.
    Complete(Option<Value>),
    /// End the stream with an error.
    Fail(Error),
}

impl Action {
    pub(crate) fn is_terminal(&self) -> bool {
        !matches!(self, Action::Wait | Action::Next(_))
    }

    pub(crate) fn apply(self, completer: &Completer) {
        match self {
            Action::Wait => {}
            Action::Resolve(value) => {
                completer.resolve(value);
            }
            Action::Reject(error) => {
                completer.reject(error);
            }
            Action::Next(value) => {
                completer.next(value);
            }
            Action::Complete(trailing) => {
                if let Some(value) = trailing {
                    completer.next(value);
                }
                completer.complete();
            }
            Action::Fail(error) => {
                completer.error(error);
            }
        }
    }
}

/// Per-job state: the declared completion model and the producing side of
/// the job's completion object.
pub(crate) struct Correlator {
    uid: JobUid,
    result_type: Option<ResultType>,
    completer: Completer,
}

impl Correlator {
    pub(crate) fn new(uid: JobUid, completer: Completer) -> Self {
        Self { uid, result_type: None, completer }
    }

    /// Advances the job's state machine by one message.
    ///
    /// The message must belong to this job.
    pub(crate) fn correlate(&mut self, message: WorkerMessage) -> Action {
        debug_assert_eq!(message.uid(), self.uid);

        match message {
            WorkerMessage::Running { result_type, .. } => {
                self.result_type = Some(result_type);
                Action::Wait
            }
            WorkerMessage::Result { payload, complete, .. } => match self.result_type {
                // A single result is definitive; `complete` is not consulted.
                Some(ResultType::Promise) => Action::Resolve(payload.unwrap_or(Value::Null)),
                _ if complete => Action::Complete(payload),
                _ => payload.map_or(Action::Wait, Action::Next),
            },
            WorkerMessage::Error { error, .. } => self.failure(Error::Remote(rehydrate(error))),
        }
    }

    /// The terminal action that fails this job with `error`.
    pub(crate) fn failure(&self, error: Error) -> Action {
        match self.result_type {
            Some(ResultType::Observable) => Action::Fail(error),
            Some(ResultType::Promise) | None => Action::Reject(error),
        }
    }
}

/// The listener table of a link, keyed by job uid.
pub(crate) struct Jobs {
    table: DashMap<JobUid, Correlator>,
    closed: AtomicBool,
}

impl Jobs {
    pub(crate) fn new() -> Self {
        Self {
            table: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Installs the listener for a new job.
    ///
    /// Fails with [`Error::ChannelClosed`] once the link stopped reading.
    pub(crate) fn install(&self, correlator: Correlator) -> Result<(), Error> {
        let uid = correlator.uid;
        self.table.insert(uid, correlator);

        if self.closed.load(Ordering::SeqCst) {
            // Either we take it back here or the closing sweep already failed it.
            self.table.remove(&uid);
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    /// Removes a job's listener without firing anything.
    pub(crate) fn detach(&self, uid: JobUid) -> Option<Correlator> {
        self.table.remove(&uid).map(|(_, correlator)| correlator)
    }

    /// Detaches a job and fails it. Returns `false` if it was no longer pending.
    pub(crate) fn fail(&self, uid: JobUid, error: Error) -> bool {
        let Some(correlator) = self.detach(uid) else {
            return false;
        };
        correlator.failure(error).apply(&correlator.completer);
        true
    }

    /// Fails every pending job and refuses new ones.
    pub(crate) fn close(&self, error: Error) {
        self.closed.store(true, Ordering::SeqCst);

        let uids: Vec<JobUid> = self.table.iter().map(|e| *e.key()).collect();
        for uid in uids {
            self.fail(uid, error.clone());
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }

    /// Routes one piece of inbound data to the job it belongs to.
    ///
    /// Unrecognized data and messages for unknown uids are ignored.
    pub(crate) fn dispatch(&self, data: Value) {
        let Some(message) = WorkerMessage::from_data(data) else {
            trace!(target: MESSAGES, "Ignoring unrecognized message");
            return;
        };

        let uid = message.uid();
        let (action, completer) = {
            let Some(mut correlator) = self.table.get_mut(&uid) else {
                trace!(target: MESSAGES, %uid, "Ignoring message for unknown job");
                return;
            };
            debug!(target: MESSAGES, ?message, "Message from worker");
            let action = correlator.correlate(message);
            (action, correlator.completer.clone())
        };

        // Only the caller that removes the entry may fire the terminal event.
        if action.is_terminal() && self.table.remove(&uid).is_none() {
            return;
        }
        action.apply(&completer);
    }
}
