//! # Observable Promise
//!
//! The completion object handed back for every proxied call.
//!
//! It can be consumed three ways, all reading the same state:
//!
//! - **Await it** to get a single value. Under promise semantics that is the
//!   resolved payload; under stream semantics it is the first streamed value,
//!   available once the stream completes.
//! - **Stream it** with [`ObservablePromise::stream`] to get every value in order.
//! - **Subscribe** with callbacks via [`ObservablePromise::subscribe`].
//!
//! ## Invariants
//!
//! - **Hot**: events are recorded from construction on. A consumer that shows up
//!   late replays the full history, then the terminal event.
//! - **One terminal**: at most one of resolve, reject, complete, or error is ever
//!   accepted. Anything after it is dropped.
//! - **No callbacks under a lock**: each subscriber has a mailbox. Events are
//!   queued into it while the state lock is held, so every subscriber sees them
//!   in the order they happened, and are delivered one at a time with no lock
//!   held. A callback may subscribe, unsubscribe, or cancel; whatever it
//!   triggers on its own subscriber is delivered after it returns.
//! - Subscribers are delivered to before awaiting tasks are woken, unless
//!   another thread is already delivering to them.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::task::Context;
use std::task::Poll;
use std::task::Waker;

use futures::Stream;
use serde::de::DeserializeOwned;

use jobwire::JobUid;
use jobwire::Value;

use crate::correlator::Jobs;
use crate::error::Error;
use crate::error::Result;

/// Where a job stands, as seen by its completion object.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// Nothing authoritative has happened yet.
    Pending,
    /// Streaming values; not yet complete.
    Streaming,
    /// Settled with a single value.
    Resolved,
    /// Settled with an error before streaming began.
    Rejected,
    /// The stream completed.
    Completed,
    /// The stream ended in an error.
    Errored,
}

enum Phase {
    Pending,
    /// The promise slot settled.
    Settled(Result<Value>),
    Streaming,
    /// The stream slot finished.
    Terminated(Result<()>),
}

impl Phase {
    fn is_terminal(&self) -> bool {
        matches!(self, Phase::Settled(_) | Phase::Terminated(_))
    }

    /// The terminal event as a stream consumer sees it.
    fn outcome(&self) -> Option<Result<()>> {
        match self {
            Phase::Pending | Phase::Streaming => None,
            Phase::Settled(Ok(_)) | Phase::Terminated(Ok(())) => Some(Ok(())),
            Phase::Settled(Err(e)) | Phase::Terminated(Err(e)) => Some(Err(e.clone())),
        }
    }
}

trait Observer: Send {
    fn next(&mut self, value: &Value);
    fn error(&mut self, error: &Error);
    fn complete(&mut self);
}

struct Callbacks<N, E, C> {
    on_next: N,
    on_error: Option<E>,
    on_complete: Option<C>,
}

impl<N, E, C> Observer for Callbacks<N, E, C>
where
    N: FnMut(&Value) + Send,
    E: FnOnce(&Error) + Send,
    C: FnOnce() + Send,
{
    fn next(&mut self, value: &Value) {
        (self.on_next)(value)
    }

    fn error(&mut self, error: &Error) {
        if let Some(f) = self.on_error.take() {
            f(error)
        }
    }

    fn complete(&mut self) {
        if let Some(f) = self.on_complete.take() {
            f()
        }
    }
}

enum Event {
    Next(Value),
    Error(Error),
    Complete,
}

struct Mailbox {
    queue: VecDeque<Event>,
    /// `None` while some call to [`Slot::drain`] is running it.
    observer: Option<Box<dyn Observer>>,
}

/// One subscriber. `open` lives outside the mailbox so a callback may close its
/// own slot while it is being delivered to.
struct Slot {
    open: AtomicBool,
    mailbox: Mutex<Mailbox>,
}

impl Slot {
    fn new(observer: Box<dyn Observer>, queue: VecDeque<Event>) -> Self {
        Self {
            open: AtomicBool::new(true),
            mailbox: Mutex::new(Mailbox {
                queue,
                observer: Some(observer),
            }),
        }
    }

    /// Queues an event. Called with the state lock held.
    fn post(&self, event: Event) {
        lock(&self.mailbox).queue.push_back(event);
    }

    /// Delivers queued events until the mailbox is empty.
    ///
    /// Returns at once if another call already holds the observer; that call
    /// picks up whatever was queued. Re-entrant calls from inside a callback
    /// end up here too.
    fn drain(&self) {
        let Some(mut observer) = lock(&self.mailbox).observer.take() else {
            return;
        };
        loop {
            let event = {
                let mut mailbox = lock(&self.mailbox);
                match mailbox.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        mailbox.observer = Some(observer);
                        return;
                    }
                }
            };
            self.deliver(&mut *observer, event);
        }
    }

    fn deliver(&self, observer: &mut dyn Observer, event: Event) {
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        match event {
            Event::Next(value) => observer.next(&value),
            Event::Error(error) => {
                self.open.store(false, Ordering::Release);
                observer.error(&error);
            }
            Event::Complete => {
                self.open.store(false, Ordering::Release);
                observer.complete();
            }
        }
    }
}

struct State {
    phase: Phase,
    /// Every value seen so far, kept for late consumers.
    values: Vec<Value>,
    observers: Vec<(u64, Arc<Slot>)>,
    next_observer: u64,
    wakers: Vec<Waker>,
}

pub(crate) struct Shared {
    state: Mutex<State>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn register(wakers: &mut Vec<Waker>, waker: &Waker) {
    if !wakers.iter().any(|w| w.will_wake(waker)) {
        wakers.push(waker.clone());
    }
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                phase: Phase::Pending,
                values: Vec::new(),
                observers: Vec::new(),
                next_observer: 0,
                wakers: Vec::new(),
            }),
        }
    }

    fn settle(&self, outcome: Result<Value>) -> bool {
        let (observers, wakers) = {
            let mut state = lock(&self.state);
            if state.phase.is_terminal() {
                return false;
            }
            if let Ok(value) = &outcome {
                state.values.push(value.clone());
            }
            let observers = std::mem::take(&mut state.observers);
            for (_, slot) in &observers {
                match &outcome {
                    Ok(value) => {
                        slot.post(Event::Next(value.clone()));
                        slot.post(Event::Complete);
                    }
                    Err(error) => slot.post(Event::Error(error.clone())),
                }
            }
            state.phase = Phase::Settled(outcome);
            (observers, std::mem::take(&mut state.wakers))
        };

        for (_, slot) in observers {
            slot.drain();
        }
        wakers.into_iter().for_each(Waker::wake);
        true
    }

    fn push(&self, value: Value) -> bool {
        let (observers, wakers) = {
            let mut state = lock(&self.state);
            if state.phase.is_terminal() {
                return false;
            }
            let observers: Vec<Arc<Slot>> = state.observers.iter().map(|(_, s)| s.clone()).collect();
            for slot in &observers {
                slot.post(Event::Next(value.clone()));
            }
            state.values.push(value);
            state.phase = Phase::Streaming;
            (observers, std::mem::take(&mut state.wakers))
        };

        for slot in observers {
            slot.drain();
        }
        wakers.into_iter().for_each(Waker::wake);
        true
    }

    fn terminate(&self, outcome: Result<()>) -> bool {
        let (observers, wakers) = {
            let mut state = lock(&self.state);
            if state.phase.is_terminal() {
                return false;
            }
            let observers = std::mem::take(&mut state.observers);
            for (_, slot) in &observers {
                match &outcome {
                    Ok(()) => slot.post(Event::Complete),
                    Err(error) => slot.post(Event::Error(error.clone())),
                }
            }
            state.phase = Phase::Terminated(outcome);
            (observers, std::mem::take(&mut state.wakers))
        };

        for (_, slot) in observers {
            slot.drain();
        }
        wakers.into_iter().for_each(Waker::wake);
        true
    }
}

/// The producing side of an [`ObservablePromise`], held by the job's correlator.
///
/// Each method returns `false` when the event was dropped because the object
/// already reached a terminal state.
#[derive(Clone)]
pub(crate) struct Completer {
    shared: Arc<Shared>,
}

impl Completer {
    pub(crate) fn resolve(&self, value: Value) -> bool {
        self.shared.settle(Ok(value))
    }

    pub(crate) fn reject(&self, error: Error) -> bool {
        self.shared.settle(Err(error))
    }

    pub(crate) fn next(&self, value: Value) -> bool {
        self.shared.push(value)
    }

    pub(crate) fn complete(&self) -> bool {
        self.shared.terminate(Ok(()))
    }

    pub(crate) fn error(&self, error: Error) -> bool {
        self.shared.terminate(Err(error))
    }
}

/// The result of a proxied call: a future of one value and a stream of many.
///
/// Clones share the same underlying job.
#[derive(Clone)]
pub struct ObservablePromise {
    uid: JobUid,
    shared: Arc<Shared>,
    jobs: Weak<Jobs>,
}

impl ObservablePromise {
    /// Creates a pending object and the completer that drives it.
    pub(crate) fn new(uid: JobUid, jobs: Weak<Jobs>) -> (Self, Completer) {
        let shared = Arc::new(Shared::new());
        let completer = Completer { shared: shared.clone() };
        (Self { uid, shared, jobs }, completer)
    }

    pub fn uid(&self) -> JobUid {
        self.uid
    }

    pub fn status(&self) -> JobStatus {
        let state = lock(&self.shared.state);
        match &state.phase {
            Phase::Pending => JobStatus::Pending,
            Phase::Streaming => JobStatus::Streaming,
            Phase::Settled(Ok(_)) => JobStatus::Resolved,
            Phase::Settled(Err(_)) => JobStatus::Rejected,
            Phase::Terminated(Ok(())) => JobStatus::Completed,
            Phase::Terminated(Err(_)) => JobStatus::Errored,
        }
    }

    /// Detaches the job's listener and fails it with [`Error::Cancelled`].
    ///
    /// Returns `false` if the job had already finished, in which case nothing
    /// changes. The worker is not told; any late messages for the job are ignored.
    pub fn cancel(&self) -> bool {
        match self.jobs.upgrade() {
            Some(jobs) => jobs.fail(self.uid, Error::Cancelled),
            None => false,
        }
    }

    /// Returns a stream over every value of the job, starting from the first.
    pub fn stream(&self) -> JobStream {
        JobStream {
            shared: self.shared.clone(),
            cursor: 0,
            done: false,
        }
    }

    /// Registers callbacks for values, failure, and completion.
    ///
    /// Values already produced are replayed to the new subscriber ahead of any
    /// live event, followed by the terminal event if there was one. When called
    /// from the thread driving the job this all happens before it returns.
    pub fn subscribe<N, E, C>(&self, on_next: N, on_error: E, on_complete: C) -> Subscription
    where
        N: FnMut(&Value) + Send + 'static,
        E: FnOnce(&Error) + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let observer: Box<dyn Observer> = Box::new(Callbacks {
            on_next,
            on_error: Some(on_error),
            on_complete: Some(on_complete),
        });

        // The history goes into the mailbox under the state lock, ahead of any
        // live event posted after it.
        let (id, slot) = {
            let mut state = lock(&self.shared.state);
            let id = state.next_observer;
            state.next_observer += 1;

            let mut queue: VecDeque<Event> = state.values.iter().cloned().map(Event::Next).collect();
            let live = match state.phase.outcome() {
                Some(Ok(())) => {
                    queue.push_back(Event::Complete);
                    false
                }
                Some(Err(error)) => {
                    queue.push_back(Event::Error(error));
                    false
                }
                None => true,
            };

            let slot = Arc::new(Slot::new(observer, queue));
            if live {
                state.observers.push((id, slot.clone()));
            }
            (id, slot)
        };
        slot.drain();

        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
            slot,
        }
    }

    /// Awaits the job and converts its value into `T`.
    pub async fn into_result<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.await?;
        serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))
    }
}

impl Future for ObservablePromise {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut guard = lock(&self.shared.state);
        let state = &mut *guard;
        match &state.phase {
            Phase::Settled(outcome) => Poll::Ready(outcome.clone()),
            Phase::Terminated(Ok(())) => {
                Poll::Ready(Ok(state.values.first().cloned().unwrap_or(Value::Null)))
            }
            Phase::Terminated(Err(e)) => Poll::Ready(Err(e.clone())),
            Phase::Pending | Phase::Streaming => {
                register(&mut state.wakers, cx.waker());
                Poll::Pending
            }
        }
    }
}

impl std::fmt::Debug for ObservablePromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservablePromise")
            .field("uid", &self.uid)
            .field("status", &self.status())
            .finish()
    }
}

/// Every value of a job, in order. Ends after completion; a failure is yielded
/// as a final `Err` item.
pub struct JobStream {
    shared: Arc<Shared>,
    cursor: usize,
    done: bool,
}

impl Stream for JobStream {
    type Item = Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        let mut guard = lock(&this.shared.state);
        let state = &mut *guard;
        if let Some(value) = state.values.get(this.cursor) {
            this.cursor += 1;
            return Poll::Ready(Some(Ok(value.clone())));
        }

        match state.phase.outcome() {
            Some(Ok(())) => {
                this.done = true;
                Poll::Ready(None)
            }
            Some(Err(error)) => {
                this.done = true;
                Poll::Ready(Some(Err(error)))
            }
            None => {
                register(&mut state.wakers, cx.waker());
                Poll::Pending
            }
        }
    }
}

/// A registered set of callbacks.
///
/// Dropping a subscription does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
    slot: Arc<Slot>,
}

impl Subscription {
    /// Stops delivery to this subscriber. Safe to call from inside its own callbacks.
    pub fn unsubscribe(&self) {
        self.slot.open.store(false, Ordering::Release);
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.state).observers.retain(|(id, _)| *id != self.id);
        }
    }

    /// True once unsubscribed or after a terminal event was delivered.
    pub fn is_closed(&self) -> bool {
        !self.slot.open.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::Weak;

    use futures::StreamExt;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Next(Value),
        Error(Error),
        Complete,
    }

    fn detached() -> (ObservablePromise, Completer) {
        ObservablePromise::new(JobUid(1), Weak::new())
    }

    fn record(promise: &ObservablePromise) -> (Arc<Mutex<Vec<Seen>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (seen.clone(), seen.clone(), seen.clone());
        let sub = promise.subscribe(
            move |v| a.lock().unwrap().push(Seen::Next(v.clone())),
            move |e| b.lock().unwrap().push(Seen::Error(e.clone())),
            move || c.lock().unwrap().push(Seen::Complete),
        );
        (seen, sub)
    }

    #[tokio::test]
    async fn test_resolve_then_await() {
        let (promise, completer) = detached();
        assert_eq!(promise.status(), JobStatus::Pending);

        assert!(completer.resolve(json!(42)));
        assert_eq!(promise.status(), JobStatus::Resolved);
        assert_eq!(promise.await, Ok(json!(42)));
    }

    #[tokio::test]
    async fn test_await_wakes_on_late_resolve() {
        let (promise, completer) = detached();
        let waiter = tokio::spawn(promise);

        tokio::task::yield_now().await;
        completer.resolve(json!("late"));

        assert_eq!(waiter.await.unwrap(), Ok(json!("late")));
    }

    #[tokio::test]
    async fn test_only_first_terminal_counts() {
        let (promise, completer) = detached();

        assert!(completer.reject(Error::Cancelled));
        assert!(!completer.resolve(json!(1)));
        assert!(!completer.next(json!(2)));
        assert!(!completer.complete());
        assert!(!completer.error(Error::Timeout));

        assert_eq!(promise.await, Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn test_stream_mode_awaits_first_value() {
        let (promise, completer) = detached();
        completer.next(json!("a"));
        completer.next(json!("b"));
        assert_eq!(promise.status(), JobStatus::Streaming);
        completer.complete();

        assert_eq!(promise.await, Ok(json!("a")));
    }

    #[tokio::test]
    async fn test_empty_stream_awaits_null() {
        let (promise, completer) = detached();
        completer.complete();

        assert_eq!(promise.status(), JobStatus::Completed);
        assert_eq!(promise.await, Ok(Value::Null));
    }

    #[tokio::test]
    async fn test_late_stream_replays_history() {
        let (promise, completer) = detached();
        completer.next(json!(1));
        completer.next(json!(2));

        let stream = promise.stream();
        completer.next(json!(3));
        completer.complete();

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items, vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))]);
    }

    #[tokio::test]
    async fn test_stream_yields_error_last() {
        let (promise, completer) = detached();
        completer.next(json!(1));
        completer.error(Error::Timeout);

        let items: Vec<_> = promise.stream().collect().await;
        assert_eq!(items, vec![Ok(json!(1)), Err(Error::Timeout)]);
        assert_eq!(promise.status(), JobStatus::Errored);
    }

    #[tokio::test]
    async fn test_resolved_promise_streams_one_value() {
        let (promise, completer) = detached();
        completer.resolve(json!("only"));

        let items: Vec<_> = promise.stream().collect().await;
        assert_eq!(items, vec![Ok(json!("only"))]);
    }

    #[test]
    fn test_subscriber_sees_live_events() {
        let (promise, completer) = detached();
        let (seen, sub) = record(&promise);

        completer.next(json!(1));
        completer.next(json!(2));
        completer.complete();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Seen::Next(json!(1)), Seen::Next(json!(2)), Seen::Complete]
        );
        assert!(sub.is_closed());
    }

    #[test]
    fn test_late_subscriber_gets_replay_and_terminal() {
        let (promise, completer) = detached();
        completer.next(json!("x"));
        completer.error(Error::Cancelled);

        let (seen, sub) = record(&promise);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Seen::Next(json!("x")), Seen::Error(Error::Cancelled)]
        );
        assert!(sub.is_closed());
    }

    #[test]
    fn test_resolve_seen_as_value_then_complete() {
        let (promise, completer) = detached();
        let (seen, _sub) = record(&promise);

        completer.resolve(json!(7));
        assert_eq!(*seen.lock().unwrap(), vec![Seen::Next(json!(7)), Seen::Complete]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let (promise, completer) = detached();
        let (seen, sub) = record(&promise);

        completer.next(json!(1));
        sub.unsubscribe();
        completer.next(json!(2));
        completer.complete();

        assert_eq!(*seen.lock().unwrap(), vec![Seen::Next(json!(1))]);
    }

    #[test]
    fn test_callback_may_subscribe_again() {
        let (promise, completer) = detached();
        let inner_seen = Arc::new(Mutex::new(Vec::new()));

        let p = promise.clone();
        let s = inner_seen.clone();
        let _sub = promise.subscribe(
            move |_| {
                let s = s.clone();
                p.subscribe(move |v| s.lock().unwrap().push(v.clone()), |_| {}, || {});
            },
            |_| {},
            || {},
        );

        completer.next(json!("first"));
        assert_eq!(*inner_seen.lock().unwrap(), vec![json!("first")]);
    }

    #[test]
    fn test_error_raised_mid_delivery_keeps_order_for_others() {
        let (promise, completer) = detached();

        let c = completer.clone();
        let _first = promise.subscribe(move |_| { c.error(Error::Cancelled); }, |_| {}, || {});
        let (seen, _second) = record(&promise);

        completer.next(json!("last"));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Seen::Next(json!("last")), Seen::Error(Error::Cancelled)]
        );
    }

    #[test]
    fn test_callback_may_end_its_own_job() {
        let (promise, completer) = detached();
        let (seen, _sub) = record(&promise);

        let c = completer.clone();
        let _ender = promise.subscribe(move |_| { c.complete(); }, |_| {}, || {});
        completer.next(json!(1));
        assert!(!completer.next(json!(2)));

        assert_eq!(*seen.lock().unwrap(), vec![Seen::Next(json!(1)), Seen::Complete]);
        assert_eq!(promise.status(), JobStatus::Completed);
    }

    #[test]
    fn test_cancel_without_link_is_noop() {
        let (promise, _completer) = detached();
        assert!(!promise.cancel());
        assert_eq!(promise.status(), JobStatus::Pending);
    }
}
