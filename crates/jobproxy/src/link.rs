//! # Worker Link
//!
//! A [`Link`] multiplexes any number of concurrent jobs over one [`Channel`].
//!
//! Creating a link spawns a pump task that reads the channel until it closes and
//! routes each message to the job it belongs to. When the channel closes, or the
//! last handle to the link is dropped, every job still pending fails with
//! [`Error::ChannelClosed`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use jobwire::Arg;
use jobwire::MasterMessage;

use crate::channel::Channel;
use crate::correlator::Correlator;
use crate::correlator::Jobs;
use crate::correlator::MESSAGES;
use crate::error::Error;
use crate::error::Result;
use crate::prepare::Prepared;
use crate::prepare::prepare_arguments;
use crate::promise::ObservablePromise;
use crate::proxy::ProxyFunction;
use crate::proxy::ProxyModule;
use crate::uid::JobCounter;

/// Fluent builder for a [`Link`].
pub struct LinkBuilder {
    channel: Arc<dyn Channel>,
    name: String,
    job_timeout: Option<Duration>,
    counter: Option<Arc<JobCounter>>,
}

impl LinkBuilder {
    pub fn new(channel: impl Channel) -> Self {
        Self {
            channel: Arc::new(channel),
            name: "worker".to_string(),
            job_timeout: None,
            counter: None,
        }
    }

    /// Names the link in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fails any job still pending after `timeout` with [`Error::Timeout`].
    ///
    /// Without this, a job whose worker never answers stays pending until it is
    /// cancelled or the channel closes. The timer ends as soon as the job does.
    pub fn job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Draws job uids from a shared counter instead of a fresh one.
    pub fn counter(mut self, counter: Arc<JobCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Starts the pump. Must be called from within a tokio runtime.
    pub fn spawn(self) -> Link {
        let jobs = Arc::new(Jobs::new());
        let pump = tokio::spawn(pump(self.name.clone(), self.channel.clone(), jobs.clone()));

        Link {
            inner: Arc::new(LinkInner {
                name: self.name,
                channel: self.channel,
                counter: self.counter.unwrap_or_default(),
                job_timeout: self.job_timeout,
                jobs,
                pump,
            }),
        }
    }
}

/// Reads the channel until it closes, then fails whatever is left.
async fn pump(name: String, channel: Arc<dyn Channel>, jobs: Arc<Jobs>) {
    loop {
        match channel.recv().await {
            Ok(Some(data)) => jobs.dispatch(data),
            Ok(None) => {
                debug!(link = %name, "Channel closed");
                break;
            }
            Err(e) => {
                warn!(link = %name, error = %e, "Channel failed");
                break;
            }
        }
    }

    jobs.close(Error::ChannelClosed);
}

/// A multiplexed connection to one worker.
///
/// Cheap to clone; all clones share the channel, the job table, and the counter.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

struct LinkInner {
    name: String,
    channel: Arc<dyn Channel>,
    counter: Arc<JobCounter>,
    job_timeout: Option<Duration>,
    jobs: Arc<Jobs>,
    pump: JoinHandle<()>,
}

impl Drop for LinkInner {
    fn drop(&mut self) {
        self.pump.abort();
        self.jobs.close(Error::ChannelClosed);
    }
}

impl Link {
    /// Creates a link with default settings.
    pub fn new(channel: impl Channel) -> Self {
        LinkBuilder::new(channel).spawn()
    }

    pub fn builder(channel: impl Channel) -> LinkBuilder {
        LinkBuilder::new(channel)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of jobs whose listener is still installed.
    pub fn pending_jobs(&self) -> usize {
        self.inner.jobs.len()
    }

    /// True once the channel closed. Calls on a closed link fail immediately.
    pub fn is_closed(&self) -> bool {
        self.inner.jobs.is_closed()
    }

    /// A proxy for the worker's default function (`None`) or a named method.
    pub fn function(&self, method: Option<&str>) -> ProxyFunction {
        ProxyFunction::new(self, method)
    }

    /// A proxy exposing each of `method_names` as a function.
    pub fn module<I, S>(&self, method_names: I) -> ProxyModule
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProxyModule::new(self, method_names)
    }

    /// Starts one job and returns its completion object without waiting.
    ///
    /// The listener is installed before the run message goes out, so no
    /// response can be missed. If the channel refuses the message the listener
    /// is removed again and the error is returned here.
    pub(crate) fn invoke(
        &self,
        method: Option<&str>,
        args: impl IntoIterator<Item = Arg>,
    ) -> Result<ObservablePromise> {
        let inner = &self.inner;
        let uid = inner.counter.next();
        let Prepared { args, transferables } = prepare_arguments(args);

        let (promise, completer) = ObservablePromise::new(uid, Arc::downgrade(&inner.jobs));
        inner.jobs.install(Correlator::new(uid, completer))?;

        let message = MasterMessage::Run {
            uid,
            method: method.map(str::to_string),
            args,
        };
        debug!(target: MESSAGES, link = %inner.name, ?message, "Sending command to run function to worker");

        if let Err(e) = inner.channel.post_message(message, transferables) {
            inner.jobs.detach(uid);
            warn!(link = %inner.name, %uid, error = %e, "Failed to send run message");
            return Err(Error::Channel(e));
        }

        if let Some(timeout) = inner.job_timeout {
            let jobs = Arc::downgrade(&inner.jobs);
            let finished = promise.clone();
            tokio::spawn(async move {
                if tokio::time::timeout(timeout, finished).await.is_ok() {
                    return;
                }
                let Some(jobs) = jobs.upgrade() else { return };
                if jobs.fail(uid, Error::Timeout) {
                    debug!(%uid, "Job timed out");
                }
            });
        }

        Ok(promise)
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("name", &self.inner.name)
            .field("pending_jobs", &self.pending_jobs())
            .field("closed", &self.is_closed())
            .finish()
    }
}
