//! # In-Memory Ports
//!
//! A connected pair of message ports backed by tokio mpsc channels.
//!
//! The coordinating end implements [`Channel`]; the worker end is a plain
//! handle for whatever runs the worker side (a task, a test script). Dropping
//! either end closes the pair.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use jobwire::Handle;
use jobwire::MasterMessage;
use jobwire::Value;
use jobwire::WorkerMessage;

use crate::channel;
use crate::channel::Channel;
use crate::channel::ChannelError;

/// A message as it arrives at the worker: the data plus any moved handles.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub data: Value,
    pub transfer: Vec<Handle>,
}

impl Envelope {
    /// Classifies the data as a master message.
    pub fn message(&self) -> Option<MasterMessage> {
        MasterMessage::from_data(self.data.clone())
    }
}

/// The coordinating end of a port pair.
pub struct MasterPort {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Value>>>,
}

/// The worker end of a port pair.
pub struct WorkerPort {
    tx: mpsc::UnboundedSender<Value>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>,
}

/// Creates a pair of ports connected to each other.
///
/// Messages posted on the master end are received by the worker end and vice versa.
pub fn pair() -> (MasterPort, WorkerPort) {
    let (to_worker, from_master) = mpsc::unbounded_channel();
    let (to_master, from_worker) = mpsc::unbounded_channel();

    let master = MasterPort {
        tx: to_worker,
        rx: Arc::new(Mutex::new(from_worker)),
    };

    let worker = WorkerPort {
        tx: to_master,
        rx: Arc::new(Mutex::new(from_master)),
    };

    (master, worker)
}

#[async_trait::async_trait]
impl Channel for MasterPort {
    fn post_message(&self, message: MasterMessage, transfer: Vec<Handle>) -> channel::Result<()> {
        let data = serde_json::to_value(&message)
            .map_err(|e| ChannelError::Serialize(e.to_string()))?;

        self.tx
            .send(Envelope { data, transfer })
            .map_err(|_| ChannelError::Closed)
    }

    async fn recv(&self) -> channel::Result<Option<Value>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}

impl WorkerPort {
    /// Waits for the next envelope from the coordinating side.
    pub async fn recv(&self) -> Option<Envelope> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Posts a worker message.
    pub fn post(&self, message: &WorkerMessage) -> channel::Result<()> {
        let data = serde_json::to_value(message)
            .map_err(|e| ChannelError::Serialize(e.to_string()))?;
        self.post_raw(data)
    }

    /// Posts arbitrary data, well-formed or not.
    pub fn post_raw(&self, data: Value) -> channel::Result<()> {
        self.tx.send(data).map_err(|_| ChannelError::Closed)
    }
}
