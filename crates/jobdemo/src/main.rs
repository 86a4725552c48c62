//! Runs a toy worker on a task and drives it through a link.
//!
//! `RUST_LOG=jobproxy::messages=debug cargo run -p jobdemo` shows the traffic.

use anyhow::Context;
use anyhow::Result;
use futures::StreamExt;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use jobproxy::Link;
use jobproxy::Value;
use jobproxy::port;
use jobproxy::port::WorkerPort;
use jobwire::JobUid;
use jobwire::MasterMessage;
use jobwire::ResultType;
use jobwire::SerializedError;
use jobwire::WorkerMessage;

/// Answers run messages until the coordinating side goes away.
async fn serve(worker: WorkerPort) -> Result<()> {
    while let Some(envelope) = worker.recv().await {
        let Some(MasterMessage::Run { uid, method, args }) = envelope.message() else {
            continue;
        };

        match method.as_deref() {
            Some("add") => {
                let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
                reply_once(&worker, uid, json!(sum))?;
            }
            Some("divide") => match (args.first().and_then(Value::as_f64), args.get(1).and_then(Value::as_f64)) {
                (Some(_), Some(d)) if d == 0.0 => {
                    worker.post(&WorkerMessage::running(uid, ResultType::Promise))?;
                    worker.post(&WorkerMessage::error(uid, SerializedError::new("RangeError", "division by zero")))?;
                }
                (Some(n), Some(d)) => reply_once(&worker, uid, json!(n / d))?,
                _ => {
                    worker.post(&WorkerMessage::error(uid, SerializedError::new("TypeError", "expected two numbers")))?;
                }
            },
            Some("countdown") => {
                let from = args.first().and_then(Value::as_u64).unwrap_or(3);
                worker.post(&WorkerMessage::running(uid, ResultType::Observable))?;
                for n in (1..=from).rev() {
                    worker.post(&WorkerMessage::result(uid, Some(json!(n)), false))?;
                }
                worker.post(&WorkerMessage::result(uid, None, true))?;
            }
            None => reply_once(&worker, uid, Value::Array(args))?,
            Some(other) => {
                let error = SerializedError::new("TypeError", format!("{other} is not a function"));
                worker.post(&WorkerMessage::error(uid, error))?;
            }
        }
    }
    Ok(())
}

fn reply_once(worker: &WorkerPort, uid: JobUid, payload: Value) -> Result<()> {
    worker.post(&WorkerMessage::running(uid, ResultType::Promise))?;
    worker.post(&WorkerMessage::result(uid, Some(payload), true))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (master, worker) = port::pair();
    let server = tokio::spawn(serve(worker));

    let link = Link::builder(master).name("demo").spawn();
    let module = link.module(["add", "divide", "countdown"]);

    let sum: i64 = module.call("add", [1, 2, 3])?.into_result().await?;
    info!(sum, "add");

    let echoed = link.function(None).call(["hello", "worker"])?.await?;
    info!(%echoed, "default function");

    let mut values = module.call("countdown", [5])?.stream();
    while let Some(value) = values.next().await {
        let value = value?;
        info!(%value, "countdown");
    }

    match module.call("divide", [1, 0])?.await {
        Ok(value) => info!(%value, "divide"),
        Err(e) => info!(error = %e, "divide failed as expected"),
    }

    drop(module);
    drop(link);
    server.await.context("worker task panicked")??;
    Ok(())
}
