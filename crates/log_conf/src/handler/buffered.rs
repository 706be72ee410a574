//! Channel-backed handlers decoupling record producers from slow sinks.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use super::Handler;
use crate::{LoggerError, record::Record};

/// Name of the worker thread draining a [`BufferedHandler`].
const WORKER_THREAD_NAME: &str = "log-buffered";

/// Sends a copy of every record into a channel.
///
/// Sending blocks while a bounded channel is full.
#[derive(Clone, Debug)]
pub struct ChannelHandler {
    sender: Sender<Record>,
}

impl ChannelHandler {
    /// Wraps the sending half of a channel.
    pub fn new(sender: Sender<Record>) -> Self {
        Self { sender }
    }
}

impl Handler for ChannelHandler {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        self.sender
            .send(record.clone())
            .map_err(|_| LoggerError::Disconnected)
    }
}

/// Queues records in a bounded channel drained by a dedicated worker thread into the inner
/// handler.
///
/// Errors of the inner handler are not reported to the caller. Dropping the handler closes the
/// channel and waits for the worker to deliver the records still queued.
#[derive(Debug)]
pub struct BufferedHandler {
    channel: Option<ChannelHandler>,
    worker: Option<JoinHandle<()>>,
}

impl BufferedHandler {
    /// Spawns the worker thread forwarding to `inner`, with room for `size` queued records.
    ///
    /// A `size` of zero makes every `log` call wait for the worker to take the record.
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::Io`] if the worker thread cannot be spawned.
    pub fn new<H: Handler + 'static>(size: usize, inner: H) -> Result<Self, LoggerError> {
        let (sender, receiver) = crossbeam_channel::bounded(size);
        let worker = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_owned())
            .spawn(move || drain(&receiver, &inner))?;

        Ok(Self {
            channel: Some(ChannelHandler::new(sender)),
            worker: Some(worker),
        })
    }
}

fn drain<H: Handler>(receiver: &Receiver<Record>, inner: &H) {
    for record in receiver {
        if let Err(error) = inner.log(&record) {
            tracing::trace!(?error, "Buffered record could not be delivered");
        }
    }
}

impl Handler for BufferedHandler {
    fn log(&self, record: &Record) -> Result<(), LoggerError> {
        self.channel
            .as_ref()
            .ok_or(LoggerError::Disconnected)?
            .log(record)
    }
}

impl Drop for BufferedHandler {
    fn drop(&mut self) {
        drop(self.channel.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("Buffered log worker panicked");
            }
        }
    }
}
