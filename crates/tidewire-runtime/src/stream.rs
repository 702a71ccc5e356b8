//! Input record streams for the dataflow engine
//!
//! A stream is the receiving half of a bounded tokio channel. It ends once every
//! [`StreamSender`] has been dropped.

use crate::event::Event;
use tokio::sync::mpsc;

/// Raised when the consuming engine has gone away.
#[derive(Debug, thiserror::Error)]
#[error("stream {0} is closed")]
pub struct StreamClosed(pub String);

/// Receiving half, consumed by [`crate::engine::DataflowEngine::run`].
pub struct Stream {
    source: String,
    receiver: mpsc::Receiver<Event>,
    received: u64,
}

impl Stream {
    pub fn name(&self) -> &str {
        &self.source
    }

    /// Records handed out so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Next record, or `None` once all senders are gone and the buffer is drained.
    pub async fn next(&mut self) -> Option<Event> {
        let event = self.receiver.recv().await?;
        self.received += 1;
        Some(event)
    }
}

/// Producing half of a [`Stream`]. Cheap to clone; each clone keeps the stream open.
#[derive(Clone)]
pub struct StreamSender {
    source: String,
    sender: mpsc::Sender<Event>,
}

impl StreamSender {
    pub fn name(&self) -> &str {
        &self.source
    }

    /// Waits for buffer space when the engine falls behind.
    pub async fn send(&self, event: Event) -> Result<(), StreamClosed> {
        self.sender
            .send(event)
            .await
            .map_err(|_| StreamClosed(self.source.clone()))
    }
}

/// Bounded stream pair named after its source.
pub fn channel(source: impl Into<String>, capacity: usize) -> (StreamSender, Stream) {
    let source = source.into();
    let (sender, receiver) = mpsc::channel(capacity);
    (
        StreamSender {
            source: source.clone(),
            sender,
        },
        Stream {
            source,
            receiver,
            received: 0,
        },
    )
}
