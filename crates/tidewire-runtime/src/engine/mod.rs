//! Execution engines hosting pipeline element logic
//!
//! Engines implement [`ExecutionHandle`] independently; the sink dispatcher
//! only talks to that capability and never to a concrete engine.
//!
//! - [`DataflowEngine`]: stage graph driven by a record stream on a tokio
//!   task; output is a sink stage that encodes and publishes every record.
//! - [`CepEngine`]: single-node engine fed one event at a time; output is an
//!   [`OutputCollector`] callback wrapping the producer directly.

pub mod cep;
pub mod dataflow;

pub use cep::{CepEngine, OutputCollector};
pub use dataflow::{DataflowEngine, DataflowJob, RunReport};

use crate::dispatch::OutputBinding;
use crate::event::Event;
use crate::format::FormatError;
use crate::transport::ProducerError;
use std::fmt;

/// Execution model of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Dataflow,
    Cep,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Dataflow => write!(f, "dataflow"),
            EngineKind::Cep => write!(f, "cep"),
        }
    }
}

/// Errors raised while running bound element logic.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Output encoding failed: {0}")]
    Format(#[from] FormatError),

    #[error("Output transport failed: {0}")]
    Producer(#[from] ProducerError),

    #[error("No output is bound to engine {0}")]
    NotBound(String),

    #[error("Engine {0} already has a bound output")]
    AlreadyBound(String),

    #[error("Engine task aborted: {0}")]
    Aborted(String),
}

/// An output an engine refused, handed back so the caller can close it.
#[derive(Debug)]
pub struct AttachRejected {
    pub error: EngineError,
    pub binding: OutputBinding,
}

impl AttachRejected {
    pub fn new(error: EngineError, binding: OutputBinding) -> Self {
        Self { error, binding }
    }
}

/// Business logic of a pipeline element.
///
/// Called once per input event; pushes zero or more output events to `out`.
pub trait ElementLogic: Send {
    fn process(&mut self, event: Event, out: &mut Vec<Event>);
}

impl<F> ElementLogic for F
where
    F: FnMut(Event, &mut Vec<Event>) + Send,
{
    fn process(&mut self, event: Event, out: &mut Vec<Event>) {
        self(event, out)
    }
}

/// Capability an engine exposes to the sink dispatcher.
pub trait ExecutionHandle: Send {
    fn engine_kind(&self) -> EngineKind;

    /// Append a logic step; steps run in insertion order.
    fn append_logic(&mut self, logic: Box<dyn ElementLogic>);

    fn has_output(&self) -> bool;

    /// Take ownership of a connected output. An engine holds at most one;
    /// a refused binding is returned untouched.
    fn attach_output(&mut self, binding: OutputBinding) -> Result<(), AttachRejected>;
}

/// Run `event` through `steps` in order.
pub(crate) fn apply_logic(steps: &mut [Box<dyn ElementLogic>], event: Event) -> Vec<Event> {
    let mut batch = vec![event];
    for step in steps.iter_mut() {
        let mut next = Vec::with_capacity(batch.len());
        for event in batch {
            step.process(event, &mut next);
        }
        if next.is_empty() {
            return next;
        }
        batch = next;
    }
    batch
}
