//! Audio backend abstraction
//!
//! A backend owns the framing of the audio period: the driver calls
//! `begin_block`, hands it sample buffers through `output`, and closes the
//! period with `end_block`. Two implementations ship here:
//! - [`NullBackend`]: no device I/O, wall-clock pacing for tests and
//!   offline use, optional datastream export
//! - [`CpalBackend`]: device output through cpal
//!
//! Control threads interact with a running backend only through the
//! lock-free [`BackendShared`] handles: a stop flag read at block
//! boundaries and a bounded message queue drained into the block context.

mod cpal_backend;
mod datastream;
mod null;

pub use cpal_backend::CpalBackend;
pub use datastream::{BlockHeader, DatastreamWriter};
pub use null::{NullBackend, NullCapture};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;

use crate::atom::Message;
use crate::buffers::Buffer;
use crate::context::BlockContext;
use crate::error::{EngineError, EngineResult};
use crate::host::HostSystem;

/// Capacity of the control-to-audio message queue
const INJECT_QUEUE_CAPACITY: usize = 256;

/// Backend configuration
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Endpoint for streamed audio (a unix socket path); empty disables it
    pub datastream_address: String,
    /// Playback rate multiplier; 1.0 paces to wall clock, <= 0 disables
    /// pacing entirely
    pub time_scale: f32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            datastream_address: String::new(),
            time_scale: 1.0,
        }
    }
}

/// State shared between a backend and its control-side handles
pub struct BackendShared {
    stop: AtomicBool,
    injected: ArrayQueue<Message>,
}

impl BackendShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stop: AtomicBool::new(false),
            injected: ArrayQueue::new(INJECT_QUEUE_CAPACITY),
        })
    }

    /// Move injected messages into the block context. Called by backends
    /// at the head of `begin_block`.
    fn drain_into(&self, ctxt: &mut BlockContext) {
        while let Some(msg) = self.injected.pop() {
            ctxt.in_messages.push(msg);
        }
    }
}

/// Cloneable control-side handle for feeding messages to the engine
#[derive(Clone)]
pub struct MessageSender {
    shared: Arc<BackendShared>,
}

impl MessageSender {
    /// Queue a message for the next block. Returns false when the queue is
    /// full; the message is dropped, which is a transient loss by design.
    pub fn send(&self, msg: Message) -> bool {
        self.shared.injected.push(msg).is_ok()
    }
}

/// Cloneable control-side handle for stopping the driver
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<BackendShared>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }
}

/// One audio output sink
pub trait Backend: Send {
    /// Open resources; called once before the first block
    fn setup(&mut self, host: &HostSystem) -> EngineResult<()>;

    /// Close resources; called once after the last block
    fn cleanup(&mut self);

    /// Start an audio period: pace, then deliver injected messages
    fn begin_block(&mut self, ctxt: &mut BlockContext) -> EngineResult<()>;

    /// Finish an audio period
    fn end_block(&mut self, ctxt: &mut BlockContext) -> EngineResult<()>;

    /// Hand one channel's samples for this period to the sink.
    ///
    /// Unknown channel names are dropped with a one-time warning; they are
    /// never an error.
    fn output(&mut self, ctxt: &BlockContext, channel: &str, buf: &Buffer) -> EngineResult<()>;

    /// Shared control-plane state
    fn shared(&self) -> &Arc<BackendShared>;

    /// Request the driver to exit at the next block boundary
    fn stop(&self) {
        self.shared().stop.store(true, Ordering::Release);
    }

    /// Whether `stop` was requested (or the device died)
    fn stopped(&self) -> bool {
        self.shared().stop.load(Ordering::Acquire)
    }

    /// Handle for control threads to queue inbound messages
    fn message_sender(&self) -> MessageSender {
        MessageSender {
            shared: Arc::clone(self.shared()),
        }
    }

    /// Handle for control threads to request a stop
    fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(self.shared()),
        }
    }

    /// Permit teardown of host resources after the driver has drained
    fn release(&mut self) {}
}

/// Instantiate a backend by name.
///
/// Known names: `"null"`, `"cpal"`. The returned backend still needs
/// `setup` before its first block.
pub fn create_backend(
    _host: &HostSystem,
    name: &str,
    settings: BackendSettings,
) -> EngineResult<Box<dyn Backend>> {
    match name {
        "null" => Ok(Box::new(NullBackend::new(settings))),
        "cpal" => Ok(Box::new(CpalBackend::new(settings))),
        _ => Err(EngineError::UnknownBackend(name.to_owned())),
    }
}
