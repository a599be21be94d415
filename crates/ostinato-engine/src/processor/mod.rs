//! Processor abstraction - nodes of the audio graph
//!
//! A processor renders one block at a time through buffers it was bound to
//! at program load. The lifecycle is strict: `setup` validates the node
//! description on a control thread, `connect_port` is called once per port
//! when the program is installed, `run` executes per block on the audio
//! thread, `cleanup` releases any native resources.
//!
//! Parameter changes arrive from control threads through a shared
//! [`ParamSlot`]; `run` applies whatever is pending before rendering, so a
//! change never lands mid-block.

mod mixer;
mod null;

pub use mixer::MixerProcessor;
pub use null::NullProcessor;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::buffers::{BufferPool, BufferType};
use crate::context::BlockContext;
use crate::error::{EngineError, EngineResult};

/// Direction of a processor port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// One declared port of a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortDescription {
    pub name: String,
    pub direction: PortDirection,
    pub port_type: BufferType,
}

/// Static description of a node: its name and port list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescription {
    pub name: String,
    pub ports: Vec<PortDescription>,
}

impl NodeDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ports: Vec::new(),
        }
    }

    pub fn with_port(
        mut self,
        name: impl Into<String>,
        direction: PortDirection,
        port_type: BufferType,
    ) -> Self {
        self.ports.push(PortDescription {
            name: name.into(),
            direction,
            port_type,
        });
        self
    }
}

/// A single parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Float(f32),
    Int(i64),
    Str(String),
}

/// Named parameters for a node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeParameters {
    pub values: HashMap<String, ParamValue>,
}

impl NodeParameters {
    pub fn set_float(&mut self, name: impl Into<String>, value: f32) {
        self.values.insert(name.into(), ParamValue::Float(value));
    }

    pub fn get_float(&self, name: &str) -> Option<f32> {
        match self.values.get(name) {
            Some(ParamValue::Float(v)) => Some(*v),
            Some(ParamValue::Int(v)) => Some(*v as f32),
            _ => None,
        }
    }
}

/// Shared pending-parameter slot
///
/// Control threads store a full parameter set; the audio thread takes it at
/// the head of the next `run`. `take_pending` uses `try_lock` so the audio
/// thread never waits on a control thread mid-store; a skipped block just
/// picks the change up one block later.
#[derive(Clone, Default)]
pub struct ParamSlot {
    pending: Arc<Mutex<Option<NodeParameters>>>,
}

impl ParamSlot {
    pub fn set(&self, params: NodeParameters) {
        let mut slot = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(params);
    }

    pub fn take_pending(&self) -> Option<NodeParameters> {
        match self.pending.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        }
    }
}

/// Port-index to buffer-index bindings, fixed after program install
#[derive(Debug, Default)]
pub struct PortMap {
    slots: Vec<Option<usize>>,
}

impl PortMap {
    pub fn with_ports(count: usize) -> Self {
        Self {
            slots: vec![None; count],
        }
    }

    pub fn bind(&mut self, port: usize, buf_idx: usize) -> EngineResult<()> {
        let count = self.slots.len();
        let slot = self
            .slots
            .get_mut(port)
            .ok_or(EngineError::BadPortIndex { port, count })?;
        *slot = Some(buf_idx);
        Ok(())
    }

    pub fn get(&self, port: usize) -> EngineResult<usize> {
        self.slots
            .get(port)
            .copied()
            .flatten()
            .ok_or(EngineError::PortNotConnected { port })
    }

    pub fn try_get(&self, port: usize) -> Option<usize> {
        self.slots.get(port).copied().flatten()
    }
}

/// A node in the audio graph
///
/// Implementations must keep `run` bounded: no allocation, no blocking, no
/// unbounded loops. Failures are returned, never panicked; the VM aborts
/// the block and the driver carries on.
pub trait Processor: Send {
    /// Validate the node description and size internal state
    fn setup(&mut self, desc: &NodeDescription) -> EngineResult<()>;

    /// Release native resources; called exactly once before drop
    fn cleanup(&mut self);

    /// Bind a buffer to a port; called once per port at program install
    fn connect_port(&mut self, port_idx: usize, buf_idx: usize) -> EngineResult<()>;

    /// Render one block
    fn run(&mut self, ctxt: &mut BlockContext, pool: &mut BufferPool) -> EngineResult<()>;

    /// Handle for delivering parameter changes from control threads
    fn params_handle(&self) -> ParamSlot;

    /// Queue a parameter change; takes effect at the next `run`
    fn set_parameters(&self, params: NodeParameters) {
        self.params_handle().set(params);
    }
}

/// Built-in processor kinds the factory can instantiate
///
/// The original system also ships ladspa, lv2, csound, and sample player
/// hosts; those are external collaborators and report as unavailable here.
pub fn create_processor(kind: &str) -> EngineResult<Box<dyn Processor>> {
    match kind {
        "null" => Ok(Box::new(NullProcessor::new())),
        "mixer" => Ok(Box::new(MixerProcessor::new())),
        "ladspa" | "lv2" | "csound" | "custom_csound" | "sample_player" => {
            Err(EngineError::UnavailableProcessor(kind.to_owned()))
        }
        _ => Err(EngineError::UnknownProcessor(kind.to_owned())),
    }
}
