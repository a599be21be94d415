//! Null processor - writes silence to its outputs

use super::{NodeDescription, ParamSlot, PortDirection, PortMap, Processor};
use crate::buffers::BufferPool;
use crate::context::BlockContext;
use crate::error::EngineResult;

/// Sink/source stand-in used for plumbing tests and disabled nodes.
///
/// Inputs are ignored; every connected output buffer is cleared each block.
pub struct NullProcessor {
    ports: PortMap,
    output_ports: Vec<usize>,
    params: ParamSlot,
}

impl NullProcessor {
    pub fn new() -> Self {
        Self {
            ports: PortMap::default(),
            output_ports: Vec::new(),
            params: ParamSlot::default(),
        }
    }
}

impl Default for NullProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for NullProcessor {
    fn setup(&mut self, desc: &NodeDescription) -> EngineResult<()> {
        self.ports = PortMap::with_ports(desc.ports.len());
        self.output_ports = desc
            .ports
            .iter()
            .enumerate()
            .filter(|(_, p)| p.direction == PortDirection::Output)
            .map(|(i, _)| i)
            .collect();
        Ok(())
    }

    fn cleanup(&mut self) {}

    fn connect_port(&mut self, port_idx: usize, buf_idx: usize) -> EngineResult<()> {
        self.ports.bind(port_idx, buf_idx)
    }

    fn run(&mut self, _ctxt: &mut BlockContext, pool: &mut BufferPool) -> EngineResult<()> {
        for &port in &self.output_ports {
            if let Some(buf_idx) = self.ports.try_get(port) {
                pool.clear(buf_idx)?;
            }
        }
        Ok(())
    }

    fn params_handle(&self) -> ParamSlot {
        self.params.clone()
    }
}
