//! Mixer processor - gain-weighted sum of audio inputs
//!
//! Input ports are summed into the single output port with a per-input
//! gain. Gains are parameters named `gain0`, `gain1`, ... matching the
//! input's position among the node's input ports; unset gains default to
//! unity.

use super::{NodeDescription, NodeParameters, ParamSlot, PortDirection, PortMap, Processor};
use crate::buffers::{BufferPool, BufferType};
use crate::context::BlockContext;
use crate::error::{EngineError, EngineResult};

pub struct MixerProcessor {
    ports: PortMap,
    input_ports: Vec<usize>,
    output_port: usize,
    gains: Vec<f32>,
    // parameter names precomputed at setup so applying a pending change
    // on the audio thread does not format strings
    gain_names: Vec<String>,
    params: ParamSlot,
}

impl MixerProcessor {
    pub fn new() -> Self {
        Self {
            ports: PortMap::default(),
            input_ports: Vec::new(),
            output_port: 0,
            gains: Vec::new(),
            gain_names: Vec::new(),
            params: ParamSlot::default(),
        }
    }

    fn apply_params(&mut self, params: &NodeParameters) {
        for (gain, name) in self.gains.iter_mut().zip(self.gain_names.iter()) {
            if let Some(v) = params.get_float(name) {
                *gain = v;
            }
        }
    }
}

impl Default for MixerProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for MixerProcessor {
    fn setup(&mut self, desc: &NodeDescription) -> EngineResult<()> {
        self.ports = PortMap::with_ports(desc.ports.len());
        self.input_ports.clear();
        let mut output = None;
        for (i, port) in desc.ports.iter().enumerate() {
            if port.port_type != BufferType::FloatAudioBlock {
                return Err(EngineError::MissingNodeField("audio-typed port"));
            }
            match port.direction {
                PortDirection::Input => self.input_ports.push(i),
                PortDirection::Output => output = Some(i),
            }
        }
        self.output_port = output.ok_or(EngineError::MissingNodeField("output port"))?;
        self.gains = vec![1.0; self.input_ports.len()];
        self.gain_names = (0..self.input_ports.len())
            .map(|i| format!("gain{i}"))
            .collect();
        Ok(())
    }

    fn cleanup(&mut self) {}

    fn connect_port(&mut self, port_idx: usize, buf_idx: usize) -> EngineResult<()> {
        self.ports.bind(port_idx, buf_idx)
    }

    fn run(&mut self, _ctxt: &mut BlockContext, pool: &mut BufferPool) -> EngineResult<()> {
        if let Some(params) = self.params.take_pending() {
            self.apply_params(&params);
        }

        let out_idx = self.ports.get(self.output_port)?;
        pool.clear(out_idx)?;

        for (slot, &port) in self.input_ports.iter().enumerate() {
            let in_idx = self.ports.get(port)?;
            let gain = self.gains[slot];
            let (src, dst) = pool.pair_mut(in_idx, out_idx)?;
            let s = src
                .as_samples()
                .ok_or(EngineError::BufferTypeMismatch { index: in_idx })?;
            let d = dst
                .as_samples_mut()
                .ok_or(EngineError::BufferTypeMismatch { index: out_idx })?;
            for (dv, sv) in d.iter_mut().zip(s.iter()) {
                *dv += gain * *sv;
            }
        }
        Ok(())
    }

    fn params_handle(&self) -> ParamSlot {
        self.params.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostSystem;

    fn mixer_setup() -> (BufferPool, MixerProcessor, BlockContext) {
        let host = HostSystem::new(44100, 16);
        let mut pool = BufferPool::new(
            &host,
            &[
                BufferType::FloatAudioBlock,
                BufferType::FloatAudioBlock,
                BufferType::FloatAudioBlock,
            ],
            16,
        );
        pool.get_mut(0).unwrap().as_samples_mut().unwrap().fill(1.0);
        pool.get_mut(1).unwrap().as_samples_mut().unwrap().fill(0.5);

        let desc = NodeDescription::new("mixer")
            .with_port("in0", PortDirection::Input, BufferType::FloatAudioBlock)
            .with_port("in1", PortDirection::Input, BufferType::FloatAudioBlock)
            .with_port("out", PortDirection::Output, BufferType::FloatAudioBlock);
        let mut proc = MixerProcessor::new();
        proc.setup(&desc).unwrap();
        proc.connect_port(0, 0).unwrap();
        proc.connect_port(1, 1).unwrap();
        proc.connect_port(2, 2).unwrap();

        (pool, proc, BlockContext::new(16))
    }

    #[test]
    fn test_unity_sum() {
        let (mut pool, mut proc, mut ctxt) = mixer_setup();
        proc.run(&mut ctxt, &mut pool).unwrap();
        assert!(pool.get(2).unwrap().as_samples().unwrap().iter().all(|&v| v == 1.5));
    }

    #[test]
    fn test_gain_parameter_applies_next_run() {
        let (mut pool, mut proc, mut ctxt) = mixer_setup();
        let mut params = NodeParameters::default();
        params.set_float("gain1", 2.0);
        proc.set_parameters(params);
        proc.run(&mut ctxt, &mut pool).unwrap();
        // 1.0 * gain0(1.0) + 0.5 * gain1(2.0)
        assert!(pool.get(2).unwrap().as_samples().unwrap().iter().all(|&v| v == 2.0));
    }

    #[test]
    fn test_missing_output_port_rejected() {
        let desc = NodeDescription::new("mixer").with_port(
            "in0",
            PortDirection::Input,
            BufferType::FloatAudioBlock,
        );
        let mut proc = MixerProcessor::new();
        assert!(proc.setup(&desc).is_err());
    }

    #[test]
    fn test_unconnected_port_is_an_error() {
        let host = HostSystem::new(44100, 16);
        let mut pool = BufferPool::new(&host, &[BufferType::FloatAudioBlock], 16);
        let desc = NodeDescription::new("mixer")
            .with_port("in0", PortDirection::Input, BufferType::FloatAudioBlock)
            .with_port("out", PortDirection::Output, BufferType::FloatAudioBlock);
        let mut proc = MixerProcessor::new();
        proc.setup(&desc).unwrap();
        proc.connect_port(1, 0).unwrap();

        let mut ctxt = BlockContext::new(16);
        assert!(matches!(
            proc.run(&mut ctxt, &mut pool),
            Err(EngineError::PortNotConnected { .. })
        ));
    }
}
