//! A loaded program: spec plus the state it runs against
//!
//! Building a [`Program`] performs every allocation the block path will
//! ever need: the buffer pool, the processors, and one state slot per
//! opcode. This happens on a control thread; the finished program is handed
//! to the audio thread whole.

use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use super::spec::ProgramSpec;
use crate::atom::Labelset;
use crate::buffers::BufferPool;
use crate::error::EngineResult;
use crate::host::HostSystem;
use crate::processor::{create_processor, ParamSlot, Processor};

/// Per-opcode state initialized at program install
#[derive(Debug, Clone)]
pub enum OpState {
    None,
    /// Phase accumulator for SINE
    Sine { phase: f32 },
    /// Parsed labelset for FETCH_MESSAGES
    Labelset(Labelset),
}

/// A program ready to execute: spec, buffers, processors, opcode state
pub struct Program {
    pub(crate) spec: Arc<ProgramSpec>,
    pub(crate) pool: BufferPool,
    pub(crate) processors: Vec<Box<dyn Processor>>,
    pub(crate) op_states: Vec<OpState>,
    pub(crate) rng: SmallRng,
    pub(crate) initialized: bool,
}

impl Program {
    /// Instantiate the spec: allocate buffers, create and set up the
    /// declared processors. Control-thread only.
    pub fn new(spec: Arc<ProgramSpec>, host: &HostSystem) -> EngineResult<Self> {
        let pool = BufferPool::new(host, spec.buffer_types(), host.block_size());

        let mut processors = Vec::with_capacity(spec.processors().len());
        for decl in spec.processors() {
            let mut proc = create_processor(&decl.kind)?;
            proc.setup(&decl.desc)?;
            if let Some(params) = &decl.params {
                proc.set_parameters(params.clone());
            }
            processors.push(proc);
        }

        let op_states = vec![OpState::None; spec.ops().len()];

        Ok(Self {
            spec,
            pool,
            processors,
            op_states,
            rng: SmallRng::from_entropy(),
            initialized: false,
        })
    }

    pub fn spec(&self) -> &ProgramSpec {
        &self.spec
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut BufferPool {
        &mut self.pool
    }

    /// Parameter handle for a processor slot, for control-side retention
    pub fn processor_params(&self, index: usize) -> Option<ParamSlot> {
        self.processors.get(index).map(|p| p.params_handle())
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        for proc in &mut self.processors {
            proc.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::BufferType;
    use crate::processor::{NodeDescription, PortDirection};
    use crate::vm::spec::ProcessorDecl;
    use crate::vm::{OpArg, OpCode};

    #[test]
    fn test_program_allocates_buffers() {
        let host = HostSystem::new(44100, 128);
        let mut b = ProgramSpec::builder();
        b.add_buffer(BufferType::FloatAudioBlock);
        b.add_buffer(BufferType::AtomData);
        let program = Program::new(b.build(), &host).unwrap();
        assert_eq!(program.pool().len(), 2);
    }

    #[test]
    fn test_program_instantiates_processors() {
        let host = HostSystem::new(44100, 128);
        let mut b = ProgramSpec::builder();
        let buf = b.add_buffer(BufferType::FloatAudioBlock);
        let proc = b.add_processor(ProcessorDecl {
            kind: "null".into(),
            desc: NodeDescription::new("sink").with_port(
                "in",
                PortDirection::Input,
                BufferType::FloatAudioBlock,
            ),
            params: None,
        });
        b.append(
            OpCode::ConnectPort,
            vec![OpArg::ProcessorIdx(proc), OpArg::Int(0), OpArg::BufferIdx(buf)],
        )
        .unwrap();
        b.append(OpCode::Call, vec![OpArg::ProcessorIdx(proc)]).unwrap();

        let program = Program::new(b.build(), &host).unwrap();
        assert!(program.processor_params(0).is_some());
        assert!(program.processor_params(1).is_none());
    }

    #[test]
    fn test_program_rejects_unknown_processor() {
        let host = HostSystem::new(44100, 128);
        let mut b = ProgramSpec::builder();
        b.add_processor(ProcessorDecl {
            kind: "granulator".into(),
            desc: NodeDescription::new("granulator"),
            params: None,
        });
        assert!(Program::new(b.build(), &host).is_err());
    }
}
