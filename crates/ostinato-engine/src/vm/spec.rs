//! Immutable program specification
//!
//! A [`ProgramSpec`] is the compiled form of a graph: an ordered opcode
//! list plus the buffer and processor tables the opcodes index into. It is
//! built through a checking builder on a control thread, then frozen and
//! shared; nothing on the audio side ever revalidates it.

use std::sync::Arc;

use super::opcode::{OpArg, OpCode};
use crate::buffers::BufferType;
use crate::error::{EngineError, EngineResult};
use crate::processor::{NodeDescription, NodeParameters};

/// One opcode with its checked arguments
#[derive(Debug, Clone)]
pub struct OpRecord {
    pub opcode: OpCode,
    pub args: Vec<OpArg>,
}

/// Declaration of a processor slot: factory kind plus its node description
#[derive(Debug, Clone)]
pub struct ProcessorDecl {
    pub kind: String,
    pub desc: NodeDescription,
    pub params: Option<NodeParameters>,
}

/// Frozen program: opcodes, buffer table, processor table
#[derive(Debug)]
pub struct ProgramSpec {
    ops: Vec<OpRecord>,
    buffer_types: Vec<BufferType>,
    processors: Vec<ProcessorDecl>,
}

impl ProgramSpec {
    pub fn builder() -> ProgramSpecBuilder {
        ProgramSpecBuilder::default()
    }

    pub fn ops(&self) -> &[OpRecord] {
        &self.ops
    }

    pub fn buffer_types(&self) -> &[BufferType] {
        &self.buffer_types
    }

    pub fn processors(&self) -> &[ProcessorDecl] {
        &self.processors
    }
}

/// Checking builder for [`ProgramSpec`]
#[derive(Debug, Default)]
pub struct ProgramSpecBuilder {
    ops: Vec<OpRecord>,
    buffer_types: Vec<BufferType>,
    processors: Vec<ProcessorDecl>,
}

impl ProgramSpecBuilder {
    /// Reserve a buffer slot, returning its index
    pub fn add_buffer(&mut self, btype: BufferType) -> usize {
        self.buffer_types.push(btype);
        self.buffer_types.len() - 1
    }

    /// Reserve a processor slot, returning its index
    pub fn add_processor(&mut self, decl: ProcessorDecl) -> usize {
        self.processors.push(decl);
        self.processors.len() - 1
    }

    /// Append an opcode, checking its arguments against the argspec and
    /// the tables built so far.
    pub fn append(&mut self, opcode: OpCode, args: Vec<OpArg>) -> EngineResult<&mut Self> {
        let spec = opcode.argspec();
        if args.len() != spec.len() {
            return Err(EngineError::BadArgCount {
                opcode,
                expected: spec.len(),
                got: args.len(),
            });
        }
        for (index, (arg, kind)) in args.iter().zip(spec.chars()).enumerate() {
            if arg.kind_char() != kind {
                return Err(EngineError::BadArgKind {
                    opcode,
                    index,
                    expected: kind_name(kind),
                });
            }
            match arg {
                OpArg::BufferIdx(b) if *b >= self.buffer_types.len() => {
                    return Err(EngineError::BadBufferIndex(*b));
                }
                OpArg::ProcessorIdx(p) if *p >= self.processors.len() => {
                    return Err(EngineError::BadProcessorIndex(*p));
                }
                _ => {}
            }
        }

        // CONNECT_PORT's port argument must name a declared port
        if opcode == OpCode::ConnectPort {
            if let (OpArg::ProcessorIdx(p), OpArg::Int(port)) = (&args[0], &args[1]) {
                let count = self.processors[*p].desc.ports.len();
                let port = *port as usize;
                if port >= count {
                    return Err(EngineError::BadPortIndex { port, count });
                }
            }
        }

        self.ops.push(OpRecord { opcode, args });
        Ok(self)
    }

    /// Freeze the spec for sharing
    pub fn build(self) -> Arc<ProgramSpec> {
        Arc::new(ProgramSpec {
            ops: self.ops,
            buffer_types: self.buffer_types,
            processors: self.processors,
        })
    }
}

fn kind_name(kind: char) -> &'static str {
    match kind {
        'b' => "a buffer index",
        'i' => "an int",
        'f' => "a float",
        's' => "a string",
        'p' => "a processor index",
        _ => "an unknown kind",
    }
}
