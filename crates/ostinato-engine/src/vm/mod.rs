//! The block-based virtual machine
//!
//! A program is an ordered list of opcodes over a typed buffer pool and a
//! processor table. The control plane compiles a [`ProgramSpec`] through
//! the checking builder, instantiates it into a [`Program`], runs the init
//! phase, and hands the whole thing to the audio thread, which executes
//! [`process_block`] once per audio period.

mod interp;
mod opcode;
mod program;
mod spec;

pub use interp::{process_block, setup_program, ProgramState};
pub use opcode::{OpArg, OpCode};
pub use program::{OpState, Program};
pub use spec::{OpRecord, ProcessorDecl, ProgramSpec, ProgramSpecBuilder};
