//! Opcode set and argument schema
//!
//! Each opcode declares an argspec string naming its argument kinds:
//! `b` buffer index, `i` int, `f` float, `s` string, `p` processor index.
//! The spec builder checks arguments against the schema at compile time so
//! the interpreter can pattern-match without revalidating per block.
//!
//! An opcode participates in one or both phases: init runs once when the
//! program is installed, run executes every block.

/// The fixed opcode set of the VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    // control flow
    Noop,
    End,

    // buffer access
    Copy,
    Clear,
    Mix,
    Mul,
    SetFloat,

    // I/O
    Output,
    FetchBuffer,
    FetchMessages,
    FetchControlValue,

    // generators
    Noise,
    Sine,
    MidiMonkey,

    // processors
    ConnectPort,
    Call,

    // diagnostics
    LogRms,
    LogAtom,
}

impl OpCode {
    /// Argument kinds, one character per argument
    pub fn argspec(&self) -> &'static str {
        match self {
            OpCode::Noop => "",
            OpCode::End => "",
            OpCode::Copy => "bb",
            OpCode::Clear => "b",
            OpCode::Mix => "bb",
            OpCode::Mul => "bf",
            OpCode::SetFloat => "bf",
            OpCode::Output => "bs",
            OpCode::FetchBuffer => "sb",
            OpCode::FetchMessages => "sb",
            OpCode::FetchControlValue => "sb",
            OpCode::Noise => "b",
            OpCode::Sine => "bf",
            OpCode::MidiMonkey => "bf",
            OpCode::ConnectPort => "pib",
            OpCode::Call => "p",
            OpCode::LogRms => "b",
            OpCode::LogAtom => "b",
        }
    }

    /// Whether the opcode does work at program install
    pub fn has_init(&self) -> bool {
        matches!(self, OpCode::ConnectPort | OpCode::FetchMessages | OpCode::Sine)
    }

    /// Whether the opcode does work per block
    pub fn has_run(&self) -> bool {
        !matches!(self, OpCode::Noop | OpCode::ConnectPort)
    }
}

/// A typed opcode argument
#[derive(Debug, Clone, PartialEq)]
pub enum OpArg {
    BufferIdx(usize),
    Int(i64),
    Float(f32),
    Str(String),
    ProcessorIdx(usize),
}

impl OpArg {
    /// The argspec character this argument satisfies
    pub fn kind_char(&self) -> char {
        match self {
            OpArg::BufferIdx(_) => 'b',
            OpArg::Int(_) => 'i',
            OpArg::Float(_) => 'f',
            OpArg::Str(_) => 's',
            OpArg::ProcessorIdx(_) => 'p',
        }
    }
}
