//! The opcode interpreter
//!
//! Two entry points: [`setup_program`] runs every opcode's init phase once
//! when a program is installed (control thread), [`process_block`] executes
//! the run phases in program order for one block (audio thread).
//!
//! Execution stops at END or at the first failing opcode. Partial side
//! effects stand; there is no rollback. Errors propagate to the driver,
//! which logs and counts them and moves on to the next block.

use std::f32::consts::TAU;
use std::sync::Arc;

use rand::Rng;

use super::opcode::{OpArg, OpCode};
use super::program::{OpState, Program};
use crate::atom::{Labelset, SequenceReader, SequenceWriter};
use crate::backend::Backend;
use crate::context::BlockContext;
use crate::controls::ControlValueState;
use crate::error::{EngineError, EngineResult};
use crate::host::HostSystem;

/// Interpreter flags for one block
pub struct ProgramState {
    /// Set by END; stops the opcode loop
    pub end: bool,
}

/// Run the init phase of every opcode that has one.
///
/// Control-thread only; this is where CONNECT_PORT bindings land on the
/// processors, FETCH_MESSAGES label expressions are parsed and interned,
/// and SINE phase slots are seeded.
pub fn setup_program(program: &mut Program, host: &HostSystem) -> EngineResult<()> {
    let spec = Arc::clone(&program.spec);
    for (i, op) in spec.ops().iter().enumerate() {
        if !op.opcode.has_init() {
            continue;
        }
        match (op.opcode, op.args.as_slice()) {
            (
                OpCode::ConnectPort,
                [OpArg::ProcessorIdx(p), OpArg::Int(port), OpArg::BufferIdx(buf)],
            ) => {
                let proc = program
                    .processors
                    .get_mut(*p)
                    .ok_or(EngineError::BadProcessorIndex(*p))?;
                proc.connect_port(*port as usize, *buf)?;
            }
            (OpCode::FetchMessages, [OpArg::Str(expr), OpArg::BufferIdx(_)]) => {
                let labelset = Labelset::parse(expr, &host.urid_map)?;
                program.op_states[i] = OpState::Labelset(labelset);
            }
            (OpCode::Sine, [OpArg::BufferIdx(_), OpArg::Float(_)]) => {
                program.op_states[i] = OpState::Sine { phase: 0.0 };
            }
            (opcode, _) => {
                return Err(EngineError::BadArgCount {
                    opcode,
                    expected: opcode.argspec().len(),
                    got: op.args.len(),
                })
            }
        }
    }
    program.initialized = true;
    Ok(())
}

/// Execute one block of the program.
pub fn process_block(
    program: &mut Program,
    ctxt: &mut BlockContext,
    backend: &mut dyn Backend,
    host: &HostSystem,
    controls: &ControlValueState,
) -> EngineResult<()> {
    debug_assert!(program.initialized, "program was not set up");

    let spec = Arc::clone(&program.spec);
    let Program {
        pool,
        processors,
        op_states,
        rng,
        ..
    } = &mut *program;

    let mut state = ProgramState { end: false };

    for (i, op) in spec.ops().iter().enumerate() {
        if !op.opcode.has_run() {
            continue;
        }
        match (op.opcode, op.args.as_slice()) {
            (OpCode::End, _) => state.end = true,

            (OpCode::Copy, [OpArg::BufferIdx(src), OpArg::BufferIdx(dst)]) => {
                pool.copy(*src, *dst)?;
            }
            (OpCode::Clear, [OpArg::BufferIdx(buf)]) => {
                pool.clear(*buf)?;
            }
            (OpCode::Mix, [OpArg::BufferIdx(src), OpArg::BufferIdx(dst)]) => {
                pool.mix(*src, *dst)?;
            }
            (OpCode::Mul, [OpArg::BufferIdx(buf), OpArg::Float(factor)]) => {
                pool.mul(*buf, *factor)?;
            }
            (OpCode::SetFloat, [OpArg::BufferIdx(buf), OpArg::Float(value)]) => {
                pool.set_float(*buf, *value)?;
            }

            (OpCode::Output, [OpArg::BufferIdx(buf), OpArg::Str(channel)]) => {
                backend.output(ctxt, channel, pool.get(*buf)?)?;
            }

            (OpCode::FetchBuffer, [OpArg::Str(name), OpArg::BufferIdx(buf)]) => {
                let out = pool.get_mut(*buf)?;
                match ctxt.buffers.get(name) {
                    Some(bytes) => {
                        out.write_bytes(bytes).map_err(|_| EngineError::SizeMismatch {
                            src: bytes.len(),
                            dst: out.size(),
                        })?;
                    }
                    None => out.clear(),
                }
            }

            (OpCode::FetchMessages, [OpArg::Str(_), OpArg::BufferIdx(buf)]) => {
                let OpState::Labelset(labelset) = &op_states[i] else {
                    return Err(EngineError::MissingOpState { index: i });
                };
                let bytes = pool
                    .get_mut(*buf)?
                    .as_bytes_mut()
                    .ok_or(EngineError::BufferTypeMismatch { index: *buf })?;
                let mut writer = SequenceWriter::new(bytes, host.urids.atom_sequence)
                    .map_err(|_| EngineError::AtomOverflow { index: *buf })?;
                for msg in &ctxt.in_messages {
                    if labelset.matches(&msg.labelset) {
                        writer
                            .append(0, msg.atom_type, &msg.data)
                            .map_err(|_| EngineError::AtomOverflow { index: *buf })?;
                    }
                }
                writer.finish();
            }

            (OpCode::FetchControlValue, [OpArg::Str(name), OpArg::BufferIdx(buf)]) => {
                match controls.get(name) {
                    Some(value) => pool.set_float(*buf, value)?,
                    None => pool.clear(*buf)?,
                }
            }

            (OpCode::Noise, [OpArg::BufferIdx(buf)]) => {
                let samples = pool
                    .get_mut(*buf)?
                    .as_samples_mut()
                    .ok_or(EngineError::BufferTypeMismatch { index: *buf })?;
                for v in samples.iter_mut() {
                    *v = rng.gen::<f32>() * 2.0 - 1.0;
                }
            }

            (OpCode::Sine, [OpArg::BufferIdx(buf), OpArg::Float(freq)]) => {
                let OpState::Sine { phase } = &mut op_states[i] else {
                    return Err(EngineError::MissingOpState { index: i });
                };
                let samples = pool
                    .get_mut(*buf)?
                    .as_samples_mut()
                    .ok_or(EngineError::BufferTypeMismatch { index: *buf })?;
                let step = TAU * freq / host.sample_rate() as f32;
                for v in samples.iter_mut() {
                    *v = phase.sin();
                    *phase += step;
                    if *phase > TAU {
                        *phase -= TAU;
                    }
                }
            }

            (OpCode::MidiMonkey, [OpArg::BufferIdx(buf), OpArg::Float(prob)]) => {
                let bytes = pool
                    .get_mut(*buf)?
                    .as_bytes_mut()
                    .ok_or(EngineError::BufferTypeMismatch { index: *buf })?;
                let mut writer = SequenceWriter::new(bytes, host.urids.atom_sequence)
                    .map_err(|_| EngineError::AtomOverflow { index: *buf })?;
                if rng.gen::<f32>() < *prob {
                    let frame = rng.gen_range(0..ctxt.block_size as u32);
                    writer
                        .append(frame, host.urids.midi_event, &[0x90, 62, 100])
                        .map_err(|_| EngineError::AtomOverflow { index: *buf })?;
                }
                writer.finish();
            }

            (OpCode::Call, [OpArg::ProcessorIdx(p)]) => {
                let proc = processors
                    .get_mut(*p)
                    .ok_or(EngineError::BadProcessorIndex(*p))?;
                proc.run(ctxt, pool)?;
            }

            (OpCode::LogRms, [OpArg::BufferIdx(buf)]) => {
                let samples = pool
                    .get(*buf)?
                    .as_samples()
                    .ok_or(EngineError::BufferTypeMismatch { index: *buf })?;
                let mean_sq =
                    samples.iter().map(|v| v * v).sum::<f32>() / samples.len() as f32;
                log::info!("buffer {buf}: rms={:.3}", mean_sq.sqrt());
            }

            (OpCode::LogAtom, [OpArg::BufferIdx(buf)]) => {
                let bytes = pool
                    .get(*buf)?
                    .as_bytes()
                    .ok_or(EngineError::BufferTypeMismatch { index: *buf })?;
                let reader = SequenceReader::new(bytes, host.urids.atom_sequence)
                    .map_err(|_| EngineError::BadAtomSequence { index: *buf })?;
                for event in reader.events() {
                    log::info!(
                        "buffer {buf}: event type {} @{}",
                        event.atom_type,
                        event.frame_time
                    );
                }
            }

            (opcode, _) => {
                return Err(EngineError::BadArgCount {
                    opcode,
                    expected: opcode.argspec().len(),
                    got: op.args.len(),
                })
            }
        }

        if state.end {
            break;
        }
    }
    Ok(())
}
