//! Typed buffer pool for the VM
//!
//! Every buffer is bound to one [`BufferType`] for its whole life and owns
//! its storage. The pool is allocated once at program setup; nothing on the
//! block path grows, shrinks, or reallocates. Opcodes and processors address
//! buffers by index and borrow them through the pool, which hands out split
//! borrows so a source can be read while a destination is written.

use serde::{Deserialize, Serialize};

use crate::atom::{self, Urid};
use crate::error::{EngineError, EngineResult};
use crate::host::HostSystem;

/// The three buffer shapes the VM knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferType {
    /// A single control-rate float
    Float,
    /// One float per frame of the block
    FloatAudioBlock,
    /// An atom event sequence, capacity negotiated from the host
    AtomData,
}

impl BufferType {
    /// Byte size of a buffer of this type for the given block size
    pub fn size(&self, host: &HostSystem, block_size: usize) -> usize {
        match self {
            BufferType::Float => std::mem::size_of::<f32>(),
            BufferType::FloatAudioBlock => block_size * std::mem::size_of::<f32>(),
            BufferType::AtomData => host.atom_data_size(),
        }
    }
}

/// Type/size violations detected by buffer operations
///
/// Carries no payload; the pool attaches the offending index when
/// converting to [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOpError {
    TypeMismatch,
    SizeMismatch,
    Overflow,
    BadSequence,
}

enum BufferStorage {
    Samples(Vec<f32>),
    Bytes(Vec<u8>),
}

/// One typed buffer owned by a program
pub struct Buffer {
    btype: BufferType,
    storage: BufferStorage,
    sequence_urid: Urid,
}

impl Buffer {
    /// Allocate a buffer of `btype`. This is the only allocation point;
    /// it runs at program setup on a control thread.
    pub fn new(btype: BufferType, host: &HostSystem, block_size: usize) -> Self {
        let storage = match btype {
            BufferType::Float => BufferStorage::Samples(vec![0.0; 1]),
            BufferType::FloatAudioBlock => BufferStorage::Samples(vec![0.0; block_size]),
            BufferType::AtomData => BufferStorage::Bytes(vec![0u8; host.atom_data_size()]),
        };
        let mut buf = Self {
            btype,
            storage,
            sequence_urid: host.urids.atom_sequence,
        };
        buf.clear();
        buf
    }

    pub fn buffer_type(&self) -> BufferType {
        self.btype
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        match &self.storage {
            BufferStorage::Samples(s) => s.len() * std::mem::size_of::<f32>(),
            BufferStorage::Bytes(b) => b.len(),
        }
    }

    /// Float view, if this is a float-typed buffer
    pub fn as_samples(&self) -> Option<&[f32]> {
        match &self.storage {
            BufferStorage::Samples(s) => Some(s),
            BufferStorage::Bytes(_) => None,
        }
    }

    /// Mutable float view, if this is a float-typed buffer
    pub fn as_samples_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.storage {
            BufferStorage::Samples(s) => Some(s),
            BufferStorage::Bytes(_) => None,
        }
    }

    /// Byte view, if this is an atom buffer
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.storage {
            BufferStorage::Bytes(b) => Some(b),
            BufferStorage::Samples(_) => None,
        }
    }

    /// Mutable byte view, if this is an atom buffer
    pub fn as_bytes_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.storage {
            BufferStorage::Bytes(b) => Some(b),
            BufferStorage::Samples(_) => None,
        }
    }

    /// Reset to silence (floats) or an empty event sequence (atoms)
    pub fn clear(&mut self) {
        match &mut self.storage {
            BufferStorage::Samples(s) => s.fill(0.0),
            BufferStorage::Bytes(b) => {
                // capacity is always >= the 8-byte header
                let w = atom::SequenceWriter::new(b, self.sequence_urid)
                    .expect("atom buffer smaller than a sequence header");
                w.finish();
            }
        }
    }

    /// Scale in place; a no-op for atom buffers
    pub fn mul(&mut self, factor: f32) {
        if let BufferStorage::Samples(s) = &mut self.storage {
            for v in s.iter_mut() {
                *v *= factor;
            }
        }
    }

    /// Overwrite from a raw byte image of exactly this buffer's size.
    ///
    /// Used by FETCH_BUFFER to take named inputs the embedder provided for
    /// the block.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BufferOpError> {
        match &mut self.storage {
            BufferStorage::Samples(s) => {
                if bytes.len() != s.len() * std::mem::size_of::<f32>() {
                    return Err(BufferOpError::SizeMismatch);
                }
                for (v, chunk) in s.iter_mut().zip(bytes.chunks_exact(4)) {
                    *v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
            }
            BufferStorage::Bytes(b) => {
                if bytes.len() != b.len() {
                    return Err(BufferOpError::SizeMismatch);
                }
                b.copy_from_slice(bytes);
            }
        }
        Ok(())
    }

    /// Overwrite with `src`'s contents; types and sizes must match
    pub fn copy_from(&mut self, src: &Buffer) -> Result<(), BufferOpError> {
        if self.btype != src.btype {
            return Err(BufferOpError::TypeMismatch);
        }
        match (&mut self.storage, &src.storage) {
            (BufferStorage::Samples(d), BufferStorage::Samples(s)) => {
                if d.len() != s.len() {
                    return Err(BufferOpError::SizeMismatch);
                }
                d.copy_from_slice(s);
            }
            (BufferStorage::Bytes(d), BufferStorage::Bytes(s)) => {
                if d.len() != s.len() {
                    return Err(BufferOpError::SizeMismatch);
                }
                d.copy_from_slice(s);
            }
            _ => return Err(BufferOpError::TypeMismatch),
        }
        Ok(())
    }
}

/// The buffer table of a program
///
/// `atom_scratch` backs the two-sequence merge in [`BufferPool::mix`]; it
/// is sized like an atom buffer at setup so mixing never allocates.
pub struct BufferPool {
    buffers: Vec<Buffer>,
    atom_scratch: Vec<u8>,
}

impl BufferPool {
    pub fn new(host: &HostSystem, types: &[BufferType], block_size: usize) -> Self {
        Self {
            buffers: types
                .iter()
                .map(|t| Buffer::new(*t, host, block_size))
                .collect(),
            atom_scratch: vec![0u8; host.atom_data_size()],
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, index: usize) -> EngineResult<&Buffer> {
        self.buffers
            .get(index)
            .ok_or(EngineError::BadBufferIndex(index))
    }

    pub fn get_mut(&mut self, index: usize) -> EngineResult<&mut Buffer> {
        self.buffers
            .get_mut(index)
            .ok_or(EngineError::BadBufferIndex(index))
    }

    /// Borrow `src` read-only and `dst` mutably at the same time
    pub fn pair_mut(&mut self, src: usize, dst: usize) -> EngineResult<(&Buffer, &mut Buffer)> {
        if src == dst {
            return Err(EngineError::AliasedBuffers { index: src });
        }
        let max = src.max(dst);
        if max >= self.buffers.len() {
            return Err(EngineError::BadBufferIndex(max));
        }
        let (low, high) = self.buffers.split_at_mut(max);
        if src < dst {
            Ok((&low[src], &mut high[0]))
        } else {
            Ok((&high[0], &mut low[dst]))
        }
    }

    pub fn clear(&mut self, index: usize) -> EngineResult<()> {
        self.get_mut(index)?.clear();
        Ok(())
    }

    pub fn mul(&mut self, index: usize, factor: f32) -> EngineResult<()> {
        self.get_mut(index)?.mul(factor);
        Ok(())
    }

    pub fn copy(&mut self, src: usize, dst: usize) -> EngineResult<()> {
        let (s, d) = self.pair_mut(src, dst)?;
        d.copy_from(s).map_err(|e| convert_op_error(e, dst))
    }

    /// Write a single control value; requires a float-typed buffer
    pub fn set_float(&mut self, index: usize, value: f32) -> EngineResult<()> {
        let buf = self.get_mut(index)?;
        let samples = buf
            .as_samples_mut()
            .ok_or(EngineError::BufferTypeMismatch { index })?;
        samples[0] = value;
        Ok(())
    }

    /// Sum `src` into `dst` (floats) or merge event sequences (atoms)
    pub fn mix(&mut self, src: usize, dst: usize) -> EngineResult<()> {
        if src == dst {
            return Err(EngineError::AliasedBuffers { index: src });
        }
        let max = src.max(dst);
        if max >= self.buffers.len() {
            return Err(EngineError::BadBufferIndex(max));
        }
        // field-disjoint borrows: buffers for the pair, atom_scratch for merge
        let (src_buf, dst_buf) = {
            let (low, high) = self.buffers.split_at_mut(max);
            if src < dst {
                (&low[src], &mut high[0])
            } else {
                (&high[0], &mut low[dst])
            }
        };

        if src_buf.buffer_type() != dst_buf.buffer_type() {
            return Err(EngineError::BufferTypeMismatch { index: dst });
        }

        match src_buf.buffer_type() {
            BufferType::Float | BufferType::FloatAudioBlock => {
                let s = src_buf
                    .as_samples()
                    .ok_or(EngineError::BufferTypeMismatch { index: src })?;
                let d = dst_buf
                    .as_samples_mut()
                    .ok_or(EngineError::BufferTypeMismatch { index: dst })?;
                if s.len() != d.len() {
                    return Err(EngineError::SizeMismatch {
                        src: s.len(),
                        dst: d.len(),
                    });
                }
                for (dv, sv) in d.iter_mut().zip(s.iter()) {
                    *dv += *sv;
                }
            }
            BufferType::AtomData => {
                let seq_urid = dst_buf.sequence_urid;
                let s = src_buf
                    .as_bytes()
                    .ok_or(EngineError::BufferTypeMismatch { index: src })?;
                let d = dst_buf
                    .as_bytes_mut()
                    .ok_or(EngineError::BufferTypeMismatch { index: dst })?;
                atom::merge_sequences(d, s, &mut self.atom_scratch, seq_urid)
                    .map_err(|_| EngineError::AtomOverflow { index: dst })?;
                d.copy_from_slice(&self.atom_scratch[..d.len()]);
            }
        }
        Ok(())
    }
}

fn convert_op_error(e: BufferOpError, index: usize) -> EngineError {
    match e {
        BufferOpError::TypeMismatch => EngineError::BufferTypeMismatch { index },
        BufferOpError::SizeMismatch => EngineError::SizeMismatch { src: 0, dst: 0 },
        BufferOpError::Overflow => EngineError::AtomOverflow { index },
        BufferOpError::BadSequence => EngineError::BadAtomSequence { index },
    }
}
