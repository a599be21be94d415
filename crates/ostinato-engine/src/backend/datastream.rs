//! Framed PCM export over a unix socket
//!
//! When a backend is configured with a datastream address it writes every
//! block as one frame: a fixed header followed by channel-labeled float32
//! planes, all little-endian.
//!
//! ```text
//! header:   block_size: u32, sample_rate: u32, sample_pos: u64
//! body:     channel_count: u32
//! channel:  name_len: u32, name bytes, frame_count: u32, f32 samples
//! ```

use std::io::Write;
use std::os::unix::net::UnixStream;

use crate::error::{EngineError, EngineResult};

/// Per-block frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_size: u32,
    pub sample_rate: u32,
    pub sample_pos: u64,
}

impl BlockHeader {
    pub const ENCODED_SIZE: usize = 16;

    pub fn encode(&self) -> [u8; Self::ENCODED_SIZE] {
        let mut out = [0u8; Self::ENCODED_SIZE];
        out[0..4].copy_from_slice(&self.block_size.to_le_bytes());
        out[4..8].copy_from_slice(&self.sample_rate.to_le_bytes());
        out[8..16].copy_from_slice(&self.sample_pos.to_le_bytes());
        out
    }

    pub fn decode(buf: &[u8; Self::ENCODED_SIZE]) -> Self {
        Self {
            block_size: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            sample_rate: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            sample_pos: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        }
    }
}

/// Streams block frames to a connected peer
pub struct DatastreamWriter {
    stream: UnixStream,
    scratch: Vec<u8>,
}

impl DatastreamWriter {
    pub fn connect(address: &str) -> EngineResult<Self> {
        let stream = UnixStream::connect(address)
            .map_err(|e| EngineError::Datastream(format!("{address}: {e}")))?;
        Ok(Self {
            stream,
            scratch: Vec::with_capacity(4096),
        })
    }

    /// Write one block frame. Channels are written in the order given.
    pub fn write_block<'a>(
        &mut self,
        header: BlockHeader,
        channels: impl Iterator<Item = (&'a str, &'a [f32])>,
    ) -> EngineResult<()> {
        self.scratch.clear();
        self.scratch.extend_from_slice(&header.encode());

        let count_pos = self.scratch.len();
        self.scratch.extend_from_slice(&0u32.to_le_bytes());

        let mut count = 0u32;
        for (name, samples) in channels {
            self.scratch
                .extend_from_slice(&(name.len() as u32).to_le_bytes());
            self.scratch.extend_from_slice(name.as_bytes());
            self.scratch
                .extend_from_slice(&(samples.len() as u32).to_le_bytes());
            for s in samples {
                self.scratch.extend_from_slice(&s.to_le_bytes());
            }
            count += 1;
        }
        self.scratch[count_pos..count_pos + 4].copy_from_slice(&count.to_le_bytes());

        self.stream
            .write_all(&self.scratch)
            .map_err(|e| EngineError::Datastream(e.to_string()))
    }
}
