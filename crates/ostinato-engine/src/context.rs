//! Per-block scratch state shared by the player, VM, and backend
//!
//! One [`BlockContext`] is created when the realm starts and reused for
//! every block. Per-block fields are reset at block entry; the vectors keep
//! their capacity so steady-state blocks do not allocate.

use std::collections::HashMap;
use std::time::Duration;

use crate::atom::{Message, NodeMessage};
use crate::time::SampleTime;

/// Counters the driver updates as blocks execute
///
/// Plain integers, read after the fact for diagnostics and tests. Transient
/// losses (queue overflow) land here instead of becoming errors.
#[derive(Debug, Default, Clone)]
pub struct PerfStats {
    /// Blocks fully processed
    pub blocks_processed: u64,
    /// Blocks aborted by an opcode or processor failure
    pub blocks_failed: u64,
    /// Outbound messages dropped because the ring was full or the payload
    /// exceeded the inline capacity
    pub messages_dropped: u64,
    /// Player mutations dropped on queue overflow
    pub mutations_dropped: u64,
    /// Wall-clock duration of the most recent block
    pub last_block_duration: Duration,
}

/// Per-period execution context
pub struct BlockContext {
    /// Frames in this block
    pub block_size: usize,
    /// Monotonic frame counter at the start of this block
    pub sample_pos: u64,
    /// Musical-time interval per frame, filled by the player
    pub time_map: Vec<SampleTime>,
    /// Named input buffers provided by the embedder for this block
    pub buffers: HashMap<String, Vec<u8>>,
    /// Messages delivered to this block
    pub in_messages: Vec<Message>,
    /// Outbound ring to the control side; absent in bare test setups
    pub out_messages: Option<rtrb::Producer<NodeMessage>>,
    /// Driver counters
    pub perf: PerfStats,
}

impl BlockContext {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            sample_pos: 0,
            time_map: vec![SampleTime::not_playing(); block_size],
            buffers: HashMap::new(),
            in_messages: Vec::new(),
            out_messages: None,
            perf: PerfStats::default(),
        }
    }

    /// Reset per-block fields at block entry.
    ///
    /// Keeps allocations: the time map is resized in place and message
    /// vectors only shrink their length.
    pub fn begin_block(&mut self) {
        self.time_map.resize(self.block_size, SampleTime::not_playing());
        self.in_messages.clear();
    }

    /// Hand a message to the control side, or count the drop.
    ///
    /// Never blocks and never allocates; a full ring or an oversized
    /// payload is a transient loss, not an error.
    pub fn emit_message(&mut self, msg: NodeMessage) {
        match &mut self.out_messages {
            Some(producer) => {
                if producer.push(msg).is_err() {
                    self.perf.messages_dropped += 1;
                }
            }
            None => {
                self.perf.messages_dropped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Labelset;

    #[test]
    fn test_begin_block_resets() {
        let mut ctxt = BlockContext::new(64);
        ctxt.in_messages.push(Message {
            labelset: Labelset::default(),
            atom_type: 1,
            data: vec![1, 2, 3],
        });
        ctxt.time_map.truncate(10);
        ctxt.begin_block();
        assert!(ctxt.in_messages.is_empty());
        assert_eq!(ctxt.time_map.len(), 64);
    }

    #[test]
    fn test_emit_without_ring_counts_drop() {
        let mut ctxt = BlockContext::new(64);
        let msg = NodeMessage::new(&Labelset::default(), 1, b"x").unwrap();
        ctxt.emit_message(msg);
        assert_eq!(ctxt.perf.messages_dropped, 1);
    }

    #[test]
    fn test_emit_through_ring() {
        let mut ctxt = BlockContext::new(64);
        let (tx, mut rx) = rtrb::RingBuffer::new(4);
        ctxt.out_messages = Some(tx);
        let msg = NodeMessage::new(&Labelset::default(), 7, b"hello").unwrap();
        ctxt.emit_message(msg);
        let got = rx.pop().unwrap();
        assert_eq!(got.atom_type(), 7);
        assert_eq!(got.payload(), b"hello");
        assert_eq!(ctxt.perf.messages_dropped, 0);
    }
}
