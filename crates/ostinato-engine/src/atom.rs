//! Labeled atom messages and event sequences
//!
//! All inter-processor and audio-to-control traffic is carried as typed
//! atoms: a URID-tagged payload, optionally wrapped in a labelset used for
//! routing and filtering. Event sequences are encoded into flat byte
//! buffers (little-endian, 4-byte aligned) so they can live inside the
//! program's preallocated buffer pool and cross threads without pointers.
//!
//! Layout of a sequence buffer:
//!
//! ```text
//! header:  type_urid: u32, body_size: u32
//! event:   frame_time: u32, type_urid: u32, size: u32, payload, pad to 4
//! ```

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{EngineError, EngineResult};

/// Integer id for an interned URI
pub type Urid = u32;

/// Size of a sequence header in bytes
pub const SEQUENCE_HEADER_SIZE: usize = 8;

/// Size of an event header in bytes
pub const EVENT_HEADER_SIZE: usize = 12;

/// Interning map from URIs to dense integer ids
///
/// Interning happens on control threads at setup time; the audio thread
/// only compares the integer ids.
pub struct UridMap {
    inner: Mutex<UridMapInner>,
}

struct UridMapInner {
    by_uri: HashMap<String, Urid>,
    next: Urid,
}

impl UridMap {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(UridMapInner {
                by_uri: HashMap::new(),
                next: 1,
            }),
        }
    }

    /// Map a URI to its id, interning it on first use
    pub fn map(&self, uri: &str) -> Urid {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&urid) = inner.by_uri.get(uri) {
            return urid;
        }
        let urid = inner.next;
        inner.next += 1;
        inner.by_uri.insert(uri.to_owned(), urid);
        urid
    }
}

impl Default for UridMap {
    fn default() -> Self {
        Self::new()
    }
}

/// One routing label: an interned key/value pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Label {
    pub key: Urid,
    pub value: Urid,
}

/// Ordered list of routing labels attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Labelset {
    pub labels: Vec<Label>,
}

impl Labelset {
    /// Whether every label of `self` appears in `other`.
    ///
    /// This is the FETCH_MESSAGES matching rule: the opcode's labelset is a
    /// subset requirement, not an exact match.
    pub fn matches(&self, other: &Labelset) -> bool {
        self.labels.iter().all(|l| other.labels.contains(l))
    }

    /// Parse a label expression like `"track=drums,port=midi"`, interning
    /// keys and values through `map`.
    pub fn parse(expr: &str, map: &UridMap) -> EngineResult<Labelset> {
        let mut labels = Vec::new();
        for part in expr.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| EngineError::BadLabelExpression(expr.to_owned()))?;
            labels.push(Label {
                key: map.map(key.trim()),
                value: map.map(value.trim()),
            });
        }
        Ok(Labelset { labels })
    }
}

/// Inbound message: a labeled atom delivered to the engine for one block
#[derive(Debug, Clone)]
pub struct Message {
    pub labelset: Labelset,
    pub atom_type: Urid,
    pub data: Vec<u8>,
}

/// Maximum labels carried by an outbound node message
pub const NODE_MESSAGE_MAX_LABELS: usize = 4;

/// Maximum payload bytes carried by an outbound node message
pub const NODE_MESSAGE_MAX_PAYLOAD: usize = 64;

/// Outbound message emitted from the audio thread
///
/// Fixed-size so it can travel through a preallocated ring without heap
/// traffic. Oversized payloads are the emitter's bug; `new` rejects them
/// and the caller drops the message with a counter bump.
#[derive(Clone, Copy)]
pub struct NodeMessage {
    labels: [Label; NODE_MESSAGE_MAX_LABELS],
    label_count: u8,
    atom_type: Urid,
    len: u8,
    payload: [u8; NODE_MESSAGE_MAX_PAYLOAD],
}

impl NodeMessage {
    /// Build a message; returns None when the labelset or payload exceeds
    /// the inline capacity.
    pub fn new(labelset: &Labelset, atom_type: Urid, payload: &[u8]) -> Option<Self> {
        if labelset.labels.len() > NODE_MESSAGE_MAX_LABELS
            || payload.len() > NODE_MESSAGE_MAX_PAYLOAD
        {
            return None;
        }
        let mut labels = [Label::default(); NODE_MESSAGE_MAX_LABELS];
        labels[..labelset.labels.len()].copy_from_slice(&labelset.labels);
        let mut buf = [0u8; NODE_MESSAGE_MAX_PAYLOAD];
        buf[..payload.len()].copy_from_slice(payload);
        Some(Self {
            labels,
            label_count: labelset.labels.len() as u8,
            atom_type,
            len: payload.len() as u8,
            payload: buf,
        })
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels[..self.label_count as usize]
    }

    pub fn atom_type(&self) -> Urid {
        self.atom_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len as usize]
    }
}

impl std::fmt::Debug for NodeMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMessage")
            .field("labels", &self.labels())
            .field("atom_type", &self.atom_type)
            .field("payload_len", &self.len)
            .finish()
    }
}

/// Error raised when an event does not fit into the sequence buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceFull;

fn write_u32(buf: &mut [u8], pos: usize, v: u32) {
    buf[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
}

fn read_u32(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

/// Incremental writer for an atom event sequence
///
/// Events must be appended in non-decreasing frame-time order; the writer
/// does not reorder. `finish` patches the header and zeroes the rest of
/// the buffer so repeated encodings of the same events are bit-identical.
pub struct SequenceWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SequenceWriter<'a> {
    /// Start a sequence at the head of `buf`
    pub fn new(buf: &'a mut [u8], sequence_urid: Urid) -> Result<Self, SequenceFull> {
        if buf.len() < SEQUENCE_HEADER_SIZE {
            return Err(SequenceFull);
        }
        write_u32(buf, 0, sequence_urid);
        write_u32(buf, 4, 0);
        Ok(Self {
            buf,
            pos: SEQUENCE_HEADER_SIZE,
        })
    }

    /// Append one event
    pub fn append(
        &mut self,
        frame_time: u32,
        atom_type: Urid,
        payload: &[u8],
    ) -> Result<(), SequenceFull> {
        let padded = (payload.len() + 3) & !3;
        let needed = EVENT_HEADER_SIZE + padded;
        if self.pos + needed > self.buf.len() {
            return Err(SequenceFull);
        }
        write_u32(self.buf, self.pos, frame_time);
        write_u32(self.buf, self.pos + 4, atom_type);
        write_u32(self.buf, self.pos + 8, payload.len() as u32);
        let data_start = self.pos + EVENT_HEADER_SIZE;
        self.buf[data_start..data_start + payload.len()].copy_from_slice(payload);
        for b in &mut self.buf[data_start + payload.len()..data_start + padded] {
            *b = 0;
        }
        self.pos += needed;
        Ok(())
    }

    /// Patch the header and clear the tail of the buffer
    pub fn finish(self) -> usize {
        let body = (self.pos - SEQUENCE_HEADER_SIZE) as u32;
        write_u32(self.buf, 4, body);
        for b in &mut self.buf[self.pos..] {
            *b = 0;
        }
        self.pos
    }
}

/// One decoded event borrowed from a sequence buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomEvent<'a> {
    pub frame_time: u32,
    pub atom_type: Urid,
    pub payload: &'a [u8],
}

/// Read-side view of an atom event sequence
pub struct SequenceReader<'a> {
    body: &'a [u8],
}

impl<'a> SequenceReader<'a> {
    /// Validate the header and position at the first event
    pub fn new(buf: &'a [u8], sequence_urid: Urid) -> Result<Self, ()> {
        if buf.len() < SEQUENCE_HEADER_SIZE || read_u32(buf, 0) != sequence_urid {
            return Err(());
        }
        let body_size = read_u32(buf, 4) as usize;
        if SEQUENCE_HEADER_SIZE + body_size > buf.len() {
            return Err(());
        }
        Ok(Self {
            body: &buf[SEQUENCE_HEADER_SIZE..SEQUENCE_HEADER_SIZE + body_size],
        })
    }

    /// Iterate the events in buffer order
    pub fn events(&self) -> SequenceEvents<'a> {
        SequenceEvents {
            body: self.body,
            pos: 0,
        }
    }
}

/// Iterator over the events of a [`SequenceReader`]
pub struct SequenceEvents<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for SequenceEvents<'a> {
    type Item = AtomEvent<'a>;

    fn next(&mut self) -> Option<AtomEvent<'a>> {
        if self.pos + EVENT_HEADER_SIZE > self.body.len() {
            return None;
        }
        let frame_time = read_u32(self.body, self.pos);
        let atom_type = read_u32(self.body, self.pos + 4);
        let size = read_u32(self.body, self.pos + 8) as usize;
        let data_start = self.pos + EVENT_HEADER_SIZE;
        if data_start + size > self.body.len() {
            return None;
        }
        let payload = &self.body[data_start..data_start + size];
        self.pos = data_start + ((size + 3) & !3);
        Some(AtomEvent {
            frame_time,
            atom_type,
            payload,
        })
    }
}

/// Merge two sequences into `out`, ordered by frame time.
///
/// Ties keep `a`'s events first, so mixing is deterministic. Events that
/// do not fit in `out` are dropped and reported through the error.
pub fn merge_sequences(
    a: &[u8],
    b: &[u8],
    out: &mut [u8],
    sequence_urid: Urid,
) -> Result<usize, SequenceFull> {
    let ra = SequenceReader::new(a, sequence_urid).map_err(|_| SequenceFull)?;
    let rb = SequenceReader::new(b, sequence_urid).map_err(|_| SequenceFull)?;

    let mut writer = SequenceWriter::new(out, sequence_urid)?;
    let mut ia = ra.events().peekable();
    let mut ib = rb.events().peekable();

    loop {
        let ev = match (ia.peek(), ib.peek()) {
            (Some(ea), Some(eb)) => {
                if ea.frame_time <= eb.frame_time {
                    ia.next()
                } else {
                    ib.next()
                }
            }
            (Some(_), None) => ia.next(),
            (None, Some(_)) => ib.next(),
            (None, None) => break,
        };
        if let Some(ev) = ev {
            writer.append(ev.frame_time, ev.atom_type, ev.payload)?;
        }
    }
    Ok(writer.finish())
}
