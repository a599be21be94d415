//! Null backend - block framing without device I/O
//!
//! Paces the driver against the wall clock (scaled by `time_scale`) and
//! otherwise swallows output. Tests attach a [`NullCapture`] to observe
//! what the program produced; a datastream address turns on framed PCM
//! export per block.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::datastream::{BlockHeader, DatastreamWriter};
use super::{Backend, BackendSettings, BackendShared};
use crate::buffers::Buffer;
use crate::context::BlockContext;
use crate::error::{EngineError, EngineResult};
use crate::host::HostSystem;

/// What the null backend saw, for test inspection
#[derive(Debug, Default)]
pub struct CaptureData {
    /// Completed blocks
    pub blocks: u64,
    /// Number of `output` calls per channel
    pub output_counts: HashMap<String, u64>,
    /// All samples delivered per channel, concatenated across blocks
    pub samples: HashMap<String, Vec<f32>>,
}

/// Cloneable handle to the backend's capture state
#[derive(Clone, Default)]
pub struct NullCapture {
    inner: Arc<Mutex<CaptureData>>,
}

impl NullCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the captured data
    pub fn inspect<R>(&self, f: impl FnOnce(&CaptureData) -> R) -> R {
        let data = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&data)
    }
}

pub struct NullBackend {
    shared: Arc<BackendShared>,
    settings: BackendSettings,
    sample_rate: u32,
    capture: Option<NullCapture>,
    datastream: Option<DatastreamWriter>,
    /// Channel planes staged for the datastream, reused across blocks
    staged: HashMap<String, Vec<f32>>,
    staged_order: Vec<String>,
    next_deadline: Option<Instant>,
}

impl NullBackend {
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            shared: BackendShared::new(),
            settings,
            sample_rate: 0,
            capture: None,
            datastream: None,
            staged: HashMap::new(),
            staged_order: Vec::new(),
            next_deadline: None,
        }
    }

    /// Attach a capture handle before the driver starts
    pub fn with_capture(mut self, capture: NullCapture) -> Self {
        self.capture = Some(capture);
        self
    }

    fn block_duration(&self, block_size: usize) -> Option<Duration> {
        if self.settings.time_scale <= 0.0 {
            return None;
        }
        let seconds = block_size as f64 / self.sample_rate as f64 / self.settings.time_scale as f64;
        Some(Duration::from_secs_f64(seconds))
    }
}

impl Backend for NullBackend {
    fn setup(&mut self, host: &HostSystem) -> EngineResult<()> {
        self.sample_rate = host.sample_rate();
        if !self.settings.datastream_address.is_empty() {
            self.datastream = Some(DatastreamWriter::connect(&self.settings.datastream_address)?);
        }
        self.next_deadline = None;
        Ok(())
    }

    fn cleanup(&mut self) {
        self.datastream = None;
        self.next_deadline = None;
    }

    fn begin_block(&mut self, ctxt: &mut BlockContext) -> EngineResult<()> {
        if let Some(dur) = self.block_duration(ctxt.block_size) {
            let now = Instant::now();
            let deadline = self.next_deadline.unwrap_or(now);
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            self.next_deadline = Some(deadline.max(now) + dur);
        }

        self.shared.drain_into(ctxt);
        self.staged_order.clear();
        for plane in self.staged.values_mut() {
            plane.clear();
        }
        Ok(())
    }

    fn end_block(&mut self, ctxt: &mut BlockContext) -> EngineResult<()> {
        if let Some(writer) = &mut self.datastream {
            let header = BlockHeader {
                block_size: ctxt.block_size as u32,
                sample_rate: self.sample_rate,
                sample_pos: ctxt.sample_pos,
            };
            let staged = &self.staged;
            let channels = self
                .staged_order
                .iter()
                .filter_map(|name| staged.get(name).map(|p| (name.as_str(), p.as_slice())));
            if let Err(e) = writer.write_block(header, channels) {
                // the peer went away; disable the stream but keep running
                log::warn!("datastream write failed, disabling: {e}");
                self.datastream = None;
            }
        }

        if let Some(capture) = &self.capture {
            let mut data = capture.inner.lock().unwrap_or_else(|e| e.into_inner());
            data.blocks += 1;
        }
        Ok(())
    }

    fn output(&mut self, _ctxt: &BlockContext, channel: &str, buf: &Buffer) -> EngineResult<()> {
        let samples = buf
            .as_samples()
            .ok_or(EngineError::BufferTypeMismatch { index: 0 })?;

        if self.datastream.is_some() {
            if let Some(plane) = self.staged.get_mut(channel) {
                plane.extend_from_slice(samples);
            } else {
                self.staged.insert(channel.to_owned(), samples.to_vec());
            }
            self.staged_order.push(channel.to_owned());
        }

        if let Some(capture) = &self.capture {
            let mut data = capture.inner.lock().unwrap_or_else(|e| e.into_inner());
            *data.output_counts.entry(channel.to_owned()).or_default() += 1;
            data.samples
                .entry(channel.to_owned())
                .or_default()
                .extend_from_slice(samples);
        }
        Ok(())
    }

    fn shared(&self) -> &Arc<BackendShared> {
        &self.shared
    }
}
