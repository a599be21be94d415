//! Device backend - stereo output through cpal
//!
//! The driver thread stays in charge of block framing; the device callback
//! only drains a lock-free ring of interleaved samples. `begin_block`
//! waits until the ring has room for one block, which paces the driver to
//! the device clock. Underruns on the device side are filled with silence.
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated holder
//! thread for its entire life; `setup` waits for that thread to report the
//! negotiated configuration or the open error.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::{Backend, BackendSettings, BackendShared};
use crate::buffers::Buffer;
use crate::context::BlockContext;
use crate::error::{EngineError, EngineResult};
use crate::host::HostSystem;

/// Ring capacity in blocks; enough to ride out scheduling jitter without
/// adding noticeable latency
const RING_BLOCKS: usize = 8;

pub struct CpalBackend {
    shared: Arc<BackendShared>,
    settings: BackendSettings,
    producer: Option<rtrb::Producer<f32>>,
    stream_thread: Option<std::thread::JoinHandle<()>>,
    stream_stop: Arc<AtomicBool>,
    stream_failed: Arc<AtomicBool>,
    staged_left: Vec<f32>,
    staged_right: Vec<f32>,
    left_filled: bool,
    right_filled: bool,
    warned_channels: HashSet<String>,
    device_sample_rate: u32,
}

impl CpalBackend {
    pub fn new(settings: BackendSettings) -> Self {
        Self {
            shared: BackendShared::new(),
            settings,
            producer: None,
            stream_thread: None,
            stream_stop: Arc::new(AtomicBool::new(false)),
            stream_failed: Arc::new(AtomicBool::new(false)),
            staged_left: Vec::new(),
            staged_right: Vec::new(),
            left_filled: false,
            right_filled: false,
            warned_channels: HashSet::new(),
            device_sample_rate: 0,
        }
    }

    /// Sample rate the device actually runs at
    pub fn device_sample_rate(&self) -> u32 {
        self.device_sample_rate
    }
}

impl Backend for CpalBackend {
    fn setup(&mut self, host: &HostSystem) -> EngineResult<()> {
        let block_size = host.block_size();
        let (producer, consumer) = rtrb::RingBuffer::<f32>::new(block_size * 2 * RING_BLOCKS);

        let (result_tx, result_rx) = mpsc::channel::<Result<u32, String>>();
        let stop = Arc::clone(&self.stream_stop);
        let failed = Arc::clone(&self.stream_failed);

        let thread = std::thread::Builder::new()
            .name("cpal-stream".to_owned())
            .spawn(move || stream_thread_main(consumer, result_tx, stop, failed))
            .map_err(|e| EngineError::Device(e.to_string()))?;

        match result_rx.recv_timeout(Duration::from_secs(10)) {
            Ok(Ok(rate)) => {
                self.device_sample_rate = rate;
                if rate != host.sample_rate() {
                    log::warn!(
                        "device runs at {rate} Hz, engine at {} Hz; output will be repitched",
                        host.sample_rate()
                    );
                }
            }
            Ok(Err(msg)) => {
                let _ = thread.join();
                return Err(EngineError::Device(msg));
            }
            Err(_) => {
                self.stream_stop.store(true, Ordering::Release);
                return Err(EngineError::Device("stream thread did not report".into()));
            }
        }

        self.producer = Some(producer);
        self.stream_thread = Some(thread);
        self.staged_left = vec![0.0; block_size];
        self.staged_right = vec![0.0; block_size];
        log::info!("cpal backend ready ({} frames/block)", block_size);
        Ok(())
    }

    fn cleanup(&mut self) {
        self.stream_stop.store(true, Ordering::Release);
        if let Some(thread) = self.stream_thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
        self.producer = None;
    }

    fn begin_block(&mut self, ctxt: &mut BlockContext) -> EngineResult<()> {
        let needed = ctxt.block_size * 2;
        if let Some(producer) = &self.producer {
            // pace against the device: wait for one block of ring space
            while producer.slots() < needed {
                if self.stopped() || self.stream_failed.load(Ordering::Acquire) {
                    break;
                }
                std::thread::sleep(Duration::from_micros(500));
            }
        }
        if self.stream_failed.load(Ordering::Acquire) {
            self.shared.stop.store(true, Ordering::Release);
        }

        self.shared.drain_into(ctxt);
        self.staged_left.fill(0.0);
        self.staged_right.fill(0.0);
        self.left_filled = false;
        self.right_filled = false;
        Ok(())
    }

    fn end_block(&mut self, ctxt: &mut BlockContext) -> EngineResult<()> {
        if let Some(producer) = &mut self.producer {
            for i in 0..ctxt.block_size {
                // begin_block reserved the space; a full ring here means the
                // device died mid-block, which stop() picks up next block
                let _ = producer.push(self.staged_left[i]);
                let _ = producer.push(self.staged_right[i]);
            }
        }
        Ok(())
    }

    fn output(&mut self, _ctxt: &BlockContext, channel: &str, buf: &Buffer) -> EngineResult<()> {
        let samples = buf
            .as_samples()
            .ok_or(EngineError::BufferTypeMismatch { index: 0 })?;
        match channel {
            "left" => {
                let n = samples.len().min(self.staged_left.len());
                self.staged_left[..n].copy_from_slice(&samples[..n]);
                self.left_filled = true;
            }
            "right" => {
                let n = samples.len().min(self.staged_right.len());
                self.staged_right[..n].copy_from_slice(&samples[..n]);
                self.right_filled = true;
            }
            other => {
                if !self.warned_channels.contains(other) {
                    log::warn!("dropping output for unknown channel {other:?}");
                    self.warned_channels.insert(other.to_owned());
                }
            }
        }
        Ok(())
    }

    fn shared(&self) -> &Arc<BackendShared> {
        &self.shared
    }

    fn release(&mut self) {
        self.cleanup();
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Owns the cpal stream for its whole life.
///
/// Reports the negotiated sample rate (or the open error) through
/// `result_tx`, then parks until asked to stop.
fn stream_thread_main(
    mut consumer: rtrb::Consumer<f32>,
    result_tx: mpsc::Sender<Result<u32, String>>,
    stop: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
) {
    let host = cpal::default_host();
    let device = match host.default_output_device() {
        Some(d) => d,
        None => {
            let _ = result_tx.send(Err("no default output device".into()));
            return;
        }
    };
    let device_name = device.name().unwrap_or_else(|_| "unknown".into());

    let supported = match device.default_output_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = result_tx.send(Err(format!("{device_name}: {e}")));
            return;
        }
    };
    if supported.sample_format() != cpal::SampleFormat::F32 {
        let _ = result_tx.send(Err(format!(
            "{device_name}: unsupported sample format {:?}",
            supported.sample_format()
        )));
        return;
    }
    let config: cpal::StreamConfig = supported.config();
    let out_channels = config.channels as usize;
    let sample_rate = config.sample_rate.0;

    let err_failed = Arc::clone(&failed);
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(out_channels) {
                let left = consumer.pop().unwrap_or(0.0);
                let right = consumer.pop().unwrap_or(left);
                for (i, out) in frame.iter_mut().enumerate() {
                    *out = if i % 2 == 0 { left } else { right };
                }
            }
        },
        move |e| {
            log::error!("cpal stream error: {e}");
            err_failed.store(true, Ordering::Release);
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = result_tx.send(Err(format!("{device_name}: {e}")));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = result_tx.send(Err(format!("{device_name}: {e}")));
        return;
    }

    log::info!("audio device open: {device_name} @ {sample_rate} Hz");
    let _ = result_tx.send(Ok(sample_rate));

    while !stop.load(Ordering::Acquire) {
        std::thread::park_timeout(Duration::from_millis(200));
    }
    drop(stream);
}
