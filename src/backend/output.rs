//! cpal output backend
//!
//! Used for both the main output and the pre-listen device. The device
//! thread owns the cpal stream and mixes the ring buffers of all streams in
//! its callback; each stream's decode thread fills its own ring buffer.
//!
//! ```text
//!  decode thread ─► Dsp callback ─► OutputSink ─► RingBuffer ─┐
//!  decode thread ─► Dsp callback ─► OutputSink ─► RingBuffer ─┼─► Mixer ─► cpal
//!                                                             ┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam::atomic::AtomicCell;
use crossbeam_channel::{bounded, Receiver};
use parking_lot::Mutex;

use super::decode::{DecodeWorker, PcmSink};
use super::device::find_output_device;
use super::registry::{StreamHandle, StreamRegistry, StreamShared};
use super::source::{SourceResolver, StreamFormat};
use super::stream::{BackendStream, StreamCallback, StreamCore, StreamEngine, StreamId, Userdata};
use super::{check_transition, Backend, BackendId, DeviceState, DeviceStateCell};
use crate::audio::buffer::{create_shared_buffer, SharedRingBuffer};
use crate::audio::wave::{apply_volume, mixdown_channels};
use crate::config::BackendConfig;
use crate::constants::{MAX_CHANNELS, MIN_OUTPUT_BUFFER_FRAMES};
use crate::error::BackendError;

const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Ring buffer of one stream as seen by the mixer
struct MixInput {
    id: StreamId,
    buffer: SharedRingBuffer,
    shared: Arc<StreamShared>,
    subsamples_per_sec: u64,
    /// Subsamples played since `base_ms`
    consumed: AtomicU64,
    base_ms: AtomicI64,
}

impl MixInput {
    /// Add up to `out.len()` buffered subsamples to `out`
    fn mix_into(&self, out: &mut [f32], scratch: &mut [f32]) {
        let Some(mut buffer) = self.buffer.try_lock() else {
            return;
        };

        let bytes: &mut [u8] = bytemuck::cast_slice_mut(scratch);
        buffer.peek_from_beg(bytes, 0);
        let removed = (buffer.remove_from_beg(bytes.len()) / SAMPLE_BYTES) as u64;
        let consumed = self.consumed.fetch_add(removed, Ordering::Relaxed) + removed;
        let base_ms = self.base_ms.load(Ordering::Relaxed);
        drop(buffer);

        for (o, s) in out.iter_mut().zip(scratch.iter()) {
            *o += *s;
        }

        if removed > 0 && self.subsamples_per_sec > 0 {
            self.shared
                .set_elapsed(base_ms + (consumed * 1000 / self.subsamples_per_sec) as i64);
        }
    }
}

/// State shared with the device callback
struct Mixer {
    inputs: Mutex<Vec<Arc<MixInput>>>,
    volume: AtomicCell<f32>,
    paused: AtomicBool,
}

impl Mixer {
    fn new() -> Self {
        Self {
            inputs: Mutex::new(Vec::new()),
            volume: AtomicCell::new(1.0),
            paused: AtomicBool::new(false),
        }
    }

    /// Device callback body; `scratch` grows to the largest device buffer
    fn render(&self, data: &mut [f32], scratch: &mut Vec<f32>) {
        data.fill(0.0);
        if self.paused.load(Ordering::Relaxed) {
            return;
        }

        if scratch.len() < data.len() {
            scratch.resize(data.len(), 0.0);
        }
        let scratch = &mut scratch[..data.len()];

        // adding or removing a stream holds the lock only briefly; skip one buffer then
        if let Some(inputs) = self.inputs.try_lock() {
            for input in inputs.iter() {
                input.mix_into(data, scratch);
            }
        }

        let gain = self.volume.load();
        if gain != 1.0 {
            apply_volume(data, gain);
        }
    }

    fn remove(&self, id: StreamId) {
        self.inputs.lock().retain(|input| input.id != id);
    }
}

/// Thread owning the cpal output stream
struct DeviceThread {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    format: StreamFormat,
    error_rx: Receiver<BackendError>,
}

impl DeviceThread {
    fn open(
        backend: BackendId,
        device_name: Option<String>,
        mixer: Arc<Mixer>,
    ) -> Result<Self, BackendError> {
        let (ready_tx, ready_rx) = bounded::<Result<StreamFormat, BackendError>>(1);
        let (error_tx, error_rx) = bounded::<BackendError>(16);
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name(format!("{}-device", backend))
            .spawn(move || {
                let device = match find_output_device(device_name.as_deref()) {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let config = match device.default_output_config() {
                    Ok(config) => config.config(),
                    Err(e) => {
                        let _ = ready_tx.send(Err(BackendError::DeviceOpen(e.to_string())));
                        return;
                    }
                };
                let format = StreamFormat::new(config.sample_rate.0, config.channels);

                let mut scratch = Vec::new();
                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        mixer.render(data, &mut scratch);
                    },
                    move |err| {
                        let _ = error_tx.try_send(BackendError::DeviceOpen(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(BackendError::DeviceOpen(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(BackendError::DeviceOpen(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(format));

                // keep the stream alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| BackendError::Thread(e.to_string()))?;

        let mut device = Self {
            running,
            thread_handle: Some(handle),
            format: StreamFormat::new(0, 0),
            error_rx,
        };

        match ready_rx.recv() {
            Ok(Ok(format)) => {
                device.format = format;
                Ok(device)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BackendError::Thread("device thread exited".to_string())),
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Backend playing on a cpal output device
pub struct OutputBackend {
    id: BackendId,
    device_name: Option<String>,
    buffer_ms: u32,
    resolver: Arc<dyn SourceResolver>,
    registry: StreamRegistry,
    state: DeviceStateCell,
    mixer: Arc<Mixer>,
    device: Mutex<Option<DeviceThread>>,
}

impl OutputBackend {
    pub fn new(id: BackendId, config: &BackendConfig, resolver: Arc<dyn SourceResolver>) -> Self {
        Self {
            id,
            device_name: config.device.clone(),
            buffer_ms: config.buffer_ms,
            resolver,
            registry: StreamRegistry::new(),
            state: DeviceStateCell::new(),
            mixer: Arc::new(Mixer::new()),
            device: Mutex::new(None),
        }
    }

    /// Format of the open device
    pub fn device_format(&self) -> Option<StreamFormat> {
        self.device.lock().as_ref().map(|device| device.format)
    }

    /// Next error reported by the device, if any
    pub fn check_errors(&self) -> Option<BackendError> {
        self.device
            .lock()
            .as_ref()
            .and_then(|device| device.error_rx.try_recv().ok())
    }

    fn open_device(&self) -> Result<StreamFormat, BackendError> {
        let mut device = self.device.lock();
        if let Some(device) = device.as_ref() {
            return Ok(device.format);
        }

        let opened = DeviceThread::open(self.id, self.device_name.clone(), self.mixer.clone())?;
        let format = opened.format;
        *device = Some(opened);

        tracing::info!(
            "Opened {} device {} ({} Hz, {} channels)",
            self.id,
            self.device_name.as_deref().unwrap_or("default"),
            format.sample_rate,
            format.channels
        );
        Ok(format)
    }

    fn close_device(&self) {
        if let Some(mut device) = self.device.lock().take() {
            device.stop();
            tracing::info!("Closed {} device", self.id);
        }
    }

    fn start_engine(
        &self,
        core: &StreamCore,
        locator: &str,
        seek_ms: i64,
    ) -> Result<Box<dyn StreamEngine>, BackendError> {
        let device_format = self.open_device()?;

        let mut source = self.resolver.open(locator, device_format)?;
        let format = source.format();
        if format.sample_rate != device_format.sample_rate
            || format.channels == 0
            || format.channels as usize > MAX_CHANNELS
        {
            return Err(BackendError::UnsupportedFormat(format!(
                "{:?} on a {} Hz device",
                format, device_format.sample_rate
            )));
        }

        let seek_ms = seek_ms.max(0);
        if seek_ms > 0 {
            source.seek(seek_ms)?;
        }

        core.set_total_ms(source.duration_ms().unwrap_or(-1));
        core.dispatcher().lock().set_format(format.sample_rate, format.channels);

        let frame_bytes = device_format.channels as usize * SAMPLE_BYTES;
        let frames = (device_format.ms_to_frames(i64::from(self.buffer_ms)) as usize)
            .max(MIN_OUTPUT_BUFFER_FRAMES);
        let buffer = create_shared_buffer(frames * frame_bytes)?;

        let input = Arc::new(MixInput {
            id: core.id(),
            buffer,
            shared: core.shared().clone(),
            subsamples_per_sec: device_format.subsamples_per_sec(),
            consumed: AtomicU64::new(0),
            base_ms: AtomicI64::new(seek_ms),
        });
        self.mixer.inputs.lock().push(input.clone());

        let sink = OutputSink {
            input,
            src_channels: format.channels as usize,
            dst_channels: device_format.channels as usize,
            frame_bytes,
            convert: Vec::new(),
        };

        let worker = DecodeWorker::spawn(
            format!("{}-{}", self.id, core.id()),
            source,
            core.dispatcher(),
            core.shared().clone(),
            Box::new(sink),
        );
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                self.mixer.remove(core.id());
                return Err(e);
            }
        };

        Ok(Box::new(OutputEngine {
            id: core.id(),
            worker,
            mixer: self.mixer.clone(),
        }))
    }
}

impl Backend for OutputBackend {
    fn id(&self) -> BackendId {
        self.id
    }

    fn create_stream(
        &self,
        locator: &str,
        seek_ms: i64,
        callback: StreamCallback,
        userdata: Option<Userdata>,
    ) -> Result<BackendStream, BackendError> {
        let core = StreamCore::new(self.id, &self.registry, locator, callback, userdata);

        let engine = match self.start_engine(&core, locator, seek_ms) {
            Ok(engine) => engine,
            Err(e) => {
                tracing::warn!("Cannot create stream for {}: {}", locator, e);
                drop(core);
                // the device was only opened for this stream
                if self.state.get() == DeviceState::Closed && self.registry.is_empty() {
                    self.close_device();
                }
                return Err(e);
            }
        };

        if self.state.get() == DeviceState::Closed {
            self.mixer.paused.store(false, Ordering::SeqCst);
            self.state.set(DeviceState::Playing);
        }

        Ok(BackendStream::new(core, engine))
    }

    fn device_state(&self) -> DeviceState {
        self.state.get()
    }

    fn set_device_state(&self, state: DeviceState) -> Result<(), BackendError> {
        if !check_transition(self.state.get(), state, self.registry.len())? {
            return Ok(());
        }

        match state {
            DeviceState::Closed => self.close_device(),
            DeviceState::Paused => self.mixer.paused.store(true, Ordering::SeqCst),
            DeviceState::Playing => self.mixer.paused.store(false, Ordering::SeqCst),
        }
        self.state.set(state);
        Ok(())
    }

    fn set_device_vol(&self, gain: f32) {
        if self.state.get() != DeviceState::Closed {
            self.mixer.volume.store(gain);
        }
    }

    fn all_streams(&self) -> Vec<StreamHandle> {
        self.registry.snapshot()
    }
}

impl Drop for OutputBackend {
    fn drop(&mut self) {
        self.close_device();
    }
}

struct OutputEngine {
    id: StreamId,
    worker: DecodeWorker,
    mixer: Arc<Mixer>,
}

impl StreamEngine for OutputEngine {
    fn shutdown(&mut self) {
        self.worker.stop();
        self.mixer.remove(self.id);
    }
}

/// Writes processed audio into the stream's ring buffer
struct OutputSink {
    input: Arc<MixInput>,
    src_channels: usize,
    dst_channels: usize,
    frame_bytes: usize,
    convert: Vec<f32>,
}

/// Map interleaved `src` channels onto `dst` channels into `out`
fn convert_channels(data: &[f32], src: usize, dst: usize, out: &mut Vec<f32>) {
    out.clear();
    if dst < src {
        out.extend_from_slice(data);
        let len = mixdown_channels(out, src, dst);
        out.truncate(len);
    } else {
        for frame in data.chunks_exact(src) {
            out.extend((0..dst).map(|d| frame[d % src]));
        }
    }
}

impl PcmSink for OutputSink {
    fn write(&mut self, data: &[f32], running: &AtomicBool) -> bool {
        let samples: &[f32] = if self.src_channels == self.dst_channels {
            data
        } else {
            convert_channels(data, self.src_channels, self.dst_channels, &mut self.convert);
            &self.convert
        };

        let mut bytes: &[u8] = bytemuck::cast_slice(samples);
        while !bytes.is_empty() {
            if !running.load(Ordering::Relaxed) {
                return false;
            }

            let pushed = {
                let mut buffer = self.input.buffer.lock();
                let room = buffer.free_bytes().min(bytes.len()) / self.frame_bytes * self.frame_bytes;
                buffer.push_to_end(&bytes[..room])
            };
            bytes = &bytes[pushed..];

            if !bytes.is_empty() {
                thread::sleep(Duration::from_millis(5));
            }
        }
        true
    }

    fn drain(&mut self, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) && self.input.buffer.lock().valid_bytes() > 0 {
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn seek(&mut self, ms: i64) {
        let mut buffer = self.input.buffer.lock();
        buffer.empty();
        self.input.consumed.store(0, Ordering::Relaxed);
        self.input.base_ms.store(ms, Ordering::Relaxed);
    }
}
