//! Null backend
//!
//! Runs streams through the full callback chain and discards the result.
//! Without `realtime` the sources are consumed as fast as possible, which is
//! what loudness measurements want.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::atomic::AtomicCell;

use super::decode::{DecodeWorker, PcmSink};
use super::registry::{StreamHandle, StreamRegistry, StreamShared};
use super::source::{SourceResolver, StreamFormat};
use super::stream::{BackendStream, StreamCallback, StreamCore, StreamEngine, Userdata};
use super::{check_transition, Backend, BackendId, DeviceState, DeviceStateCell};
use crate::config::BackendConfig;
use crate::constants::MAX_CHANNELS;
use crate::error::BackendError;

pub struct NullBackend {
    resolver: Arc<dyn SourceResolver>,
    registry: StreamRegistry,
    state: DeviceStateCell,
    paused: Arc<AtomicBool>,
    volume: AtomicCell<f32>,
    format: StreamFormat,
    realtime: bool,
}

impl NullBackend {
    pub fn new(config: &BackendConfig, resolver: Arc<dyn SourceResolver>) -> Self {
        Self {
            resolver,
            registry: StreamRegistry::new(),
            state: DeviceStateCell::new(),
            paused: Arc::new(AtomicBool::new(false)),
            volume: AtomicCell::new(1.0),
            format: StreamFormat::new(config.sample_rate, config.channels),
            realtime: config.realtime,
        }
    }

    /// Last gain set while the device was open
    pub fn device_vol(&self) -> f32 {
        self.volume.load()
    }

    fn start_engine(
        &self,
        core: &StreamCore,
        locator: &str,
        seek_ms: i64,
    ) -> Result<Box<dyn StreamEngine>, BackendError> {
        let mut source = self.resolver.open(locator, self.format)?;
        let format = source.format();
        if format.sample_rate == 0 || format.channels == 0 || format.channels as usize > MAX_CHANNELS {
            return Err(BackendError::UnsupportedFormat(format!("{:?}", format)));
        }

        let seek_ms = seek_ms.max(0);
        if seek_ms > 0 {
            source.seek(seek_ms)?;
        }

        core.set_total_ms(source.duration_ms().unwrap_or(-1));
        core.dispatcher().lock().set_format(format.sample_rate, format.channels);

        let sink = NullSink {
            shared: core.shared().clone(),
            format,
            paused: self.paused.clone(),
            realtime: self.realtime,
            base_ms: seek_ms,
            frames: 0,
            started: Instant::now(),
        };

        let worker = DecodeWorker::spawn(
            format!("null-{}", core.id()),
            source,
            core.dispatcher(),
            core.shared().clone(),
            Box::new(sink),
        )?;
        Ok(Box::new(worker))
    }
}

impl Backend for NullBackend {
    fn id(&self) -> BackendId {
        BackendId::Null
    }

    fn create_stream(
        &self,
        locator: &str,
        seek_ms: i64,
        callback: StreamCallback,
        userdata: Option<Userdata>,
    ) -> Result<BackendStream, BackendError> {
        let core = StreamCore::new(BackendId::Null, &self.registry, locator, callback, userdata);

        let engine = match self.start_engine(&core, locator, seek_ms) {
            Ok(engine) => engine,
            Err(e) => {
                tracing::warn!("Cannot create stream for {}: {}", locator, e);
                return Err(e);
            }
        };

        if self.state.get() == DeviceState::Closed {
            self.paused.store(false, Ordering::SeqCst);
            self.state.set(DeviceState::Playing);
            tracing::info!("Null device opened");
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

        self.paused.store(state == DeviceState::Paused, Ordering::SeqCst);
        self.state.set(state);
        if state == DeviceState::Closed {
            tracing::info!("Null device closed");
        }
        Ok(())
    }

    fn set_device_vol(&self, gain: f32) {
        if self.state.get() != DeviceState::Closed {
            self.volume.store(gain);
        }
    }

    fn all_streams(&self) -> Vec<StreamHandle> {
        self.registry.snapshot()
    }
}

/// Counts played frames and optionally paces them
struct NullSink {
    shared: Arc<StreamShared>,
    format: StreamFormat,
    paused: Arc<AtomicBool>,
    realtime: bool,
    base_ms: i64,
    frames: u64,
    started: Instant,
}

impl PcmSink for NullSink {
    fn write(&mut self, data: &[f32], running: &AtomicBool) -> bool {
        while self.paused.load(Ordering::Relaxed) {
            if !running.load(Ordering::Relaxed) {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }

        self.frames += (data.len() / self.format.channels as usize) as u64;
        let played_ms = self.format.frames_to_ms(self.frames);
        self.shared.set_elapsed(self.base_ms + played_ms);

        if self.realtime {
            let due = self.started + Duration::from_millis(played_ms as u64);
            let now = Instant::now();
            if due > now {
                thread::sleep(due - now);
            }
        }

        running.load(Ordering::Relaxed)
    }

    fn drain(&mut self, _running: &AtomicBool) {}

    fn seek(&mut self, ms: i64) {
        self.base_ms = ms;
        self.frames = 0;
        self.started = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::source::SignalResolver;
    use crate::backend::stream::{BackendMsg, CallbackParam, MessageKind};
    use parking_lot::Mutex;

    fn backend() -> NullBackend {
        NullBackend::new(&BackendConfig::null(), Arc::new(SignalResolver::new()))
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_stream_runs_to_end() {
        let backend = backend();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();

        let stream = backend
            .create_stream(
                "tone:440:200",
                0,
                Box::new(move |param: &mut CallbackParam<'_>| {
                    let len = match &param.msg {
                        BackendMsg::Dsp { buffer } => buffer.len(),
                        _ => 0,
                    };
                    sink.lock().push((param.msg.kind(), len));
                }),
                None,
            )
            .unwrap();

        assert_eq!(backend.device_state(), DeviceState::Playing);
        assert!(wait_for(|| stream.has_ended()));

        let log = log.lock();
        assert_eq!(log.first().map(|e| e.0), Some(MessageKind::Create));
        assert_eq!(log.last().map(|e| e.0), Some(MessageKind::EndOfStream));

        // 200 ms of 44.1 kHz stereo
        let total: usize = log.iter().map(|e| e.1).sum();
        assert_eq!(total, 8820 * 2);
        assert_eq!(stream.time(), (200, 200));
    }

    #[test]
    fn test_failed_creation_leaves_state() {
        let backend = backend();
        let result = backend.create_stream("bogus:1", 0, Box::new(|_: &mut CallbackParam<'_>| {}), None);
        assert!(result.is_err());
        assert_eq!(backend.device_state(), DeviceState::Closed);
        assert!(backend.all_streams().is_empty());
    }

    #[test]
    fn test_pause_and_volume() {
        let backend = backend();
        backend.set_device_vol(0.5);
        assert_eq!(backend.device_vol(), 1.0);

        let stream = backend
            .create_stream("silence:100000", 0, Box::new(|_: &mut CallbackParam<'_>| {}), None)
            .unwrap();
        backend.set_device_vol(0.5);
        assert_eq!(backend.device_vol(), 0.5);

        backend.set_device_state(DeviceState::Paused).unwrap();
        assert_eq!(backend.device_state(), DeviceState::Paused);
        assert!(matches!(
            backend.set_device_state(DeviceState::Closed),
            Err(BackendError::StreamsActive(1))
        ));

        drop(stream);
        backend.set_device_state(DeviceState::Closed).unwrap();
        assert_eq!(backend.device_state(), DeviceState::Closed);
    }
}
