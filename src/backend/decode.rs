//! Decode worker shared by the concrete backends
//!
//! Each stream gets one thread that reads its source, runs the `Dsp`
//! callback on every chunk and hands the result to a [`PcmSink`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::registry::StreamShared;
use super::source::MediaSource;
use super::stream::{BackendMsg, Dispatcher, StreamEngine};
use crate::constants::DECODE_CHUNK_FRAMES;
use crate::error::BackendError;

/// Destination of processed audio
pub trait PcmSink: Send {
    /// Take a processed chunk. May wait while the output has no room;
    /// returns `false` if `running` was cleared meanwhile.
    fn write(&mut self, data: &[f32], running: &AtomicBool) -> bool;

    /// Wait until everything written was played
    fn drain(&mut self, running: &AtomicBool);

    /// Drop buffered audio after a seek to `ms`
    fn seek(&mut self, ms: i64);
}

/// Running decode thread of one stream
pub struct DecodeWorker {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    pub(crate) fn spawn(
        name: String,
        mut source: Box<dyn MediaSource>,
        dispatcher: Arc<Mutex<Dispatcher>>,
        shared: Arc<StreamShared>,
        mut sink: Box<dyn PcmSink>,
    ) -> Result<Self, BackendError> {
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let running = running_for_loop;
                let format = source.format();
                let channels = format.channels as usize;
                let mut buffer = vec![0.0f32; DECODE_CHUNK_FRAMES * channels];

                if source.has_video() {
                    dispatcher.lock().send(BackendMsg::VideoDetected);
                }

                while running.load(Ordering::Relaxed) {
                    if let Some(ms) = shared.take_seek() {
                        match source.seek(ms) {
                            Ok(()) => sink.seek(ms),
                            Err(e) => tracing::warn!("Seek on {} failed: {}", shared.locator, e),
                        }
                    }

                    let len = match source.read(&mut buffer) {
                        Ok(0) => break,
                        Ok(len) => len,
                        Err(e) => {
                            tracing::error!("Reading {} failed: {}", shared.locator, e);
                            break;
                        }
                    };

                    let chunk = &mut buffer[..len];
                    dispatcher.lock().send(BackendMsg::Dsp { buffer: chunk });

                    if !sink.write(chunk, &running) {
                        return;
                    }
                }

                if !running.load(Ordering::Relaxed) {
                    return;
                }

                sink.drain(&running);
                if running.load(Ordering::Relaxed) {
                    dispatcher.lock().send(BackendMsg::EndOfStream);
                    shared.ended.store(true, Ordering::Release);
                    tracing::debug!("Stream {} reached its end", shared.id);
                }
            })
            .map_err(|e| BackendError::Thread(e.to_string()))?;

        Ok(Self {
            running,
            thread_handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the thread and wait for it
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("Decode thread panicked");
            }
        }
    }
}

impl StreamEngine for DecodeWorker {
    fn shutdown(&mut self) {
        self.stop();
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
