//! Backend abstraction
//!
//! A backend owns one output device (or none, for the null backend) and
//! drives any number of [`BackendStream`]s. Each stream delivers its audio
//! to a single callback through the message protocol in [`stream`]:
//! `Create` first, then `Dsp` buffers, `VideoDetected` at most once,
//! `EndOfStream` once at the natural end and `DestroyUserdata` on teardown.
//!
//! ```text
//!   UI thread                      decode thread (one per stream)
//!   ─────────                      ──────────────────────────────
//!   create_backend()
//!   backend.create_stream() ──►  StreamCore registers, sends Create
//!                                 source.read() ─► Dsp callback ─► sink
//!   set_device_state()            ...
//!   drop(stream)           ──►   unregister, join worker, DestroyUserdata
//! ```

pub mod decode;
#[cfg(feature = "output")]
pub mod device;
pub mod null;
#[cfg(feature = "output")]
pub mod output;
pub mod registry;
pub mod source;
pub mod stream;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;
use crate::error::BackendError;

pub use null::NullBackend;
#[cfg(feature = "output")]
pub use output::OutputBackend;
pub use registry::{StreamHandle, StreamRegistry};
pub use source::{MediaSource, SignalResolver, SourceResolver, StreamFormat};
pub use stream::{
    BackendMsg, BackendStream, CallbackParam, Dispatcher, MessageGate, MessageKind, StreamCallback,
    StreamCore, StreamId, Userdata,
};

/// Identity of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendId {
    /// Main output device
    AudioOut,
    /// Second device for pre-listening
    Prelisten,
    /// Discards all audio; used for measurements
    Null,
}

impl BackendId {
    pub fn name(&self) -> &'static str {
        match self {
            BackendId::AudioOut => "audioout",
            BackendId::Prelisten => "prelisten",
            BackendId::Null => "null",
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output device state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Closed,
    Playing,
    Paused,
}

/// A media engine able to play streams on one device
pub trait Backend: Send + Sync {
    fn id(&self) -> BackendId;

    /// Open `locator` and start delivering its audio to `callback`.
    ///
    /// On success the stream is registered with the backend and a closed
    /// device is opened. On failure the device state is left unchanged.
    fn create_stream(
        &self,
        locator: &str,
        seek_ms: i64,
        callback: StreamCallback,
        userdata: Option<Userdata>,
    ) -> Result<BackendStream, BackendError>;

    fn device_state(&self) -> DeviceState;

    /// Switch between playing and paused, or close the device.
    ///
    /// Setting the current state again is a no-op. Closing while streams are
    /// alive fails with [`BackendError::StreamsActive`]; opening a closed
    /// device is only possible through [`Backend::create_stream`].
    fn set_device_state(&self, state: DeviceState) -> Result<(), BackendError>;

    /// Set the device gain; ignored while the device is closed
    fn set_device_vol(&self, gain: f32);

    /// Snapshot of all live streams
    fn all_streams(&self) -> Vec<StreamHandle>;
}

/// Atomic device state shared by the backend implementations
#[derive(Debug)]
pub struct DeviceStateCell(AtomicU8);

impl DeviceStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn get(&self) -> DeviceState {
        match self.0.load(Ordering::Acquire) {
            1 => DeviceState::Playing,
            2 => DeviceState::Paused,
            _ => DeviceState::Closed,
        }
    }

    pub fn set(&self, state: DeviceState) {
        let raw = match state {
            DeviceState::Closed => 0,
            DeviceState::Playing => 1,
            DeviceState::Paused => 2,
        };
        self.0.store(raw, Ordering::Release);
    }
}

impl Default for DeviceStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a [`Backend::set_device_state`] request.
///
/// Returns `Ok(false)` when the device already is in `to`.
pub fn check_transition(
    from: DeviceState,
    to: DeviceState,
    live_streams: usize,
) -> Result<bool, BackendError> {
    match (from, to) {
        (a, b) if a == b => Ok(false),
        (_, DeviceState::Closed) if live_streams > 0 => {
            Err(BackendError::StreamsActive(live_streams))
        }
        (_, DeviceState::Closed) => Ok(true),
        (DeviceState::Closed, to) => Err(BackendError::InvalidTransition { from, to }),
        _ => Ok(true),
    }
}

/// Create the backend configured for `id`
pub fn create_backend(
    id: BackendId,
    config: &BackendConfig,
    resolver: Arc<dyn SourceResolver>,
) -> Result<Arc<dyn Backend>, BackendError> {
    tracing::info!("Creating {} backend", id);

    match id {
        BackendId::Null => Ok(Arc::new(NullBackend::new(config, resolver))),
        #[cfg(feature = "output")]
        BackendId::AudioOut | BackendId::Prelisten => {
            Ok(Arc::new(OutputBackend::new(id, config, resolver)))
        }
        #[cfg(not(feature = "output"))]
        BackendId::AudioOut | BackendId::Prelisten => Err(BackendError::DeviceNotFound(format!(
            "{} (built without output support)",
            id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names() {
        assert_eq!(BackendId::AudioOut.name(), "audioout");
        assert_eq!(BackendId::Prelisten.to_string(), "prelisten");
        assert_eq!(BackendId::Null.name(), "null");
    }

    #[test]
    fn test_state_cell() {
        let cell = DeviceStateCell::new();
        assert_eq!(cell.get(), DeviceState::Closed);
        cell.set(DeviceState::Paused);
        assert_eq!(cell.get(), DeviceState::Paused);
    }

    #[test]
    fn test_transitions() {
        use DeviceState::*;

        assert!(!check_transition(Playing, Playing, 1).unwrap());
        assert!(check_transition(Playing, Paused, 1).unwrap());
        assert!(check_transition(Paused, Playing, 1).unwrap());
        assert!(check_transition(Paused, Closed, 0).unwrap());
        assert!(matches!(
            check_transition(Playing, Closed, 2),
            Err(BackendError::StreamsActive(2))
        ));
        assert!(matches!(
            check_transition(Closed, Playing, 0),
            Err(BackendError::InvalidTransition { .. })
        ));
        assert!(!check_transition(Closed, Closed, 0).unwrap());
    }
}
