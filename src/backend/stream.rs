//! Streams and the callback protocol

use std::any::Any;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::registry::{StreamHandle, StreamRegistry, StreamShared};
use super::BackendId;
use crate::constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};

/// Unique stream identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-stream context owned by the receiver of the callbacks
pub type Userdata = Box<dyn Any + Send>;

/// Messages delivered to a stream callback
#[derive(Debug)]
pub enum BackendMsg<'a> {
    /// Sent once before anything else; the format fields may still be defaults
    Create,
    /// The stream carries video; sent at most once
    VideoDetected,
    /// Interleaved samples ready for processing in place
    Dsp { buffer: &'a mut [f32] },
    /// Playback reached the end; nothing follows except `DestroyUserdata`
    EndOfStream,
    /// The stream is being destroyed; release the userdata
    DestroyUserdata,
}

impl BackendMsg<'_> {
    pub fn kind(&self) -> MessageKind {
        match self {
            BackendMsg::Create => MessageKind::Create,
            BackendMsg::VideoDetected => MessageKind::VideoDetected,
            BackendMsg::Dsp { .. } => MessageKind::Dsp,
            BackendMsg::EndOfStream => MessageKind::EndOfStream,
            BackendMsg::DestroyUserdata => MessageKind::DestroyUserdata,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Create,
    VideoDetected,
    Dsp,
    EndOfStream,
    DestroyUserdata,
}

/// Everything a callback gets to see for one message
pub struct CallbackParam<'a> {
    pub msg: BackendMsg<'a>,
    pub sample_rate: u32,
    pub channels: u16,
    /// When the stream was created
    pub starting_time: DateTime<Utc>,
    pub backend: BackendId,
    pub stream: StreamId,
    pub userdata: Option<&'a mut Userdata>,
}

/// The single callback of a stream
pub type StreamCallback = Box<dyn FnMut(&mut CallbackParam<'_>) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    New,
    Created,
    Ended,
    Destroyed,
}

/// Enforces the message order of one stream
#[derive(Debug)]
pub struct MessageGate {
    state: GateState,
    video_sent: bool,
    violations: u32,
}

impl MessageGate {
    pub fn new() -> Self {
        Self {
            state: GateState::New,
            video_sent: false,
            violations: 0,
        }
    }

    /// Check and record `kind`; returns `false` if it must not be delivered
    pub fn admit(&mut self, kind: MessageKind) -> bool {
        let allowed = match (kind, self.state) {
            (MessageKind::Create, GateState::New) => {
                self.state = GateState::Created;
                true
            }
            (MessageKind::VideoDetected, GateState::Created) if !self.video_sent => {
                self.video_sent = true;
                true
            }
            (MessageKind::Dsp, GateState::Created) => true,
            (MessageKind::EndOfStream, GateState::Created) => {
                self.state = GateState::Ended;
                true
            }
            (MessageKind::DestroyUserdata, state) if state != GateState::Destroyed => {
                self.state = GateState::Destroyed;
                true
            }
            _ => false,
        };

        if !allowed {
            self.violations += 1;
        }
        allowed
    }

    /// Number of rejected messages
    pub fn violations(&self) -> u32 {
        self.violations
    }

    pub fn has_ended(&self) -> bool {
        matches!(self.state, GateState::Ended | GateState::Destroyed)
    }
}

impl Default for MessageGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Delivers messages of one stream to its callback
pub struct Dispatcher {
    callback: StreamCallback,
    userdata: Option<Userdata>,
    gate: MessageGate,
    backend: BackendId,
    stream: StreamId,
    starting_time: DateTime<Utc>,
    sample_rate: u32,
    channels: u16,
    last_message: Option<MessageKind>,
}

impl Dispatcher {
    pub fn new(
        backend: BackendId,
        stream: StreamId,
        callback: StreamCallback,
        userdata: Option<Userdata>,
    ) -> Self {
        Self {
            callback,
            userdata,
            gate: MessageGate::new(),
            backend,
            stream,
            starting_time: Utc::now(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            last_message: None,
        }
    }

    /// Format reported with every following message
    pub fn set_format(&mut self, sample_rate: u32, channels: u16) {
        self.sample_rate = sample_rate;
        self.channels = channels;
    }

    /// Deliver a message from an engine.
    ///
    /// Out-of-order messages are dropped and logged. `DestroyUserdata` is
    /// reserved for stream teardown and always rejected here.
    pub fn send(&mut self, msg: BackendMsg<'_>) -> bool {
        let kind = msg.kind();
        if kind == MessageKind::DestroyUserdata || !self.gate.admit(kind) {
            if kind == MessageKind::DestroyUserdata {
                self.gate.violations += 1;
            }
            tracing::warn!(
                "Stream {} on {}: rejected {:?} after {:?}",
                self.stream,
                self.backend,
                kind,
                self.last_message
            );
            return false;
        }

        self.deliver(msg);
        true
    }

    /// Send `DestroyUserdata` once and release the userdata
    pub(crate) fn destroy_userdata(&mut self) {
        if !self.gate.admit(MessageKind::DestroyUserdata) {
            return;
        }
        self.deliver(BackendMsg::DestroyUserdata);
        self.userdata = None;
    }

    fn deliver(&mut self, msg: BackendMsg<'_>) {
        self.last_message = Some(msg.kind());
        let mut param = CallbackParam {
            msg,
            sample_rate: self.sample_rate,
            channels: self.channels,
            starting_time: self.starting_time,
            backend: self.backend,
            stream: self.stream,
            userdata: self.userdata.as_mut(),
        };
        (self.callback)(&mut param);
    }

    pub fn last_message(&self) -> Option<MessageKind> {
        self.last_message
    }

    pub fn violations(&self) -> u32 {
        self.gate.violations()
    }

    pub fn has_ended(&self) -> bool {
        self.gate.has_ended()
    }
}

/// Base machinery every concrete stream is built on.
///
/// Creating a core registers the stream and sends `Create`; dropping it
/// unregisters (again, if needed) and sends `DestroyUserdata`.
pub struct StreamCore {
    shared: Arc<StreamShared>,
    registry: StreamRegistry,
    dispatcher: Arc<Mutex<Dispatcher>>,
}

impl StreamCore {
    pub fn new(
        backend: BackendId,
        registry: &StreamRegistry,
        locator: &str,
        callback: StreamCallback,
        userdata: Option<Userdata>,
    ) -> Self {
        let id = StreamId::new();
        let shared = Arc::new(StreamShared::new(id, backend, locator));
        registry.register(StreamHandle(shared.clone()));

        let mut dispatcher = Dispatcher::new(backend, id, callback, userdata);
        dispatcher.send(BackendMsg::Create);

        tracing::debug!("Stream {} registered on {} for {}", id, backend, locator);

        Self {
            shared,
            registry: registry.clone(),
            dispatcher: Arc::new(Mutex::new(dispatcher)),
        }
    }

    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle(self.shared.clone())
    }

    pub(crate) fn shared(&self) -> &Arc<StreamShared> {
        &self.shared
    }

    /// Dispatcher for the engine's producer thread
    pub fn dispatcher(&self) -> Arc<Mutex<Dispatcher>> {
        self.dispatcher.clone()
    }

    pub fn set_total_ms(&self, ms: i64) {
        self.shared.total_ms.store(ms, Ordering::Relaxed);
    }

    pub fn unregister(&self) {
        if self.registry.unregister(self.shared.id) {
            tracing::debug!("Stream {} unregistered", self.shared.id);
        }
    }
}

impl Drop for StreamCore {
    fn drop(&mut self) {
        self.unregister();
        self.dispatcher.lock().destroy_userdata();
    }
}

/// Engine-specific part of a stream
pub trait StreamEngine: Send {
    /// Stop producing; no callback may fire after this returns
    fn shutdown(&mut self);
}

/// A stream playing on a backend.
///
/// Dropping the stream (or calling [`BackendStream::destroy`]) unregisters
/// it, shuts the engine down and finally sends `DestroyUserdata`.
pub struct BackendStream {
    engine: Option<Box<dyn StreamEngine>>,
    core: StreamCore,
}

impl BackendStream {
    pub fn new(core: StreamCore, engine: Box<dyn StreamEngine>) -> Self {
        Self {
            engine: Some(engine),
            core,
        }
    }

    pub fn id(&self) -> StreamId {
        self.core.id()
    }

    pub fn backend_id(&self) -> BackendId {
        self.core.shared.backend
    }

    pub fn locator(&self) -> &str {
        &self.core.shared.locator
    }

    pub fn handle(&self) -> StreamHandle {
        self.core.handle()
    }

    /// `(total_ms, elapsed_ms)`; -1 means unknown
    pub fn time(&self) -> (i64, i64) {
        self.handle().time()
    }

    /// Request a seek; the engine applies it before its next buffer
    pub fn seek_abs(&self, ms: i64) {
        self.core.shared.seek_to.store(ms.max(0), Ordering::Release);
    }

    pub fn has_ended(&self) -> bool {
        self.core.shared.ended.load(Ordering::Acquire)
    }

    /// Rejected out-of-order messages so far
    pub fn contract_violations(&self) -> u32 {
        self.core.dispatcher.lock().violations()
    }

    pub fn destroy(self) {}
}

impl Drop for BackendStream {
    fn drop(&mut self) {
        self.core.unregister();
        if let Some(mut engine) = self.engine.take() {
            engine.shutdown();
        }
        tracing::debug!("Stream {} destroyed", self.core.id());
    }
}

impl fmt::Debug for BackendStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendStream")
            .field("id", &self.id())
            .field("backend", &self.backend_id())
            .field("locator", &self.locator())
            .finish()
    }
}
