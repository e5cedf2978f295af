//! Registry of live streams per backend

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::stream::StreamId;
use super::BackendId;

/// State of one stream, shared between its handle, its decode worker and
/// the UI
#[derive(Debug)]
pub(crate) struct StreamShared {
    pub(crate) id: StreamId,
    pub(crate) backend: BackendId,
    pub(crate) locator: String,
    pub(crate) total_ms: AtomicI64,
    pub(crate) elapsed_ms: AtomicI64,
    /// Pending seek position, -1 if none
    pub(crate) seek_to: AtomicI64,
    pub(crate) ended: AtomicBool,
}

impl StreamShared {
    pub(crate) fn new(id: StreamId, backend: BackendId, locator: &str) -> Self {
        Self {
            id,
            backend,
            locator: locator.to_string(),
            total_ms: AtomicI64::new(-1),
            elapsed_ms: AtomicI64::new(-1),
            seek_to: AtomicI64::new(-1),
            ended: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_elapsed(&self, ms: i64) {
        self.elapsed_ms.store(ms, Ordering::Relaxed);
    }

    pub(crate) fn take_seek(&self) -> Option<i64> {
        let ms = self.seek_to.swap(-1, Ordering::AcqRel);
        (ms >= 0).then_some(ms)
    }
}

/// Cheap, clonable view of a live stream
#[derive(Debug, Clone)]
pub struct StreamHandle(pub(crate) Arc<StreamShared>);

impl StreamHandle {
    pub fn id(&self) -> StreamId {
        self.0.id
    }

    pub fn backend_id(&self) -> BackendId {
        self.0.backend
    }

    pub fn locator(&self) -> &str {
        &self.0.locator
    }

    /// `(total_ms, elapsed_ms)`; -1 means unknown
    pub fn time(&self) -> (i64, i64) {
        (
            self.0.total_ms.load(Ordering::Relaxed),
            self.0.elapsed_ms.load(Ordering::Relaxed),
        )
    }

    /// True once the end of the stream was reached and signalled
    pub fn has_ended(&self) -> bool {
        self.0.ended.load(Ordering::Acquire)
    }
}

/// Unordered set of live streams.
///
/// Registration and removal are symmetric; removing an unknown id is not an
/// error.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<DashMap<StreamId, StreamHandle>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: StreamHandle) {
        self.streams.insert(handle.id(), handle);
    }

    /// Returns `false` if the stream was not registered
    pub fn unregister(&self, id: StreamId) -> bool {
        self.streams.remove(&id).is_some()
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.streams.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn snapshot(&self) -> Vec<StreamHandle> {
        self.streams.iter().map(|entry| entry.value().clone()).collect()
    }
}
