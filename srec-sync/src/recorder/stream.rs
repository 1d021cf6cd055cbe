//! Registry of streams that are actively being recorded.
//!
//! A worker registers a [`StreamHandle`] under its stream key once it starts
//! writing. The supervisor may force-close that handle during teardown, so
//! ownership is shared: the worker keeps an `Arc` to the same handle and
//! only unregisters the entry it registered itself.

use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error, info};

use crate::{Error, Result};

/// One closable half of an active stream (its source or its sink).
///
/// `close` must be idempotent.
pub trait StreamResource: Send + Sync {
    fn close(&self) -> io::Result<()>;
}

/// Resource closed by raising a shared signal that its owner observes.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal(CancellationToken);

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Resolves once the resource has been closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.0.cancelled()
    }
}

impl StreamResource for CloseSignal {
    fn close(&self) -> io::Result<()> {
        self.0.cancel();
        Ok(())
    }
}

/// Source and sink of one active recording; always closed together.
pub struct StreamHandle {
    source: Box<dyn StreamResource>,
    sink: Box<dyn StreamResource>,
}

impl StreamHandle {
    pub fn new(source: impl StreamResource + 'static, sink: impl StreamResource + 'static) -> Self {
        Self {
            source: Box::new(source),
            sink: Box::new(sink),
        }
    }

    /// Close both halves. The sink is closed even if the source fails; the
    /// first error is returned.
    pub fn close(&self) -> io::Result<()> {
        let source = self.source.close();
        let sink = self.sink.close();
        source.and(sink)
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// Shared map from stream key to the handle of the stream being recorded.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<DashMap<String, Arc<StreamHandle>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the active stream for `key`, replacing any previous entry.
    pub fn register(&self, key: impl Into<String>, handle: StreamHandle) -> Arc<StreamHandle> {
        let key = key.into();
        let handle = Arc::new(handle);
        debug!(stream_key = %key, "Registering active stream");
        self.streams.insert(key, handle.clone());
        handle
    }

    /// Remove `key` only if it still maps to `handle`.
    pub fn unregister(&self, key: &str, handle: &Arc<StreamHandle>) -> bool {
        self.streams
            .remove_if(key, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.streams.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.streams.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Remove and close the stream under `key`.
    ///
    /// Returns `Ok(false)` if nothing was registered. The entry is removed
    /// even when closing fails.
    pub fn close(&self, key: &str) -> Result<bool> {
        let Some((_, handle)) = self.streams.remove(key) else {
            return Ok(false);
        };
        handle.close().map_err(|e| Error::StreamClose {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(true)
    }

    /// Close every registered stream. Returns how many were closed cleanly.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        for key in self.keys() {
            info!(stream_key = %key, "Closing stream");
            match self.close(&key) {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => error!("{}", e),
            }
        }
        closed
    }
}
