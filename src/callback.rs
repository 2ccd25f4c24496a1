//! Per-chunk callbacks invoked while a stream is aggregated.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::provider::Chunk;

/// Failure reported by a chunk callback. Never aborts aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    /// The forwarding channel had no free capacity.
    #[error("forwarding channel is full")]
    Full,
    /// The receiving side went away.
    #[error("forwarding channel is closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

impl<T> From<TrySendError<T>> for CallbackError {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => CallbackError::Full,
            TrySendError::Closed(_) => CallbackError::Closed,
        }
    }
}

type CallbackFn = dyn FnMut(&Chunk) -> Result<(), CallbackError> + Send;

/// Caller-supplied hook that sees every chunk before it is folded.
///
/// Delivery is at most once per chunk and in arrival order. Errors and panics raised
/// by the hook are logged and counted, then the stream carries on.
///
/// # Examples
///
/// ```
/// use modelgate::callback::ChunkCallback;
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<String>(64);
/// let callback = ChunkCallback::forward_text(tx);
/// # drop(callback);
/// # assert!(rx.try_recv().is_err());
/// ```
pub struct ChunkCallback {
    inner: Box<CallbackFn>,
    failures: usize,
}

impl ChunkCallback {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(&Chunk) -> Result<(), CallbackError> + Send + 'static,
    {
        Self {
            inner: Box::new(callback),
            failures: 0,
        }
    }

    /// Wraps an infallible closure.
    pub fn from_fn<F>(mut callback: F) -> Self
    where
        F: FnMut(&Chunk) + Send + 'static,
    {
        Self::new(move |chunk| {
            callback(chunk);
            Ok(())
        })
    }

    /// Forwards each chunk's display text to a channel without waiting.
    ///
    /// Chunks without text are skipped. A full or closed channel counts as a failed
    /// delivery for that chunk only.
    pub fn forward_text(sender: mpsc::Sender<String>) -> Self {
        Self::new(move |chunk| match chunk.text() {
            Some(text) if !text.is_empty() => Ok(sender.try_send(text.to_string())?),
            _ => Ok(()),
        })
    }

    /// Forwards every raw chunk to a channel without waiting.
    pub fn forward_chunks(sender: mpsc::Sender<Chunk>) -> Self {
        Self::new(move |chunk| Ok(sender.try_send(chunk.clone())?))
    }

    /// Number of deliveries that failed so far.
    pub fn failures(&self) -> usize {
        self.failures
    }

    pub(crate) fn deliver(&mut self, chunk: &Chunk) {
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.inner)(chunk)));
        let error = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(_) => "callback panicked".to_string(),
        };
        self.failures += 1;
        warn!(error = %error, failures = self.failures, "chunk callback failed, continuing stream");
    }
}

impl fmt::Debug for ChunkCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkCallback")
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}
