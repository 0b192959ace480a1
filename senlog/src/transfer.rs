//! The transfer driver contract.
//!
//! A transfer driver is the capability abstraction over outbound transport:
//! the publisher (network) and the LTB instances (disk pool) both implement
//! it, which lets the logger, the LTB's outbound side and the diagnostic
//! logger share plumbing. Drivers pin only the subset of operations they
//! support; the rest fall through to not-supported defaults.
//!
//! # Completion contract
//!
//! A job's callback fires *exactly once* after a successful asynchronous
//! enqueue — on completion, successful or not. If the enqueue itself fails
//! the callback never fires and the job travels back to the caller inside
//! the error, cleanup included. Synchronous sends never fire the callback;
//! their return value fully conveys the outcome.

use std::fmt;
use std::io::{Read, Seek};

use thiserror::Error;

use crate::error::TransferError;

/// What a transfer job reads its payload from.
///
/// Blanket-implemented for anything seekable and readable that can cross
/// threads — [`crate::memfile::MemFile`], [`std::fs::File`], …
pub trait PackSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> PackSource for T {}

/// Completion callback of a transfer job.
pub type JobCallback = Box<dyn FnOnce(Result<(), crate::error::Error>) + Send>;

/// A single transfer: a pack source plus an optional completion callback.
pub struct TransferJob {
    /// The payload; drivers rewind it before reading.
    pub source: Box<dyn PackSource>,
    callback: Option<JobCallback>,
}

impl TransferJob {
    /// Creates a job without a completion callback.
    pub fn new(source: impl PackSource + 'static) -> Self {
        TransferJob {
            source: Box::new(source),
            callback: None,
        }
    }

    /// Attaches a completion callback.
    #[must_use]
    pub fn with_callback(
        mut self,
        cb: impl FnOnce(Result<(), crate::error::Error>) + Send + 'static,
    ) -> Self {
        self.callback = Some(Box::new(cb));
        self
    }

    /// Consumes the job, invoking its callback with the terminal status.
    ///
    /// Dropping the job's source is its cleanup.
    pub fn complete(mut self, status: Result<(), crate::error::Error>) {
        if let Some(cb) = self.callback.take() {
            cb(status);
        }
    }
}

impl fmt::Debug for TransferJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferJob")
            .field("callback", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

/// A failed asynchronous enqueue; the job comes back to the caller.
#[derive(Debug, Error)]
pub enum TrySendError {
    /// The driver's queue is full right now; retry later.
    #[error("transfer queue is full")]
    WouldBlock(TransferJob),

    /// The driver's worker is gone for good.
    #[error("transfer worker has shut down")]
    Shutdown(TransferJob),

    /// The driver does not implement asynchronous sends.
    #[error("driver does not support asynchronous send")]
    NotSupported(TransferJob),
}

impl TrySendError {
    /// Recovers the job for cleanup or retry.
    pub fn into_job(self) -> TransferJob {
        match self {
            TrySendError::WouldBlock(job)
            | TrySendError::Shutdown(job)
            | TrySendError::NotSupported(job) => job,
        }
    }

    /// The refusal as a plain [`TransferError`], without the job.
    pub fn as_transfer_error(&self) -> TransferError {
        match self {
            TrySendError::WouldBlock(_) => TransferError::WouldBlock,
            TrySendError::Shutdown(_) => TransferError::Shutdown,
            TrySendError::NotSupported(_) => TransferError::NotSupported,
        }
    }
}

/// Polymorphic outbound transport.
///
/// All methods are thread safe. Implementations override what they
/// support; the defaults refuse with not-supported.
pub trait TransferDriver: Send + Sync {
    /// Starts a send asynchronously; never blocks on I/O.
    fn try_send(&self, job: TransferJob) -> Result<(), TrySendError> {
        Err(TrySendError::NotSupported(job))
    }

    /// Sends synchronously, blocking until the transfer concludes.
    fn send(&self, job: TransferJob) -> Result<(), TransferError> {
        drop(job);
        Err(TransferError::NotSupported)
    }

    /// Starts a receive asynchronously.
    fn try_recv(&self, job: TransferJob) -> Result<(), TrySendError> {
        Err(TrySendError::NotSupported(job))
    }

    /// Receives synchronously.
    fn recv(&self, job: TransferJob) -> Result<(), TransferError> {
        drop(job);
        Err(TransferError::NotSupported)
    }
}
