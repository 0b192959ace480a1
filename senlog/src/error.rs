//! Error types for the senlog data-logging pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all senlog operations.
///
/// This enum covers the error conditions of the full pipeline, from record
/// encoding through pool buffering to the network uplink. Recoverable
/// protocol signals (a serializer asking for a fresh buffer, a full staging
/// ring) are *not* errors; they are conveyed through outcome types in
/// [`crate::serial`].
#[derive(Error, Debug)]
pub enum Error {
    /// Error while encoding a SenML/CBOR pack.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Error while decoding a SenML/CBOR pack.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Error from a data-pool file operation.
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// Error from a transfer driver.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Error from the long-term-buffering subsystem.
    #[error("ltb error: {0}")]
    Ltb(#[from] LtbError),

    /// An invalid configuration value.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised by the SenML/CBOR pack encoder.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// The output buffer (or simulated budget) cannot hold the next item.
    #[error("output buffer exhausted")]
    OutOfSpace,

    /// The record carries no value; an empty record cannot be encoded.
    #[error("record has no value")]
    EmptyValue,
}

/// Errors raised by the reference pack decoder.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The byte stream is not a well-formed CBOR pack.
    #[error("malformed pack: {0}")]
    Malformed(#[from] minicbor::decode::Error),

    /// The CBOR is well-formed but not a SenML pack we understand.
    #[error("unexpected pack structure: {0}")]
    Unexpected(&'static str),
}

/// Errors raised by data-pool file operations.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool holds no file matching the naming schema.
    #[error("no pool file found in '{}'", .0.display())]
    NotFound(PathBuf),

    /// An underlying file-system operation failed.
    #[error("pool I/O error on '{}': {source}", path.display())]
    Io {
        /// The pool directory or file the operation touched.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by transfer drivers and transports.
#[derive(Error, Debug)]
pub enum TransferError {
    /// The driver does not implement the requested capability.
    #[error("operation not supported by this driver")]
    NotSupported,

    /// The driver's worker is gone; no further jobs can be accepted.
    #[error("transfer worker has shut down")]
    Shutdown,

    /// An asynchronous enqueue was refused because the queue is full.
    #[error("transfer would block")]
    WouldBlock,

    /// The remote did not answer within the configured timeout budget.
    #[error("transport timeout")]
    Timeout,

    /// The remote answered with an unexpected code or payload.
    #[error("transport protocol error: {0}")]
    Protocol(String),

    /// An I/O error on the job's pack source or the network socket.
    #[error("transfer I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the LTB subsystem's dispatch queue.
#[derive(Error, Debug)]
pub enum LtbError {
    /// The dispatch queue is full; the unit was not enqueued.
    #[error("dispatch queue is full")]
    WouldBlock,

    /// The dispatch worker has shut down.
    #[error("ltb subsystem has shut down")]
    Shutdown,

    /// The dispatch worker thread could not be started.
    #[error("failed to spawn dispatch worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors raised when validating configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The record queue size must be a non-zero power of two.
    #[error("record queue size {0} is not a non-zero power of two")]
    QueueSize(usize),

    /// The encoding buffer must at least hold the outer-array framing.
    #[error("encoding buffer of {got} bytes is below the minimum of {min}")]
    BufferTooSmall {
        /// The configured size.
        got: usize,
        /// The minimum usable size.
        min: usize,
    },

    /// The CoAP block size exponent is outside the protocol range.
    #[error("block size exponent {0} is outside 4..=10")]
    BlockSizeExp(u8),

    /// The remote address could not be parsed or resolved.
    #[error("invalid remote address '{0}'")]
    RemoteAddress(String),
}

/// Type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
