//! The record logger: thread-safe ingress to a transfer driver.
//!
//! A [`Logger`] owns a [`RecordSerializer`] behind one coarse mutex. Records
//! go in one at a time; whenever the serializer signals pressure (the
//! current buffer is spoken for, or the staging ring is full) the logger
//! swaps in a fresh encoding buffer and hands the filled one to its
//! transfer driver as an asynchronous job backed by a [`MemFile`]. All
//! actual I/O happens on the driver's worker — `put` never blocks on the
//! network or the file system.
//!
//! Dispatch refusals (for example a momentarily full driver queue) drop the
//! pack and are logged but do not fail `put`; an explicit [`Logger::flush`]
//! propagates them.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, TransferError};
use crate::memfile::MemFile;
use crate::record::{Record, RecordBase};
use crate::serial::{PackBuffer, PutOk, PutRefused, RecordSerializer, RefusedReason};
use crate::transfer::{TransferDriver, TransferJob};

/// Configuration of a [`Logger`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Capacity of the record staging ring; must be a non-zero power of two.
    pub record_queue_size: usize,
    /// Size of each encoding buffer (one pack) in bytes; at least 4.
    pub encoding_buf_size: usize,
    /// Optional base name prefixed to every record in a pack.
    pub base_name: Option<String>,
    /// Logger name, used in diagnostics only.
    pub name: String,
}

impl LoggerConfig {
    /// Creates a config with the defaults of the reference deployment:
    /// a 64-record ring and 2 KiB packs.
    pub fn new(name: impl Into<String>) -> Self {
        LoggerConfig {
            record_queue_size: 64,
            encoding_buf_size: 2048,
            base_name: None,
            name: name.into(),
        }
    }

    /// Sets the staging ring capacity.
    #[must_use]
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.record_queue_size = size;
        self
    }

    /// Sets the encoding buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.encoding_buf_size = size;
        self
    }

    /// Sets the base name.
    #[must_use]
    pub fn with_base_name(mut self, base: impl Into<String>) -> Self {
        self.base_name = Some(base.into());
        self
    }
}

/// Thread-safe record ingress feeding a transfer driver.
///
/// The `'n` lifetime ties the logger to the names borrowed by the records
/// it stages; flush or close the logger before the names go away.
pub struct Logger<'n> {
    name: String,
    driver: Arc<dyn TransferDriver>,
    encbuf_size: usize,
    ser: Mutex<RecordSerializer<'n>>,
}

impl<'n> Logger<'n> {
    /// Creates a logger over the given driver.
    ///
    /// # Errors
    ///
    /// [`crate::error::ConfigError`] variants for an invalid queue size or
    /// encoding buffer size.
    pub fn new(config: LoggerConfig, driver: Arc<dyn TransferDriver>) -> Result<Self> {
        let base = match config.base_name {
            Some(name) => RecordBase::named(name),
            None => RecordBase::default(),
        };

        let ser = RecordSerializer::new(
            PackBuffer::new(config.encoding_buf_size),
            config.record_queue_size,
            base,
        )
        .map_err(Error::Config)?;

        Ok(Logger {
            name: config.name,
            driver,
            encbuf_size: config.encoding_buf_size,
            ser: Mutex::new(ser),
        })
    }

    /// The logger's diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a record. Thread safe, non-blocking on I/O.
    ///
    /// On success the record's data is owned by the pipeline; a refused
    /// record travels back inside the error. Internal buffer pressure
    /// (must-swap, queue-full) is absorbed by swapping and redispatching;
    /// only a record that can never be accepted is refused.
    pub fn put(&self, rec: Record<'n>) -> std::result::Result<(), PutRefused<'n>> {
        let mut ser = self.ser.lock().unwrap_or_else(PoisonError::into_inner);

        match ser.put(rec) {
            Ok(PutOk::Stored) => Ok(()),
            Ok(PutOk::MustSwap) => {
                // The record is staged for the next buffer; ship the
                // current pack. A refused dispatch loses the pack but not
                // the freshly staged record.
                let _ = Self::rotate(&self.driver, &self.name, self.encbuf_size, &mut ser);
                Ok(())
            }
            Err(refused) if refused.reason == RefusedReason::QueueFull => {
                let record = refused.record;
                let _ = Self::rotate(&self.driver, &self.name, self.encbuf_size, &mut ser);

                // The swap drained the fitting records, so one retry is
                // enough; a further must-swap is still an accepted record.
                ser.put(record).map(drop)
            }
            Err(refused) => Err(refused),
        }
    }

    /// Flushes all staged records, handing the resulting packs to the
    /// driver.
    ///
    /// # Errors
    ///
    /// The first dispatch refusal aborts the flush; records staged behind
    /// the failed pack stay queued.
    pub fn flush(&self) -> Result<()> {
        let mut ser = self.ser.lock().unwrap_or_else(PoisonError::into_inner);
        Self::flush_serializer(&self.driver, &self.name, self.encbuf_size, &mut ser)
    }

    /// Flushes, invalidates the serializer and consumes the logger.
    ///
    /// Concurrent users must be done with the logger by then, which the
    /// move enforces.
    pub fn close(self) -> Result<()> {
        let Logger {
            name,
            driver,
            encbuf_size,
            ser,
        } = self;
        let mut ser = ser.into_inner().unwrap_or_else(PoisonError::into_inner);

        let res = Self::flush_serializer(&driver, &name, encbuf_size, &mut ser);

        let dropped = ser.finish();
        if dropped > 0 {
            tracing::warn!(logger = %name, dropped, "records lost at close");
        }

        res
    }

    /// Swaps the serializer against a fresh buffer and dispatches the
    /// outgoing pack, if any. Returns the dispatch result and whether
    /// staged records remain.
    fn rotate(
        driver: &Arc<dyn TransferDriver>,
        name: &str,
        encbuf_size: usize,
        ser: &mut RecordSerializer<'n>,
    ) -> (std::result::Result<(), TransferError>, bool) {
        let out = ser.swap(PackBuffer::new(encbuf_size));
        let res = Self::dispatch(driver, name, out.pack);
        (res, out.pending)
    }

    /// Wraps a committed pack in a memory-file job and try-sends it.
    fn dispatch(
        driver: &Arc<dyn TransferDriver>,
        name: &str,
        pack: PackBuffer,
    ) -> std::result::Result<(), TransferError> {
        if pack.is_empty() {
            return Ok(());
        }

        let len = pack.len();
        let logger = name.to_string();
        let job = TransferJob::new(MemFile::with_data(pack.into_bytes())).with_callback(
            move |status| match status {
                Ok(()) => tracing::debug!(logger = %logger, "pack transfer finished"),
                Err(e) => tracing::warn!(logger = %logger, error = %e, "pack transfer failed"),
            },
        );

        match driver.try_send(job) {
            Ok(()) => {
                tracing::debug!(logger = %name, len, "pack dispatched");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(logger = %name, len, error = %e, "pack dispatch refused");
                Err(e.as_transfer_error())
            }
        }
    }

    fn flush_serializer(
        driver: &Arc<dyn TransferDriver>,
        name: &str,
        encbuf_size: usize,
        ser: &mut RecordSerializer<'n>,
    ) -> Result<()> {
        loop {
            let out = ser.swap(PackBuffer::new(encbuf_size));
            // An empty pack with records still pending means a staged
            // record outgrows every fresh buffer; looping would never
            // make progress.
            let stuck = out.pack.is_empty() && out.pending;

            Self::dispatch(driver, name, out.pack).map_err(Error::Transfer)?;

            if stuck {
                tracing::error!(logger = %name, "staged record larger than the encoding buffer");
                return Err(Error::Encode(crate::error::EncodeError::OutOfSpace));
            }
            if !out.pending {
                return Ok(());
            }
        }
    }
}
