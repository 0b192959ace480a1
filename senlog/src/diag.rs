//! Remote diagnostics: log lines shipped as records.
//!
//! A [`DiagLogger`] owns an ordinary [`Logger`] whose records carry a
//! severity tag as their name and the log line as an owned string value,
//! so diagnostic output travels the same pipeline as measurement data and
//! ends up on the same backend. Lines are dropped silently when the
//! time source has no fix yet (a zero timestamp would be worse than no
//! line) or when the pipeline refuses them — diagnostics must never block
//! or fail the caller.

use std::sync::Mutex;

use crate::error::Result;
use crate::logger::{Logger, LoggerConfig};
use crate::record::{Record, Timestamp, Unit, Value};
use crate::transfer::TransferDriver;

/// Capacity of the diagnostic record queue.
const DIAG_QUEUE_LEN: usize = 16;

/// Longest log line shipped; anything longer is truncated.
const DIAG_MSG_MAX: usize = 128;

/// Severity of a diagnostic line, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl DiagLevel {
    /// The record name a line of this severity is shipped under.
    pub fn tag(&self) -> &'static str {
        match self {
            DiagLevel::Error => "ERR",
            DiagLevel::Warn => "WRN",
            DiagLevel::Info => "INF",
            DiagLevel::Debug => "DBG",
        }
    }
}

/// Time source for diagnostic records.
pub type TimeFn = Box<dyn Fn() -> Timestamp + Send + Sync>;

/// A diagnostic logger shipping log lines as records.
pub struct DiagLogger {
    inner: Mutex<Option<Logger<'static>>>,
    timef: TimeFn,
    level: DiagLevel,
}

impl DiagLogger {
    /// Creates a diagnostic logger over the given driver.
    ///
    /// `timef` supplies timestamps; while it returns [`Timestamp::ZERO`]
    /// (time not yet synchronized) lines are dropped. Lines below `level`
    /// are dropped too.
    pub fn enable(
        driver: std::sync::Arc<dyn TransferDriver>,
        timef: impl Fn() -> Timestamp + Send + Sync + 'static,
        base_name: Option<String>,
        level: DiagLevel,
    ) -> Result<Self> {
        let mut config = LoggerConfig::new("diag")
            .with_queue_size(DIAG_QUEUE_LEN)
            .with_buffer_size(DIAG_QUEUE_LEN * DIAG_MSG_MAX);
        config.base_name = base_name;

        let logger = Logger::new(config, driver)?;

        Ok(DiagLogger {
            inner: Mutex::new(Some(logger)),
            timef: Box::new(timef),
            level,
        })
    }

    /// Ships one log line. Never blocks on I/O, never fails the caller.
    pub fn log(&self, level: DiagLevel, msg: impl Into<String>) {
        if level > self.level {
            return;
        }

        let timestamp = (self.timef)();
        if timestamp.is_zero() {
            tracing::debug!("diag line dropped, time not synchronized");
            return;
        }

        let mut msg = msg.into();
        if msg.len() > DIAG_MSG_MAX {
            let mut cut = DIAG_MSG_MAX;
            while !msg.is_char_boundary(cut) {
                cut -= 1;
            }
            msg.truncate(cut);
        }

        let rec = Record {
            name: level.tag(),
            timestamp,
            unit: Unit::None,
            value: Value::Str(msg),
        };

        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match inner.as_ref() {
            Some(logger) => {
                if let Err(refused) = logger.put(rec) {
                    tracing::debug!(reason = %refused.reason, "diag line dropped");
                }
            }
            None => tracing::debug!("diag logger disabled, line dropped"),
        }
    }

    /// Ships an error-level line.
    pub fn error(&self, msg: impl Into<String>) {
        self.log(DiagLevel::Error, msg);
    }

    /// Ships a warning-level line.
    pub fn warn(&self, msg: impl Into<String>) {
        self.log(DiagLevel::Warn, msg);
    }

    /// Ships an info-level line.
    pub fn info(&self, msg: impl Into<String>) {
        self.log(DiagLevel::Info, msg);
    }

    /// Ships a debug-level line.
    pub fn debug(&self, msg: impl Into<String>) {
        self.log(DiagLevel::Debug, msg);
    }

    /// Flushes buffered lines to the driver.
    pub fn flush(&self) {
        let inner = self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(logger) = inner.as_ref() {
            if let Err(e) = logger.flush() {
                tracing::debug!(error = %e, "diag flush failed");
            }
        }
    }

    /// Disables the logger, flushing and closing the underlying stream.
    /// Further lines are dropped.
    pub fn disable(&self) {
        let logger = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(logger) = logger {
            if let Err(e) = logger.close() {
                tracing::debug!(error = %e, "diag close failed");
            }
        }
    }
}
