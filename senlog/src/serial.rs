//! The record serializer: simulate-then-commit pack building.
//!
//! The serializer sits between a record ingress (one record at a time) and
//! an outbound buffer that is swapped out wholesale. Its contract is to
//! pack as many records as possible into the current buffer while also
//! accepting records destined for the *next* buffer — without ever encoding
//! speculatively into a live buffer.
//!
//! # How it works
//!
//! Every accepted record is staged in a ring and *simulate-encoded* against
//! the remaining budget of the current buffer ([`crate::senml::SimEncoder`]).
//! `fit_cnt` tracks how many staged records are known to fit. On
//! [`RecordSerializer::swap`] exactly those records are re-encoded — this
//! time for real — into the outgoing pack; the re-run cannot fail because
//! the simulation already accounted for every byte, including the reserved
//! array-close budget. The fresh buffer then becomes current, the encoder
//! returns to simulation mode, and the staged remainder is scanned ahead
//! (non-destructively) to establish the new `fit_cnt`.
//!
//! Invariants, checked in debug builds: `fit_cnt <= ring fill <= capacity`,
//! and the encoder is in simulation mode at all times except during the
//! commit inside `swap`.

use crate::error::{ConfigError, EncodeError};
use crate::record::{Record, RecordBase};
use crate::ring::Ring;
use crate::senml::{PackEncoder, SimEncoder, ARRAY_MAX_BYTES};

/// A fixed-size output buffer travelling through the swap protocol.
///
/// `size` is the hard capacity the serializer budgets against; `bytes`
/// holds the encoded pack once the buffer has been through a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackBuffer {
    bytes: Vec<u8>,
    size: usize,
}

impl PackBuffer {
    /// Creates an empty buffer with the given capacity.
    pub fn new(size: usize) -> Self {
        PackBuffer {
            bytes: Vec::new(),
            size,
        }
    }

    /// The encoded length, zero for a buffer that has not been committed.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer holds no encoded pack.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The budget capacity.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The encoded pack bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the buffer, returning the encoded pack bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Successful outcomes of [`RecordSerializer::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOk {
    /// The record fits into the current buffer.
    Stored,
    /// The record was staged for the *next* buffer; the caller should
    /// [`RecordSerializer::swap`] before the ring fills up.
    MustSwap,
}

/// A rejected `put`; ownership of the record returns to the caller.
#[derive(Debug, PartialEq)]
pub struct PutRefused<'n> {
    /// The record, handed back untouched.
    pub record: Record<'n>,
    /// Why it was refused.
    pub reason: RefusedReason,
}

/// Reasons a record can be refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusedReason {
    /// The staging ring is full; swap and retry.
    QueueFull,
    /// The buffer cannot fit even one record; no amount of swapping with
    /// equally-sized buffers will help.
    BufferTooSmall,
    /// The record itself cannot be encoded.
    Encode(EncodeError),
}

impl std::fmt::Display for RefusedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefusedReason::QueueFull => write!(f, "staging ring is full"),
            RefusedReason::BufferTooSmall => write!(f, "buffer cannot fit a single record"),
            RefusedReason::Encode(e) => write!(f, "{e}"),
        }
    }
}

impl std::fmt::Display for PutRefused<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "record refused: {}", self.reason)
    }
}

impl std::error::Error for PutRefused<'_> {}

/// Outcome of a [`RecordSerializer::swap`].
#[derive(Debug)]
pub struct SwapOutcome {
    /// The outgoing buffer holding the committed pack (possibly empty).
    pub pack: PackBuffer,
    /// Whether staged records remain that did not fit this pack.
    pub pending: bool,
}

/// Packs records into fixed-size buffers with a simulate-then-commit
/// protocol. See the module docs.
#[derive(Debug)]
pub struct RecordSerializer<'n> {
    ring: Ring<Record<'n>>,
    base: RecordBase,
    buf: PackBuffer,
    fit_cnt: usize,
    sim: SimEncoder,
}

impl<'n> RecordSerializer<'n> {
    /// Creates a serializer over `buf` with a staging ring of `len_limit`
    /// records.
    ///
    /// # Errors
    ///
    /// [`ConfigError::QueueSize`] unless `len_limit` is a non-zero power of
    /// two; [`ConfigError::BufferTooSmall`] if the buffer cannot even hold
    /// the pack framing.
    pub fn new(
        buf: PackBuffer,
        len_limit: usize,
        base: RecordBase,
    ) -> Result<Self, ConfigError> {
        if len_limit == 0 || !len_limit.is_power_of_two() {
            return Err(ConfigError::QueueSize(len_limit));
        }
        if buf.size < ARRAY_MAX_BYTES {
            return Err(ConfigError::BufferTooSmall {
                got: buf.size,
                min: ARRAY_MAX_BYTES,
            });
        }

        let sim = PackEncoder::simulate(buf.size - ARRAY_MAX_BYTES, &base);

        Ok(RecordSerializer {
            ring: Ring::new(len_limit),
            base,
            buf,
            fit_cnt: 0,
            sim,
        })
    }

    /// Number of staged records known to fit the current buffer.
    pub fn fit_count(&self) -> usize {
        self.fit_cnt
    }

    /// Number of records currently staged.
    pub fn queued(&self) -> usize {
        self.ring.len()
    }

    fn check_inv(&self) {
        debug_assert!(self.fit_cnt <= self.ring.len());
    }

    /// Offers a record to the serializer.
    ///
    /// On [`PutOk::Stored`] the record fits the current buffer; on
    /// [`PutOk::MustSwap`] it was staged for the next buffer and the caller
    /// must swap before long. Either way ownership was taken. On refusal
    /// the record comes back in the error.
    pub fn put(&mut self, rec: Record<'n>) -> Result<PutOk, PutRefused<'n>> {
        self.check_inv();

        if self.ring.is_full() {
            return Err(PutRefused {
                record: rec,
                reason: RefusedReason::QueueFull,
            });
        }

        match self.sim.put(&rec) {
            Ok(()) => {
                let pushed = self.ring.push(rec);
                debug_assert!(pushed.is_ok());
                self.fit_cnt += 1;
                self.check_inv();
                Ok(PutOk::Stored)
            }
            Err(EncodeError::OutOfSpace) => {
                if self.fit_cnt == 0 {
                    // The buffer cannot fit even one record.
                    return Err(PutRefused {
                        record: rec,
                        reason: RefusedReason::BufferTooSmall,
                    });
                }

                // Stage it anyway; it will encode into the next buffer.
                let pushed = self.ring.push(rec);
                debug_assert!(pushed.is_ok());
                Ok(PutOk::MustSwap)
            }
            Err(e) => Err(PutRefused {
                record: rec,
                reason: RefusedReason::Encode(e),
            }),
        }
    }

    /// Commits the fitting records into the current buffer and installs
    /// `fresh` as the new working buffer.
    ///
    /// Returns the committed pack (empty when nothing fit) and whether
    /// staged records remain for a further swap. After the swap the new
    /// buffer's fit count has been re-established by scanning the staged
    /// remainder.
    pub fn swap(&mut self, fresh: PackBuffer) -> SwapOutcome {
        self.check_inv();

        let out_size = self.buf.size;
        let pack = if self.fit_cnt > 0 {
            let mut enc = PackEncoder::for_buffer(out_size, &self.base);

            for _ in 0..self.fit_cnt {
                let rec = self.ring.pop().expect("fit count is bounded by ring fill");
                let res = enc.put(&rec);
                debug_assert!(res.is_ok(), "simulated record must re-encode");
            }
            self.fit_cnt = 0;

            let bytes = enc.close();
            debug_assert!(bytes.len() <= out_size);

            PackBuffer {
                bytes,
                size: out_size,
            }
        } else {
            PackBuffer::new(out_size)
        };

        self.buf = fresh;
        self.sim = PackEncoder::simulate(
            self.buf.size.saturating_sub(ARRAY_MAX_BYTES),
            &self.base,
        );

        // Scan ahead: how many of the staged records fit the new buffer?
        let mut fit = 0;
        for rec in self.ring.iter() {
            if self.sim.put(rec).is_err() {
                break;
            }
            fit += 1;
        }
        self.fit_cnt = fit;

        self.check_inv();

        SwapOutcome {
            pack,
            pending: !self.ring.is_empty(),
        }
    }

    /// Invalidates the serializer, dropping any staged records.
    ///
    /// Returns the number of records discarded. Consuming `self` makes a
    /// second invalidation unrepresentable.
    pub fn finish(self) -> usize {
        let dropped = self.ring.len();
        if dropped > 0 {
            tracing::debug!(dropped, "serializer finished with unflushed records");
        }
        dropped
    }
}
