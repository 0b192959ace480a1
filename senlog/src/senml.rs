//! SenML/CBOR pack encoding and decoding.
//!
//! A *pack* is one CBOR array of SenML maps, the atomic unit handed to a
//! transfer driver. The encoder opens the outer array up front, appends one
//! map per record and closes the array on demand, so a pack is valid CBOR
//! the moment it is closed and never contains a partial record.
//!
//! # Simulation mode
//!
//! The serializer must answer "does this record still fit?" without touching
//! the live output buffer. [`PackEncoder::simulate`] runs the exact same
//! encoding against a [`BudgetWriter`] that counts bytes instead of storing
//! them and fails once the running total exceeds its budget. The failure is
//! sticky — once a budget is exhausted every further write fails — mirroring
//! the error-state behavior of C CBOR encoders and keeping the accounting
//! conservative after a rejected candidate.
//!
//! Wire layout (integer SenML keys per RFC 8428):
//!
//! ```text
//! [ {-2: "base"},                      <- only when a base name is set
//!   {0: "name", 6: 1.5, 1: "Cel", 2: 23},
//!   ... ]
//! ```

use minicbor::data::Type;
use minicbor::{Decoder, Encoder};
use serde::Serialize;

use crate::error::{DecodeError, EncodeError};
use crate::record::{Record, RecordBase, Value};

/// Worst-case bytes needed to open and close the outer pack array.
///
/// The serializer reserves this from every buffer budget so that closing
/// a pack can never fail after its records were accepted.
pub const ARRAY_MAX_BYTES: usize = 4;

/// SenML integer map keys (RFC 8428, table 4).
const KEY_BASE_NAME: i8 = -2;
const KEY_NAME: i8 = 0;
const KEY_UNIT: i8 = 1;
const KEY_VALUE: i8 = 2;
const KEY_TIME: i8 = 6;

/// A byte-counting CBOR writer with a hard budget.
///
/// Nothing is stored; `write_all` accumulates the would-be length and fails
/// as soon as it passes the budget. The overflow is sticky.
#[derive(Debug)]
pub struct BudgetWriter {
    written: usize,
    budget: usize,
}

/// Error raised by [`BudgetWriter`] when its budget is exceeded.
#[derive(Debug)]
pub struct BudgetExceeded;

impl minicbor::encode::Write for BudgetWriter {
    type Error = BudgetExceeded;

    fn write_all(&mut self, buf: &[u8]) -> Result<(), BudgetExceeded> {
        self.written += buf.len();
        if self.written > self.budget {
            Err(BudgetExceeded)
        } else {
            Ok(())
        }
    }
}

/// Encoder for one SenML/CBOR pack.
///
/// Generic over the CBOR writer: [`BudgetWriter`] for simulation,
/// `Vec<u8>` for producing real bytes.
pub struct PackEncoder<W> {
    enc: Encoder<W>,
}

impl<W> std::fmt::Debug for PackEncoder<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackEncoder").finish_non_exhaustive()
    }
}

/// A pack encoder in simulation mode.
pub type SimEncoder = PackEncoder<BudgetWriter>;

impl<W: minicbor::encode::Write> PackEncoder<W> {
    /// Emits the outer array opening and, if configured, the base map.
    fn emit_open(enc: &mut Encoder<W>, base: &RecordBase) -> Result<(), EncodeError> {
        enc.begin_array().map_err(|_| EncodeError::OutOfSpace)?;

        if let Some(name) = &base.name {
            enc.map(1)
                .and_then(|e| e.i8(KEY_BASE_NAME))
                .and_then(|e| e.str(name))
                .map_err(|_| EncodeError::OutOfSpace)?;
        }

        Ok(())
    }

    /// Appends one record map.
    ///
    /// # Errors
    ///
    /// [`EncodeError::EmptyValue`] for a record without a value;
    /// [`EncodeError::OutOfSpace`] when the writer (or budget) is exhausted.
    pub fn put(&mut self, rec: &Record<'_>) -> Result<(), EncodeError> {
        if rec.value == Value::Empty {
            return Err(EncodeError::EmptyValue);
        }

        let pairs = 3 + u64::from(rec.unit.symbol().is_some());
        let e = &mut self.enc;

        e.map(pairs)
            .and_then(|e| e.i8(KEY_NAME))
            .and_then(|e| e.str(rec.name))
            .and_then(|e| e.i8(KEY_TIME))
            .and_then(|e| e.f64(rec.timestamp.as_secs_f64()))
            .map_err(|_| EncodeError::OutOfSpace)?;

        if let Some(sym) = rec.unit.symbol() {
            e.i8(KEY_UNIT)
                .and_then(|e| e.str(sym))
                .map_err(|_| EncodeError::OutOfSpace)?;
        }

        e.i8(KEY_VALUE).map_err(|_| EncodeError::OutOfSpace)?;
        match &rec.value {
            Value::U32(v) => e.u32(*v).map_err(|_| EncodeError::OutOfSpace)?,
            Value::I32(v) => e.i32(*v).map_err(|_| EncodeError::OutOfSpace)?,
            Value::Str(s) => e.str(s).map_err(|_| EncodeError::OutOfSpace)?,
            Value::Empty => unreachable!("checked above"),
        };

        Ok(())
    }
}

impl PackEncoder<BudgetWriter> {
    /// Opens a simulation encoder against `budget` usable bytes.
    ///
    /// If even the array opening or the base map overruns the budget, the
    /// writer is left exhausted and every subsequent [`PackEncoder::put`]
    /// reports out-of-space; construction itself never fails.
    pub fn simulate(budget: usize, base: &RecordBase) -> Self {
        let mut enc = Encoder::new(BudgetWriter { written: 0, budget });
        if Self::emit_open(&mut enc, base).is_err() {
            tracing::debug!(budget, "pack framing alone exceeds the buffer");
        }
        PackEncoder { enc }
    }

    /// Bytes the simulated pack would occupy so far (excluding the close).
    pub fn written(&self) -> usize {
        self.enc.writer().written
    }
}

impl PackEncoder<Vec<u8>> {
    /// Opens a real encoder producing bytes into a vector sized for `cap`.
    ///
    /// Intended for re-encoding records that a simulation pass already
    /// accepted, so the writes are infallible by construction.
    pub fn for_buffer(cap: usize, base: &RecordBase) -> Self {
        let mut enc = Encoder::new(Vec::with_capacity(cap));
        // Vec writes cannot fail; the simulation pass guaranteed the fit.
        let _ = Self::emit_open(&mut enc, base);
        PackEncoder { enc }
    }

    /// Closes the outer array and returns the encoded pack bytes.
    pub fn close(mut self) -> Vec<u8> {
        let _ = self.enc.end();
        self.enc.into_writer()
    }
}

/// A record as recovered by the reference decoder.
///
/// The base name, if present in the pack, is already concatenated onto
/// `name`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedRecord {
    /// Full record name (base name + record name).
    pub name: String,
    /// Timestamp in floating-point seconds.
    pub time: f64,
    /// Unit symbol, if the record carried one.
    pub unit: Option<String>,
    /// The decoded value.
    pub value: DecodedValue,
}

/// Value of a decoded record, tagged by its CBOR wire type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    /// CBOR unsigned integer.
    U64(u64),
    /// CBOR negative integer.
    I64(i64),
    /// CBOR text string.
    Text(String),
}

/// Decodes one pack back into records.
///
/// This is the reference decoder used by the CLI and the test suites; it
/// accepts both definite- and indefinite-length outer arrays.
///
/// # Errors
///
/// [`DecodeError::Malformed`] for invalid CBOR, [`DecodeError::Unexpected`]
/// for well-formed CBOR that is not a SenML pack.
pub fn decode_pack(bytes: &[u8]) -> Result<Vec<DecodedRecord>, DecodeError> {
    let mut d = Decoder::new(bytes);
    let mut base = String::new();
    let mut records = Vec::new();

    let mut remaining = match d.array()? {
        Some(n) => n,
        None => u64::MAX,
    };

    while remaining > 0 {
        if d.position() >= bytes.len() || d.datatype()? == Type::Break {
            break;
        }
        decode_map(&mut d, &mut base, &mut records)?;
        remaining -= 1;
    }

    Ok(records)
}

/// Decodes one SenML map, either a base map or a record map.
fn decode_map(
    d: &mut Decoder<'_>,
    base: &mut String,
    records: &mut Vec<DecodedRecord>,
) -> Result<(), DecodeError> {
    let pairs = d
        .map()?
        .ok_or(DecodeError::Unexpected("indefinite-length map"))?;

    let mut name = None;
    let mut time = None;
    let mut unit = None;
    let mut value = None;

    const K_BN: i32 = KEY_BASE_NAME as i32;
    const K_N: i32 = KEY_NAME as i32;
    const K_U: i32 = KEY_UNIT as i32;
    const K_V: i32 = KEY_VALUE as i32;
    const K_T: i32 = KEY_TIME as i32;

    for _ in 0..pairs {
        match d.i32()? {
            K_BN => {
                base.clear();
                base.push_str(d.str()?);
            }
            K_N => name = Some(d.str()?.to_string()),
            K_T => time = Some(d.f64()?),
            K_U => unit = Some(d.str()?.to_string()),
            K_V => {
                value = Some(match d.datatype()? {
                    Type::U8 | Type::U16 | Type::U32 | Type::U64 => DecodedValue::U64(d.u64()?),
                    Type::I8 | Type::I16 | Type::I32 | Type::I64 | Type::Int => {
                        DecodedValue::I64(d.i64()?)
                    }
                    Type::String => DecodedValue::Text(d.str()?.to_string()),
                    _ => return Err(DecodeError::Unexpected("unsupported value type")),
                });
            }
            _ => d.skip()?,
        }
    }

    match name {
        // A map carrying only base fields contributes no record.
        None => Ok(()),
        Some(n) => {
            let value = value.ok_or(DecodeError::Unexpected("record without value"))?;
            let time = time.ok_or(DecodeError::Unexpected("record without timestamp"))?;
            records.push(DecodedRecord {
                name: format!("{base}{n}"),
                time,
                unit,
                value,
            });
            Ok(())
        }
    }
}
