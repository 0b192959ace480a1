//! The record, senlog's basic logging data type.
//!
//! A [`Record`] is a single measurement: a name, a timestamp, an optional
//! SenML unit and a tagged value. Records are meant to be created and
//! consumed at high rate, so they stay small and avoid owning anything
//! they do not have to.
//!
//! # Ownership
//!
//! The name is *borrowed*: it usually identifies a node or a measurement
//! and is long-lived, while records come and go. The `'n` lifetime ties
//! every record (and everything staging records, see [`crate::serial`])
//! to its name's owner — the compiler enforces the "do not free the name
//! before the stream is flushed" contract.
//!
//! The string value variant is the one exception: it *owns* its bytes.
//! Passing a record to an ingress API transfers that ownership on success
//! only; rejecting paths hand the record back inside the error value.

use std::time::Duration;

/// A timestamp with microsecond resolution, split into whole seconds and
/// a sub-second microsecond part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    /// Whole seconds since the Unix epoch.
    pub secs: u64,
    /// Sub-second part, `0..1_000_000`.
    pub micros: u32,
}

impl Timestamp {
    /// The zero timestamp, used as the "time not yet known" sentinel.
    pub const ZERO: Timestamp = Timestamp { secs: 0, micros: 0 };

    /// Creates a timestamp, normalizing an out-of-range microsecond part.
    pub fn new(secs: u64, micros: u32) -> Self {
        Timestamp {
            secs: secs + u64::from(micros / 1_000_000),
            micros: micros % 1_000_000,
        }
    }

    /// The timestamp as floating-point seconds, the form SenML carries
    /// under key `t`.
    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + f64::from(self.micros) * 1e-6
    }

    /// Whether this is the zero sentinel.
    pub fn is_zero(&self) -> bool {
        self.secs == 0 && self.micros == 0
    }
}

impl From<Duration> for Timestamp {
    fn from(d: Duration) -> Self {
        Timestamp {
            secs: d.as_secs(),
            micros: d.subsec_micros(),
        }
    }
}

/// The tagged value of a record.
///
/// Only [`Value::Str`] owns heap data; the numeric variants are plain
/// copies. [`Value::Empty`] is a placeholder that cannot be encoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Value {
    /// No value set. Encoding a record with an empty value fails.
    #[default]
    Empty,
    /// An unsigned 32-bit value.
    U32(u32),
    /// A signed 32-bit value.
    I32(i32),
    /// An owned text value.
    Str(String),
}

/// Record unit, taken from the SenML unit registry (RFC 8428).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Unit {
    /// No unit; the `u` field is omitted from the encoded record.
    #[default]
    None,
    Metre,
    Kilogram,
    Gram,
    Second,
    Ampere,
    Kelvin,
    Candela,
    Mole,
    Hertz,
    Radian,
    Steradian,
    Newton,
    Pascal,
    Joule,
    Watt,
    Coulomb,
    Volt,
    Farad,
    Ohm,
    Siemens,
    Weber,
    Tesla,
    Henry,
    Celsius,
    Lumen,
    Lux,
    Becquerel,
    Gray,
    Sievert,
    Katal,
    SquareMetre,
    CubicMetre,
    Litre,
    MetrePerSecond,
    MetrePerSquareSecond,
    CubicMetrePerSecond,
    LitrePerSecond,
    WattPerSquareMetre,
    CandelaPerSquareMetre,
    Bit,
    BitPerSecond,
    Latitude,
    Longitude,
    Ph,
    Decibel,
    DecibelWatt,
    Bel,
    Count,
    Ratio,
    Percent,
    RelativeHumidity,
    RemainingBatteryPercent,
    RemainingBatterySeconds,
    EventsPerSecond,
    EventsPerMinute,
    BeatsPerMinute,
    Beats,
    SiemensPerMetre,
}

impl Unit {
    /// The SenML symbol for this unit, or `None` for [`Unit::None`].
    pub fn symbol(&self) -> Option<&'static str> {
        let sym = match self {
            Unit::None => return None,
            Unit::Metre => "m",
            Unit::Kilogram => "kg",
            Unit::Gram => "g",
            Unit::Second => "s",
            Unit::Ampere => "A",
            Unit::Kelvin => "K",
            Unit::Candela => "cd",
            Unit::Mole => "mol",
            Unit::Hertz => "Hz",
            Unit::Radian => "rad",
            Unit::Steradian => "sr",
            Unit::Newton => "N",
            Unit::Pascal => "Pa",
            Unit::Joule => "J",
            Unit::Watt => "W",
            Unit::Coulomb => "C",
            Unit::Volt => "V",
            Unit::Farad => "F",
            Unit::Ohm => "Ohm",
            Unit::Siemens => "S",
            Unit::Weber => "Wb",
            Unit::Tesla => "T",
            Unit::Henry => "H",
            Unit::Celsius => "Cel",
            Unit::Lumen => "lm",
            Unit::Lux => "lx",
            Unit::Becquerel => "Bq",
            Unit::Gray => "Gy",
            Unit::Sievert => "Sv",
            Unit::Katal => "kat",
            Unit::SquareMetre => "m2",
            Unit::CubicMetre => "m3",
            Unit::Litre => "l",
            Unit::MetrePerSecond => "m/s",
            Unit::MetrePerSquareSecond => "m/s2",
            Unit::CubicMetrePerSecond => "m3/s",
            Unit::LitrePerSecond => "l/s",
            Unit::WattPerSquareMetre => "W/m2",
            Unit::CandelaPerSquareMetre => "cd/m2",
            Unit::Bit => "bit",
            Unit::BitPerSecond => "bit/s",
            Unit::Latitude => "lat",
            Unit::Longitude => "lon",
            Unit::Ph => "pH",
            Unit::Decibel => "dB",
            Unit::DecibelWatt => "dBW",
            Unit::Bel => "Bspl",
            Unit::Count => "count",
            Unit::Ratio => "/",
            Unit::Percent => "%",
            Unit::RelativeHumidity => "%RH",
            Unit::RemainingBatteryPercent => "%EL",
            Unit::RemainingBatterySeconds => "EL",
            Unit::EventsPerSecond => "1/s",
            Unit::EventsPerMinute => "1/min",
            Unit::BeatsPerMinute => "beat/min",
            Unit::Beats => "beats",
            Unit::SiemensPerMetre => "S/m",
        };
        Some(sym)
    }
}

/// A single measurement.
///
/// The name is borrowed for `'n`; the value may own a string. See the
/// module docs for the ownership rules.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<'n> {
    /// Measurement name, borrowed from its long-lived owner.
    pub name: &'n str,
    /// When the measurement was taken.
    pub timestamp: Timestamp,
    /// SenML unit; `Unit::None` omits the unit field on the wire.
    pub unit: Unit,
    /// The measured value.
    pub value: Value,
}

impl<'n> Record<'n> {
    /// Creates a record with an unsigned value.
    pub fn u32(name: &'n str, timestamp: Timestamp, unit: Unit, value: u32) -> Self {
        Record {
            name,
            timestamp,
            unit,
            value: Value::U32(value),
        }
    }

    /// Creates a record with a signed value.
    pub fn i32(name: &'n str, timestamp: Timestamp, unit: Unit, value: i32) -> Self {
        Record {
            name,
            timestamp,
            unit,
            value: Value::I32(value),
        }
    }

    /// Creates a record with an owned text value.
    pub fn str(name: &'n str, timestamp: Timestamp, unit: Unit, value: impl Into<String>) -> Self {
        Record {
            name,
            timestamp,
            unit,
            value: Value::Str(value.into()),
        }
    }
}

/// An optional prefix applied at encode time to every record in a pack.
///
/// The base is copied into the serializer at construction; the encoder
/// emits it once per pack as a leading `{bn: name}` map and decoders
/// prepend it to every record name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordBase {
    /// Base name. `None` suppresses the base map entirely.
    pub name: Option<String>,
}

impl RecordBase {
    /// A base with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        RecordBase {
            name: Some(name.into()),
        }
    }
}
