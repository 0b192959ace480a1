//! # senlog
//!
//! Data-logging pipeline for constrained devices: typed measurement
//! records are packed into SenML/CBOR packs, optionally buffered on a
//! file-system pool, and shipped over a CoAP block-wise PUT channel to a
//! remote resource.
//!
//! The pipeline is a one-way chain: **caller → [`logger::Logger`] →
//! [`serial::RecordSerializer`] → transfer driver**, where the driver is
//! either a [`publisher::Publisher`] (straight to the network) or an
//! [`ltb::LtbInstance`] (disk pool that later drains to a publisher).
//!
//! ## Key Properties
//!
//! - Packs are built with a simulate-then-commit protocol: buffers are
//!   never overflowed and never carry a partial record
//! - Ingress never blocks on I/O; all network and file-system work runs
//!   on dedicated worker threads
//! - Pool files survive reboots and flaky uplinks; publishing is
//!   triggered by a file-count threshold and an optional predicate
//! - Record ownership is explicit: every rejected record travels back to
//!   the caller inside the error
//!
//! ## Use Cases
//!
//! - Battery-powered sensor nodes with burst-oriented uplinks
//! - Gateways that must survive hours of backhaul outage without losing
//!   measurements
//! - Shipping device diagnostics over the same channel as the data

pub mod diag;
pub mod error;
pub mod logger;
pub mod ltb;
pub mod memfile;
pub mod net;
pub mod pool;
pub mod publisher;
pub mod record;
pub mod ring;
pub mod senml;
pub mod serial;
pub mod transfer;
