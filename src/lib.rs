#![cfg_attr(docsrs, feature(doc_cfg))]
//! # evd5bms_lib
//!
//! Master side of the EVD5 cell management bus: a chain of per cell slave
//! boards sharing one half-duplex serial line, addressed by 16 bit cell id.
//!
//! The crate covers the packet codec, the request/response session with its
//! retry policy, the pack topology and the balancing controller that keeps
//! cell voltages together by commanding per cell shunt currents.
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `evd5bms` command-line tool.
//! - `serialport`: Enables the serial port transport using the `serialport` crate.
//! - `bin-dependencies`: Enables all features required by the `evd5bms` binary executable.

/// Contains error types for the library.
mod error;

pub mod balance;
pub mod charger;
pub mod config;
pub mod controller;
/// CRC-16/CCITT-FALSE as used on the cell bus.
pub mod crc;
/// Packet framing with byte stuffing.
pub mod frame;
/// Commands and reply records of the cell bus protocol.
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod topology;
pub mod transport;

pub use error::{DecodeError, Error};

/// Serial port transport for the cell bus.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;
