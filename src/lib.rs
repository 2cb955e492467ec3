//! BLE-MIDI packet decoder and MIDI transport bridge.
//!
//! [`parser`] reassembles a MIDI 1.0 byte stream from fragmented,
//! timestamp-interleaved BLE-MIDI packets. [`transport`] drives that
//! parser against a BLE link and two local MIDI FIFOs. [`classifier`]
//! is the status-byte table both depend on.

pub mod classifier;
pub mod config;
pub mod error;
pub mod ffi;
pub mod parser;
pub mod transport;

pub use config::BridgeConfig;
pub use error::{ParseError, TransportError};
pub use parser::{BleMidiParser, ParseOutcome};
pub use transport::{BleMidiTransport, Channel};
