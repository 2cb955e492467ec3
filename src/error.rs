//! Error taxonomy for the BLE-MIDI decoder and transport bridge.

use thiserror::Error;

/// Errors that can occur while decoding a single BLE-MIDI packet.
///
/// All variants are recoverable at the packet boundary: after any of
/// these is returned, the parser has already reset itself and is ready
/// to accept a fresh packet on the next call.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Missing or malformed BLE-MIDI header, or a timestamp byte that was
    /// the final byte of a packet.
    #[error("invalid BLE-MIDI packet header or trailing timestamp byte")]
    InvalidHeader,
    /// A data byte was found where a status byte was required and no
    /// running status was available to fall back on.
    #[error("data byte {byte:#04x} at offset {offset} with no status to restore")]
    InvalidStatus { byte: u8, offset: usize },
    /// A channel-voice message ended before supplying all of its
    /// expected data bytes.
    #[error("status byte {status:#04x} truncated before its data bytes completed")]
    BadMessage { status: u8 },
}

/// Errors surfaced by the MIDI transport bridge.
///
/// Per the bridge's design, none of these ever escape a watch thread:
/// they are logged and the watch either re-arms (transient) or tears
/// itself down (EOF/fatal).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error on {endpoint}: {source}")]
    Io {
        endpoint: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("watch for {endpoint} is already running")]
    AlreadyRunning { endpoint: &'static str },
}

pub type ParseResult<T> = core::result::Result<T, ParseError>;
pub type TransportResult<T> = core::result::Result<T, TransportError>;
