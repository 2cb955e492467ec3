//! Tunable constants for the transport bridge.
//!
//! The parser's reassembly buffers are fixed-size arrays sized at compile
//! time; `sysex_buffer_len` is carried here purely so an embedding
//! application can see and log the active limit, the way the original
//! transport exposes its negotiated MTU rather than baking it in as a
//! literal.

use serde::{Deserialize, Serialize};

/// SysEx reassembly capacity matching [`crate::parser::BleMidiParser`]'s
/// fixed buffer.
pub const DEFAULT_SYSEX_BUFFER_LEN: usize = 256;
/// Bytes read per `read()` call on the BLE link or a MIDI FIFO.
pub const DEFAULT_BLE_READ_CHUNK: usize = 512;
/// Poll timeout used by each watch thread between liveness checks.
pub const DEFAULT_POLL_TIMEOUT_MS: i32 = 250;

/// Runtime-tunable knobs for [`crate::transport::BleMidiTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// SysEx reassembly buffer capacity, in bytes. Informational: the
    /// parser's buffer is a fixed 256-byte array, matching the default.
    pub sysex_buffer_len: usize,
    /// Maximum bytes read from the BLE link or a MIDI FIFO per read call.
    pub ble_read_chunk: usize,
    /// Timeout, in milliseconds, for each watch thread's `poll()` call.
    pub poll_timeout_ms: i32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            sysex_buffer_len: DEFAULT_SYSEX_BUFFER_LEN,
            ble_read_chunk: DEFAULT_BLE_READ_CHUNK,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }
}
