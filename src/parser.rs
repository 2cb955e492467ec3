//! Streaming BLE-MIDI packet decoder.
//!
//! Reconstructs a MIDI 1.0 byte stream from BLE GATT notifications framed
//! as described by the Bluetooth SIG "MIDI over Bluetooth Low Energy"
//! specification: a packet header carrying the high bits of a 13-bit
//! timestamp, followed by a stream of timestamp-prefixed MIDI messages
//! (including System Exclusive, which may span many packets).
//!
//! [`BleMidiParser::parse`] is called repeatedly on the *same* packet
//! buffer; each call yields at most one reassembled message
//! ([`ParseOutcome::MessageEmitted`]) until the packet is exhausted
//! ([`ParseOutcome::NoMore`]).

use tracing::warn;

use crate::classifier::{self, MessageLen, SYSEX_END, SYSEX_START};
use crate::config::BridgeConfig;
use crate::error::{ParseError, ParseResult};

const MIDI_BUFFER_LEN: usize = 8;
const SYSEX_BUFFER_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Active {
    Midi,
    Sys,
}

/// Result of a single [`BleMidiParser::parse`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// One complete MIDI message was reassembled. `len` and `timestamp`
    /// mirror [`BleMidiParser::message`] and [`BleMidiParser::timestamp`]
    /// at the moment this outcome was produced. `truncated` is set when
    /// the message is a System Exclusive message that exceeded the
    /// reassembly buffer; the message is still delivered, cut short at
    /// the buffer capacity.
    MessageEmitted {
        len: usize,
        timestamp: u16,
        truncated: bool,
    },
    /// The packet has been fully consumed; no further messages remain.
    NoMore,
}

/// Streaming decoder state for one BLE-MIDI link.
///
/// A zeroed/[`Default`] value is a valid initial state. Feed packets by
/// calling [`parse`](Self::parse) repeatedly on the same buffer until it
/// returns [`ParseOutcome::NoMore`] or an error, then present the next
/// packet.
#[derive(Debug, Clone)]
pub struct BleMidiParser {
    /// Timestamp of the last completed message.
    ts: u16,
    /// High 7 bits of the current packet's timestamp, pre-shifted by 7.
    ts_high: u16,
    /// Timestamp captured at the start of the in-flight SysEx message.
    ts_sys: u16,
    /// Last seen channel-voice status byte, for running-status restoration.
    status: u8,
    /// True while a SysEx message is being assembled across packets.
    status_sys: bool,
    /// True when the next emitted message must have `status` re-inserted
    /// as its first byte (the BLE-MIDI -> classical MIDI running-status
    /// bridge).
    status_restore: bool,
    /// True once the in-flight SysEx has overflowed `buffer_sys`; further
    /// body bytes are discarded until the terminating `0xF7`, which is the
    /// call that finally reports the truncated message.
    discarding_overflow: bool,
    buffer_midi: [u8; MIDI_BUFFER_LEN],
    buffer_sys: [u8; SYSEX_BUFFER_LEN],
    buffer_sys_len: usize,
    /// Cursor into the packet currently being parsed; zero iff the parser
    /// is ready to accept a new packet.
    current_len: usize,
    active: Active,
    len: usize,
    config: BridgeConfig,
}

impl Default for BleMidiParser {
    fn default() -> Self {
        BleMidiParser {
            ts: 0,
            ts_high: 0,
            ts_sys: 0,
            status: 0,
            status_sys: false,
            status_restore: false,
            discarding_overflow: false,
            buffer_midi: [0; MIDI_BUFFER_LEN],
            buffer_sys: [0; SYSEX_BUFFER_LEN],
            buffer_sys_len: 0,
            current_len: 0,
            active: Active::Midi,
            len: 0,
            config: BridgeConfig::default(),
        }
    }
}

impl BleMidiParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a parser carrying `config`'s tunables.
    ///
    /// `config.sysex_buffer_len` is informational only: the reassembly
    /// buffer is a fixed `[u8; 256]` array regardless of this value. A
    /// mismatch is logged once, at construction, rather than silently
    /// ignored.
    pub fn with_config(config: BridgeConfig) -> Self {
        if config.sysex_buffer_len != SYSEX_BUFFER_LEN {
            warn!(
                configured = config.sysex_buffer_len,
                actual = SYSEX_BUFFER_LEN,
                "BridgeConfig::sysex_buffer_len does not match the parser's fixed SysEx buffer"
            );
        }
        BleMidiParser {
            config,
            ..Self::default()
        }
    }

    /// Resets the parser to its zeroed initial state, ready for a brand
    /// new BLE-MIDI link (no in-flight SysEx, no running status). The
    /// configured tunables are preserved across the reset.
    pub fn reset(&mut self) {
        let config = self.config;
        *self = Self::default();
        self.config = config;
    }

    /// The bytes of the most recently completed message.
    ///
    /// Valid after a call to [`parse`](Self::parse) returned
    /// `Ok(ParseOutcome::MessageEmitted { .. })`.
    pub fn message(&self) -> &[u8] {
        match self.active {
            Active::Midi => &self.buffer_midi[..self.len],
            Active::Sys => &self.buffer_sys[..self.len],
        }
    }

    /// The 13-bit timestamp of the most recently completed message.
    pub fn timestamp(&self) -> u16 {
        self.ts
    }

    /// The tunables this parser was constructed with.
    pub fn config(&self) -> BridgeConfig {
        self.config
    }

    fn cap(active: Active) -> usize {
        match active {
            Active::Midi => MIDI_BUFFER_LEN,
            Active::Sys => SYSEX_BUFFER_LEN,
        }
    }

    fn write(&mut self, active: Active, index: usize, byte: u8) {
        match active {
            Active::Midi => self.buffer_midi[index] = byte,
            Active::Sys => self.buffer_sys[index] = byte,
        }
    }

    /// Parses as much of `packet` as is needed to reassemble the next
    /// complete MIDI message.
    ///
    /// Call this repeatedly on the *same* `packet` slice; each call
    /// resumes from where the previous one left off. Once a packet is
    /// fully consumed, present the next packet — the parser tracks, via
    /// its internal cursor, whether it is mid-packet or ready to start a
    /// new one.
    pub fn parse(&mut self, packet: &[u8]) -> ParseResult<ParseOutcome> {
        let plen = packet.len();

        if self.current_len == plen {
            self.current_len = 0;
            return Ok(ParseOutcome::NoMore);
        }

        let (mut active, mut buf_len, mut status) = if self.status_sys {
            (Active::Sys, self.buffer_sys_len, SYSEX_START)
        } else {
            (Active::Midi, 0usize, self.status)
        };

        let mut cur = self.current_len;

        if cur == 0 {
            if plen < 3 || (packet[0] >> 6) != 0b10 {
                self.current_len = 0;
                return Err(ParseError::InvalidHeader);
            }
            self.ts_high = ((packet[0] & 0x3F) as u16) << 7;
            cur = 1;
        }

        loop {
            // Timestamp byte, optionally followed by a status byte.
            if packet[cur] & 0x80 != 0 {
                self.ts = self.ts_high | (packet[cur] & 0x7F) as u16;
                cur += 1;
                if cur == plen {
                    self.current_len = 0;
                    return Err(ParseError::InvalidHeader);
                }

                if packet[cur] & 0x80 != 0 {
                    status = packet[cur];
                    match status {
                        SYSEX_START => {
                            active = Active::Sys;
                            buf_len = self.buffer_sys_len;
                            self.ts_sys = self.ts;
                            self.status_sys = true;
                        }
                        SYSEX_END => {
                            self.status_sys = false;
                        }
                        _ => {}
                    }
                    if buf_len < Self::cap(active) {
                        self.write(active, buf_len, status);
                        buf_len += 1;
                    }
                    cur += 1;
                    if cur == plen {
                        return self.finish_at_end_of_packet(active, buf_len, status, cur);
                    }
                }
            }

            // BLE-MIDI running status restored for classical MIDI: a
            // system-common message does not cancel running status on
            // the wire, but classical MIDI expects it re-inserted.
            if buf_len == 0 && self.status_restore {
                if buf_len < Self::cap(active) {
                    self.write(active, buf_len, status);
                    buf_len += 1;
                }
                self.status_restore = false;
            }

            let is_sysex = matches!(classifier::message_len(status), Some(MessageLen::SysEx));
            let mut remaining = match classifier::message_len(status) {
                Some(MessageLen::Fixed(n)) => n.saturating_sub(1),
                Some(MessageLen::SysEx) => usize::MAX,
                None => {
                    self.current_len = 0;
                    return Err(ParseError::InvalidStatus { byte: status, offset: cur });
                }
            };

            let mut overflowed = false;
            loop {
                if remaining == 0 {
                    break;
                }
                if packet[cur] & 0x80 != 0 {
                    break;
                }
                if self.discarding_overflow {
                    // Already delivered this SysEx truncated; fast-forward
                    // over its remaining body bytes without storing them.
                } else if buf_len < Self::cap(active) {
                    self.write(active, buf_len, packet[cur]);
                    buf_len += 1;
                } else {
                    overflowed = true;
                    break;
                }
                cur += 1;
                if !is_sysex {
                    remaining -= 1;
                }
                if cur == plen {
                    if status == SYSEX_START {
                        // SysEx still open, just ran out of packet.
                        self.buffer_sys_len = buf_len;
                        self.current_len = 0;
                        return Ok(ParseOutcome::NoMore);
                    }
                    self.current_len = cur;
                    return Ok(self.finish(active, buf_len, status, false));
                }
            }

            if overflowed {
                // First time this SysEx exceeds its reassembly buffer:
                // stage the truncated buffer, keep `status_sys` set, and
                // discard the rest of this packet without reporting a
                // message yet. The truncated message is only reported
                // once the terminating 0xF7 arrives.
                self.discarding_overflow = true;
                self.buffer_sys_len = buf_len;
                self.current_len = 0;
                return Ok(ParseOutcome::NoMore);
            }

            if !is_sysex && remaining != 0 {
                self.current_len = 0;
                return Err(ParseError::BadMessage { status });
            }

            if status == SYSEX_START {
                // Not yet terminated and not overflowed: keep
                // accumulating within this same call.
                self.buffer_sys_len = buf_len;
                continue;
            }

            if status == SYSEX_END && self.discarding_overflow {
                // This SysEx overflowed earlier and was staged but not
                // reported; the terminator is the call that reports it.
                self.discarding_overflow = false;
                self.current_len = cur;
                return Ok(self.finish(active, buf_len, status, true));
            }

            // A complete message was reassembled with `cur` somewhere at
            // or before the end of `packet`. Persist the cursor: if more
            // bytes remain, the next call resumes mid-packet; if `cur`
            // reached `plen`, the next call's entry check short-circuits
            // to `NoMore` instead of mis-reading the packet as a new one.
            self.current_len = cur;
            return Ok(self.finish(active, buf_len, status, false));
        }
    }

    fn finish_at_end_of_packet(
        &mut self,
        active: Active,
        buf_len: usize,
        status: u8,
        cur: usize,
    ) -> ParseResult<ParseOutcome> {
        if status == SYSEX_START {
            self.buffer_sys_len = buf_len;
            self.current_len = 0;
            return Ok(ParseOutcome::NoMore);
        }
        if status == SYSEX_END && self.discarding_overflow {
            // This SysEx overflowed earlier and was staged but not
            // reported; the terminator is the call that reports it.
            self.discarding_overflow = false;
            self.current_len = cur;
            return Ok(self.finish(active, buf_len, status, true));
        }
        // `cur` equals `packet.len()` here (our caller only reaches this
        // branch at the exact end of the packet): the next call against
        // the same packet must see `current_len == plen` and return
        // `NoMore` rather than mis-reading it as a fresh one.
        self.current_len = cur;
        Ok(self.finish(active, buf_len, status, false))
    }

    fn finish(&mut self, active: Active, buf_len: usize, status: u8, truncated: bool) -> ParseOutcome {
        self.active = active;
        self.len = buf_len;

        if status & 0xF0 != 0xF0 {
            self.status = status;
        }
        if classifier::is_system_common(status) {
            self.status_restore = true;
        }
        if status == SYSEX_END {
            self.buffer_sys_len = 0;
            self.ts = self.ts_sys;
        }

        ParseOutcome::MessageEmitted {
            len: buf_len,
            timestamp: self.ts,
            truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(p: &mut BleMidiParser, packet: &[u8]) -> (usize, u16, bool) {
        match p.parse(packet).expect("expected a message") {
            ParseOutcome::MessageEmitted { len, timestamp, truncated } => (len, timestamp, truncated),
            ParseOutcome::NoMore => panic!("expected MessageEmitted, got NoMore"),
        }
    }

    fn no_more(p: &mut BleMidiParser, packet: &[u8]) {
        assert_eq!(p.parse(packet).unwrap(), ParseOutcome::NoMore);
    }

    #[test]
    fn single_channel_voice() {
        let mut p = BleMidiParser::new();
        let data = [0x85, 0x81, 0xC0, 0x42];
        let (len, ts, truncated) = emit(&mut p, &data);
        assert_eq!(p.message(), &[0xC0, 0x42]);
        assert_eq!(len, 2);
        assert_eq!(ts, 0x0281);
        assert!(!truncated);
        no_more(&mut p, &data);
    }

    #[test]
    fn two_messages_across_two_packets() {
        let mut p = BleMidiParser::new();
        let a = [0x80, 0x81, 0x90, 0x40, 0x7F];
        emit(&mut p, &a);
        assert_eq!(p.message(), &[0x90, 0x40, 0x7F]);
        assert_eq!(p.timestamp(), 0x0001);
        no_more(&mut p, &a);

        let b = [0x80, 0x82, 0xA0, 0x40, 0x7F];
        emit(&mut p, &b);
        assert_eq!(p.message(), &[0xA0, 0x40, 0x7F]);
        assert_eq!(p.timestamp(), 0x0002);
        no_more(&mut p, &b);
    }

    #[test]
    fn joined_messages_in_one_packet() {
        let mut p = BleMidiParser::new();
        let data = [0x80, 0x81, 0x90, 0x40, 0x7F, 0x81, 0xE0, 0x10, 0x42];
        emit(&mut p, &data);
        assert_eq!(p.message(), &[0x90, 0x40, 0x7F]);
        emit(&mut p, &data);
        assert_eq!(p.message(), &[0xE0, 0x10, 0x42]);
        no_more(&mut p, &data);
    }

    #[test]
    fn fragmented_sysex() {
        let mut p = BleMidiParser::new();
        let pkt1 = [0x80, 0x81, 0xF0, 0x01, 0x02, 0x03];
        no_more(&mut p, &pkt1);

        let pkt2 = [0x80, 0x04, 0x05, 0x82, 0xF7];
        emit(&mut p, &pkt2);
        assert_eq!(p.message(), &[0xF0, 0x01, 0x02, 0x03, 0x04, 0x05, 0xF7]);
        assert_eq!(p.timestamp(), 0x0001);
        no_more(&mut p, &pkt2);
    }

    #[test]
    fn running_status_after_system_common() {
        let mut p = BleMidiParser::new();
        let data = [0x80, 0x81, 0x90, 0x40, 0x7F, 0x82, 0xF1, 0x00, 0x83, 0x41, 0x7F];

        emit(&mut p, &data);
        assert_eq!(p.message(), &[0x90, 0x40, 0x7F]);
        assert_eq!(p.timestamp(), 0x0001);

        emit(&mut p, &data);
        assert_eq!(p.message(), &[0xF1, 0x00]);
        assert_eq!(p.timestamp(), 0x0002);

        emit(&mut p, &data);
        assert_eq!(p.message(), &[0x90, 0x41, 0x7F]);
        assert_eq!(p.timestamp(), 0x0003);
    }

    #[test]
    fn running_status_with_interleaved_real_time() {
        let mut p = BleMidiParser::new();
        let data = [0x80, 0x81, 0x90, 0x40, 0x7F, 0x82, 0xF8, 0x83, 0x41, 0x7F];

        emit(&mut p, &data);
        assert_eq!(p.message(), &[0x90, 0x40, 0x7F]);
        assert_eq!(p.timestamp(), 0x0001);

        emit(&mut p, &data);
        assert_eq!(p.message(), &[0xF8]);
        assert_eq!(p.timestamp(), 0x0002);

        emit(&mut p, &data);
        assert_eq!(p.message(), &[0x41, 0x7F]);
        assert_eq!(p.timestamp(), 0x0003);
    }

    #[test]
    fn running_status_without_timestamp_byte() {
        let mut p = BleMidiParser::new();
        let d1 = [0x80, 0x81, 0x90, 0x40, 0x7F];
        let d2 = [0x80, 0x82, 0x41, 0x7F];
        let d3 = [0x80, 0x42, 0x7F];

        emit(&mut p, &d1);
        assert_eq!(p.message(), &[0x90, 0x40, 0x7F]);
        no_more(&mut p, &d1);

        emit(&mut p, &d2);
        assert_eq!(p.message(), &[0x41, 0x7F]);
        no_more(&mut p, &d2);

        emit(&mut p, &d3);
        assert_eq!(p.message(), &[0x42, 0x7F]);
        no_more(&mut p, &d3);
    }

    #[test]
    fn overflow_sysex_is_delivered_truncated_at_the_terminator() {
        let mut p = BleMidiParser::new();
        let pkt1 = [0x80, 0x81, 0xF0, 0x01, 0x02, 0x03];
        no_more(&mut p, &pkt1);

        let mut pkt2 = [0x77u8; 512];
        pkt2[0] = 0x80;
        pkt2[1] = 0x81;
        // pkt2[2..] are all 0x77 continuation bytes. The packet that
        // first fills the 256-byte buffer only stages the truncated
        // message; it does not report one yet.
        no_more(&mut p, &pkt2);

        let pkt3 = [0x80, 0x82, 0xF7];
        let (len, ts, truncated) = emit(&mut p, &pkt3);
        assert_eq!(len, SYSEX_BUFFER_LEN);
        assert!(truncated);
        assert_eq!(ts, 0x0001, "SysEx exception: timestamp is the start-of-SysEx ts");
        let mut expected = vec![0xF0, 0x01, 0x02, 0x03];
        expected.extend(std::iter::repeat(0x77).take(SYSEX_BUFFER_LEN - expected.len()));
        assert_eq!(p.message(), expected.as_slice());

        // The same terminator call again is a no-op, just like any other
        // completed message.
        no_more(&mut p, &pkt3);
    }

    #[test]
    fn invalid_header() {
        let mut p = BleMidiParser::new();
        let data = [0x10, 0x80, 0x90, 0x40, 0x7F];
        assert_eq!(p.parse(&data), Err(ParseError::InvalidHeader));
    }

    #[test]
    fn too_short_packet_is_invalid() {
        let mut p = BleMidiParser::new();
        assert_eq!(p.parse(&[0x80, 0x80]), Err(ParseError::InvalidHeader));
    }

    #[test]
    fn data_byte_where_status_expected() {
        let mut p = BleMidiParser::new();
        let data = [0x80, 0x80, 0x40, 0x40, 0x7F];
        assert_eq!(
            p.parse(&data),
            Err(ParseError::InvalidStatus { byte: 0, offset: 2 })
        );
    }

    #[test]
    fn interleaved_real_time_inside_sysex_without_timestamp_is_malformed() {
        let mut p = BleMidiParser::new();
        let data = [0x80, 0x80, 0xF0, 0x01, 0x80];
        assert_eq!(p.parse(&data), Err(ParseError::InvalidHeader));
    }

    #[test]
    fn idempotent_after_no_more() {
        let mut p = BleMidiParser::new();
        let data = [0x85, 0x81, 0xC0, 0x42];
        emit(&mut p, &data);
        no_more(&mut p, &data);
        no_more(&mut p, &data);
    }

    #[test]
    fn idempotent_after_error() {
        let mut p = BleMidiParser::new();
        let data = [0x10, 0x80, 0x90, 0x40, 0x7F];
        assert!(p.parse(&data).is_err());
        no_more(&mut p, &data);
    }

    #[test]
    fn zero_initialized_state_parses_well_formed_packet() {
        let mut p = BleMidiParser::default();
        let data = [0x80, 0x81, 0x90, 0x40, 0x7F];
        emit(&mut p, &data);
    }

    #[test]
    fn with_config_is_preserved_across_reset() {
        let cfg = BridgeConfig {
            poll_timeout_ms: 10,
            ..BridgeConfig::default()
        };
        let mut p = BleMidiParser::with_config(cfg);
        assert_eq!(p.config(), cfg);
        let data = [0x80, 0x81, 0xF0, 0x01, 0x02, 0x03];
        no_more(&mut p, &data);
        p.reset();
        assert_eq!(p.config(), cfg);
    }

    #[test]
    fn reset_clears_in_flight_sysex() {
        let mut p = BleMidiParser::new();
        let pkt1 = [0x80, 0x81, 0xF0, 0x01, 0x02, 0x03];
        no_more(&mut p, &pkt1);
        p.reset();
        let data = [0x80, 0x81, 0x90, 0x40, 0x7F];
        emit(&mut p, &data);
        assert_eq!(p.message(), &[0x90, 0x40, 0x7F]);
    }
}
