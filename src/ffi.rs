//! C ABI shim exposing the BLE-MIDI parser to a C transport loop.
//!
//! Built as a `staticlib` so a C daemon can link the decoder directly
//! instead of re-implementing the state machine, mirroring
//! `ble_midi_parse()`'s role in the original project.

use std::ffi::c_int;
use std::os::raw::c_uchar;
use std::ptr;

use crate::parser::{BleMidiParser, ParseOutcome};

/// Opaque parser handle for C callers. Always heap-allocated by
/// [`ffi_parser_new`] and freed by [`ffi_parser_free`].
pub struct FfiParser(BleMidiParser);

/// Mirrors `ble_midi_parse()`'s return convention: `1` = message emitted,
/// `0` = packet exhausted, `-1` = parse error.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiParseResult {
    pub status: c_int,
    /// Pointer into the parser's internal buffer, valid only until the
    /// next call to [`ffi_parser_parse`]. Null unless `status == 1`.
    pub buffer: *const c_uchar,
    pub len: c_int,
    pub timestamp: u16,
    pub truncated: c_int,
}

const NO_MESSAGE: FfiParseResult = FfiParseResult {
    status: 0,
    buffer: ptr::null(),
    len: 0,
    timestamp: 0,
    truncated: 0,
};

#[no_mangle]
pub extern "C" fn ffi_parser_new() -> *mut FfiParser {
    Box::into_raw(Box::new(FfiParser(BleMidiParser::new())))
}

#[no_mangle]
pub extern "C" fn ffi_parser_free(parser: *mut FfiParser) {
    if parser.is_null() {
        return;
    }
    // Safety: `parser` must have come from `ffi_parser_new` and must not
    // be used again after this call.
    unsafe {
        drop(Box::from_raw(parser));
    }
}

#[no_mangle]
pub extern "C" fn ffi_parser_reset(parser: *mut FfiParser) {
    if parser.is_null() {
        return;
    }
    // Safety: caller guarantees `parser` is a live handle from
    // `ffi_parser_new`.
    unsafe {
        (*parser).0.reset();
    }
}

#[no_mangle]
pub extern "C" fn ffi_parser_parse(
    parser: *mut FfiParser,
    buf: *const c_uchar,
    buf_len: c_int,
) -> FfiParseResult {
    if parser.is_null() || buf.is_null() || buf_len < 0 {
        return FfiParseResult { status: -1, ..NO_MESSAGE };
    }

    // Safety: caller guarantees `buf` is valid for `buf_len` bytes and
    // `parser` is a live handle from `ffi_parser_new`.
    let (packet, state) = unsafe {
        (
            std::slice::from_raw_parts(buf, buf_len as usize),
            &mut (*parser).0,
        )
    };

    match state.parse(packet) {
        Ok(ParseOutcome::MessageEmitted { len, timestamp, truncated }) => FfiParseResult {
            status: 1,
            buffer: state.message().as_ptr(),
            len: len as c_int,
            timestamp,
            truncated: truncated as c_int,
        },
        Ok(ParseOutcome::NoMore) => NO_MESSAGE,
        Err(_) => FfiParseResult { status: -1, ..NO_MESSAGE },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_message_through_the_c_abi() {
        let parser = ffi_parser_new();
        let data = [0x85u8, 0x81, 0xC0, 0x42];

        let result = ffi_parser_parse(parser, data.as_ptr(), data.len() as c_int);
        assert_eq!(result.status, 1);
        assert_eq!(result.len, 2);
        assert_eq!(result.timestamp, 0x0281);
        assert_eq!(result.truncated, 0);
        // Safety: buffer is valid for `len` bytes until the next parse call.
        let bytes = unsafe { std::slice::from_raw_parts(result.buffer, result.len as usize) };
        assert_eq!(bytes, &[0xC0, 0x42]);

        let result = ffi_parser_parse(parser, data.as_ptr(), data.len() as c_int);
        assert_eq!(result.status, 0);

        ffi_parser_free(parser);
    }

    #[test]
    fn null_parser_is_rejected() {
        let data = [0x85u8, 0x81, 0xC0, 0x42];
        let result = ffi_parser_parse(ptr::null_mut(), data.as_ptr(), data.len() as c_int);
        assert_eq!(result.status, -1);
    }
}
