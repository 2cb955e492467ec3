//! Status-byte classification for MIDI 1.0 channel-voice and system messages.
//!
//! Maps a status byte to the number of bytes its message occupies,
//! including the status byte itself. System exclusive is the one
//! unbounded case: its length is only known once the terminating
//! `0xF7` arrives.

// ============================================================================
// MIDI Protocol Constants
// ============================================================================

/// Start of System Exclusive (SysEx) message.
pub const SYSEX_START: u8 = 0xF0;

/// End of System Exclusive (SysEx) message.
pub const SYSEX_END: u8 = 0xF7;

/// The length of a MIDI message, as determined from its status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLen {
    /// A complete channel-voice or system-common message of this many
    /// bytes, status byte included.
    Fixed(usize),
    /// A System Exclusive message: length is unbounded, terminated by
    /// [`SYSEX_END`].
    SysEx,
}

/// Classify a status byte into its expected message length.
///
/// Returns `None` if `status` does not have its top bit set, i.e. is not
/// a valid MIDI status byte.
pub fn message_len(status: u8) -> Option<MessageLen> {
    if status & 0x80 == 0 {
        return None;
    }
    let len = match status & 0xF0 {
        0x80 /* note off */
        | 0x90 /* note on */
        | 0xA0 /* polyphonic key pressure */
        | 0xB0 /* control change */ => MessageLen::Fixed(3),
        0xC0 /* program change */
        | 0xD0 /* channel pressure */ => MessageLen::Fixed(2),
        0xE0 /* pitch bend */ => MessageLen::Fixed(3),
        0xF0 => match status {
            SYSEX_START => MessageLen::SysEx,
            0xF1 /* MIDI time code quarter frame */ => MessageLen::Fixed(2),
            0xF2 /* song position pointer */ => MessageLen::Fixed(3),
            0xF3 /* song select */ => MessageLen::Fixed(2),
            0xF6 /* tune request */
            | SYSEX_END
            | 0xF8 /* timing clock */
            | 0xFA /* start */
            | 0xFB /* continue */
            | 0xFC /* stop */
            | 0xFE /* active sensing */
            | 0xFF /* system reset */ => MessageLen::Fixed(1),
            _ => return None,
        },
        _ => unreachable!("status & 0xF0 only produces the nibbles matched above"),
    };
    Some(len)
}

/// True if `status` is a MIDI real-time message (`0xF8`-`0xFF`), which
/// may interleave other messages without affecting running status.
pub fn is_realtime(status: u8) -> bool {
    (0xF8..=0xFF).contains(&status)
}

/// True if `status` is a system-common message (`0xF1`-`0xF6`), which
/// cancels running status in classical MIDI but not over BLE-MIDI.
pub fn is_system_common(status: u8) -> bool {
    (0xF1..=0xF6).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_voice_lengths() {
        assert_eq!(message_len(0x80), Some(MessageLen::Fixed(3)));
        assert_eq!(message_len(0x90), Some(MessageLen::Fixed(3)));
        assert_eq!(message_len(0xB0), Some(MessageLen::Fixed(3)));
        assert_eq!(message_len(0xC0), Some(MessageLen::Fixed(2)));
        assert_eq!(message_len(0xD0), Some(MessageLen::Fixed(2)));
        assert_eq!(message_len(0xE0), Some(MessageLen::Fixed(3)));
    }

    #[test]
    fn system_message_lengths() {
        assert_eq!(message_len(0xF0), Some(MessageLen::SysEx));
        assert_eq!(message_len(0xF1), Some(MessageLen::Fixed(2)));
        assert_eq!(message_len(0xF2), Some(MessageLen::Fixed(3)));
        assert_eq!(message_len(0xF3), Some(MessageLen::Fixed(2)));
        assert_eq!(message_len(0xF6), Some(MessageLen::Fixed(1)));
        assert_eq!(message_len(0xF7), Some(MessageLen::Fixed(1)));
        assert_eq!(message_len(0xF8), Some(MessageLen::Fixed(1)));
        assert_eq!(message_len(0xFF), Some(MessageLen::Fixed(1)));
    }

    #[test]
    fn invalid_status_bytes() {
        assert_eq!(message_len(0xF4), None);
        assert_eq!(message_len(0xF5), None);
        assert_eq!(message_len(0xF9), None);
        assert_eq!(message_len(0xFD), None);
    }

    #[test]
    fn data_byte_is_not_a_status() {
        assert_eq!(message_len(0x00), None);
        assert_eq!(message_len(0x7F), None);
    }

    #[test]
    fn realtime_and_system_common_classification() {
        assert!(is_realtime(0xF8));
        assert!(is_realtime(0xFF));
        assert!(!is_realtime(0xF1));
        assert!(is_system_common(0xF1));
        assert!(is_system_common(0xF6));
        assert!(!is_system_common(0xF8));
        assert!(!is_system_common(0xF0));
    }
}
