// src/io/debug_channel/message.rs
//
// Typed, timestamped debug channel message built from one framed byte span.

use std::ops::Range;

use super::frame::{parse_frame, FrameHeader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugMessage {
    originator_id: String,
    raw: Vec<u8>,
    pc_time_us: u64,
    header: FrameHeader,
    payload: Range<usize>,
}

impl DebugMessage {
    /// Build a message from a complete frame.
    ///
    /// Returns `None` when `frame` is not a single well-formed frame; noise on
    /// the channel produces such spans and they are expected.
    pub fn make(originator_id: &str, frame: &[u8], pc_time_us: u64) -> Option<Self> {
        let (header, payload) = parse_frame(frame)?;
        Some(DebugMessage {
            originator_id: originator_id.to_string(),
            raw: frame.to_vec(),
            pc_time_us,
            header,
            payload,
        })
    }

    /// Adapter the message came from
    pub fn originator_id(&self) -> &str {
        &self.originator_id
    }

    /// The complete frame, markers included
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Host arrival time in microseconds since the UNIX epoch
    pub fn pc_time_us(&self) -> u64 {
        self.pc_time_us
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn message_type(&self) -> u16 {
        self.header.message_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.raw[self.payload.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::super::frame::{encode_frame, v3_header};
    use super::*;

    #[test]
    fn test_make_from_valid_frame() {
        let frame = encode_frame(&v3_header(0x0102, 4), b"data");
        let msg = DebugMessage::make("10.0.0.5", &frame, 1_700_000_000_000_123).unwrap();

        assert_eq!(msg.originator_id(), "10.0.0.5");
        assert_eq!(msg.raw(), frame.as_slice());
        assert_eq!(msg.pc_time_us(), 1_700_000_000_000_123);
        assert_eq!(msg.message_type(), 0x0102);
        assert_eq!(msg.header().sequence, Some(4));
        assert_eq!(msg.payload(), b"data");
    }

    #[test]
    fn test_make_fails_closed() {
        assert!(DebugMessage::make("a", b"not a frame", 0).is_none());
        assert!(DebugMessage::make("a", b"", 0).is_none());

        let mut frame = encode_frame(&v3_header(1, 1), b"zz");
        frame[3] = 9; // unknown version
        assert!(DebugMessage::make("a", &frame, 0).is_none());
    }
}
