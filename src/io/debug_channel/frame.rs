// src/io/debug_channel/frame.rs
//
// Debug channel (DCH) frame layout.
//
// All multi-byte fields are little-endian. `len` counts the bytes between the
// length field and the end marker.
//
// Version 2 (one-byte length, body >= 10 bytes):
//   ['['][len:1][version:2 = 2][board_time:6][type:2][payload...][']']
//
// Version 3 (two-byte length, body >= 17 bytes):
//   ['['][len:2][version:2 = 3][board_time:8][type:2][flags:4][seq:1][payload...][']']

use serde::Serialize;
use std::ops::Range;

/// Frame start marker
pub const FRAME_START: u8 = b'[';
/// Frame end marker
pub const FRAME_END: u8 = b']';

/// Supported frame layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameVersion {
    V2,
    V3,
}

impl FrameVersion {
    pub const ALL: [FrameVersion; 2] = [FrameVersion::V2, FrameVersion::V3];

    /// Value of the version field
    pub fn number(self) -> u16 {
        match self {
            FrameVersion::V2 => 2,
            FrameVersion::V3 => 3,
        }
    }

    fn length_width(self) -> usize {
        match self {
            FrameVersion::V2 => 1,
            FrameVersion::V3 => 2,
        }
    }

    /// Start marker plus length field
    fn prefix_len(self) -> usize {
        1 + self.length_width()
    }

    /// Smallest body that still holds the fixed header fields
    pub fn min_body_len(self) -> usize {
        match self {
            FrameVersion::V2 => 2 + 6 + 2,
            FrameVersion::V3 => 2 + 8 + 2 + 4 + 1,
        }
    }

    /// Largest body the length field can describe
    pub fn max_body_len(self) -> usize {
        match self {
            FrameVersion::V2 => u8::MAX as usize,
            FrameVersion::V3 => u16::MAX as usize,
        }
    }

    fn declared_body_len(self, bytes: &[u8]) -> usize {
        match self {
            FrameVersion::V2 => bytes[1] as usize,
            FrameVersion::V3 => u16::from_le_bytes([bytes[1], bytes[2]]) as usize,
        }
    }
}

/// Outcome of checking a buffer for a frame at its start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCheck {
    /// The bytes so far are a valid frame prefix
    Incomplete,
    /// A complete frame of the given total length starts the buffer
    Complete(usize),
    /// The buffer does not start with a frame of this version
    Invalid,
}

/// Check whether `bytes` starts with a frame of `version`.
///
/// Decisions are made as early as the bytes allow, so a stray start marker in
/// plain text is usually rejected after a few bytes.
pub fn check_frame(version: FrameVersion, bytes: &[u8]) -> FrameCheck {
    match bytes.first() {
        None => return FrameCheck::Incomplete,
        Some(&FRAME_START) => {}
        Some(_) => return FrameCheck::Invalid,
    }

    let prefix = version.prefix_len();
    if bytes.len() < prefix {
        return FrameCheck::Incomplete;
    }

    let body_len = version.declared_body_len(bytes);
    if body_len < version.min_body_len() {
        return FrameCheck::Invalid;
    }

    if bytes.len() < prefix + 2 {
        return FrameCheck::Incomplete;
    }
    if u16::from_le_bytes([bytes[prefix], bytes[prefix + 1]]) != version.number() {
        return FrameCheck::Invalid;
    }

    let total = prefix + body_len + 1;
    if bytes.len() < total {
        return FrameCheck::Incomplete;
    }
    if bytes[total - 1] != FRAME_END {
        return FrameCheck::Invalid;
    }

    FrameCheck::Complete(total)
}

/// Decoded fixed header of a debug channel frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameHeader {
    pub version: FrameVersion,
    /// Adapter-side timestamp (6 bytes in v2, 8 bytes in v3)
    pub board_time: u64,
    pub message_type: u16,
    /// v3 only, zero for v2
    pub flags: u32,
    /// v3 only
    pub sequence: Option<u8>,
}

fn le_u64(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Decode `bytes` as exactly one frame.
///
/// Returns the header and the payload range within `bytes`, or `None` if the
/// bytes are not a single well-formed frame of a known version.
pub fn parse_frame(bytes: &[u8]) -> Option<(FrameHeader, Range<usize>)> {
    let version = FrameVersion::ALL
        .into_iter()
        .find(|&v| check_frame(v, bytes) == FrameCheck::Complete(bytes.len()))?;

    // Offset of the first field after the version field
    let base = version.prefix_len() + 2;
    let end = bytes.len() - 1;

    let (header, payload_start) = match version {
        FrameVersion::V2 => (
            FrameHeader {
                version,
                board_time: le_u64(&bytes[base..base + 6]),
                message_type: u16::from_le_bytes([bytes[base + 6], bytes[base + 7]]),
                flags: 0,
                sequence: None,
            },
            base + 8,
        ),
        FrameVersion::V3 => (
            FrameHeader {
                version,
                board_time: le_u64(&bytes[base..base + 8]),
                message_type: u16::from_le_bytes([bytes[base + 8], bytes[base + 9]]),
                flags: u32::from_le_bytes([
                    bytes[base + 10],
                    bytes[base + 11],
                    bytes[base + 12],
                    bytes[base + 13],
                ]),
                sequence: Some(bytes[base + 14]),
            },
            base + 15,
        ),
    };

    Some((header, payload_start..end))
}

/// Build a frame. The payload is truncated if it does not fit the length
/// field of `version`.
pub fn encode_frame(header: &FrameHeader, payload: &[u8]) -> Vec<u8> {
    let version = header.version;
    let room = version.max_body_len() - version.min_body_len();
    let payload = &payload[..payload.len().min(room)];
    let body_len = version.min_body_len() + payload.len();

    let mut frame = Vec::with_capacity(version.prefix_len() + body_len + 1);
    frame.push(FRAME_START);
    match version {
        FrameVersion::V2 => frame.push(body_len as u8),
        FrameVersion::V3 => frame.extend_from_slice(&(body_len as u16).to_le_bytes()),
    }
    frame.extend_from_slice(&version.number().to_le_bytes());
    match version {
        FrameVersion::V2 => {
            frame.extend_from_slice(&header.board_time.to_le_bytes()[..6]);
            frame.extend_from_slice(&header.message_type.to_le_bytes());
        }
        FrameVersion::V3 => {
            frame.extend_from_slice(&header.board_time.to_le_bytes());
            frame.extend_from_slice(&header.message_type.to_le_bytes());
            frame.extend_from_slice(&header.flags.to_le_bytes());
            frame.push(header.sequence.unwrap_or(0));
        }
    }
    frame.extend_from_slice(payload);
    frame.push(FRAME_END);
    frame
}

#[cfg(test)]
pub(crate) fn v2_header(message_type: u16) -> FrameHeader {
    FrameHeader {
        version: FrameVersion::V2,
        board_time: 0x0000_0102_0304_0506,
        message_type,
        flags: 0,
        sequence: None,
    }
}

#[cfg(test)]
pub(crate) fn v3_header(message_type: u16, sequence: u8) -> FrameHeader {
    FrameHeader {
        version: FrameVersion::V3,
        board_time: 0x1122_3344_5566_7788,
        message_type,
        flags: 0xA0B0_C0D0,
        sequence: Some(sequence),
    }
}
