// FDIS wire format: little-endian framed stream of SID register events.
//
// Frame = header + payload. The header's `count` field is the number of
// event records, or the 0xFFFF sentinel for a single 4-byte command record.
// Two profiles exist across host tools: the compact profile (10-byte header,
// 6-byte events) used by sid2serial, and the chip profile (12-byte padded
// header, 8-byte events with an explicit chip byte). The receiver profile is
// fixed per session via config; there is no in-band negotiation.

use crate::engine::event_queue::SidEvent;

/// Frame magic, "FDIS" as bytes on the wire, read as a little-endian u32.
pub const FRAME_MAGIC: u32 = 0x5349_4446;

/// Largest event count a header may carry.
pub const MAX_FRAME_EVENTS: u16 = 8192;

/// `count` sentinel marking a command frame.
pub const COMMAND_COUNT: u16 = 0xFFFF;

/// Command record length (opcode + three params).
pub const COMMAND_LEN: usize = 4;

/// Events addressed here are pure delays: after the 5-bit register mask the
/// write lands on register 0x1F, which is unconnected on the SID.
pub const DELAY_ADDR: u8 = 0xFF;

pub const OP_CYCLE_MODE: u8 = 0x01;
pub const OP_SET_VOICE_MASK: u8 = 0x02;
pub const OP_SET_FILTER: u8 = 0x03;

/// Wire profile selected at init time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProfile {
    /// 10-byte header `magic:u32 count:u16 frame:u32`, 6-byte events
    /// `addr value delta:u32`. The primary-tool format.
    Compact,
    /// 12-byte header with a reserved u16 after `count`, 8-byte events
    /// `chip addr value pad delta:u32`.
    Chip,
}

impl WireProfile {
    pub fn header_len(self) -> usize {
        match self {
            WireProfile::Compact => 10,
            WireProfile::Chip => 12,
        }
    }

    pub fn event_len(self) -> usize {
        match self {
            WireProfile::Compact => 6,
            WireProfile::Chip => 8,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "compact" => Some(WireProfile::Compact),
            "chip" => Some(WireProfile::Chip),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WireProfile::Compact => "compact",
            WireProfile::Chip => "chip",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub count: u16,
    pub frame: u32,
}

impl FrameHeader {
    pub fn is_command(&self) -> bool {
        self.count == COMMAND_COUNT
    }

    /// An event count outside 0..=8192 (and not the command sentinel) means
    /// the bytes under the magic were not actually a frame.
    pub fn is_valid(&self) -> bool {
        self.is_command() || self.count <= MAX_FRAME_EVENTS
    }
}

/// Out-of-band control record carried by a command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub opcode: u8,
    pub params: [u8; 3],
}

fn read_u16(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[0], buf[1]])
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Decode a header from the front of `buf`. Returns `None` when the magic
/// does not match; the caller must have at least `profile.header_len()`
/// bytes available.
pub fn decode_header(buf: &[u8], profile: WireProfile) -> Option<FrameHeader> {
    debug_assert!(buf.len() >= profile.header_len());
    if read_u32(buf) != FRAME_MAGIC {
        return None;
    }
    let count = read_u16(&buf[4..]);
    let frame = match profile {
        WireProfile::Compact => read_u32(&buf[6..]),
        WireProfile::Chip => read_u32(&buf[8..]),
    };
    Some(FrameHeader { count, frame })
}

/// Decode one event record from the front of `buf`. Compact records carry no
/// chip byte; a zero mask means broadcast, preserving default behavior from
/// hosts that omit chip selection.
pub fn decode_event(buf: &[u8], profile: WireProfile) -> SidEvent {
    debug_assert!(buf.len() >= profile.event_len());
    match profile {
        WireProfile::Compact => SidEvent {
            chip_mask: 0,
            addr: buf[0],
            value: buf[1],
            delta: read_u32(&buf[2..]),
        },
        WireProfile::Chip => SidEvent {
            chip_mask: buf[0],
            addr: buf[1],
            value: buf[2],
            delta: read_u32(&buf[4..]),
        },
    }
}

pub fn decode_command(buf: &[u8]) -> Command {
    debug_assert!(buf.len() >= COMMAND_LEN);
    Command {
        opcode: buf[0],
        params: [buf[1], buf[2], buf[3]],
    }
}

/// Encode a compact header. Host-side helper, also used heavily by tests.
pub fn encode_header(count: u16, frame: u32, profile: WireProfile) -> Vec<u8> {
    let mut out = Vec::with_capacity(profile.header_len());
    out.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    if profile == WireProfile::Chip {
        out.extend_from_slice(&0u16.to_le_bytes());
    }
    out.extend_from_slice(&frame.to_le_bytes());
    out
}

pub fn encode_event(ev: &SidEvent, profile: WireProfile) -> Vec<u8> {
    let mut out = Vec::with_capacity(profile.event_len());
    match profile {
        WireProfile::Compact => {
            out.push(ev.addr);
            out.push(ev.value);
        }
        WireProfile::Chip => {
            out.push(ev.chip_mask);
            out.push(ev.addr);
            out.push(ev.value);
            out.push(0);
        }
    }
    out.extend_from_slice(&ev.delta.to_le_bytes());
    out
}

pub fn encode_command(cmd: &Command, profile: WireProfile) -> Vec<u8> {
    let mut out = encode_header(COMMAND_COUNT, 0, profile);
    out.push(cmd.opcode);
    out.extend_from_slice(&cmd.params);
    out
}
