// Resynchronizing FDIS frame parser.
//
// Pull-based byte state machine: scan for the frame magic one byte at a
// time, validate the header, then hand exactly `count` event records (or
// one command record) to the sink. Any mismatch advances a single byte and
// rescans, so the stream recovers from arbitrary alignment errors. Partial
// frames are buffered across feeds and resumed.
//
// Events go to the host staging queue through the sink; commands are
// applied immediately on parse completion and never enter the queue.

use std::time::Instant;

use crate::engine::event_queue::SidEvent;
use crate::protocol::{
    decode_command, decode_event, decode_header, Command, WireProfile, COMMAND_LEN, FRAME_MAGIC,
};

/// Internal reassembly buffer. Overflow discards the oldest half.
pub const PARSE_BUF_CAP: usize = 4096;

/// Last host bytes kept for the hex debug view.
pub const RECENT_BUF_SIZE: usize = 512;

/// Byte-slides per second that trigger a full buffer discard. Sliding is
/// O(1) per byte, so this bounds worst-case rescanning on garbage input.
const RESYNC_DISCARD_THRESHOLD: u32 = 8192;

const MAGIC_BYTES: [u8; 4] = FRAME_MAGIC.to_le_bytes();

/// Receives what the parser produces. The engine loop routes events into
/// the host queue, commands into the engine and frame stats into telemetry.
pub trait ParserSink {
    fn event(&mut self, ev: SidEvent);
    fn command(&mut self, cmd: Command);
    fn frame_complete(&mut self, events: u32, bytes: u32, duration_us: u64, frame_index: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    ScanMagic,
    ReadEvents,
    ReadCommand,
}

pub struct FrameParser {
    profile: WireProfile,
    buf: Vec<u8>,
    /// Consumed prefix of `buf`; compacted periodically.
    pos: usize,
    state: ParseState,

    // Current frame, valid outside ScanMagic.
    frame_index: u32,
    frame_total: u16,
    frame_events: u32,
    frame_bytes: u32,
    frame_started: Option<Instant>,

    resyncs: u64,
    window_started: Instant,
    window_resyncs: u32,
    buffer_discards: u32,

    recent: RecentBytes,
}

impl FrameParser {
    pub fn new(profile: WireProfile) -> Self {
        Self {
            profile,
            buf: Vec::with_capacity(PARSE_BUF_CAP),
            pos: 0,
            state: ParseState::ScanMagic,
            frame_index: 0,
            frame_total: 0,
            frame_events: 0,
            frame_bytes: 0,
            frame_started: None,
            resyncs: 0,
            window_started: Instant::now(),
            window_resyncs: 0,
            buffer_discards: 0,
            recent: RecentBytes::new(),
        }
    }

    pub fn profile(&self) -> WireProfile {
        self.profile
    }

    /// Total single-byte resyncs since startup.
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }

    /// Oldest-half and full buffer discards since startup.
    pub fn buffer_discards(&self) -> u32 {
        self.buffer_discards
    }

    pub fn recent(&self) -> &RecentBytes {
        &self.recent
    }

    /// Session reset: drop buffered bytes and any half-read frame. The
    /// recent-bytes capture and diagnostic counters survive.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.state = ParseState::ScanMagic;
        self.frame_started = None;
    }

    /// Consume a chunk of host bytes, emitting completed records into the
    /// sink. Always consumes the whole chunk.
    pub fn feed(&mut self, data: &[u8], sink: &mut dyn ParserSink) {
        self.recent.record(data);
        self.append(data);

        loop {
            match self.state {
                ParseState::ScanMagic => {
                    if !self.scan_magic() {
                        return;
                    }
                }
                ParseState::ReadEvents => {
                    let event_len = self.profile.event_len();
                    while self.frame_events < u32::from(self.frame_total) {
                        if self.available() < event_len {
                            return;
                        }
                        let ev = decode_event(&self.buf[self.pos..], self.profile);
                        self.pos += event_len;
                        self.frame_events += 1;
                        sink.event(ev);
                    }
                    self.complete_frame(sink);
                }
                ParseState::ReadCommand => {
                    if self.available() < COMMAND_LEN {
                        return;
                    }
                    let cmd = decode_command(&self.buf[self.pos..]);
                    self.pos += COMMAND_LEN;
                    sink.command(cmd);
                    self.complete_frame(sink);
                }
            }
        }
    }

    fn available(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Advance until a valid header sits at the read position. Returns false
    /// when more bytes are needed.
    fn scan_magic(&mut self) -> bool {
        let header_len = self.profile.header_len();
        loop {
            if self.available() < MAGIC_BYTES.len() {
                return false;
            }
            if self.buf[self.pos..self.pos + 4] != MAGIC_BYTES {
                self.resync(1);
                continue;
            }
            if self.available() < header_len {
                // Magic seen, header still arriving.
                return false;
            }
            let Some(header) = decode_header(&self.buf[self.pos..], self.profile) else {
                self.resync(1);
                continue;
            };
            if !header.is_valid() {
                // Oversized count: the magic match was coincidental.
                self.resync(1);
                continue;
            }

            self.pos += header_len;
            self.frame_index = header.frame;
            self.frame_events = 0;
            self.frame_started = Some(Instant::now());
            if header.is_command() {
                self.frame_total = 0;
                self.frame_bytes = (header_len + COMMAND_LEN) as u32;
                self.state = ParseState::ReadCommand;
            } else {
                self.frame_total = header.count;
                self.frame_bytes =
                    (header_len + usize::from(header.count) * self.profile.event_len()) as u32;
                self.state = ParseState::ReadEvents;
            }
            return true;
        }
    }

    fn complete_frame(&mut self, sink: &mut dyn ParserSink) {
        let duration_us = self
            .frame_started
            .take()
            .map_or(0, |t| t.elapsed().as_micros() as u64);
        sink.frame_complete(self.frame_events, self.frame_bytes, duration_us, self.frame_index);
        self.state = ParseState::ScanMagic;
    }

    fn resync(&mut self, n: usize) {
        self.pos += n;
        self.resyncs += n as u64;

        if self.window_started.elapsed().as_secs() >= 1 {
            self.window_started = Instant::now();
            self.window_resyncs = 0;
        }
        self.window_resyncs += n as u32;
        if self.window_resyncs > RESYNC_DISCARD_THRESHOLD {
            // Garbage flood: rescanning byte-by-byte is pointless, start over.
            self.buf.clear();
            self.pos = 0;
            self.buffer_discards += 1;
            self.window_started = Instant::now();
            self.window_resyncs = 0;
        }
    }

    fn append(&mut self, data: &[u8]) {
        if self.pos > 0 && (self.pos >= PARSE_BUF_CAP / 2 || self.buf.len() + data.len() > PARSE_BUF_CAP)
        {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(data);

        // Saturated: discard the oldest half of the unread bytes. Whatever
        // frame they belonged to is gone, so rescan from the magic.
        while self.available() > PARSE_BUF_CAP {
            let drop_n = self.available() / 2;
            self.pos += drop_n;
            self.buffer_discards += 1;
            self.state = ParseState::ScanMagic;
            self.frame_started = None;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Recent-bytes capture
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed ring of the last host bytes, write-only from the parser's side.
pub struct RecentBytes {
    buf: [u8; RECENT_BUF_SIZE],
    head: usize,
    full: bool,
    total: u64,
}

impl RecentBytes {
    fn new() -> Self {
        Self {
            buf: [0; RECENT_BUF_SIZE],
            head: 0,
            full: false,
            total: 0,
        }
    }

    fn record(&mut self, data: &[u8]) {
        for &b in data {
            self.buf[self.head] = b;
            self.head = (self.head + 1) % RECENT_BUF_SIZE;
            if self.head == 0 {
                self.full = true;
            }
        }
        self.total += data.len() as u64;
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    /// Last `n` captured bytes, oldest first.
    pub fn tail(&self, n: usize) -> Vec<u8> {
        let held = if self.full { RECENT_BUF_SIZE } else { self.head };
        let n = n.min(held);
        let mut out = Vec::with_capacity(n);
        let start = (self.head + RECENT_BUF_SIZE - n) % RECENT_BUF_SIZE;
        for i in 0..n {
            out.push(self.buf[(start + i) % RECENT_BUF_SIZE]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        encode_command, encode_event, encode_header, OP_CYCLE_MODE, OP_SET_VOICE_MASK,
    };
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<SidEvent>,
        commands: Vec<Command>,
        frames: Vec<(u32, u32, u32)>, // (events, bytes, frame_index)
    }

    impl ParserSink for RecordingSink {
        fn event(&mut self, ev: SidEvent) {
            self.events.push(ev);
        }

        fn command(&mut self, cmd: Command) {
            self.commands.push(cmd);
        }

        fn frame_complete(&mut self, events: u32, bytes: u32, _duration_us: u64, frame_index: u32) {
            self.frames.push((events, bytes, frame_index));
        }
    }

    fn make_frame(events: &[SidEvent], frame: u32, profile: WireProfile) -> Vec<u8> {
        let mut out = encode_header(events.len() as u16, frame, profile);
        for ev in events {
            out.extend_from_slice(&encode_event(ev, profile));
        }
        out
    }

    fn sample_events(n: u8) -> Vec<SidEvent> {
        (0..n)
            .map(|i| SidEvent {
                chip_mask: 0,
                addr: i,
                value: i.wrapping_mul(3),
                delta: u32::from(i) * 100,
            })
            .collect()
    }

    #[test]
    fn test_single_frame_parses() {
        let mut parser = FrameParser::new(WireProfile::Compact);
        let mut sink = RecordingSink::default();
        let events = sample_events(3);

        parser.feed(&make_frame(&events, 7, WireProfile::Compact), &mut sink);

        assert_eq!(sink.events, events);
        assert_eq!(sink.frames, vec![(3, 10 + 3 * 6, 7)]);
        assert_eq!(parser.resync_count(), 0);
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let mut parser = FrameParser::new(WireProfile::Compact);
        let mut sink = RecordingSink::default();
        let events = sample_events(4);
        let wire = make_frame(&events, 1, WireProfile::Compact);

        for b in wire {
            parser.feed(&[b], &mut sink);
        }
        assert_eq!(sink.events, events);
        assert_eq!(sink.frames.len(), 1);
    }

    #[test]
    fn test_resync_after_constant_noise() {
        let mut parser = FrameParser::new(WireProfile::Compact);
        let mut sink = RecordingSink::default();
        let events = sample_events(3);

        let mut wire = vec![0xAA; 1024];
        wire.extend_from_slice(&make_frame(&events, 9, WireProfile::Compact));
        parser.feed(&wire, &mut sink);

        // Every event of the real frame survives and none of the noise was
        // mistaken for one.
        assert_eq!(sink.events, events);
        assert_eq!(sink.frames.len(), 1);
        assert_eq!(parser.resync_count(), 1024);
    }

    #[test]
    fn test_resync_after_random_noise_between_frames() {
        let mut parser = FrameParser::new(WireProfile::Compact);
        let mut sink = RecordingSink::default();
        let first = sample_events(2);
        let second = sample_events(5);

        let mut noise = vec![0u8; 1024];
        StdRng::seed_from_u64(0x51D_D1E5).fill_bytes(&mut noise);
        // Keep the test deterministic even if the seed ever lands a magic.
        for i in 0..noise.len() - 3 {
            if noise[i..i + 4] == MAGIC_BYTES {
                noise[i] ^= 0xFF;
            }
        }

        let mut wire = make_frame(&first, 1, WireProfile::Compact);
        wire.extend_from_slice(&noise);
        wire.extend_from_slice(&make_frame(&second, 2, WireProfile::Compact));

        for chunk in wire.chunks(100) {
            parser.feed(chunk, &mut sink);
        }

        let mut expected = first.clone();
        expected.extend_from_slice(&second);
        assert_eq!(sink.events, expected);
        assert_eq!(sink.frames.len(), 2);
        assert_eq!(sink.frames[1].2, 2);
    }

    #[test]
    fn test_oversized_count_rejected_as_noise() {
        let mut parser = FrameParser::new(WireProfile::Compact);
        let mut sink = RecordingSink::default();

        let mut wire = encode_header(9000, 1, WireProfile::Compact);
        let events = sample_events(2);
        wire.extend_from_slice(&make_frame(&events, 2, WireProfile::Compact));
        parser.feed(&wire, &mut sink);

        assert_eq!(sink.events, events);
        assert_eq!(sink.frames.len(), 1);
        assert!(parser.resync_count() > 0);
    }

    #[test]
    fn test_command_frame_dispatch() {
        let mut parser = FrameParser::new(WireProfile::Compact);
        let mut sink = RecordingSink::default();

        let cmd = Command {
            opcode: OP_CYCLE_MODE,
            params: [0, 0, 0],
        };
        parser.feed(&encode_command(&cmd, WireProfile::Compact), &mut sink);

        assert_eq!(sink.commands, vec![cmd]);
        assert!(sink.events.is_empty());
        assert_eq!(sink.frames, vec![(0, 14, 0)]);
    }

    #[test]
    fn test_command_between_event_frames_keeps_order() {
        let mut parser = FrameParser::new(WireProfile::Compact);
        let mut sink = RecordingSink::default();
        let events = sample_events(2);

        let mut wire = make_frame(&events, 1, WireProfile::Compact);
        wire.extend_from_slice(&encode_command(
            &Command {
                opcode: OP_SET_VOICE_MASK,
                params: [0b101, 0, 0],
            },
            WireProfile::Compact,
        ));
        wire.extend_from_slice(&make_frame(&events, 2, WireProfile::Compact));
        parser.feed(&wire, &mut sink);

        assert_eq!(sink.events.len(), 4);
        assert_eq!(sink.commands.len(), 1);
        assert_eq!(sink.frames.len(), 3);
    }

    #[test]
    fn test_empty_event_frame_completes() {
        let mut parser = FrameParser::new(WireProfile::Compact);
        let mut sink = RecordingSink::default();
        parser.feed(&encode_header(0, 5, WireProfile::Compact), &mut sink);
        assert_eq!(sink.frames, vec![(0, 10, 5)]);
    }

    #[test]
    fn test_chip_profile_records() {
        let mut parser = FrameParser::new(WireProfile::Chip);
        let mut sink = RecordingSink::default();
        let events = vec![
            SidEvent {
                chip_mask: 0b01,
                addr: 0x0E,
                value: 0x10,
                delta: 4,
            },
            SidEvent {
                chip_mask: 0b10,
                addr: 0x0F,
                value: 0x20,
                delta: 0,
            },
        ];
        parser.feed(&make_frame(&events, 3, WireProfile::Chip), &mut sink);

        assert_eq!(sink.events, events);
        assert_eq!(sink.frames, vec![(2, 12 + 2 * 8, 3)]);
    }

    #[test]
    fn test_oversized_feed_discards_oldest_half() {
        let mut parser = FrameParser::new(WireProfile::Compact);
        let mut sink = RecordingSink::default();
        let events = sample_events(2);

        let mut wire = vec![0u8; 9000];
        wire.extend_from_slice(&make_frame(&events, 1, WireProfile::Compact));
        parser.feed(&wire, &mut sink);

        // The frame rode in at the tail and survived both halvings.
        assert_eq!(sink.events, events);
        assert!(parser.buffer_discards() >= 1);
    }

    #[test]
    fn test_garbage_flood_triggers_full_discard_then_recovers() {
        let mut parser = FrameParser::new(WireProfile::Compact);
        let mut sink = RecordingSink::default();

        // Well past the per-second resync threshold, in link-sized chunks.
        for _ in 0..20 {
            parser.feed(&[0x55; 512], &mut sink);
        }
        assert!(parser.buffer_discards() >= 1);

        let events = sample_events(3);
        parser.feed(&make_frame(&events, 4, WireProfile::Compact), &mut sink);
        assert_eq!(sink.events, events);
    }

    #[test]
    fn test_reset_drops_partial_frame() {
        let mut parser = FrameParser::new(WireProfile::Compact);
        let mut sink = RecordingSink::default();
        let events = sample_events(3);
        let wire = make_frame(&events, 1, WireProfile::Compact);

        parser.feed(&wire[..15], &mut sink); // header + half an event
        parser.reset();
        parser.feed(&wire, &mut sink);

        // Only the complete replay is delivered.
        assert_eq!(sink.events, events);
        assert_eq!(sink.frames.len(), 1);
    }

    #[test]
    fn test_recent_bytes_keeps_tail() {
        let mut parser = FrameParser::new(WireProfile::Compact);
        let mut sink = RecordingSink::default();

        for i in 0..4u8 {
            parser.feed(&[i; 200], &mut sink);
        }
        assert_eq!(parser.recent().total_bytes(), 800);
        let tail = parser.recent().tail(16);
        assert_eq!(tail, vec![3; 16]);
        // Ring holds the last 512: the oldest chunk is gone.
        let all = parser.recent().tail(RECENT_BUF_SIZE);
        assert_eq!(all.len(), RECENT_BUF_SIZE);
        assert!(!all.contains(&0));
    }
}
