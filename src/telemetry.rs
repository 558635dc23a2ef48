// Per-frame counters and the shared status-line page.
//
// Telemetry is owned by the engine thread and written on the hot path;
// the only cross-thread surface is `StatusLines`, a fixed text page behind
// a short mutex. Writers copy at most one row under the lock; the display
// thread uses try_lock and falls back to its cached snapshot, so a redraw
// never stalls the engine.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const TEXT_ROWS: usize = 27;
pub const TEXT_COLS: usize = 40;

/// Throughput is averaged over a sliding one-second window.
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
//  Status lines
// ─────────────────────────────────────────────────────────────────────────────

pub type StatusPage = [[u8; TEXT_COLS]; TEXT_ROWS];

pub struct StatusLines {
    rows: Mutex<StatusPage>,
}

impl StatusLines {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new([[b' '; TEXT_COLS]; TEXT_ROWS]),
        })
    }

    pub fn clear(&self) {
        let mut rows = self.rows.lock().unwrap();
        *rows = [[b' '; TEXT_COLS]; TEXT_ROWS];
    }

    /// Write one row, truncated to the page width and space-padded.
    pub fn set_line(&self, row: usize, text: &str) {
        if row >= TEXT_ROWS {
            return;
        }
        let mut line = [b' '; TEXT_COLS];
        for (i, b) in text.bytes().take(TEXT_COLS).enumerate() {
            line[i] = b;
        }
        let mut rows = self.rows.lock().unwrap();
        rows[row] = line;
    }

    /// Non-blocking copy of the page. `None` while a writer holds the lock;
    /// the caller keeps showing its previous snapshot.
    pub fn try_snapshot(&self) -> Option<StatusPage> {
        self.rows.try_lock().ok().map(|rows| *rows)
    }
}

pub fn row_to_string(row: &[u8; TEXT_COLS]) -> String {
    let end = row
        .iter()
        .rposition(|&b| b != b' ')
        .map_or(0, |p| p + 1);
    row[..end].iter().map(|&b| b as char).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
//  Counters
// ─────────────────────────────────────────────────────────────────────────────

pub struct Telemetry {
    pub frames: u64,
    pub total_events: u64,
    pub total_bytes: u64,
    /// Sum of event deltas, i.e. elapsed stream time in SID cycles.
    pub total_cycles: u64,
    pub last_event: Option<(u32, u8, u8)>,
    pub last_parse_us: u64,

    min_frame_us: u64,
    max_frame_us: u64,
    sum_frame_us: u64,

    last_frame_at: Option<Instant>,
    pub last_gap_us: u64,

    /// Host frame index of the first frame this session; drift is measured
    /// against this sticky offset.
    frame_offset: Option<u32>,
    pub frame_drift: i64,

    window_started: Instant,
    window_bytes: u64,
    pub read_kbps: f64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            frames: 0,
            total_events: 0,
            total_bytes: 0,
            total_cycles: 0,
            last_event: None,
            last_parse_us: 0,
            min_frame_us: u64::MAX,
            max_frame_us: 0,
            sum_frame_us: 0,
            last_frame_at: None,
            frame_offset: None,
            frame_drift: 0,
            last_gap_us: 0,
            window_started: Instant::now(),
            window_bytes: 0,
            read_kbps: 0.0,
        }
    }

    pub fn record_bytes(&mut self, n: usize) {
        self.total_bytes += n as u64;
        self.window_bytes += n as u64;
        let elapsed = self.window_started.elapsed();
        if elapsed >= THROUGHPUT_WINDOW {
            self.read_kbps = (self.window_bytes as f64 * 8.0 / 1000.0) / elapsed.as_secs_f64();
            self.window_bytes = 0;
            self.window_started = Instant::now();
        }
    }

    pub fn record_event(&mut self, delta: u32, addr: u8, value: u8) {
        self.total_events += 1;
        self.total_cycles += u64::from(delta);
        self.last_event = Some((delta, addr, value));
    }

    /// Called by the parser sink on frame completion.
    pub fn record_frame(&mut self, _events: u32, _bytes: u32, duration_us: u64, frame_index: u32) {
        let now = Instant::now();
        if let Some(prev) = self.last_frame_at {
            self.last_gap_us = now.duration_since(prev).as_micros() as u64;
        }
        self.last_frame_at = Some(now);

        let offset = *self.frame_offset.get_or_insert(frame_index);
        self.frame_drift = i64::from(frame_index) - i64::from(offset) - self.frames as i64;

        self.frames += 1;
        self.last_parse_us = duration_us;
        self.min_frame_us = self.min_frame_us.min(duration_us);
        self.max_frame_us = self.max_frame_us.max(duration_us);
        self.sum_frame_us += duration_us;
    }

    pub fn min_frame_us(&self) -> u64 {
        if self.frames == 0 {
            0
        } else {
            self.min_frame_us
        }
    }

    pub fn max_frame_us(&self) -> u64 {
        self.max_frame_us
    }

    pub fn avg_frame_us(&self) -> u64 {
        if self.frames == 0 {
            0
        } else {
            self.sum_frame_us / self.frames
        }
    }

    /// Session boundary. Host detach keeps the cumulative totals so a
    /// reconnect continues the numbers; a fresh session starts from zero.
    pub fn session_reset(&mut self, preserve_totals: bool) {
        if !preserve_totals {
            self.total_events = 0;
            self.total_bytes = 0;
            self.total_cycles = 0;
            self.last_event = None;
        }
        self.frames = 0;
        self.last_parse_us = 0;
        self.min_frame_us = u64::MAX;
        self.max_frame_us = 0;
        self.sum_frame_us = 0;
        self.last_frame_at = None;
        self.last_gap_us = 0;
        self.frame_offset = None;
        self.frame_drift = 0;
        self.window_started = Instant::now();
        self.window_bytes = 0;
        self.read_kbps = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_monotonic() {
        let mut t = Telemetry::new();
        let mut prev = (0u64, 0u64, 0u64);
        for i in 0..100u32 {
            t.record_bytes(16);
            t.record_event(i, 0x18, 0x0F);
            t.record_frame(1, 16, 10, i);
            assert!(t.total_events >= prev.0);
            assert!(t.total_bytes >= prev.1);
            assert!(t.frames >= prev.2);
            prev = (t.total_events, t.total_bytes, t.frames);
        }
        assert_eq!(t.total_events, 100);
        assert_eq!(t.total_bytes, 1600);
        assert_eq!(t.frames, 100);
    }

    #[test]
    fn test_drift_uses_sticky_offset() {
        let mut t = Telemetry::new();
        // Host starts numbering at 1000: no drift while indices are dense.
        t.record_frame(0, 0, 1, 1000);
        assert_eq!(t.frame_drift, 0);
        t.record_frame(0, 0, 1, 1001);
        assert_eq!(t.frame_drift, 0);
        // Host skipped two frames.
        t.record_frame(0, 0, 1, 1004);
        assert_eq!(t.frame_drift, 2);
    }

    #[test]
    fn test_frame_duration_stats() {
        let mut t = Telemetry::new();
        for (i, us) in [40u64, 10, 70].into_iter().enumerate() {
            t.record_frame(0, 0, us, i as u32);
        }
        assert_eq!(t.min_frame_us(), 10);
        assert_eq!(t.max_frame_us(), 70);
        assert_eq!(t.avg_frame_us(), 40);
        assert_eq!(t.last_parse_us, 70);
    }

    #[test]
    fn test_session_reset_modes() {
        let mut t = Telemetry::new();
        t.record_bytes(100);
        t.record_event(5, 1, 2);
        t.record_frame(1, 100, 3, 7);

        t.session_reset(true);
        assert_eq!(t.total_bytes, 100);
        assert_eq!(t.total_events, 1);
        assert_eq!(t.frames, 0);

        t.session_reset(false);
        assert_eq!(t.total_bytes, 0);
        assert_eq!(t.total_events, 0);
    }

    #[test]
    fn test_status_lines_truncate_and_pad() {
        let status = StatusLines::new();
        status.set_line(0, "short");
        let long = "x".repeat(TEXT_COLS + 10);
        status.set_line(1, &long);
        status.set_line(TEXT_ROWS, "out of range"); // ignored

        let page = status.try_snapshot().unwrap();
        assert_eq!(row_to_string(&page[0]), "short");
        assert_eq!(row_to_string(&page[1]).len(), TEXT_COLS);
        assert_eq!(row_to_string(&page[2]), "");
    }

    #[test]
    fn test_snapshot_reflects_latest_writes() {
        let status = StatusLines::new();
        status.set_line(3, "first");
        status.set_line(3, "second");
        let page = status.try_snapshot().unwrap();
        assert_eq!(row_to_string(&page[3]), "second");
        status.clear();
        let page = status.try_snapshot().unwrap();
        assert_eq!(row_to_string(&page[3]), "");
    }
}
