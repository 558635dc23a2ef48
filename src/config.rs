// Runtime configuration: audio, queue sizing, wire profile, chip mode.
// Stored as flat JSON in <config_dir>/siddler/config.json; missing or
// malformed fields fall back to defaults. The socket path can also be
// overridden with the SIDDLER_SOCKET environment variable.

use std::path::PathBuf;

use crate::engine::{SidMode, PAL_CLOCK_HZ};
use crate::protocol::WireProfile;

/// Clock-scale fixed point: 1_000_000 ppm = 1.00x.
pub const CLOCK_SCALE_BASE: u32 = 1_000_000;
pub const CLOCK_SCALE_MIN: u32 = 200_000; // 0.20x
pub const CLOCK_SCALE_MAX: u32 = 3_000_000; // 3.00x

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/siddler.sock";

#[derive(Debug, Clone)]
pub struct Config {
    /// Requested output sample rate; the audio device's native rate wins.
    pub sample_rate_hz: u32,
    /// Stereo frames per pump buffer.
    pub audio_buffer_frames: usize,
    /// Capacity of the host staging queue (flow-controlled, lossy).
    pub host_queue_capacity: usize,
    /// Capacity of the engine's pending queue.
    pub engine_queue_capacity: usize,
    /// Emulated SID clock.
    pub sid_clock_hz: u32,
    /// Initial chip model mode.
    pub sid_mode: SidMode,
    /// Output gain applied before 16-bit saturation.
    pub output_gain: f32,
    /// Wire record layout expected from the host.
    pub wire_profile: WireProfile,
    /// Delta scale in ppm; 1_000_000 plays at the host's timing.
    pub clock_scale_ppm: u32,
    /// Unix socket the virtual device listens on.
    pub socket_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate_hz: 44_100,
            audio_buffer_frames: 256,
            host_queue_capacity: 4096,
            engine_queue_capacity: 8192,
            sid_clock_hz: PAL_CLOCK_HZ,
            sid_mode: SidMode::Mos6581,
            output_gain: 1.5,
            wire_profile: WireProfile::Compact,
            clock_scale_ppm: CLOCK_SCALE_BASE,
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
        }
    }
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        config_dir().map(|d| d.join("config.json"))
    }

    /// Load the config file if present; anything missing or malformed
    /// falls back to the defaults.
    pub fn load() -> Self {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(content) => Self::parse_json(&content),
                Err(e) => {
                    eprintln!("[siddler] config unreadable: {e}");
                    Self::default()
                }
            },
            _ => Self::default(),
        };

        if let Ok(path) = std::env::var("SIDDLER_SOCKET") {
            if !path.is_empty() {
                config.socket_path = path;
            }
        }

        config.sanitize();
        config
    }

    /// Write the current settings back out.
    pub fn save(&self) {
        let path = match Self::config_path() {
            Some(p) => p,
            None => return,
        };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&path, self.to_json()) {
            eprintln!("[siddler] config save failed: {e}");
        }
    }

    /// Pick known fields out of the flat JSON object, one per line;
    /// unknown keys and unparsable values are skipped.
    fn parse_json(s: &str) -> Self {
        let mut config = Self::default();

        // Flat object, one field per line; no need for a JSON dependency.
        for line in s.lines() {
            let line = line.trim().trim_end_matches(',');
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().trim_matches('"');
            let value = value.trim();
            match key {
                "sample_rate_hz" => {
                    if let Ok(n) = value.parse() {
                        config.sample_rate_hz = n;
                    }
                }
                "audio_buffer_frames" => {
                    if let Ok(n) = value.parse() {
                        config.audio_buffer_frames = n;
                    }
                }
                "host_queue_capacity" => {
                    if let Ok(n) = value.parse() {
                        config.host_queue_capacity = n;
                    }
                }
                "engine_queue_capacity" => {
                    if let Ok(n) = value.parse() {
                        config.engine_queue_capacity = n;
                    }
                }
                "sid_clock_hz" => {
                    if let Ok(n) = value.parse() {
                        config.sid_clock_hz = n;
                    }
                }
                "output_gain" => {
                    if let Ok(n) = value.parse() {
                        config.output_gain = n;
                    }
                }
                "clock_scale_ppm" => {
                    if let Ok(n) = value.parse() {
                        config.clock_scale_ppm = n;
                    }
                }
                "sid_mode" => {
                    if let Some(mode) = SidMode::from_name(value.trim_matches('"')) {
                        config.sid_mode = mode;
                    }
                }
                "wire_profile" => {
                    if let Some(profile) = WireProfile::from_name(value.trim_matches('"')) {
                        config.wire_profile = profile;
                    }
                }
                "socket_path" => {
                    let v = value.trim_matches('"');
                    if !v.is_empty() {
                        config.socket_path = v.to_string();
                    }
                }
                _ => {}
            }
        }

        config
    }

    fn to_json(&self) -> String {
        format!(
            "{{\n  \"sample_rate_hz\": {},\n  \"audio_buffer_frames\": {},\n  \
             \"host_queue_capacity\": {},\n  \"engine_queue_capacity\": {},\n  \
             \"sid_clock_hz\": {},\n  \"sid_mode\": \"{}\",\n  \
             \"output_gain\": {},\n  \"wire_profile\": \"{}\",\n  \
             \"clock_scale_ppm\": {},\n  \"socket_path\": \"{}\"\n}}\n",
            self.sample_rate_hz,
            self.audio_buffer_frames,
            self.host_queue_capacity,
            self.engine_queue_capacity,
            self.sid_clock_hz,
            self.sid_mode.name(),
            self.output_gain,
            self.wire_profile.name(),
            self.clock_scale_ppm,
            self.socket_path,
        )
    }

    /// Clamp out-of-range values rather than failing startup.
    fn sanitize(&mut self) {
        if self.sample_rate_hz == 0 {
            self.sample_rate_hz = 44_100;
        }
        if self.sid_clock_hz == 0 {
            self.sid_clock_hz = PAL_CLOCK_HZ;
        }
        self.audio_buffer_frames = self.audio_buffer_frames.clamp(32, 4096);
        self.host_queue_capacity = self.host_queue_capacity.max(1024);
        self.engine_queue_capacity = self.engine_queue_capacity.max(1024);
        self.clock_scale_ppm = self.clock_scale_ppm.clamp(CLOCK_SCALE_MIN, CLOCK_SCALE_MAX);
        if !self.output_gain.is_finite() || self.output_gain <= 0.0 {
            self.output_gain = 1.5;
        }
    }
}

/// Per-user settings directory for this app.
fn config_dir() -> Option<PathBuf> {
    let home = PathBuf::from(std::env::var_os("HOME")?);
    let base = if cfg!(target_os = "macos") {
        home.join("Library/Application Support")
    } else {
        home.join(".config")
    };
    Some(base.join("siddler"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_through_json() {
        let mut cfg = Config::default();
        cfg.sample_rate_hz = 48_000;
        cfg.sid_mode = SidMode::Split;
        cfg.wire_profile = WireProfile::Chip;
        cfg.clock_scale_ppm = 1_500_000;
        cfg.socket_path = "/tmp/other.sock".into();

        let parsed = Config::parse_json(&cfg.to_json());
        assert_eq!(parsed.sample_rate_hz, 48_000);
        assert_eq!(parsed.sid_mode, SidMode::Split);
        assert_eq!(parsed.wire_profile, WireProfile::Chip);
        assert_eq!(parsed.clock_scale_ppm, 1_500_000);
        assert_eq!(parsed.socket_path, "/tmp/other.sock");
    }

    #[test]
    fn test_unknown_and_malformed_fields_ignored() {
        let parsed = Config::parse_json(
            "{\n  \"bogus\": 1,\n  \"sample_rate_hz\": \"not a number\",\n  \
             \"sid_mode\": \"8580\"\n}\n",
        );
        assert_eq!(parsed.sample_rate_hz, 44_100);
        assert_eq!(parsed.sid_mode, SidMode::Mos8580);
    }

    #[test]
    fn test_sanitize_clamps_extremes() {
        let mut cfg = Config::default();
        cfg.clock_scale_ppm = 10;
        cfg.audio_buffer_frames = 1;
        cfg.output_gain = f32::NAN;
        cfg.sanitize();
        assert_eq!(cfg.clock_scale_ppm, CLOCK_SCALE_MIN);
        assert_eq!(cfg.audio_buffer_frames, 32);
        assert_eq!(cfg.output_gain, 1.5);
    }
}
