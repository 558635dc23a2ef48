// Audio output: cpal stream on a dedicated thread plus the sample pump.
//
// The engine thread renders stereo frames through the pump into a bounded
// ring; the cpal callback drains it, playing silence when it runs dry. The
// ring holds three pump buffers' worth of frames, mirroring a three-buffer
// producer pool: the pump only fills when a whole buffer fits, and primes
// two buffers at startup to cover the stream's first callbacks.
//
// cpal streams are not Send, so the stream lives on its own thread for its
// whole lifetime; the spawner only gets back the device's sample rate,
// which is what the engine needs to set its cycle ratio.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::bounded;

use crate::engine::SidEngine;

/// Pump buffers per ring.
const POOL_BUFFERS: usize = 3;

pub type SampleRing = Arc<Mutex<VecDeque<(i16, i16)>>>;

pub fn new_sample_ring(capacity: usize) -> SampleRing {
    Arc::new(Mutex::new(VecDeque::with_capacity(capacity)))
}

// ─────────────────────────────────────────────────────────────────────────────
//  Output stream thread
// ─────────────────────────────────────────────────────────────────────────────

/// Start the audio output thread. Returns the sample rate the device is
/// actually running at, or the first setup error the thread hit.
pub fn spawn_audio_thread(ring: SampleRing, shutdown: Arc<AtomicBool>) -> Result<u32, String> {
    let (rate_tx, rate_rx) = bounded::<Result<u32, String>>(1);

    thread::Builder::new()
        .name("sid-audio".into())
        .spawn(move || match open_output_stream(ring) {
            Ok((stream, rate)) => {
                let _ = rate_tx.send(Ok(rate));
                // The stream plays as long as this thread holds it.
                while !shutdown.load(Ordering::Relaxed) {
                    thread::park_timeout(Duration::from_millis(100));
                }
                drop(stream);
                eprintln!("[audio] stream closed");
            }
            Err(e) => {
                let _ = rate_tx.send(Err(e));
            }
        })
        .map_err(|e| format!("spawn audio thread: {e}"))?;

    rate_rx
        .recv()
        .map_err(|_| "audio thread quit before opening a stream".to_string())?
}

/// Open the default output device and start a stereo f32 stream fed from
/// the ring. The stream runs at whatever rate the device prefers; the
/// engine renders at that rate rather than resampling.
fn open_output_stream(ring: SampleRing) -> Result<(cpal::Stream, u32), String> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or("no audio output device")?;
    let rate = device
        .default_output_config()
        .map_err(|e| format!("query output config: {e}"))?
        .sample_rate()
        .0;
    eprintln!(
        "[audio] output '{}' at {rate}Hz",
        device.name().unwrap_or_else(|_| "?".into()),
    );

    let config = cpal::StreamConfig {
        channels: 2,
        sample_rate: cpal::SampleRate(rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_output_stream(
            &config,
            move |frames: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pending = ring.lock().unwrap();
                for frame in frames.chunks_exact_mut(2) {
                    match pending.pop_front() {
                        Some((left, right)) => {
                            frame[0] = f32::from(left) / 32768.0;
                            frame[1] = f32::from(right) / 32768.0;
                        }
                        // Ring ran dry: an underrun is a moment of silence.
                        None => frame.fill(0.0),
                    }
                }
            },
            |err| eprintln!("[audio] stream error: {err}"),
            None,
        )
        .map_err(|e| format!("open stream: {e}"))?;

    stream.play().map_err(|e| format!("start stream: {e}"))?;
    Ok((stream, rate))
}

// ─────────────────────────────────────────────────────────────────────────────
//  Sample pump
// ─────────────────────────────────────────────────────────────────────────────

/// Fills the sample ring from the engine in whole-buffer units.
pub struct SamplePump {
    ring: SampleRing,
    buffer_frames: usize,
}

impl SamplePump {
    pub fn new(ring: SampleRing, buffer_frames: usize) -> Self {
        Self {
            ring,
            buffer_frames,
        }
    }

    /// Frames the ring can hold: three pump buffers.
    pub fn ring_capacity(&self) -> usize {
        self.buffer_frames * POOL_BUFFERS
    }

    /// Render one buffer of stereo frames if a free buffer slot exists.
    /// Non-blocking: returns 0 when the ring has no room for a full buffer.
    pub fn fill(&self, engine: &mut SidEngine) -> usize {
        {
            let ring = self.ring.lock().unwrap();
            if self.ring_capacity() - ring.len() < self.buffer_frames {
                return 0;
            }
        }

        // Render without holding the lock; the callback may drain meanwhile,
        // which only makes more room.
        let mut frames = Vec::with_capacity(self.buffer_frames);
        for _ in 0..self.buffer_frames {
            frames.push(engine.render_sample());
        }

        let mut ring = self.ring.lock().unwrap();
        ring.extend(frames);
        self.buffer_frames
    }

    /// Fill two buffers ahead of stream start so the first callbacks do not
    /// underrun.
    pub fn prime(&self, engine: &mut SidEngine) {
        for _ in 0..2 {
            self.fill(engine);
        }
    }

    pub fn queued_frames(&self) -> usize {
        self.ring.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::sid_cell::mock::MockCell;

    fn test_engine() -> SidEngine {
        let (a, _) = MockCell::new();
        let (b, _) = MockCell::new();
        SidEngine::new([a, b], 44_100, &Config::default())
    }

    #[test]
    fn test_fill_renders_whole_buffers() {
        let ring = new_sample_ring(64 * POOL_BUFFERS);
        let pump = SamplePump::new(ring, 64);
        let mut engine = test_engine();

        assert_eq!(pump.fill(&mut engine), 64);
        assert_eq!(pump.queued_frames(), 64);
    }

    #[test]
    fn test_prime_fills_two_buffers() {
        let ring = new_sample_ring(64 * POOL_BUFFERS);
        let pump = SamplePump::new(ring, 64);
        let mut engine = test_engine();

        pump.prime(&mut engine);
        assert_eq!(pump.queued_frames(), 128);
    }

    #[test]
    fn test_fill_is_noop_when_no_buffer_free() {
        let ring = new_sample_ring(64 * POOL_BUFFERS);
        let pump = SamplePump::new(ring.clone(), 64);
        let mut engine = test_engine();

        assert_eq!(pump.fill(&mut engine), 64);
        assert_eq!(pump.fill(&mut engine), 64);
        assert_eq!(pump.fill(&mut engine), 64);
        // Ring holds three buffers; a fourth does not fit.
        assert_eq!(pump.fill(&mut engine), 0);
        assert_eq!(pump.queued_frames(), 192);

        // Draining one buffer frees a slot again.
        {
            let mut r = ring.lock().unwrap();
            for _ in 0..64 {
                r.pop_front();
            }
        }
        assert_eq!(pump.fill(&mut engine), 64);
    }
}
