// SID engine: two emulated SID cells driven by a cycle-timed event queue.
//
// `render_sample` produces one stereo PCM frame per call, reconciling the
// SID clock domain (~985248 Hz PAL) with the audio sample rate by carrying
// the fractional cycles-per-sample remainder across samples. Pending events
// fire at the exact cycle they become due; a chain of zero-delta events is
// applied in insertion order with no clocking in between.

pub mod event_queue;
pub mod voice;

use crate::config::Config;
use crate::sid_cell::{CellModel, SidCell};
use event_queue::{EventQueue, SidEvent};
use voice::{
    allocate_slot, find_voice, midi_note_to_sid, velocity_to_sustain, VoiceSlot, ATTACK_DECAY,
    DEFAULT_SUSTAIN, GATE_BIT, RELEASE_RATE, TEST_BIT, VOICE_COUNT, VOICE_REG_STRIDE,
    WAVEFORM_SAW,
};

/// PAL C64 clock.
pub const PAL_CLOCK_HZ: u32 = 985_248;

/// Filter registers (cutoff lo/hi, resonance/routing, mode/volume). Writes
/// here are gated by the SET_FILTER control command.
const FILTER_ADDR_MIN: u8 = 0x15;
const FILTER_ADDR_MAX: u8 = 0x18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidMode {
    Mos6581,
    Mos8580,
    /// 6581 on the left cell, 8580 on the right.
    Split,
}

impl SidMode {
    pub fn cycled(self) -> SidMode {
        match self {
            SidMode::Mos6581 => SidMode::Mos8580,
            SidMode::Mos8580 => SidMode::Split,
            SidMode::Split => SidMode::Mos6581,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SidMode::Mos6581 => "6581",
            SidMode::Mos8580 => "8580",
            SidMode::Split => "6581+8580",
        }
    }

    pub fn from_name(name: &str) -> Option<SidMode> {
        match name {
            "6581" => Some(SidMode::Mos6581),
            "8580" => Some(SidMode::Mos8580),
            "split" | "6581+8580" => Some(SidMode::Split),
            _ => None,
        }
    }

    fn models(self) -> (CellModel, CellModel) {
        match self {
            SidMode::Mos6581 => (CellModel::Mos6581, CellModel::Mos6581),
            SidMode::Mos8580 => (CellModel::Mos8580, CellModel::Mos8580),
            SidMode::Split => (CellModel::Mos6581, CellModel::Mos8580),
        }
    }
}

/// Snapshot of the left cell's voices and filter for the status view.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineMonitor {
    pub voice_freq: [u16; 3],
    pub voice_control: [u8; 3],
    pub voice_envelope: [u8; 3],
    pub filter_cutoff: u16,
    pub filter_resonance: u8,
    pub filter_mode: u8,
}

pub struct SidEngine {
    cells: [Box<dyn SidCell>; 2],
    queue: EventQueue,
    voices: [VoiceSlot; VOICE_COUNT],
    voice_generation: u32,
    mode: SidMode,
    /// Bit i set = voice i muted; register writes to that voice are dropped.
    voice_mute_mask: u8,
    /// When false, writes to the filter registers 0x15..0x18 are dropped.
    filter_writes: bool,
    sample_rate_hz: u32,
    clock_hz: u32,
    cycles_per_sample: f64,
    cycle_residual: f64,
    output_gain: f32,
}

impl SidEngine {
    pub fn new(cells: [Box<dyn SidCell>; 2], sample_rate_hz: u32, cfg: &Config) -> Self {
        let sample_rate_hz = if sample_rate_hz == 0 { 44_100 } else { sample_rate_hz };
        let mut engine = Self {
            cells,
            queue: EventQueue::new(cfg.engine_queue_capacity),
            voices: [VoiceSlot::default(); VOICE_COUNT],
            voice_generation: 0,
            mode: cfg.sid_mode,
            voice_mute_mask: 0,
            filter_writes: true,
            sample_rate_hz,
            clock_hz: cfg.sid_clock_hz,
            cycles_per_sample: 0.0,
            cycle_residual: 0.0,
            output_gain: cfg.output_gain,
        };
        engine.init_cells();
        engine
    }

    /// Reinitialize both cells with the current per-channel models and write
    /// the default register state: saw voices gated off, filter registers
    /// zeroed, volume at maximum. The pending queue is left untouched.
    fn init_cells(&mut self) {
        self.cycles_per_sample = f64::from(self.clock_hz) / f64::from(self.sample_rate_hz);
        self.cycle_residual = 0.0;

        let (left, right) = self.mode.models();
        for (ch, model) in [left, right].into_iter().enumerate() {
            let cell = &mut self.cells[ch];
            cell.set_chip_model(model);
            cell.reset();
            cell.enable_filter(false);
            cell.enable_external_filter(false);
            cell.set_sampling_parameters(self.clock_hz, self.sample_rate_hz);

            for voice in 0..VOICE_COUNT as u8 {
                let base = voice * VOICE_REG_STRIDE;
                cell.write(base, 0); // frequency low
                cell.write(base + 1, 0); // frequency high
                cell.write(base + 2, 0); // pulse width low
                cell.write(base + 3, 0x08); // pulse width high (50%)
                cell.write(base + 4, WAVEFORM_SAW); // waveform, gate off
                cell.write(base + 5, ATTACK_DECAY);
                cell.write(base + 6, (DEFAULT_SUSTAIN << 4) | RELEASE_RATE);
            }

            cell.write(0x15, 0x00); // filter cutoff low
            cell.write(0x16, 0x00); // filter cutoff high
            cell.write(0x17, 0x00); // resonance / routing disabled
            cell.write(0x18, 0x0F); // volume max, no filter
        }

        self.voices = [VoiceSlot::default(); VOICE_COUNT];
    }

    /// Full reinitialization for a new host session: cells, voices and the
    /// pending queue.
    pub fn reset(&mut self) {
        self.init_cells();
        self.reset_queue_state();
    }

    pub fn reset_queue_state(&mut self) {
        self.queue.reset();
        self.cycle_residual = 0.0;
    }

    // ── Scheduling ───────────────────────────────────────────────────────

    /// Append a pending event. A full queue drops its oldest entry and folds
    /// the lost delta into the new head, preserving total elapsed cycles.
    pub fn queue_event(&mut self, chip_mask: u8, addr: u8, value: u8, delta_cycles: u32) {
        self.queue.push(SidEvent {
            chip_mask,
            addr,
            value,
            delta: delta_cycles,
        });
    }

    /// Produce one stereo PCM frame, advancing both cells by the number of
    /// SID cycles this sample spans and firing any events that come due.
    pub fn render_sample(&mut self) -> (i16, i16) {
        self.cycle_residual += self.cycles_per_sample;
        let mut cycles = self.cycle_residual as u32;
        self.cycle_residual -= f64::from(cycles);
        if cycles < 1 {
            // Sample rates above the SID clock would otherwise stall.
            cycles = 1;
            self.cycle_residual = 0.0;
        }

        self.drain_zero_delta();

        while cycles > 0 {
            let run = cycles.min(self.queue.cycles_to_next());
            for cell in &mut self.cells {
                cell.clock(run);
            }
            cycles -= run;

            if !self.queue.is_empty() {
                self.queue.advance(run);
                if self.queue.cycles_to_next() == 0 {
                    if let Some(ev) = self.queue.pop() {
                        self.apply_event(&ev);
                    }
                    self.drain_zero_delta();
                }
            }
        }

        let gain = self.output_gain;
        let amplify = |sample: i32| -> i16 {
            let scaled = (sample as f32 * gain) as i32;
            scaled.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
        };
        (
            amplify(self.cells[0].output()),
            amplify(self.cells[1].output()),
        )
    }

    fn drain_zero_delta(&mut self) {
        while !self.queue.is_empty() && self.queue.cycles_to_next() == 0 {
            if let Some(ev) = self.queue.pop() {
                self.apply_event(&ev);
            }
        }
    }

    fn apply_event(&mut self, ev: &SidEvent) {
        let mut mask = ev.chip_mask & 0x3;
        if mask == 0 {
            mask = 0x3; // broadcast to both cells
        }
        let addr = ev.addr & 0x1F;
        if !self.write_allowed(addr) {
            return;
        }
        if mask & 0x1 != 0 {
            self.cells[0].write(addr, ev.value);
        }
        if mask & 0x2 != 0 {
            self.cells[1].write(addr, ev.value);
        }
    }

    fn write_allowed(&self, addr: u8) -> bool {
        if !self.filter_writes && (FILTER_ADDR_MIN..=FILTER_ADDR_MAX).contains(&addr) {
            return false;
        }
        if let Some(voice) = voice_index_from_addr(addr) {
            if self.voice_mute_mask & (1 << voice) != 0 {
                return false;
            }
        }
        true
    }

    // ── Control policy ───────────────────────────────────────────────────

    /// Advance through {6581, 8580, split}, reinitializing the cells but
    /// keeping the pending queue.
    pub fn cycle_mode(&mut self) -> SidMode {
        self.mode = self.mode.cycled();
        self.init_cells();
        self.mode
    }

    pub fn set_voice_mask(&mut self, mask: u8) {
        self.voice_mute_mask = mask & 0x07;
    }

    pub fn set_filter_writes(&mut self, enabled: bool) {
        self.filter_writes = enabled;
    }

    // ── MIDI voice path ──────────────────────────────────────────────────

    pub fn note_on(&mut self, midi_note: u8, velocity: u8) {
        let slot = find_voice(&self.voices, midi_note)
            .unwrap_or_else(|| allocate_slot(&self.voices));

        self.voice_generation = self.voice_generation.wrapping_add(1);
        self.voices[slot] = VoiceSlot {
            active: true,
            note: midi_note,
            velocity,
            generation: self.voice_generation,
        };

        let sid_freq = midi_note_to_sid(midi_note, f64::from(self.clock_hz));
        let sustain = velocity_to_sustain(velocity);
        let base = slot as u8 * VOICE_REG_STRIDE;

        for cell in &mut self.cells {
            // Strobe TEST to restart the oscillator before retriggering.
            cell.write(base + 4, TEST_BIT);
            cell.write(base + 4, 0x00);

            cell.write(base, (sid_freq & 0xFF) as u8);
            cell.write(base + 1, (sid_freq >> 8) as u8);
            cell.write(base + 6, (sustain << 4) | RELEASE_RATE);

            cell.write(base + 4, WAVEFORM_SAW | GATE_BIT);
        }
    }

    pub fn note_off(&mut self, midi_note: u8) {
        let Some(slot) = find_voice(&self.voices, midi_note) else {
            return;
        };
        let base = slot as u8 * VOICE_REG_STRIDE;
        for cell in &mut self.cells {
            cell.write(base + 4, WAVEFORM_SAW); // clear gate, keep waveform
        }
        self.voices[slot].active = false;
    }

    // ── Introspection ────────────────────────────────────────────────────

    pub fn mode(&self) -> SidMode {
        self.mode
    }

    pub fn voice_mute_mask(&self) -> u8 {
        self.voice_mute_mask
    }

    pub fn filter_writes(&self) -> bool {
        self.filter_writes
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn dropped_event_count(&self) -> u32 {
        self.queue.dropped_count()
    }

    pub fn queued_cycles(&self) -> u64 {
        self.queue.queued_cycles()
    }

    pub fn cycles_to_next(&self) -> u32 {
        self.queue.cycles_to_next()
    }

    pub fn queue_snapshot(&self, max: usize) -> Vec<SidEvent> {
        self.queue.snapshot(max)
    }

    /// Left cell's voice and filter state for the status view.
    pub fn monitor(&self) -> EngineMonitor {
        let state = self.cells[0].read_state();
        let mut out = EngineMonitor::default();
        for voice in 0..3 {
            let base = voice * usize::from(VOICE_REG_STRIDE);
            out.voice_freq[voice] =
                u16::from(state.registers[base + 1]) << 8 | u16::from(state.registers[base]);
            out.voice_control[voice] = state.registers[base + 4];
            out.voice_envelope[voice] = state.envelope[voice];
        }
        out.filter_cutoff = (u16::from(state.registers[0x16] & 0x7F) << 3)
            | u16::from(state.registers[0x15] & 0x07);
        out.filter_resonance = (state.registers[0x17] >> 4) & 0x0F;
        out.filter_mode = state.registers[0x17] & 0x0F;
        out
    }

    #[cfg(test)]
    fn residual(&self) -> f64 {
        self.cycle_residual
    }
}

fn voice_index_from_addr(addr: u8) -> Option<usize> {
    match addr {
        0x00..=0x06 => Some(0),
        0x07..=0x0D => Some(1),
        0x0E..=0x14 => Some(2),
        _ => None,
    }
}
