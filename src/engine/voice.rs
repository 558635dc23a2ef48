// MIDI-style voice slots for the note-on/off entry points.
//
// The raw register stream never touches these; they exist for hosts that
// embed the engine as a synth and drive it by note instead of by register.

pub const VOICE_COUNT: usize = 3;

/// Register offset between voices (freq lo of voice N is N * 7).
pub const VOICE_REG_STRIDE: u8 = 7;

pub const WAVEFORM_SAW: u8 = 0x20;
pub const GATE_BIT: u8 = 0x01;
pub const TEST_BIT: u8 = 0x08;
/// Attack 1, decay 1.
pub const ATTACK_DECAY: u8 = 0x11;
pub const RELEASE_RATE: u8 = 0x04;
pub const DEFAULT_SUSTAIN: u8 = 0x0F;

#[derive(Debug, Clone, Copy, Default)]
pub struct VoiceSlot {
    pub active: bool,
    pub note: u8,
    pub velocity: u8,
    pub generation: u32,
}

/// Slot already sounding this note, if any.
pub fn find_voice(voices: &[VoiceSlot; VOICE_COUNT], note: u8) -> Option<usize> {
    voices.iter().position(|v| v.active && v.note == note)
}

/// Pick a slot for a new note: first free slot, else steal the least
/// recently triggered one (smallest generation).
pub fn allocate_slot(voices: &[VoiceSlot; VOICE_COUNT]) -> usize {
    if let Some(free) = voices.iter().position(|v| !v.active) {
        return free;
    }
    let mut candidate = 0;
    let mut oldest = voices[0].generation;
    for (i, v) in voices.iter().enumerate().skip(1) {
        if v.generation < oldest {
            oldest = v.generation;
            candidate = i;
        }
    }
    candidate
}

/// Convert a MIDI note number to the SID's 16-bit frequency value for the
/// given chip clock: f * 2^24 / clock.
pub fn midi_note_to_sid(midi_note: u8, clock_hz: f64) -> u16 {
    let note_frequency = 440.0_f32 * 2.0_f32.powf((i32::from(midi_note) - 69) as f32 / 12.0);
    let sid_value = (f64::from(note_frequency) * 16_777_216.0) / clock_hz;
    sid_value.clamp(0.0, 65_535.0).round() as u16
}

/// Scale MIDI velocity (0..127) to a SID sustain level (0..15).
pub fn velocity_to_sustain(velocity: u8) -> u8 {
    if velocity == 0 {
        return 0;
    }
    let scaled = (u32::from(velocity) * 15 + 63) / 127;
    scaled.min(15) as u8
}
