// SID cell contract and the resid-rs backed implementation.
//
// The engine only ever talks to `SidCell`, so any cycle-accurate SID
// emulator can sit behind it; tests use a write/cycle-recording mock.

use resid::{ChipModel, SamplingMethod, Sid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellModel {
    Mos6581,
    Mos8580,
}

impl CellModel {
    fn to_resid(self) -> ChipModel {
        match self {
            CellModel::Mos6581 => ChipModel::Mos6581,
            CellModel::Mos8580 => ChipModel::Mos8580,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CellModel::Mos6581 => "6581",
            CellModel::Mos8580 => "8580",
        }
    }
}

/// Register file and envelope snapshot for the monitor view.
#[derive(Debug, Clone, Copy, Default)]
pub struct CellState {
    pub registers: [u8; 32],
    pub envelope: [u8; 3],
}

/// One emulated SID chip. All operations are synchronous and non-blocking.
pub trait SidCell: Send {
    /// Commit a register write. `addr` is already masked to 5 bits.
    fn write(&mut self, addr: u8, value: u8);
    /// Advance internal state by exactly `cycles` SID clocks.
    fn clock(&mut self, cycles: u32);
    /// Current audio sample. Nominally 16-bit but may exceed; callers clamp.
    fn output(&self) -> i32;
    fn set_chip_model(&mut self, model: CellModel);
    fn reset(&mut self);
    fn enable_filter(&mut self, enabled: bool);
    fn enable_external_filter(&mut self, enabled: bool);
    fn set_sampling_parameters(&mut self, clock_hz: u32, sample_rate_hz: u32);
    fn read_state(&self) -> CellState;
}

// resid::Sid holds an Rc internally and is therefore !Send. The cell is
// owned by exactly one thread (the engine's), so asserting Send is sound.
struct SendSid(Sid);
unsafe impl Send for SendSid {}

/// `SidCell` backed by resid-rs. The crate fixes the chip model at
/// construction, so a model change rebuilds the inner `Sid` and replays the
/// stored sampling parameters and filter switches.
pub struct ResidCell {
    sid: SendSid,
    model: CellModel,
    clock_hz: u32,
    sample_rate_hz: u32,
    filter: bool,
    ext_filter: bool,
}

impl ResidCell {
    pub fn new(model: CellModel, clock_hz: u32, sample_rate_hz: u32) -> Self {
        let mut cell = Self {
            sid: SendSid(Sid::new(model.to_resid())),
            model,
            clock_hz,
            sample_rate_hz,
            filter: true,
            ext_filter: true,
        };
        cell.apply_parameters();
        cell
    }

    fn apply_parameters(&mut self) {
        self.sid.0.set_sampling_parameters(
            SamplingMethod::Fast,
            self.clock_hz,
            self.sample_rate_hz,
        );
        self.sid.0.enable_filter(self.filter);
        self.sid.0.enable_external_filter(self.ext_filter);
    }
}

impl SidCell for ResidCell {
    fn write(&mut self, addr: u8, value: u8) {
        self.sid.0.write(addr, value);
    }

    fn clock(&mut self, cycles: u32) {
        self.sid.0.clock_delta(cycles);
    }

    fn output(&self) -> i32 {
        i32::from(self.sid.0.output())
    }

    fn set_chip_model(&mut self, model: CellModel) {
        if model == self.model {
            return;
        }
        self.model = model;
        self.sid = SendSid(Sid::new(model.to_resid()));
        self.apply_parameters();
    }

    fn reset(&mut self) {
        self.sid.0.reset();
    }

    fn enable_filter(&mut self, enabled: bool) {
        self.filter = enabled;
        self.sid.0.enable_filter(enabled);
    }

    fn enable_external_filter(&mut self, enabled: bool) {
        self.ext_filter = enabled;
        self.sid.0.enable_external_filter(enabled);
    }

    fn set_sampling_parameters(&mut self, clock_hz: u32, sample_rate_hz: u32) {
        self.clock_hz = clock_hz;
        self.sample_rate_hz = sample_rate_hz;
        self.sid
            .0
            .set_sampling_parameters(SamplingMethod::Fast, clock_hz, sample_rate_hz);
    }

    fn read_state(&self) -> CellState {
        let state = self.sid.0.read_state();
        let mut out = CellState::default();
        out.registers.copy_from_slice(&state.sid_register);
        out.envelope.copy_from_slice(&state.envelope_counter);
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Test mock
// ─────────────────────────────────────────────────────────────────────────────
