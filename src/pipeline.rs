// Glue between the parser and the engine: event routing, control-command
// application, and the staged drain from the host queue into the engine.
//
// Commands never enter the host queue; they apply the moment their frame
// completes. Events are staged in the lossy host ring where flow control
// can see them, then moved into the engine until its pending queue is deep
// enough.

use crate::config::CLOCK_SCALE_BASE;
use crate::engine::event_queue::{EventQueue, SidEvent};
use crate::engine::SidEngine;
use crate::flow::FlowController;
use crate::parser::ParserSink;
use crate::protocol::{Command, OP_CYCLE_MODE, OP_SET_FILTER, OP_SET_VOICE_MASK};
use crate::telemetry::Telemetry;

/// Stop draining the host queue while the engine's own queue is this deep.
pub const ENGINE_QUEUE_HIGH_WATER: usize = 6000;

/// Routes parser output: events into the host staging queue, commands
/// straight into the engine, frame stats into telemetry.
pub struct EventRouter<'a> {
    pub host_queue: &'a mut EventQueue,
    pub engine: &'a mut SidEngine,
    pub flow: &'a mut FlowController,
    pub telemetry: &'a mut Telemetry,
}

impl ParserSink for EventRouter<'_> {
    fn event(&mut self, ev: SidEvent) {
        self.telemetry.record_event(ev.delta, ev.addr, ev.value);
        self.host_queue.push(ev);
        self.flow.update(self.host_queue.depth());
    }

    fn command(&mut self, cmd: Command) {
        apply_command(self.engine, &cmd);
    }

    fn frame_complete(&mut self, events: u32, bytes: u32, duration_us: u64, frame_index: u32) {
        self.telemetry
            .record_frame(events, bytes, duration_us, frame_index);
    }
}

pub fn apply_command(engine: &mut SidEngine, cmd: &Command) {
    match cmd.opcode {
        OP_CYCLE_MODE => {
            let mode = engine.cycle_mode();
            eprintln!("[siddler] mode {}", mode.name());
        }
        OP_SET_VOICE_MASK => engine.set_voice_mask(cmd.params[0]),
        OP_SET_FILTER => engine.set_filter_writes(cmd.params[0] != 0),
        // Unknown opcodes already consumed their record; ignore.
        _ => {}
    }
}

/// Scale an event delta by the configured clock scale. Nonzero deltas never
/// round to zero, so event ordering survives extreme slowdown.
pub fn scale_delta_cycles(delta: u32, scale_ppm: u32) -> u32 {
    if delta == 0 || scale_ppm == CLOCK_SCALE_BASE {
        return delta;
    }
    let scaled = (u64::from(delta) * u64::from(scale_ppm) + u64::from(CLOCK_SCALE_BASE) / 2)
        / u64::from(CLOCK_SCALE_BASE);
    scaled.clamp(1, u64::from(u32::MAX)) as u32
}

/// Move events from the host staging queue into the engine until the
/// engine's pending queue is deep enough.
pub fn service_host_queue(
    host_queue: &mut EventQueue,
    engine: &mut SidEngine,
    flow: &mut FlowController,
    scale_ppm: u32,
) {
    while host_queue.peek().is_some() {
        if engine.queue_depth() > ENGINE_QUEUE_HIGH_WATER {
            break;
        }
        let Some(ev) = host_queue.pop() else {
            break;
        };
        let delta = scale_delta_cycles(ev.delta, scale_ppm);
        engine.queue_event(ev.chip_mask, ev.addr, ev.value, delta);
        flow.update(host_queue.depth());
    }
}
