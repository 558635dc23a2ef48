//! Virtual Siddler device: a SID register-event pipeline and audio engine.
//!
//! Hosts stream FDIS-framed SID register writes (plus out-of-band control
//! commands) to the device; the engine delivers each write to a pair of
//! emulated SID chips at the exact SID-clock cycle it becomes due and
//! renders synchronized stereo PCM.
//!
//! The pipeline, back to front:
//! - [`transport`]: the USB-CDC stand-in, a Unix-socket host link with the
//!   READY handshake and non-blocking, flow-gated reads.
//! - [`parser`]: resynchronizing frame parser; survives arbitrary garbage
//!   on the wire by byte-sliding back to the frame magic.
//! - [`pipeline`]: routes parsed events into the lossy host staging queue,
//!   commands into the engine, and frame stats into telemetry; drains the
//!   staging queue into the engine with clock scaling.
//! - [`engine`]: the cycle-accurate scheduler over two [`sid_cell::SidCell`]s,
//!   one stereo sample per call.
//! - [`audio`]: cpal output stream and the whole-buffer sample pump.
//! - [`flow`], [`telemetry`]: watermark flow control and the status page.
//!
//! Overload never fails hard: full queues drop their oldest event and fold
//! its delta into the successor, so scheduled time stays aligned and every
//! loss is counted.

pub mod audio;
pub mod config;
pub mod engine;
pub mod flow;
pub mod parser;
pub mod pipeline;
pub mod protocol;
pub mod sid_cell;
pub mod telemetry;
#[cfg(unix)]
pub mod transport;
