// Siddler: a virtual SID playback device.
//
// Hosts connect over a Unix socket (the USB-CDC stand-in), receive the
// READY handshake and stream FDIS frames. The engine thread runs the
// cooperative loop (audio first, then queue service, then link
// maintenance) while the main thread redraws a text status page from the
// shared status lines.

#[cfg(not(unix))]
fn main() {
    eprintln!("siddler needs a Unix-domain-socket host link and only runs on Unix.");
    std::process::exit(1);
}

#[cfg(unix)]
fn main() {
    unix_main::run();
}

#[cfg(unix)]
mod unix_main {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use crossbeam_channel::{bounded, Receiver, TryRecvError};

    use siddler::audio::{new_sample_ring, spawn_audio_thread, SamplePump, SampleRing};
    use siddler::config::{Config, CLOCK_SCALE_BASE};
    use siddler::engine::event_queue::{EventQueue, NO_PENDING};
    use siddler::engine::SidEngine;
    use siddler::flow::FlowController;
    use siddler::parser::FrameParser;
    use siddler::pipeline::{service_host_queue, EventRouter};
    use siddler::sid_cell::{CellModel, ResidCell, SidCell};
    use siddler::telemetry::{row_to_string, StatusLines, Telemetry, TEXT_COLS, TEXT_ROWS};
    use siddler::transport::{
        HostLink, LinkState, ReadOutcome, MAX_CHUNKS_PER_POLL, READ_CHUNK,
    };

    /// Status page refresh period (10 Hz).
    const STATUS_PERIOD: Duration = Duration::from_millis(100);

    const DISPLAY_PERIOD: Duration = Duration::from_millis(200);

    enum EngineCmd {
        Quit,
    }

    pub fn run() {
        let cfg = Config::load();
        eprintln!(
            "[siddler] config: rate={}Hz buf={} queues={}/{} mode={} gain={} profile={}",
            cfg.sample_rate_hz,
            cfg.audio_buffer_frames,
            cfg.host_queue_capacity,
            cfg.engine_queue_capacity,
            cfg.sid_mode.name(),
            cfg.output_gain,
            cfg.wire_profile.name(),
        );

        let ring = new_sample_ring(cfg.audio_buffer_frames * 3);
        let audio_shutdown = Arc::new(AtomicBool::new(false));
        let sample_rate = match spawn_audio_thread(ring.clone(), audio_shutdown.clone()) {
            Ok(rate) => rate,
            Err(e) => {
                eprintln!("[siddler] audio init failed: {e}");
                std::process::exit(1);
            }
        };

        let status = StatusLines::new();
        let (cmd_tx, cmd_rx) = bounded::<EngineCmd>(4);

        let engine_status = status.clone();
        let engine_cfg = cfg.clone();
        let engine_thread = thread::Builder::new()
            .name("sid-engine".into())
            .spawn(move || {
                engine_loop(engine_cfg, sample_rate, ring, engine_status, cmd_rx);
            })
            .expect("engine thread spawn failed");

        display_loop(&status);

        // Status output is gone (terminal closed): shut the pipeline down.
        let _ = cmd_tx.send(EngineCmd::Quit);
        let _ = engine_thread.join();
        audio_shutdown.store(true, Ordering::Relaxed);
    }

    // ── Display (render context) ─────────────────────────────────────────

    /// Redraw the status page from a snapshot. Uses try_lock through
    /// `try_snapshot`; when the engine holds the lock we keep the previous
    /// page, so drawing never blocks the audio path. Returns when stdout
    /// stops accepting output.
    fn display_loop(status: &StatusLines) {
        use std::io::Write as _;

        let mut cached = [[b' '; TEXT_COLS]; TEXT_ROWS];
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if write!(out, "\x1b[2J").is_err() {
            return;
        }
        loop {
            if let Some(page) = status.try_snapshot() {
                cached = page;
            }
            let mut text = String::with_capacity(TEXT_ROWS * 48);
            text.push_str("\x1b[H");
            for row in &cached {
                text.push_str(&row_to_string(row));
                text.push_str("\x1b[K\n");
            }
            if out
                .write_all(text.as_bytes())
                .and_then(|_| out.flush())
                .is_err()
            {
                return;
            }
            thread::sleep(DISPLAY_PERIOD);
        }
    }

    // ── Engine loop (event/audio context) ────────────────────────────────

    fn engine_loop(
        cfg: Config,
        sample_rate: u32,
        ring: SampleRing,
        status: Arc<StatusLines>,
        cmd_rx: Receiver<EngineCmd>,
    ) {
        let cells: [Box<dyn SidCell>; 2] = [
            Box::new(ResidCell::new(
                CellModel::Mos6581,
                cfg.sid_clock_hz,
                sample_rate,
            )),
            Box::new(ResidCell::new(
                CellModel::Mos6581,
                cfg.sid_clock_hz,
                sample_rate,
            )),
        ];
        let mut engine = SidEngine::new(cells, sample_rate, &cfg);
        let mut host_queue = EventQueue::new(cfg.host_queue_capacity);
        let mut parser = FrameParser::new(cfg.wire_profile);
        let mut flow = FlowController::new(host_queue.capacity());
        let mut telemetry = Telemetry::new();
        let pump = SamplePump::new(ring, cfg.audio_buffer_frames);

        let mut link = match HostLink::bind(&cfg.socket_path) {
            Ok(l) => l,
            Err(e) => {
                eprintln!("[siddler] {e}");
                return;
            }
        };

        pump.prime(&mut engine);
        eprintln!("[siddler] engine up at {sample_rate}Hz");

        let mut read_buf = [0u8; READ_CHUNK];
        let mut next_status = Instant::now();

        loop {
            // 1) Audio first: the SID pair gets priority over everything.
            let rendered = pump.fill(&mut engine);

            // 2) Feed the engine queue from the host staging queue.
            service_host_queue(&mut host_queue, &mut engine, &mut flow, cfg.clock_scale_ppm);

            // 3) Link maintenance.
            let mut received = 0usize;
            match link.state() {
                LinkState::Disconnected => {
                    link.poll_accept();
                }
                LinkState::AwaitingHandshake => {
                    // New session: clean slate for parser, queues and SIDs.
                    parser.reset();
                    host_queue.reset();
                    flow.reset();
                    engine.reset();
                    telemetry.session_reset(false);
                    link.send_ready();
                }
                LinkState::Streaming => {
                    // 4) Pull host bytes, bounded, honoring flow control.
                    let mut chunks = 0;
                    while flow.may_read() && chunks < MAX_CHUNKS_PER_POLL {
                        match link.read_chunk(&mut read_buf) {
                            ReadOutcome::Data(n) => {
                                telemetry.record_bytes(n);
                                let mut sink = EventRouter {
                                    host_queue: &mut host_queue,
                                    engine: &mut engine,
                                    flow: &mut flow,
                                    telemetry: &mut telemetry,
                                };
                                parser.feed(&read_buf[..n], &mut sink);
                                received += n;
                                chunks += 1;
                            }
                            ReadOutcome::Empty => break,
                            ReadOutcome::Disconnected => {
                                // Host gone: clear transport state but keep
                                // the SIDs sounding as they were.
                                parser.reset();
                                host_queue.reset();
                                flow.reset();
                                engine.reset_queue_state();
                                telemetry.session_reset(true);
                                break;
                            }
                        }
                    }
                }
            }

            // 5) Front-end commands.
            match cmd_rx.try_recv() {
                Ok(EngineCmd::Quit) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            // 6) Status page at 10 Hz.
            let now = Instant::now();
            if now >= next_status {
                update_status_page(
                    &status, &telemetry, &engine, &host_queue, &flow, &parser, &link, &cfg,
                );
                next_status = now + STATUS_PERIOD;
            }

            // Idle: ring full and nothing on the wire.
            if rendered == 0 && received == 0 {
                thread::sleep(Duration::from_micros(500));
            }
        }

        eprintln!("[siddler] engine loop stopped");
    }

    // ── Status page ──────────────────────────────────────────────────────

    fn effective_clock_hz(cfg: &Config) -> u64 {
        (u64::from(cfg.sid_clock_hz) * u64::from(cfg.clock_scale_ppm)
            + u64::from(CLOCK_SCALE_BASE) / 2)
            / u64::from(CLOCK_SCALE_BASE)
    }

    #[allow(clippy::too_many_arguments)]
    fn update_status_page(
        status: &StatusLines,
        t: &Telemetry,
        engine: &SidEngine,
        host_queue: &EventQueue,
        flow: &FlowController,
        parser: &FrameParser,
        link: &HostLink,
        cfg: &Config,
    ) {
        let clock = effective_clock_hz(cfg).max(1);
        let seconds = t.total_cycles / clock;
        let millis = (t.total_cycles % clock) * 1000 / clock;

        status.set_line(0, &format!("SIDDLER [{}]", link.state().name()));
        status.set_line(
            1,
            &format!("Events:{:10}  Bytes:{:10}", t.total_events, t.total_bytes),
        );
        status.set_line(2, &format!("Time  : {seconds:5}.{millis:03}s"));
        match t.last_event {
            Some((delta, addr, value)) => status.set_line(
                3,
                &format!("Last  : d={delta:<6} addr=${addr:02X} val=${value:02X}"),
            ),
            None => status.set_line(3, "Last  : -"),
        }
        status.set_line(
            4,
            &format!(
                "Clock : {:3}.{:02}%  {:7} Hz",
                cfg.clock_scale_ppm / 10_000,
                (cfg.clock_scale_ppm / 100) % 100,
                effective_clock_hz(cfg),
            ),
        );
        status.set_line(
            5,
            &format!(
                "USBQ  : {:4} (max {:4}) cyc={:8} {}",
                host_queue.depth(),
                host_queue.peak_depth(),
                host_queue.queued_cycles(),
                if flow.is_paused() { "HALT" } else { "OK" },
            ),
        );
        match host_queue.peek() {
            Some(ev) => status.set_line(
                6,
                &format!(
                    "USBQ>> : +{:6} addr ${:02X} = ${:02X}",
                    ev.delta, ev.addr, ev.value,
                ),
            ),
            None => status.set_line(6, "USBQ>> : empty"),
        }
        let next = engine.cycles_to_next();
        status.set_line(
            7,
            &format!(
                "SIDQ  : depth={:4} drop={:4} next={}",
                engine.queue_depth(),
                engine.dropped_event_count(),
                if next == NO_PENDING {
                    "-".to_string()
                } else {
                    next.to_string()
                },
            ),
        );
        status.set_line(
            8,
            &format!(
                "Frames: {:8} drift={:+4} gap={}us",
                t.frames, t.frame_drift, t.last_gap_us,
            ),
        );
        status.set_line(
            9,
            &format!(
                "Parse : {}/{}/{}us last={}us",
                t.min_frame_us(),
                t.avg_frame_us(),
                t.max_frame_us(),
                t.last_parse_us,
            ),
        );
        status.set_line(
            10,
            &format!(
                "Link  : {:7.1}kbps resync={} disc={}",
                t.read_kbps,
                parser.resync_count(),
                parser.buffer_discards(),
            ),
        );
        status.set_line(
            11,
            &format!(
                "SID   : {} vmask={:03b} filt={}",
                engine.mode().name(),
                engine.voice_mute_mask(),
                if engine.filter_writes() { "on" } else { "off" },
            ),
        );

        let mon = engine.monitor();
        for voice in 0..3 {
            status.set_line(
                13 + voice,
                &format!(
                    "V{}    : f={:5} ctl=${:02X} env=${:02X}",
                    voice + 1,
                    mon.voice_freq[voice],
                    mon.voice_control[voice],
                    mon.voice_envelope[voice],
                ),
            );
        }
        status.set_line(
            16,
            &format!(
                "Filter: fc={:4} res={:X} mode={:X}",
                mon.filter_cutoff, mon.filter_resonance, mon.filter_mode,
            ),
        );

        let tail = parser.recent().tail(8);
        let hex: String = tail.iter().map(|b| format!(" {b:02X}")).collect();
        status.set_line(18, &format!("RX    :{hex}"));

        // Engine pending events, head first.
        for (i, ev) in engine.queue_snapshot(7).iter().enumerate() {
            status.set_line(
                19 + i,
                &format!(
                    "{:2}: +{:6} chip {} addr ${:02X} = ${:02X}",
                    i, ev.delta, ev.chip_mask, ev.addr, ev.value,
                ),
            );
        }
    }
}
