// Host link: the USB-CDC stand-in, a Unix domain socket server.
//
// One host at a time, like a CDC endpoint. On attach the device sends the
// READY line exactly once, then streams FDIS bytes until EOF (detach).
// All socket I/O is non-blocking; the engine loop polls between audio
// fills and must never be stalled by the link.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};

/// Handshake sent once per new host session.
pub const READY_LINE: &[u8] = b"[DUMP] READY\r\n";

/// Bytes pulled per read; four chunks max per engine-loop pass.
pub const READ_CHUNK: usize = 512;
pub const MAX_CHUNKS_PER_POLL: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    /// Host attached, READY not yet sent.
    AwaitingHandshake,
    Streaming,
}

impl LinkState {
    pub fn name(self) -> &'static str {
        match self {
            LinkState::Disconnected => "DOWN",
            LinkState::AwaitingHandshake => "HELLO",
            LinkState::Streaming => "UP",
        }
    }
}

pub enum ReadOutcome {
    /// `n` bytes landed in the caller's buffer.
    Data(usize),
    /// Nothing available right now.
    Empty,
    /// Host detached (EOF or socket error).
    Disconnected,
}

pub struct HostLink {
    listener: UnixListener,
    client: Option<UnixStream>,
    state: LinkState,
    sessions: u32,
}

impl HostLink {
    pub fn bind(path: &str) -> Result<Self, String> {
        // A stale socket file from a previous run blocks bind.
        let _ = std::fs::remove_file(path);
        let listener =
            UnixListener::bind(path).map_err(|e| format!("cannot bind {path}: {e}"))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| format!("set_nonblocking: {e}"))?;
        eprintln!("[link] listening on {path}");
        Ok(Self {
            listener,
            client: None,
            state: LinkState::Disconnected,
            sessions: 0,
        })
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Completed handshakes since startup.
    pub fn session_count(&self) -> u32 {
        self.sessions
    }

    /// While disconnected, try to accept a host. Returns true on attach.
    pub fn poll_accept(&mut self) -> bool {
        debug_assert_eq!(self.state, LinkState::Disconnected);
        match self.listener.accept() {
            Ok((stream, _)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    eprintln!("[link] set_nonblocking on client: {e}");
                    return false;
                }
                eprintln!("[link] host attached");
                self.client = Some(stream);
                self.state = LinkState::AwaitingHandshake;
                true
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(e) => {
                eprintln!("[link] accept error: {e}");
                false
            }
        }
    }

    /// Send the READY line, entering the streaming state. The caller resets
    /// the pipeline before calling this so the session starts clean.
    pub fn send_ready(&mut self) -> bool {
        let Some(ref mut stream) = self.client else {
            self.state = LinkState::Disconnected;
            return false;
        };
        match stream.write_all(READY_LINE).and_then(|_| stream.flush()) {
            Ok(()) => {
                self.sessions += 1;
                self.state = LinkState::Streaming;
                eprintln!("[link] READY sent, session {}", self.sessions);
                true
            }
            Err(e) => {
                eprintln!("[link] handshake write failed: {e}");
                self.drop_client();
                false
            }
        }
    }

    /// Non-blocking read of one chunk from the host.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> ReadOutcome {
        let Some(ref mut stream) = self.client else {
            return ReadOutcome::Disconnected;
        };
        match stream.read(buf) {
            Ok(0) => {
                eprintln!("[link] host detached");
                self.drop_client();
                ReadOutcome::Disconnected
            }
            Ok(n) => ReadOutcome::Data(n),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => ReadOutcome::Empty,
            Err(e) => {
                eprintln!("[link] read error: {e}");
                self.drop_client();
                ReadOutcome::Disconnected
            }
        }
    }

    fn drop_client(&mut self) {
        self.client = None;
        self.state = LinkState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_socket_path(tag: &str) -> String {
        format!(
            "/tmp/siddler-test-{}-{}.sock",
            tag,
            std::process::id()
        )
    }

    #[test]
    fn test_ready_line_bytes() {
        // The handshake is a fixed byte sequence hosts match on.
        assert_eq!(
            READY_LINE,
            &[
                0x5B, 0x44, 0x55, 0x4D, 0x50, 0x5D, 0x20, 0x52, 0x45, 0x41, 0x44, 0x59, 0x0D,
                0x0A
            ]
        );
    }

    #[test]
    fn test_handshake_sent_once_per_session() {
        let path = temp_socket_path("handshake");
        let mut link = HostLink::bind(&path).unwrap();
        assert_eq!(link.state(), LinkState::Disconnected);
        assert!(!link.poll_accept());

        let mut host = UnixStream::connect(&path).unwrap();
        // Accept may need a beat on a loaded machine.
        let mut attached = false;
        for _ in 0..100 {
            if link.poll_accept() {
                attached = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(attached);
        assert_eq!(link.state(), LinkState::AwaitingHandshake);

        assert!(link.send_ready());
        assert_eq!(link.state(), LinkState::Streaming);
        assert_eq!(link.session_count(), 1);

        let mut got = [0u8; READY_LINE.len()];
        host.read_exact(&mut got).unwrap();
        assert_eq!(&got, READY_LINE);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_read_chunks_and_detach() {
        let path = temp_socket_path("read");
        let mut link = HostLink::bind(&path).unwrap();
        let mut host = UnixStream::connect(&path).unwrap();
        for _ in 0..100 {
            if link.poll_accept() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        link.send_ready();
        let mut sink = [0u8; READY_LINE.len()];
        host.read_exact(&mut sink).unwrap();

        host.write_all(&[0xAB; 64]).unwrap();
        host.flush().unwrap();

        let mut buf = [0u8; READ_CHUNK];
        let mut got = 0;
        for _ in 0..100 {
            match link.read_chunk(&mut buf) {
                ReadOutcome::Data(n) => {
                    assert!(buf[..n].iter().all(|&b| b == 0xAB));
                    got += n;
                    if got == 64 {
                        break;
                    }
                }
                ReadOutcome::Empty => std::thread::sleep(std::time::Duration::from_millis(1)),
                ReadOutcome::Disconnected => panic!("unexpected disconnect"),
            }
        }
        assert_eq!(got, 64);

        drop(host);
        let mut detached = false;
        for _ in 0..100 {
            match link.read_chunk(&mut buf) {
                ReadOutcome::Disconnected => {
                    detached = true;
                    break;
                }
                _ => std::thread::sleep(std::time::Duration::from_millis(1)),
            }
        }
        assert!(detached);
        assert_eq!(link.state(), LinkState::Disconnected);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_second_session_gets_its_own_ready() {
        let path = temp_socket_path("resession");
        let mut link = HostLink::bind(&path).unwrap();

        for round in 1..=2u32 {
            let mut host = UnixStream::connect(&path).unwrap();
            for _ in 0..100 {
                if link.poll_accept() {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            assert!(link.send_ready());
            assert_eq!(link.session_count(), round);
            let mut got = [0u8; READY_LINE.len()];
            host.read_exact(&mut got).unwrap();
            assert_eq!(&got, READY_LINE);
            drop(host);

            let mut buf = [0u8; 16];
            for _ in 0..100 {
                if matches!(link.read_chunk(&mut buf), ReadOutcome::Disconnected) {
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
            assert_eq!(link.state(), LinkState::Disconnected);
        }

        let _ = std::fs::remove_file(&path);
    }
}
