//! Serial motion-trigger link.
//!
//! The sensor board sends newline-terminated text. `MOTION_DETECTED` opens a
//! scan window; everything else is noise and ignored. After a successful log
//! the scanner may answer `PERSON_LOGGED`, best effort.
//!
//! Reads never block: the scan loop polls once per iteration and an empty
//! port is not an error.

use nix::sys::termios::{self, BaudRate, SetArg};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use thiserror::Error;

pub const MOTION_TOKEN: &str = "MOTION_DETECTED";
pub const ACK_TOKEN: &str = "PERSON_LOGGED";
pub const DEFAULT_BAUD: u32 = 115_200;

/// Longest partial line kept between polls; longer input is discarded.
const MAX_LINE_BYTES: usize = 4096;

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("serial port not found: {0}")]
    NotFound(String),
    #[error("failed to open serial port {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("unsupported baud rate: {0}")]
    UnsupportedBaud(u32),
    #[error("failed to configure serial port: {0}")]
    Configure(#[from] nix::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSignal {
    Motion,
}

/// Interpret one line from the sensor.
pub fn parse_trigger_line(line: &str) -> Option<TriggerSignal> {
    (line.trim() == MOTION_TOKEN).then_some(TriggerSignal::Motion)
}

/// Something that can ask the engine to open a scan window.
pub trait TriggerSource {
    /// Non-blocking. `None` when nothing actionable arrived.
    fn poll(&mut self) -> Option<TriggerSignal>;

    /// Tell the peer a person was logged. Failures are swallowed.
    fn acknowledge(&mut self);
}

/// Accumulates raw bytes into complete lines.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append bytes; return every newly completed line that is valid UTF-8.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            match String::from_utf8(raw) {
                Ok(line) => lines.push(line),
                Err(_) => tracing::debug!("dropping non-UTF-8 trigger line"),
            }
        }

        if self.pending.len() > MAX_LINE_BYTES {
            tracing::debug!(bytes = self.pending.len(), "trigger line too long; discarding");
            self.pending.clear();
        }
        lines
    }
}

/// Motion sensor on a serial port.
pub struct SerialTrigger<P = File> {
    port: P,
    name: String,
    lines: LineBuffer,
}

impl SerialTrigger<File> {
    /// Open `path` in raw, non-blocking mode at `baud`.
    pub fn open(path: &str, baud: u32) -> Result<Self, TriggerError> {
        if !std::path::Path::new(path).exists() {
            return Err(TriggerError::NotFound(path.to_string()));
        }
        let speed = baud_rate(baud)?;

        let port = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(nix::libc::O_NOCTTY | nix::libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| TriggerError::Open {
                path: path.to_string(),
                source,
            })?;

        let mut tio = termios::tcgetattr(&port)?;
        termios::cfmakeraw(&mut tio);
        termios::cfsetspeed(&mut tio, speed)?;
        termios::tcsetattr(&port, SetArg::TCSANOW, &tio)?;
        termios::tcflush(&port, termios::FlushArg::TCIOFLUSH)?;

        tracing::info!(path, baud, "serial trigger connected");
        Ok(Self::from_port(port, path))
    }
}

impl<P: Read + Write> SerialTrigger<P> {
    /// Wrap an already-configured port. The port must not block on read.
    pub fn from_port(port: P, name: &str) -> Self {
        Self {
            port,
            name: name.to_string(),
            lines: LineBuffer::default(),
        }
    }
}

impl<P: Read + Write> TriggerSource for SerialTrigger<P> {
    fn poll(&mut self) -> Option<TriggerSignal> {
        let mut chunk = [0u8; 256];
        let mut signal = None;
        loop {
            match self.port.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    for line in self.lines.push(&chunk[..n]) {
                        if let Some(s) = parse_trigger_line(&line) {
                            tracing::info!(port = %self.name, "motion detected");
                            signal = Some(s);
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(port = %self.name, error = %e, "serial read failed");
                    break;
                }
            }
        }
        signal
    }

    fn acknowledge(&mut self) {
        let line = format!("{ACK_TOKEN}\n");
        if let Err(e) = self.port.write_all(line.as_bytes()).and_then(|_| self.port.flush()) {
            tracing::debug!(port = %self.name, error = %e, "acknowledgement not delivered");
        }
    }
}

fn baud_rate(baud: u32) -> Result<BaudRate, TriggerError> {
    Ok(match baud {
        9_600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        other => return Err(TriggerError::UnsupportedBaud(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Serves queued chunks, then reports WouldBlock like an idle tty.
    #[derive(Default)]
    struct FakePort {
        incoming: VecDeque<Vec<u8>>,
        written: Vec<u8>,
        fail_writes: bool,
    }

    impl FakePort {
        fn with_chunks(chunks: &[&[u8]]) -> Self {
            Self {
                incoming: chunks.iter().map(|c| c.to_vec()).collect(),
                ..Self::default()
            }
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.incoming.pop_front() {
                Some(chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                None => Err(ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for FakePort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.fail_writes {
                return Err(ErrorKind::BrokenPipe.into());
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_trigger_line() {
        assert_eq!(parse_trigger_line("MOTION_DETECTED"), Some(TriggerSignal::Motion));
        assert_eq!(parse_trigger_line("MOTION_DETECTED\r\n"), Some(TriggerSignal::Motion));
        assert_eq!(parse_trigger_line("motion_detected"), None);
        assert_eq!(parse_trigger_line("PIR READY"), None);
        assert_eq!(parse_trigger_line(""), None);
    }

    #[test]
    fn test_idle_port_is_not_an_error() {
        let mut trigger = SerialTrigger::from_port(FakePort::default(), "fake");
        assert_eq!(trigger.poll(), None);
    }

    #[test]
    fn test_motion_split_across_reads() {
        let port = FakePort::with_chunks(&[b"MOTION_", b"DETEC"]);
        let mut trigger = SerialTrigger::from_port(port, "fake");
        assert_eq!(trigger.poll(), None);
        trigger.port.incoming.push_back(b"TED\n".to_vec());
        assert_eq!(trigger.poll(), Some(TriggerSignal::Motion));
        assert_eq!(trigger.poll(), None);
    }

    #[test]
    fn test_noise_is_ignored() {
        let port = FakePort::with_chunks(&[b"boot ok\n\xff\xfe\n", b"PIR warmup\n"]);
        let mut trigger = SerialTrigger::from_port(port, "fake");
        assert_eq!(trigger.poll(), None);
    }

    #[test]
    fn test_motion_among_noise() {
        let port = FakePort::with_chunks(&[b"garbage\nMOTION_DETECTED\nmore"]);
        let mut trigger = SerialTrigger::from_port(port, "fake");
        assert_eq!(trigger.poll(), Some(TriggerSignal::Motion));
        assert_eq!(trigger.lines.pending, b"more");
    }

    #[test]
    fn test_overlong_line_discarded() {
        let mut lines = LineBuffer::default();
        assert!(lines.push(&vec![b'x'; MAX_LINE_BYTES + 1]).is_empty());
        assert!(lines.pending.is_empty());
        assert_eq!(lines.push(b"MOTION_DETECTED\n"), vec!["MOTION_DETECTED\n".to_string()]);
    }

    #[test]
    fn test_acknowledge_writes_token() {
        let mut trigger = SerialTrigger::from_port(FakePort::default(), "fake");
        trigger.acknowledge();
        assert_eq!(trigger.port.written, b"PERSON_LOGGED\n");
    }

    #[test]
    fn test_acknowledge_failure_is_swallowed() {
        let port = FakePort { fail_writes: true, ..FakePort::default() };
        let mut trigger = SerialTrigger::from_port(port, "fake");
        trigger.acknowledge();
        assert!(trigger.port.written.is_empty());
    }

    #[test]
    fn test_baud_rate_mapping() {
        assert!(baud_rate(115_200).is_ok());
        assert!(matches!(baud_rate(12_345), Err(TriggerError::UnsupportedBaud(12_345))));
    }

    #[test]
    fn test_open_missing_port() {
        let err = SerialTrigger::open("/dev/ttyNOPE99", DEFAULT_BAUD).err().unwrap();
        assert!(matches!(err, TriggerError::NotFound(_)));
    }
}
