//! Diagnostic events emitted by the listener and sessions.
//!
//! Sessions and the accept loop report what they do through an
//! [`EventSink`]. The sink is write-only: nothing it does feeds back into
//! connection handling. [`TracingSink`] is the default and writes the
//! events to the `tracing` subscriber installed in `main`.

use std::io;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

use crate::session::SessionSummary;

/// A diagnostic event.
#[derive(Debug)]
pub enum Event<'a> {
    /// The listener is bound and about to accept.
    Listening { addr: SocketAddr },
    /// A connection was accepted and its session spawned.
    Accepted { peer: SocketAddr },
    /// `accept` failed but the listener keeps going.
    AcceptFailed { error: &'a io::Error },
    /// A record was read from a connection.
    Request { peer: SocketAddr, record: &'a [u8] },
    /// The response built for the last record.
    Response { peer: SocketAddr, response: &'a [u8] },
    /// Reading from a connection failed.
    ReadFailed { peer: SocketAddr, error: &'a io::Error },
    /// Writing a response failed.
    WriteFailed { peer: SocketAddr, error: &'a io::Error },
    /// The peer closed mid-line; the unterminated bytes were dropped.
    PartialDiscarded { peer: SocketAddr, bytes: usize },
    /// A session ended.
    Closed {
        peer: SocketAddr,
        summary: &'a SessionSummary,
    },
}

/// Receiver of diagnostic events.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: Event<'_>);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: Event<'_>) {
        match event {
            Event::Listening { addr } => info!(address = %addr, "Server listening"),
            Event::Accepted { peer } => debug!(peer = %peer, "New connection"),
            Event::AcceptFailed { error } => {
                error!(error = %error, "Failed to accept connection")
            }
            Event::Request { peer, record } => {
                info!(peer = %peer, "request: {}", printable(record))
            }
            Event::Response { peer, response } => {
                info!(peer = %peer, "Response: {}", printable(response))
            }
            Event::ReadFailed { peer, error } => {
                warn!(peer = %peer, error = %error, "Failed to read data")
            }
            Event::WriteFailed { peer, error } => {
                warn!(peer = %peer, error = %error, "Failed to write data")
            }
            Event::PartialDiscarded { peer, bytes } => {
                debug!(peer = %peer, bytes, "Dropped unterminated line at end of input")
            }
            Event::Closed { peer, summary } => debug!(
                peer = %peer,
                records = summary.records,
                bytes_read = summary.bytes_read,
                bytes_written = summary.bytes_written,
                reason = %summary.reason,
                "Connection closed"
            ),
        }
    }
}

/// Render record bytes for a single log line: lossy UTF-8 without the
/// line terminator.
fn printable(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.trim_end_matches(&['\r', '\n'][..]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CloseReason;

    #[test]
    fn test_printable_strips_line_ending() {
        assert_eq!(printable(b"Hello Server\n"), "Hello Server");
        assert_eq!(printable(b"Echo: crlf\r\n"), "Echo: crlf");
        assert_eq!(printable(b"\n"), "");
    }

    #[test]
    fn test_printable_replaces_invalid_utf8() {
        assert_eq!(printable(b"a\xffb\n"), "a\u{fffd}b");
    }

    #[test]
    fn test_tracing_sink_accepts_every_event() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe");
        let summary = SessionSummary {
            records: 1,
            bytes_read: 2,
            bytes_written: 8,
            reason: CloseReason::EndOfInput,
        };

        let sink = TracingSink;
        sink.emit(Event::Listening { addr: peer });
        sink.emit(Event::Accepted { peer });
        sink.emit(Event::AcceptFailed { error: &error });
        sink.emit(Event::Request { peer, record: b"a\n" });
        sink.emit(Event::Response { peer, response: b"Echo: a\n" });
        sink.emit(Event::ReadFailed { peer, error: &error });
        sink.emit(Event::WriteFailed { peer, error: &error });
        sink.emit(Event::PartialDiscarded { peer, bytes: 3 });
        sink.emit(Event::Closed { peer, summary: &summary });
    }
}

/// Event capture for tests.
#[cfg(test)]
pub(crate) mod recording {
    use super::{Event, EventSink};
    use std::sync::Mutex;

    /// Keeps a one-line rendering of every event it receives.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        lines: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        pub(crate) fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: Event<'_>) {
            let line = match event {
                Event::Listening { .. } => "listening".to_string(),
                Event::Accepted { .. } => "accepted".to_string(),
                Event::AcceptFailed { error } => format!("accept failed: {:?}", error.kind()),
                Event::Request { record, .. } => {
                    format!("request: {}", String::from_utf8_lossy(record))
                }
                Event::Response { response, .. } => {
                    format!("Response: {}", String::from_utf8_lossy(response))
                }
                Event::ReadFailed { error, .. } => format!("read failed: {:?}", error.kind()),
                Event::WriteFailed { error, .. } => format!("write failed: {:?}", error.kind()),
                Event::PartialDiscarded { bytes, .. } => format!("discarded {bytes}"),
                Event::Closed { summary, .. } => format!("closed: {:?}", summary.reason),
            };
            self.lines.lock().unwrap().push(line);
        }
    }
}
