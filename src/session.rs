//! Per-connection echo session.
//!
//! A session owns one accepted stream and runs it through
//!
//! ```text
//! AwaitingRecord -> Processing -> Responding -> AwaitingRecord
//!        \               |              /
//!         +--------> Closed <----------+
//! ```
//!
//! until the peer stops sending or an I/O call fails. Nothing is shared
//! with other sessions; the stream is dropped when `run` returns.

use bytes::BytesMut;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::events::{Event, EventSink};
use crate::framer::LineFramer;
use crate::protocol::echo_response;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side of the connection.
    EndOfInput,
    /// Reading failed.
    ReadError(io::ErrorKind),
    /// Writing a response failed.
    WriteError(io::ErrorKind),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::EndOfInput => write!(f, "end of input"),
            CloseReason::ReadError(kind) => write!(f, "read error ({kind})"),
            CloseReason::WriteError(kind) => write!(f, "write error ({kind})"),
        }
    }
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Records echoed back in full.
    pub records: u64,
    /// Bytes of complete records read.
    pub bytes_read: u64,
    /// Response bytes written.
    pub bytes_written: u64,
    pub reason: CloseReason,
}

enum State {
    AwaitingRecord,
    Processing(BytesMut),
    Responding(BytesMut),
    Closed(CloseReason),
}

/// One accepted connection.
pub struct Session<S> {
    framer: LineFramer<S>,
    peer: SocketAddr,
    sink: Arc<dyn EventSink>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: SocketAddr, sink: Arc<dyn EventSink>) -> Self {
        Self {
            framer: LineFramer::new(stream),
            peer,
            sink,
        }
    }

    /// Echo records until the stream ends or fails.
    ///
    /// I/O errors end the session and are reported to the sink; they are
    /// never returned to the caller.
    pub async fn run(mut self) -> SessionSummary {
        let peer = self.peer;
        let mut records = 0u64;
        let mut bytes_read = 0u64;
        let mut bytes_written = 0u64;
        let mut state = State::AwaitingRecord;

        let reason = loop {
            state = match state {
                State::AwaitingRecord => match self.framer.next_record().await {
                    Ok(Some(record)) => {
                        bytes_read += record.len() as u64;
                        State::Processing(record)
                    }
                    Ok(None) => {
                        let bytes = self.framer.discarded();
                        if bytes > 0 {
                            self.sink.emit(Event::PartialDiscarded { peer, bytes });
                        }
                        State::Closed(CloseReason::EndOfInput)
                    }
                    Err(error) => {
                        self.sink.emit(Event::ReadFailed { peer, error: &error });
                        State::Closed(CloseReason::ReadError(error.kind()))
                    }
                },

                State::Processing(record) => {
                    self.sink.emit(Event::Request {
                        peer,
                        record: &record,
                    });
                    let response = echo_response(&record);
                    self.sink.emit(Event::Response {
                        peer,
                        response: &response,
                    });
                    State::Responding(response)
                }

                State::Responding(response) => match self.respond(&response).await {
                    Ok(()) => {
                        records += 1;
                        bytes_written += response.len() as u64;
                        State::AwaitingRecord
                    }
                    Err(error) => {
                        self.sink.emit(Event::WriteFailed { peer, error: &error });
                        State::Closed(CloseReason::WriteError(error.kind()))
                    }
                },

                State::Closed(reason) => break reason,
            };
        };

        let summary = SessionSummary {
            records,
            bytes_read,
            bytes_written,
            reason,
        };
        self.sink.emit(Event::Closed {
            peer,
            summary: &summary,
        });
        summary
    }

    async fn respond(&mut self, response: &[u8]) -> io::Result<()> {
        let stream = self.framer.get_mut();
        stream.write_all(response).await?;
        stream.flush().await
    }
}
