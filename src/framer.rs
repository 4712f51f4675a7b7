//! Newline framing over an async byte stream.
//!
//! `LineFramer` owns the read buffer for one connection and hands out one
//! record per call. A record is every byte up to and including the next
//! `\n`. Bytes left over when the stream ends without a final newline are
//! dropped, not returned as a last record.

use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Initial read buffer size
const BUFFER_SIZE: usize = 4 * 1024;

/// Minimum free space reserved before each read
const READ_RESERVE: usize = 1024;

/// Splits a byte stream into newline-terminated records.
pub struct LineFramer<R> {
    reader: R,
    buffer: BytesMut,
    /// Bytes of `buffer` already searched for a newline.
    scanned: usize,
    /// Set once the reader reported end-of-input.
    eof: bool,
    /// Length of the unterminated tail dropped at end-of-input.
    discarded: usize,
}

impl<R: AsyncRead + Unpin> LineFramer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            scanned: 0,
            eof: false,
            discarded: 0,
        }
    }

    /// Read the next record, newline included.
    ///
    /// Returns `Ok(None)` at end-of-input, and keeps returning it on later
    /// calls without touching the reader again.
    pub async fn next_record(&mut self) -> io::Result<Option<BytesMut>> {
        if self.eof {
            return Ok(None);
        }

        loop {
            if let Some(pos) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') {
                let end = self.scanned + pos + 1;
                self.scanned = 0;
                return Ok(Some(self.buffer.split_to(end)));
            }
            self.scanned = self.buffer.len();

            self.buffer.reserve(READ_RESERVE);
            let n = self.reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                self.eof = true;
                self.discarded = self.buffer.len();
                self.buffer.clear();
                self.scanned = 0;
                return Ok(None);
            }
        }
    }

    /// Bytes of an unterminated final line dropped at end-of-input.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Mutable access to the underlying stream, used for writing responses.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_single_record() {
        let mock = Builder::new().read(b"Hello Server\n").build();
        let mut framer = LineFramer::new(mock);

        let record = framer.next_record().await.unwrap().unwrap();
        assert_eq!(&record[..], b"Hello Server\n");
        assert!(framer.next_record().await.unwrap().is_none());
        assert_eq!(framer.discarded(), 0);
    }

    #[tokio::test]
    async fn test_several_records_in_one_read() {
        let mock = Builder::new().read(b"a\nb\n\nc\n").build();
        let mut framer = LineFramer::new(mock);

        for expected in [&b"a\n"[..], b"b\n", b"\n", b"c\n"] {
            let record = framer.next_record().await.unwrap().unwrap();
            assert_eq!(&record[..], expected);
        }
        assert!(framer.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_split_across_reads() {
        let mock = Builder::new()
            .read(b"Hel")
            .read(b"lo Ser")
            .read(b"ver\nnext")
            .read(b"\n")
            .build();
        let mut framer = LineFramer::new(mock);

        let first = framer.next_record().await.unwrap().unwrap();
        assert_eq!(&first[..], b"Hello Server\n");
        let second = framer.next_record().await.unwrap().unwrap();
        assert_eq!(&second[..], b"next\n");
        assert!(framer.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_discarded() {
        let mock = Builder::new().read(b"done\npartial").build();
        let mut framer = LineFramer::new(mock);

        let record = framer.next_record().await.unwrap().unwrap();
        assert_eq!(&record[..], b"done\n");
        assert!(framer.next_record().await.unwrap().is_none());
        assert_eq!(framer.discarded(), b"partial".len());
    }

    #[tokio::test]
    async fn test_eof_is_sticky() {
        let mock = Builder::new().build();
        let mut framer = LineFramer::new(mock);

        assert!(framer.next_record().await.unwrap().is_none());
        assert!(framer.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_error_is_surfaced() {
        let mock = Builder::new()
            .read(b"ok\n")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut framer = LineFramer::new(mock);

        assert_eq!(&framer.next_record().await.unwrap().unwrap()[..], b"ok\n");
        let err = framer.next_record().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_long_record() {
        let mut line = vec![b'x'; 3 * BUFFER_SIZE];
        line.push(b'\n');
        let (client, server) = tokio::io::duplex(512);
        let writer = {
            let line = line.clone();
            tokio::spawn(async move {
                use tokio::io::AsyncWriteExt;
                let mut client = client;
                client.write_all(&line).await.unwrap();
            })
        };

        let mut framer = LineFramer::new(server);
        let record = framer.next_record().await.unwrap().unwrap();
        assert_eq!(&record[..], &line[..]);
        writer.await.unwrap();
        assert!(framer.next_record().await.unwrap().is_none());
    }
}
