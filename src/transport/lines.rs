//! Pull-based, timeout-bounded line reading.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use super::TransportError;
use crate::report::Report;

pub const DEFAULT_CHUNK_SIZE: usize = 256;
pub const DEFAULT_DELIMITER: u8 = b'\n';
/// How long a read may wait for the socket to become readable.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// The buffer holds no complete line; the socket must be read.
    NeedMore,
    /// The last read may have completed one or more lines.
    HaveLine,
    /// The peer closed the stream or a read failed.
    Closed,
}

/// Splits a byte stream into delimiter-terminated lines.
///
/// Every received byte is added to the bound report's byte counter. Bytes
/// left in the buffer without a trailing delimiter when the peer closes are
/// dropped.
pub struct LineReader<'a, R> {
    reader: &'a mut R,
    report: &'a mut Report,
    buffer: Vec<u8>,
    state: ReadState,
    chunk_size: usize,
    delimiter: u8,
    read_timeout: Duration,
}

impl<'a, R> LineReader<'a, R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: &'a mut R, report: &'a mut Report) -> Self {
        Self {
            reader,
            report,
            buffer: Vec::new(),
            state: ReadState::NeedMore,
            chunk_size: DEFAULT_CHUNK_SIZE,
            delimiter: DEFAULT_DELIMITER,
            read_timeout: READ_TIMEOUT,
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn report(&mut self) -> &mut Report {
        self.report
    }

    /// Returns the next line without its delimiter, `None` once the peer has
    /// closed the stream and no complete line remains.
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.state {
                ReadState::Closed => return Ok(None),
                ReadState::HaveLine => {
                    if let Some(line) = self.split_line() {
                        return Ok(Some(line));
                    }
                    self.state = ReadState::NeedMore;
                }
                ReadState::NeedMore => {
                    let mut chunk = vec![0u8; self.chunk_size];
                    let read = match timeout(self.read_timeout, self.reader.read(&mut chunk)).await
                    {
                        Ok(Ok(read)) => read,
                        Ok(Err(err)) => {
                            self.state = ReadState::Closed;
                            return Err(TransportError::Io(err));
                        }
                        Err(_elapsed) => {
                            self.state = ReadState::Closed;
                            return Err(TransportError::ReadTimeout(self.read_timeout));
                        }
                    };

                    if read == 0 {
                        if !self.buffer.is_empty() {
                            self.report.debug(format!(
                                "Discarding {} trailing bytes without delimiter",
                                self.buffer.len()
                            ));
                            self.buffer.clear();
                        }
                        self.state = ReadState::Closed;
                        continue;
                    }

                    self.report.bytes += read as u64;
                    self.buffer.extend_from_slice(&chunk[..read]);
                    self.state = ReadState::HaveLine;
                }
            }
        }
    }

    /// Bytes received past the last returned line.
    pub fn into_remainder(self) -> Vec<u8> {
        self.buffer
    }

    fn split_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|b| *b == self.delimiter)?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        Some(line)
    }
}
