//! Socket channel: exact reads and writes over one Unix stream
//!
//! A `Channel` owns one connected socket. Reads collect exactly the number of
//! bytes requested; the peer closing the socket part-way through is reported
//! as [`IpcError::PrematureEnd`] so the caller can tell a lost connection from
//! a protocol violation.

use std::path::Path;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::trace;

use crate::error::IpcError;
use crate::protocol::{decode_header, Header, HEADER_SIZE};

/// Read side of a socket
#[derive(Debug)]
pub struct SocketReader {
    half: OwnedReadHalf,
}

/// Write side of a socket
#[derive(Debug)]
pub struct SocketWriter {
    half: Option<OwnedWriteHalf>,
}

/// A connected socket with both halves
#[derive(Debug)]
pub struct Channel {
    reader: SocketReader,
    writer: SocketWriter,
}

impl Channel {
    /// Connect to the socket at `path`
    pub async fn connect(path: &Path) -> Result<Self, IpcError> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|e| IpcError::ConnectionFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: UnixStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: SocketReader { half: read_half },
            writer: SocketWriter {
                half: Some(write_half),
            },
        }
    }

    /// Split into independently usable halves
    pub fn into_split(self) -> (SocketReader, SocketWriter) {
        (self.reader, self.writer)
    }

    /// Write the whole buffer
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), IpcError> {
        self.writer.send(bytes).await
    }

    /// Read exactly `n` bytes
    pub async fn receive(&mut self, n: usize) -> Result<Vec<u8>, IpcError> {
        self.reader.receive(n).await
    }

    /// Read and validate a frame header
    pub async fn read_header(&mut self) -> Result<Header, IpcError> {
        self.reader.read_header().await
    }

    /// Read a complete frame
    pub async fn read_frame(&mut self) -> Result<(Header, Vec<u8>), IpcError> {
        self.reader.read_frame().await
    }

    /// Shut down the write side; safe to call more than once
    pub async fn close(&mut self) {
        self.writer.close().await;
    }
}

impl SocketReader {
    /// Read exactly `n` bytes, retrying short reads
    ///
    /// A zero-length read before `n` bytes arrived means the peer closed the
    /// socket and is reported as [`IpcError::PrematureEnd`].
    pub async fn receive(&mut self, n: usize) -> Result<Vec<u8>, IpcError> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;

        while filled < n {
            let read = self
                .half
                .read(&mut buf[filled..])
                .await
                .map_err(IpcError::ConnectionLost)?;

            if read == 0 {
                return Err(IpcError::PrematureEnd {
                    expected: n,
                    remaining: n - filled,
                });
            }

            filled += read;
        }

        Ok(buf)
    }

    /// Read and validate a frame header
    pub async fn read_header(&mut self) -> Result<Header, IpcError> {
        let bytes = self.receive(HEADER_SIZE).await?;
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&bytes);
        Ok(decode_header(&header)?)
    }

    /// Read a complete frame: header followed by its payload
    pub async fn read_frame(&mut self) -> Result<(Header, Vec<u8>), IpcError> {
        let header = self.read_header().await?;
        let payload = self.receive(header.length as usize).await?;
        trace!(tag = header.tag, length = header.length, "Read frame");
        Ok((header, payload))
    }
}

impl SocketWriter {
    /// Write the whole buffer, looping over partial writes
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), IpcError> {
        let half = self.half.as_mut().ok_or_else(|| {
            IpcError::ConnectionLost(std::io::Error::from(std::io::ErrorKind::NotConnected))
        })?;

        half.write_all(bytes).await.map_err(IpcError::ConnectionLost)?;
        half.flush().await.map_err(IpcError::ConnectionLost)?;
        Ok(())
    }

    /// Shut down the write side; later sends fail with a connection error
    pub async fn close(&mut self) {
        if let Some(mut half) = self.half.take() {
            // The peer may already be gone; nothing to report during teardown.
            let _ = half.shutdown().await;
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.half.is_none()
    }
}
