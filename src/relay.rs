use std::{fmt, io};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

pub const DEFAULT_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Inbound peer to target.
    Upstream,
    /// Target to inbound peer.
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream => f.write_str("inbound->outbound"),
            Self::Downstream => f.write_str("outbound->inbound"),
        }
    }
}

/// Why a pump stopped. Every variant ends the whole session.
#[derive(Debug)]
pub enum PumpEnd {
    /// The source returned zero bytes.
    Eof,
    Read(io::Error),
    Write(io::Error),
}

impl PumpEnd {
    /// True when the failure was caused by this process closing the socket.
    #[must_use]
    pub fn is_benign(&self) -> bool {
        match self {
            Self::Eof => true,
            Self::Read(e) | Self::Write(e) => is_benign(e),
        }
    }
}

impl fmt::Display for PumpEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eof => f.write_str("end of stream"),
            Self::Read(e) => write!(f, "read error: {e}"),
            Self::Write(e) => write!(f, "write error: {e}"),
        }
    }
}

pub(crate) fn is_benign(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::NotConnected
    )
}

/// One-directional copy loop with its own fixed-size buffer.
///
/// A write of the bytes just read completes before the next read is issued,
/// so a slow destination stalls the source.
pub struct RelayPump {
    direction: Direction,
    buffer: Vec<u8>,
    bytes: u64,
}

impl RelayPump {
    #[must_use]
    pub fn new(direction: Direction, buffer_size: usize) -> Self {
        Self {
            direction,
            buffer: vec![0u8; buffer_size.max(1)],
            bytes: 0,
        }
    }

    /// Bytes written to the destination so far.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub async fn run<R, W>(&mut self, source: &mut R, destination: &mut W) -> PumpEnd
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        loop {
            let n = match source.read(&mut self.buffer).await {
                Ok(0) => return PumpEnd::Eof,
                Ok(n) => n,
                Err(e) => return PumpEnd::Read(e),
            };
            trace!(direction = %self.direction, bytes = n, "Read from source");

            if let Err(e) = destination.write_all(&self.buffer[..n]).await {
                return PumpEnd::Write(e);
            }
            self.bytes += n as u64;
        }
    }
}
