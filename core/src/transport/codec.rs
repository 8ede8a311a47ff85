//! Line-delimited stream codec.
//!
//! One record per stream: the dialer writes a single UTF-8 line terminated by
//! `\n` and the listener answers with the literal bytes `ACK\n`. A stream that
//! ends before the delimiter, or whose line exceeds [`MAX_LINE_LEN`], is
//! rejected without an acknowledgement and the stream is reset.

use async_trait::async_trait;
use futures::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use libp2p::request_response;
use libp2p::StreamProtocol;
use std::io;

/// Acknowledgement token written after a well-formed line.
pub const ACK: &[u8; 4] = b"ACK\n";

/// Upper bound on a single line, delimiter included.
pub const MAX_LINE_LEN: u64 = 64 * 1024;

/// A single line exchanged over a stream, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    line: String,
}

impl ProtocolMessage {
    /// Build a message, folding any embedded newlines into spaces so the
    /// record stays a single line on the wire.
    pub fn new(line: impl Into<String>) -> Self {
        let line = line.into();
        let line = if line.contains(['\n', '\r']) {
            line.replace(['\n', '\r'], " ")
        } else {
            line
        };
        Self { line }
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn into_line(self) -> String {
        self.line
    }
}

/// Marker for a received `ACK\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack;

/// Read one `\n`-terminated UTF-8 line of at most `limit` bytes.
pub async fn read_line<T>(io: &mut T, limit: u64) -> io::Result<String>
where
    T: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(AsyncReadExt::take(&mut *io, limit));
    let mut buf = Vec::new();
    reader.read_until(b'\n', &mut buf).await?;

    if buf.last() != Some(&b'\n') {
        let reason = if buf.len() as u64 >= limit {
            "line exceeds maximum length"
        } else {
            "stream ended before newline"
        };
        return Err(io::Error::new(io::ErrorKind::InvalidData, reason));
    }
    buf.pop();

    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// request-response codec speaking the line/ACK wire format.
#[derive(Debug, Clone, Default)]
pub struct LineCodec;

#[async_trait]
impl request_response::Codec for LineCodec {
    type Protocol = StreamProtocol;
    type Request = ProtocolMessage;
    type Response = Ack;

    async fn read_request<T>(&mut self, _: &StreamProtocol, io: &mut T) -> io::Result<ProtocolMessage>
    where
        T: AsyncRead + Unpin + Send,
    {
        let line = read_line(io, MAX_LINE_LEN).await?;
        Ok(ProtocolMessage { line })
    }

    async fn read_response<T>(&mut self, _: &StreamProtocol, io: &mut T) -> io::Result<Ack>
    where
        T: AsyncRead + Unpin + Send,
    {
        let mut token = [0u8; 4];
        io.read_exact(&mut token).await?;
        if &token != ACK {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected acknowledgement {:?}", String::from_utf8_lossy(&token)),
            ));
        }
        Ok(Ack)
    }

    async fn write_request<T>(
        &mut self,
        _: &StreamProtocol,
        io: &mut T,
        request: ProtocolMessage,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        let mut frame = request.into_line().into_bytes();
        frame.push(b'\n');
        io.write_all(&frame).await?;
        io.close().await
    }

    async fn write_response<T>(&mut self, _: &StreamProtocol, io: &mut T, _: Ack) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        io.write_all(ACK).await?;
        io.flush().await
    }
}
