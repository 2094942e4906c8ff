//! Content-Length framing for DAP streams.
//!
//! Format: `Content-Length: N\r\n\r\n{json}`. Other headers are accepted and
//! ignored; header names are matched case-insensitively.

use std::sync::atomic::{AtomicI64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::CodecError;

use super::ProtocolMessage;

const CONTENT_LENGTH: &str = "content-length";

/// Largest frame body accepted from a peer.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Serialize a message into a complete frame.
pub fn encode(message: &ProtocolMessage) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(message)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads framed messages from a byte stream, buffering partial frames.
pub struct MessageReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between frames.
    pub async fn read_message(&mut self) -> Result<Option<ProtocolMessage>, CodecError> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length > MAX_FRAME_SIZE {
            return Err(CodecError::FrameTooLarge {
                length: content_length,
                limit: MAX_FRAME_SIZE,
            });
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                CodecError::UnexpectedEof { context: "body" }
            } else {
                CodecError::Io(e)
            }
        })?;

        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>, CodecError> {
        let mut content_length = None;
        let mut saw_header = false;

        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                if saw_header {
                    return Err(CodecError::UnexpectedEof { context: "headers" });
                }
                return Ok(None);
            }

            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if !saw_header {
                    // Tolerate stray blank lines between frames.
                    continue;
                }
                break;
            }
            saw_header = true;

            let (name, value) =
                line.split_once(':')
                    .ok_or_else(|| CodecError::MalformedHeader {
                        line: line.to_string(),
                    })?;
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let value = value.trim();
                content_length =
                    Some(
                        value
                            .parse::<usize>()
                            .map_err(|_| CodecError::InvalidContentLength {
                                value: value.to_string(),
                            })?,
                    );
            }
        }

        content_length
            .map(Some)
            .ok_or(CodecError::MissingContentLength)
    }
}

/// Writes whole frames to a byte stream.
///
/// Each frame goes out in a single `write_all` followed by `flush`, so frames
/// written through one writer never interleave.
pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write(&mut self, message: &ProtocolMessage) -> Result<(), CodecError> {
        let frame = encode(message)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Monotonic `seq` source for messages the relay writes itself.
#[derive(Debug)]
pub struct SequenceCounter(AtomicI64);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(AtomicI64::new(1))
    }

    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Stamp `message` with the next sequence number.
    pub fn stamp(&self, mut message: ProtocolMessage) -> ProtocolMessage {
        message.set_seq(self.next());
        message
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
