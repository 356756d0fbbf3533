//! `Content-Length` framing over async byte streams.
//!
//! Each frame is `Content-Length: N\r\n` followed by optional further
//! headers, an empty line, and exactly N bytes of JSON. N counts bytes, not
//! characters.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::RpcError;

/// Frames larger than this are rejected rather than buffered.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Decodes framed JSON-RPC messages from an async reader.
pub struct FrameDecoder<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Decode the next frame. `Ok(None)` means the stream ended cleanly on a
    /// frame boundary; EOF anywhere inside a frame is an error.
    pub async fn decode(&mut self) -> Result<Option<serde_json::Value>, RpcError> {
        let Some(body_len) = self.decode_headers().await? else {
            return Ok(None);
        };

        if body_len > MAX_FRAME_BYTES {
            return Err(RpcError::Codec(format!(
                "Content-Length {body_len} exceeds maximum {MAX_FRAME_BYTES}"
            )));
        }

        let mut body = vec![0u8; body_len];
        self.reader
            .read_exact(&mut body)
            .await
            .map_err(RpcError::Transport)?;

        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| RpcError::Codec(format!("body is not valid JSON: {e}")))
    }

    /// Consume header lines up to the blank separator and return the body
    /// length. `Ok(None)` only when EOF arrives before any header byte.
    async fn decode_headers(&mut self) -> Result<Option<usize>, RpcError> {
        let mut body_len = None;
        let mut line = String::new();

        for header_index in 0.. {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(RpcError::Transport)?;

            if n == 0 {
                if header_index == 0 {
                    return Ok(None);
                }
                return Err(RpcError::Codec(
                    "stream ended in the middle of frame headers".to_string(),
                ));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            // Header names are matched case-insensitively; anything other
            // than Content-Length (e.g. Content-Type) is ignored.
            if let Some((name, value)) = trimmed.split_once(':')
                && name.trim().eq_ignore_ascii_case("content-length")
            {
                let parsed = value.trim().parse::<usize>().map_err(|e| {
                    RpcError::Codec(format!("invalid Content-Length {:?}: {e}", value.trim()))
                })?;
                body_len = Some(parsed);
            }
        }

        match body_len {
            Some(len) => Ok(Some(len)),
            None => Err(RpcError::Codec(
                "frame headers missing Content-Length".to_string(),
            )),
        }
    }
}

/// Encodes framed JSON-RPC messages onto an async writer.
pub struct FrameEncoder<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn encode(&mut self, msg: &serde_json::Value) -> Result<(), RpcError> {
        let body =
            serde_json::to_vec(msg).map_err(|e| RpcError::Codec(format!("serializing: {e}")))?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .map_err(RpcError::Transport)?;
        self.writer
            .write_all(&body)
            .await
            .map_err(RpcError::Transport)?;
        self.writer.flush().await.map_err(RpcError::Transport)?;
        Ok(())
    }
}
