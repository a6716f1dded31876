//! Length-prefixed framing for the stream transport
//!
//! Stream records are delivered atomically: `length: u32 | body...`.
//! Short reads are buffered until a full frame is available. A frame
//! announcing more than [`MAX_FRAME_SIZE`] bytes is a protocol violation
//! and the connection is closed.

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::constants::MAX_FRAME_SIZE;
use crate::error::{CodecError, Error, Result};

/// Buffered reader producing complete frame bodies
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Read the next complete frame body. Returns `None` on clean EOF at
    /// a frame boundary; EOF inside a frame is a transport loss.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.extract_frame()? {
                return Ok(Some(frame));
            }
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(Error::TransportLoss("connection reset mid-frame".into()));
            }
        }
    }

    fn extract_frame(&mut self) -> Result<Option<Bytes>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes(self.buf[..4].try_into().unwrap()) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(Error::Codec(CodecError::FrameTooLarge(len)));
        }
        if self.buf.len() < 4 + len {
            self.buf.reserve(4 + len - self.buf.len());
            return Ok(None);
        }
        self.buf.advance(4);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}

/// Write one length-prefixed frame
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    debug_assert!(body.len() <= MAX_FRAME_SIZE);
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn frames_survive_short_reads() {
        let (mut tx, rx) = tokio::io::duplex(8);
        let mut reader = FrameReader::new(rx);

        let writer = tokio::spawn(async move {
            write_frame(&mut tx, b"hello").await.unwrap();
            write_frame(&mut tx, b"").await.unwrap();
            write_frame(&mut tx, &[0xab; 100]).await.unwrap();
        });

        assert_eq!(reader.next_frame().await.unwrap().unwrap(), &b"hello"[..]);
        assert_eq!(reader.next_frame().await.unwrap().unwrap(), &b""[..]);
        assert_eq!(reader.next_frame().await.unwrap().unwrap(), &[0xab; 100][..]);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx);
        write_frame(&mut tx, b"bye").await.unwrap();
        drop(tx);

        assert!(reader.next_frame().await.unwrap().is_some());
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_transport_loss() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx);
        tx.write_all(&20u32.to_be_bytes()).await.unwrap();
        tx.write_all(b"partial").await.unwrap();
        drop(tx);

        assert!(matches!(
            reader.next_frame().await,
            Err(Error::TransportLoss(_))
        ));
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx);
        tx.write_all(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes())
            .await
            .unwrap();

        assert!(matches!(
            reader.next_frame().await,
            Err(Error::Codec(CodecError::FrameTooLarge(_)))
        ));
    }
}
