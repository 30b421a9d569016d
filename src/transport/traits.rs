//! Byte channel abstraction for the modem link

use async_trait::async_trait;
use futures::FutureExt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// A byte channel to the modem's AT command port
#[async_trait]
pub trait ModemChannel: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Drop any unsolicited bytes sitting in the input buffer
    async fn discard_input(&mut self) -> io::Result<()> {
        let dropped = read_available(self)?;
        if !dropped.is_empty() {
            tracing::debug!("Discarded {} buffered bytes", dropped.len());
        }
        Ok(())
    }

    /// Human-readable name for this channel
    fn name(&self) -> &str;
}

/// Read whatever is already buffered without waiting for more
///
/// Returns `UnexpectedEof` only if the peer closed the channel before
/// anything was read.
pub fn read_available<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut collected = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        match reader.read(&mut buf).now_or_never() {
            Some(Ok(0)) => {
                if collected.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "modem channel closed",
                    ));
                }
                break;
            }
            Some(Ok(n)) => collected.extend_from_slice(&buf[..n]),
            Some(Err(e)) => return Err(e),
            // Nothing more buffered
            None => break,
        }
    }

    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_available_returns_buffered_bytes() {
        let (mut near, mut far) = tokio::io::duplex(64);
        far.write_all(b"OK\r\n").await.expect("write");

        assert_eq!(read_available(&mut near).expect("read"), b"OK\r\n");
        // Nothing left, but the channel is still open
        assert!(read_available(&mut near).expect("read").is_empty());
    }

    #[tokio::test]
    async fn test_read_available_reports_closed_channel() {
        let (mut near, far) = tokio::io::duplex(64);
        drop(far);

        let err = read_available(&mut near).expect_err("closed channel");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
