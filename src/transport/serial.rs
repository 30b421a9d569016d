//! UART transport to the SIM7600X hat

use crate::transport::traits::ModemChannel;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

/// Configuration for the modem's serial port
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device path (e.g., "/dev/ttyS0" on the Raspberry Pi header)
    pub port: String,
    /// Baud rate
    pub baud: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyS0".into(),
            baud: 115_200,
        }
    }
}

/// Serial stream wrapper implementing ModemChannel
pub struct SerialChannel {
    inner: SerialStream,
    name: String,
}

impl SerialChannel {
    /// Open the serial port and drop anything already buffered
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let inner = tokio_serial::new(&config.port, config.baud)
            .open_native_async()
            .with_context(|| format!("Failed to open serial port {}", config.port))?;
        inner
            .clear(ClearBuffer::Input)
            .context("Failed to flush serial input")?;

        Ok(Self {
            inner,
            name: format!("{}@{}", config.port, config.baud),
        })
    }
}

impl AsyncRead for SerialChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SerialChannel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl ModemChannel for SerialChannel {
    async fn discard_input(&mut self) -> io::Result<()> {
        self.inner
            .clear(ClearBuffer::Input)
            .map_err(io::Error::from)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SerialConfig::default();
        assert_eq!(config.port, "/dev/ttyS0");
        assert_eq!(config.baud, 115_200);
    }
}
