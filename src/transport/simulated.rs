//! Simulated SIM7600X modem for bench runs and tests
//!
//! The device side runs as a task on the far end of an in-memory duplex
//! pipe. It answers AT commands the way the real hat does on a healthy
//! network, honours the `>` prompt protocol for length-announced uploads,
//! and records everything it receives.

use crate::transport::traits::ModemChannel;
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tracing::debug;

const PIPE_CAPACITY: usize = 64 * 1024;
const CTRL_Z: u8 = 0x1a;

/// Commands that announce a body length and answer with a `>` prompt
const LENGTH_PROMPTED: [&str; 5] = [
    "AT+CMQTTTOPIC=",
    "AT+CMQTTPAYLOAD=",
    "AT+CMQTTWILLTOPIC=",
    "AT+CMQTTWILLMSG=",
    "AT+CMQTTSUBTOPIC=",
];

/// Something the simulated device received
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEntry {
    /// A command line, without its terminator
    Command(String),
    /// A body written after a prompt
    Body(Vec<u8>),
}

/// Shared record of device traffic
#[derive(Debug, Clone, Default)]
pub struct DeviceLog {
    entries: Arc<Mutex<Vec<DeviceEntry>>>,
}

impl DeviceLog {
    fn push(&self, entry: DeviceEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    /// Everything received so far, in order
    pub fn entries(&self) -> Vec<DeviceEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Command lines received so far
    pub fn commands(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                DeviceEntry::Command(c) => Some(c),
                DeviceEntry::Body(_) => None,
            })
            .collect()
    }

    /// Prompted bodies received so far
    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.entries()
            .into_iter()
            .filter_map(|e| match e {
                DeviceEntry::Body(b) => Some(b),
                DeviceEntry::Command(_) => None,
            })
            .collect()
    }
}

/// Host end of the simulated link
pub struct SimulatedChannel {
    inner: DuplexStream,
}

impl AsyncRead for SimulatedChannel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SimulatedChannel {
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
impl ModemChannel for SimulatedChannel {
    fn name(&self) -> &str {
        "simulated"
    }
}

/// What the device does with a command line
#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    #[cfg(test)]
    Silent,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Command,
    /// Waiting for a body of exactly this many bytes
    Body(usize),
    /// Waiting for an SMS body terminated by Ctrl-Z
    Message,
}

/// Builder for a simulated modem
#[derive(Debug, Default)]
pub struct SimulatedModem {
    overrides: Vec<(String, Reply)>,
}

impl SimulatedModem {
    /// A modem that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `reply` instead
    #[cfg(test)]
    pub fn respond(mut self, prefix: &str, reply: &str) -> Self {
        self.overrides
            .push((prefix.to_string(), Reply::Text(reply.to_string())));
        self
    }

    /// Never answer commands starting with `prefix`
    #[cfg(test)]
    pub fn silence(mut self, prefix: &str) -> Self {
        self.overrides.push((prefix.to_string(), Reply::Silent));
        self
    }

    /// Start the device task and return the host end of the link
    pub fn spawn(self) -> (SimulatedChannel, DeviceLog) {
        let (host, device) = tokio::io::duplex(PIPE_CAPACITY);
        let log = DeviceLog::default();
        let device_log = log.clone();

        tokio::spawn(async move {
            if let Err(e) = self.run(device, device_log).await {
                debug!("Simulated modem stopped: {}", e);
            }
        });

        (SimulatedChannel { inner: host }, log)
    }

    async fn run(self, mut port: DuplexStream, log: DeviceLog) -> io::Result<()> {
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = vec![0u8; 4096];
        let mut mode = Mode::Command;

        loop {
            let n = port.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            pending.extend_from_slice(&buf[..n]);

            loop {
                match mode {
                    Mode::Body(len) => {
                        if pending.len() < len {
                            break;
                        }
                        let body: Vec<u8> = pending.drain(..len).collect();
                        log.push(DeviceEntry::Body(body));
                        port.write_all(b"\r\nOK\r\n").await?;
                        mode = Mode::Command;
                    }
                    Mode::Message => {
                        let Some(end) = pending.iter().position(|&b| b == CTRL_Z) else {
                            break;
                        };
                        let body: Vec<u8> = pending.drain(..end).collect();
                        pending.drain(..1);
                        log.push(DeviceEntry::Body(body));
                        port.write_all(b"\r\n+CMGS: 1\r\n\r\nOK\r\n").await?;
                        mode = Mode::Command;
                    }
                    Mode::Command => {
                        let Some(end) = pending.windows(2).position(|w| w == b"\r\n") else {
                            break;
                        };
                        let raw: Vec<u8> = pending.drain(..end + 2).collect();
                        let line = String::from_utf8_lossy(&raw[..end]).trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        log.push(DeviceEntry::Command(line.clone()));

                        let (reply, next) = self.reply(&line);
                        if let Reply::Text(text) = reply {
                            port.write_all(text.as_bytes()).await?;
                        }
                        mode = next;
                    }
                }
            }
        }
    }

    fn reply(&self, line: &str) -> (Reply, Mode) {
        if let Some((_, reply)) = self.overrides.iter().find(|(p, _)| line.starts_with(p.as_str())) {
            return (reply.clone(), Mode::Command);
        }

        if LENGTH_PROMPTED.iter().any(|p| line.starts_with(p)) {
            return match announced_length(line) {
                Some(len) => (Reply::Text("\r\n>".into()), Mode::Body(len)),
                None => (Reply::Text("\r\nERROR\r\n".into()), Mode::Command),
            };
        }
        if line.starts_with("AT+CMGS=") {
            return (Reply::Text("\r\n> ".into()), Mode::Message);
        }

        let text = if line.starts_with("AT+CMQTTSTART") {
            "\r\nOK\r\n\r\n+CMQTTSTART: 0\r\n"
        } else if line.starts_with("AT+CMQTTCONNECT=") {
            "\r\nOK\r\n\r\n+CMQTTCONNECT: 0,0\r\n"
        } else if line.starts_with("AT+CMQTTPUB=") {
            "\r\nOK\r\n\r\n+CMQTTPUB: 0,0\r\n"
        } else if line.starts_with("AT+CMQTTSUB=") {
            "\r\nOK\r\n\r\n+CMQTTSUB: 0,0\r\n"
        } else if line.starts_with("AT+CMQTTDISC=") {
            "\r\nOK\r\n\r\n+CMQTTDISC: 0,0\r\n"
        } else if line.starts_with("AT+CMQTTSTOP") {
            "\r\nOK\r\n\r\n+CMQTTSTOP: 0\r\n"
        } else if line == "AT+CPIN?" {
            "\r\n+CPIN: READY\r\n\r\nOK\r\n"
        } else if line == "AT+CSQ" {
            "\r\n+CSQ: 21,99\r\n\r\nOK\r\n"
        } else if line == "AT+CGPSINFO" {
            "\r\n+CGPSINFO: 5303.600000,N,02416.200000,W,190521,101530.0,12.5,0.0,\r\n\r\nOK\r\n"
        } else {
            "\r\nOK\r\n"
        };
        (Reply::Text(text.into()), Mode::Command)
    }
}

/// Byte count announced by a command such as `AT+CMQTTTOPIC=0,25`
fn announced_length(line: &str) -> Option<usize> {
    let (_, args) = line.split_once('=')?;
    args.split(',').nth(1)?.trim().parse().ok()
}
