//! AT Transaction Engine
//!
//! One command in flight at a time. Each transaction writes the command,
//! waits the full fixed timeout, then inspects whatever the modem buffered.
//! Responses are matched by substring, never parsed structurally.

use crate::transport::{read_available, ModemChannel};
use oceanwatch_shared::timing;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Prompt the modem prints when it is ready for a body
pub const PROMPT: &str = ">";

/// Channel-level failures; protocol outcomes are reported as [`AtOutcome`]
#[derive(Error, Debug)]
pub enum ModemError {
    #[error("Modem channel I/O error: {0}")]
    Channel(#[from] io::Error),

    #[error("Modem channel closed")]
    Closed,
}

/// Outcome of a single AT transaction
#[derive(Debug, Clone, PartialEq)]
pub enum AtOutcome {
    /// The expected substring was present
    Success(String),
    /// The modem answered with something else
    Mismatch(String),
    /// Nothing was buffered when the wait elapsed
    NoResponse,
}

impl AtOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AtOutcome::Success(_))
    }

    /// The raw response text, if the modem said anything
    pub fn response(&self) -> Option<&str> {
        match self {
            AtOutcome::Success(text) | AtOutcome::Mismatch(text) => Some(text),
            AtOutcome::NoResponse => None,
        }
    }
}

/// A command, the substring that marks success, and how long to wait
#[derive(Debug, Clone)]
pub struct AtCommand {
    pub command: String,
    pub expect: String,
    pub timeout: Duration,
}

impl AtCommand {
    /// A command expecting `expect` within the default one-second wait
    pub fn new(command: impl Into<String>, expect: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            expect: expect.into(),
            timeout: Duration::from_millis(timing::AT_DEFAULT_TIMEOUT_MS),
        }
    }

    /// A length-announcing command expecting the `>` prompt
    pub fn prompt(command: impl Into<String>) -> Self {
        Self::new(command, PROMPT).timeout_ms(timing::PROMPT_TIMEOUT_MS)
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout = Duration::from_millis(ms);
        self
    }
}

/// Outcome of a prompted (two-phase) transaction
#[derive(Debug, Clone, PartialEq)]
pub struct PromptedOutcome {
    /// Outcome of the announcing command
    pub prompt: AtOutcome,
    /// Whether the body was written (only after a prompt)
    pub body_written: bool,
    /// Whatever the modem answered after the body
    pub reply: String,
}

impl PromptedOutcome {
    pub fn is_success(&self) -> bool {
        self.prompt.is_success() && self.body_written && !self.reply.contains("ERROR")
    }
}

/// Drives AT transactions over an exclusively owned channel
pub struct AtEngine<C: ModemChannel> {
    channel: C,
    response_settle: Duration,
    body_settle: Duration,
}

impl<C: ModemChannel> AtEngine<C> {
    /// Create an engine with the hat's measured settle times
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            response_settle: Duration::from_millis(timing::RESPONSE_SETTLE_MS),
            body_settle: Duration::from_millis(timing::BODY_SETTLE_MS),
        }
    }

    /// Name of the underlying channel
    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    /// Send `command`, wait `timeout`, and match the buffered reply
    pub async fn send(
        &mut self,
        command: &str,
        expect: &str,
        timeout: Duration,
    ) -> Result<AtOutcome, ModemError> {
        self.write_line(command).await?;
        self.await_reply(command, expect, timeout).await
    }

    /// Wait `timeout` for a reply to something already written
    ///
    /// `label` only names the exchange in logs.
    pub async fn await_reply(
        &mut self,
        label: &str,
        expect: &str,
        timeout: Duration,
    ) -> Result<AtOutcome, ModemError> {
        sleep(timeout).await;

        let mut raw = self.read_buffered()?;
        if !raw.is_empty() {
            // The reply may still be trickling in
            sleep(self.response_settle).await;
            raw.extend(self.read_buffered()?);
        }

        if raw.is_empty() {
            debug!("{} no response", printable(label));
            return Ok(AtOutcome::NoResponse);
        }

        let text = String::from_utf8_lossy(&raw).into_owned();
        if text.contains(expect) {
            debug!("{} -> {}", printable(label), text.trim());
            Ok(AtOutcome::Success(text))
        } else {
            warn!("{} ERROR, back: {}", printable(label), text.trim());
            Ok(AtOutcome::Mismatch(text))
        }
    }

    /// Run a prepared command
    pub async fn execute(&mut self, command: &AtCommand) -> Result<AtOutcome, ModemError> {
        self.send(&command.command, &command.expect, command.timeout)
            .await
    }

    /// Announce a body, wait for the prompt, then write the body
    ///
    /// The body is only written once the modem has prompted for it; a
    /// missing prompt is reported, not retried.
    pub async fn prompted(
        &mut self,
        announce: &AtCommand,
        body: &[u8],
    ) -> Result<PromptedOutcome, ModemError> {
        let prompt = self.execute(announce).await?;
        if !prompt.is_success() {
            return Ok(PromptedOutcome {
                prompt,
                body_written: false,
                reply: String::new(),
            });
        }

        self.write_raw(body).await?;
        sleep(self.body_settle).await;
        let reply = String::from_utf8_lossy(&self.read_buffered()?).into_owned();
        if reply.contains("ERROR") {
            warn!("Body after {} rejected: {}", announce.command, reply.trim());
        }

        Ok(PromptedOutcome {
            prompt,
            body_written: true,
            reply,
        })
    }

    /// Write bytes with no terminator
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ModemError> {
        self.channel.write_all(bytes).await?;
        self.channel.flush().await?;
        Ok(())
    }

    /// Drop unsolicited input
    pub async fn discard_input(&mut self) -> Result<(), ModemError> {
        self.channel.discard_input().await?;
        Ok(())
    }

    async fn write_line(&mut self, command: &str) -> Result<(), ModemError> {
        let mut line = Vec::with_capacity(command.len() + 2);
        line.extend_from_slice(command.as_bytes());
        line.extend_from_slice(b"\r\n");
        self.write_raw(&line).await
    }

    fn read_buffered(&mut self) -> Result<Vec<u8>, ModemError> {
        read_available(&mut self.channel).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => ModemError::Closed,
            _ => ModemError::Channel(e),
        })
    }
}

/// Control characters (Ctrl-Z) shown escaped in logs
fn printable(command: &str) -> String {
    command.escape_debug().to_string()
}
