//! Network diagnostics and SMS

use super::at::{AtCommand, AtOutcome, ModemError};
use super::power::PowerKey;
use super::session::ModemSession;
use crate::transport::ModemChannel;
use oceanwatch_shared::state_machine::SessionEvent;
use oceanwatch_shared::timing;
use std::time::Duration;
use tracing::{info, warn};

const CTRL_Z: u8 = 0x1a;

/// Registration and bearer checks run by [`ModemSession::check_network`]
const DIAGNOSTICS: [(&str, &str); 10] = [
    ("AT+CPIN?", "READY"),
    ("AT+CGMM", "OK"),
    ("AT+CGMR", "OK"),
    ("AT+GSN", "OK"),
    ("AT+COPS?", "OK"),
    ("AT+CSQ", "OK"),
    ("AT+CPSI?", "OK"),
    ("AT+CGREG", "OK"),
    ("AT+CGACT?", "OK"),
    ("AT+CGPADDR", "OK"),
];

/// Result of one diagnostic command
#[derive(Debug, Clone)]
pub struct DiagnosticLine {
    pub command: &'static str,
    pub outcome: AtOutcome,
}

/// Results of a full diagnostics pass
#[derive(Debug, Clone, Default)]
pub struct NetworkReport {
    pub lines: Vec<DiagnosticLine>,
}

impl NetworkReport {
    /// The SIM answered `READY`
    pub fn sim_ready(&self) -> bool {
        self.lines
            .iter()
            .any(|l| l.command == "AT+CPIN?" && l.outcome.is_success())
    }

    /// Signal quality as (rssi, ber), if the modem reported one
    pub fn signal_quality(&self) -> Option<(u8, u8)> {
        let line = self.lines.iter().find(|l| l.command == "AT+CSQ")?;
        parse_csq(line.outcome.response()?)
    }

    pub fn failures(&self) -> usize {
        self.lines.iter().filter(|l| !l.outcome.is_success()).count()
    }
}

/// Extract `<rssi>,<ber>` from a `+CSQ:` line; 99 means unknown
fn parse_csq(text: &str) -> Option<(u8, u8)> {
    let rest = &text[text.find("+CSQ:")? + 5..];
    let line = rest.lines().next()?;
    let (rssi, ber) = line.trim().split_once(',')?;
    Some((rssi.trim().parse().ok()?, ber.trim().parse().ok()?))
}

impl<C: ModemChannel, P: PowerKey> ModemSession<C, P> {
    /// Query SIM, registration and bearer status
    ///
    /// A READY SIM marks the network as ready on the session.
    pub async fn check_network(&mut self) -> Result<NetworkReport, ModemError> {
        let mut report = NetworkReport::default();
        for (command, expect) in DIAGNOSTICS {
            let outcome = self
                .engine_mut()
                .execute(&AtCommand::new(command, expect))
                .await?;
            report.lines.push(DiagnosticLine { command, outcome });
        }

        let ready = report.sim_ready();
        self.record(ready, SessionEvent::NetworkReady);
        match report.signal_quality() {
            Some((rssi, ber)) => info!("SIM ready: {}, signal {},{}", ready, rssi, ber),
            None => info!("SIM ready: {}, signal unknown", ready),
        }
        if report.failures() > 0 {
            warn!("{} diagnostic command(s) failed", report.failures());
        }
        Ok(report)
    }

    /// Send a text message in text mode
    pub async fn send_sms(&mut self, number: &str, text: &str) -> Result<bool, ModemError> {
        info!("Sending short message to {}", number);
        self.engine_mut()
            .execute(&AtCommand::new("AT+CMGF=1", "OK"))
            .await?;

        let prompt = self
            .engine_mut()
            .execute(&AtCommand::prompt(format!("AT+CMGS=\"{number}\"")))
            .await?;
        if !prompt.is_success() {
            warn!("No message prompt from modem");
            return Ok(false);
        }

        let mut body = Vec::with_capacity(text.len() + 1);
        body.extend_from_slice(text.as_bytes());
        body.push(CTRL_Z);
        self.engine_mut().write_raw(&body).await?;

        let sent = self
            .engine_mut()
            .await_reply(
                "message body",
                "OK",
                Duration::from_millis(timing::SMS_SEND_TIMEOUT_MS),
            )
            .await?;
        if sent.is_success() {
            info!("Short message sent");
        } else {
            warn!("Short message not confirmed");
        }
        Ok(sent.is_success())
    }
}
