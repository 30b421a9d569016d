//! Modem Session Lifecycle
//!
//! Power control, TLS configuration and the MQTT client, all expressed as
//! fixed sequences of AT transactions. Sequences are fail-open: a failed
//! step is logged and the next step is still issued. The state machine
//! records only what the modem actually confirmed.

use super::at::{AtCommand, AtEngine, ModemError, PromptedOutcome};
use super::power::PowerKey;
use crate::transport::ModemChannel;
use anyhow::Result;
use oceanwatch_shared::state_machine::{
    ModemStateMachine, MqttPhase, SessionEvent, TransitionResult,
};
use oceanwatch_shared::timing;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// MQTT client index on the modem (the hat supports two)
const CLIENT_INDEX: u8 = 0;

/// Broker and will configuration for the MQTT client
#[derive(Debug, Clone)]
pub struct MqttEndpoint {
    /// Broker host name
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keepalive_secs: u16,
    /// SSL context bound to the client
    pub ssl_context: u8,
    pub will_topic: String,
    pub will_message: String,
}

impl Default for MqttEndpoint {
    fn default() -> Self {
        Self {
            host: "example-ats.iot.eu-west-2.amazonaws.com".into(),
            port: 8883,
            client_id: "SIMCom_client01".into(),
            keepalive_secs: 60,
            ssl_context: 0,
            will_topic: "aws/things/simcom7600_device01/".into(),
            will_message: "SIMCom Connected!".into(),
        }
    }
}

/// Certificate files already downloaded to the modem's flash
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub ssl_context: u8,
    /// 4 = all TLS versions
    pub ssl_version: u8,
    /// 2 = mutual authentication
    pub auth_mode: u8,
    pub ca_cert: String,
    pub client_cert: String,
    pub client_key: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ssl_context: 0,
            ssl_version: 4,
            auth_mode: 2,
            ca_cert: "cacert.pem".into(),
            client_cert: "clientcert.pem".into(),
            client_key: "clientkey.pem".into(),
        }
    }
}

/// A publish body
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    /// UTF-8 text
    Text(&'a str),
    /// Bytes written to the modem untouched
    Raw(&'a [u8]),
}

impl<'a> Payload<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Raw(bytes) => bytes,
        }
    }
}

/// Steps of the MQTT connect sequence, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    StartService,
    AcquireClient,
    BindSsl,
    WillTopic,
    WillMessage,
    Connect,
}

impl ConnectStep {
    fn event(self) -> SessionEvent {
        match self {
            ConnectStep::StartService => SessionEvent::ServiceStarted,
            ConnectStep::AcquireClient => SessionEvent::ClientAcquired,
            ConnectStep::BindSsl => SessionEvent::SslBound,
            ConnectStep::WillTopic => SessionEvent::WillTopicSet,
            ConnectStep::WillMessage => SessionEvent::WillMessageSet,
            ConnectStep::Connect => SessionEvent::Connected,
        }
    }
}

/// Per-step result of a connect attempt
#[derive(Debug, Clone)]
pub struct ConnectReport {
    pub steps: Vec<(ConnectStep, bool)>,
    /// Furthest phase the modem confirmed
    pub phase: MqttPhase,
}

impl ConnectReport {
    pub fn is_connected(&self) -> bool {
        self.phase == MqttPhase::Connected
    }

    pub fn failed_steps(&self) -> Vec<ConnectStep> {
        self.steps
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(step, _)| *step)
            .collect()
    }
}

/// The modem session, owning the AT channel and the power key
pub struct ModemSession<C: ModemChannel, P: PowerKey> {
    engine: AtEngine<C>,
    power_key: P,
    state: ModemStateMachine,
}

impl<C: ModemChannel, P: PowerKey> ModemSession<C, P> {
    /// Wrap an open channel; the modem is assumed to be off
    pub fn new(channel: C, power_key: P) -> Self {
        Self {
            engine: AtEngine::new(channel),
            power_key,
            state: ModemStateMachine::new(),
        }
    }

    /// What the modem has confirmed so far
    pub fn state(&self) -> &ModemStateMachine {
        &self.state
    }

    /// Assume the modem is already on (e.g. powered at boot by the hat's jumper)
    pub fn assume_powered(&mut self) {
        self.record(true, SessionEvent::PoweredOn);
    }

    pub(super) fn engine_mut(&mut self) -> &mut AtEngine<C> {
        &mut self.engine
    }

    /// Apply a confirmed event; failed steps leave the state untouched
    pub(super) fn record(&mut self, ok: bool, event: SessionEvent) {
        if !ok {
            return;
        }
        if let TransitionResult::Invalid { from, event } = self.state.process_event(event) {
            warn!(
                "Modem confirmed {:?} while in {:?}; state not advanced",
                event, from
            );
        }
    }

    /// Press the power key to switch the modem on
    pub async fn power_on(&mut self) -> Result<()> {
        info!("SIM7600X is starting on {}", self.engine.channel_name());
        self.power_key.set_level(false).await?;
        sleep(Duration::from_millis(timing::POWER_KEY_SETUP_MS)).await;
        self.power_key.set_level(true).await?;
        sleep(Duration::from_millis(timing::POWER_ON_PRESS_MS)).await;
        self.power_key.set_level(false).await?;
        sleep(Duration::from_millis(timing::POWER_RELEASE_MS)).await;
        self.engine.discard_input().await?;

        self.record(true, SessionEvent::PoweredOn);
        info!("SIM7600X is ready");
        Ok(())
    }

    /// Press the power key to switch the modem off
    pub async fn power_down(&mut self) -> Result<()> {
        info!("SIM7600X is logging off");
        self.power_key.set_level(true).await?;
        sleep(Duration::from_millis(timing::POWER_DOWN_PRESS_MS)).await;
        self.power_key.set_level(false).await?;
        sleep(Duration::from_millis(timing::POWER_RELEASE_MS)).await;

        self.record(true, SessionEvent::PoweredDown);
        info!("SIM7600X is deactivated");
        Ok(())
    }

    /// Point the SSL context at the certificates provisioned on the modem
    ///
    /// The files must have been downloaded with `AT+CCERTDOWN` beforehand.
    pub async fn configure_tls(&mut self, tls: &TlsConfig) -> Result<bool, ModemError> {
        let ctx = tls.ssl_context;
        let commands = [
            AtCommand::new("AT+CCERTLIST", "OK").timeout_ms(2000),
            AtCommand::new(format!("AT+CSSLCFG=\"sslversion\",{ctx},{}", tls.ssl_version), "OK"),
            AtCommand::new(format!("AT+CSSLCFG=\"authmode\",{ctx},{}", tls.auth_mode), "OK"),
            AtCommand::new(format!("AT+CSSLCFG=\"cacert\",{ctx},\"{}\"", tls.ca_cert), "OK"),
            AtCommand::new(
                format!("AT+CSSLCFG=\"clientcert\",{ctx},\"{}\"", tls.client_cert),
                "OK",
            ),
            AtCommand::new(
                format!("AT+CSSLCFG=\"clientkey\",{ctx},\"{}\"", tls.client_key),
                "OK",
            ),
        ];

        let mut all_ok = true;
        for command in &commands {
            all_ok &= self.engine.execute(command).await?.is_success();
        }

        self.record(all_ok, SessionEvent::TlsConfigured);
        if !all_ok {
            warn!("TLS configuration incomplete");
        }
        Ok(all_ok)
    }

    /// Start the MQTT service and connect to the broker
    pub async fn connect(&mut self, endpoint: &MqttEndpoint) -> Result<ConnectReport, ModemError> {
        info!("Connecting to tcp://{}:{}", endpoint.host, endpoint.port);
        let mut steps = Vec::with_capacity(6);

        for step in [
            ConnectStep::StartService,
            ConnectStep::AcquireClient,
            ConnectStep::BindSsl,
            ConnectStep::WillTopic,
            ConnectStep::WillMessage,
            ConnectStep::Connect,
        ] {
            let ok = self.run_connect_step(step, endpoint).await?;
            if !ok {
                warn!("MQTT connect step {:?} failed, continuing", step);
            }
            self.record(ok, step.event());
            steps.push((step, ok));
        }

        let report = ConnectReport {
            steps,
            phase: self.state.phase(),
        };
        if report.is_connected() {
            info!("MQTT session connected");
        } else {
            warn!("MQTT session left in {:?}", report.phase);
        }
        Ok(report)
    }

    async fn run_connect_step(
        &mut self,
        step: ConnectStep,
        endpoint: &MqttEndpoint,
    ) -> Result<bool, ModemError> {
        let outcome = match step {
            ConnectStep::StartService => {
                self.engine
                    .execute(&AtCommand::new("AT+CMQTTSTART", "+CMQTTSTART: 0"))
                    .await?
            }
            ConnectStep::AcquireClient => {
                self.engine
                    .execute(&AtCommand::new(
                        format!("AT+CMQTTACCQ={CLIENT_INDEX},\"{}\",1", endpoint.client_id),
                        "OK",
                    ))
                    .await?
            }
            ConnectStep::BindSsl => {
                self.engine
                    .execute(&AtCommand::new(
                        format!("AT+CMQTTSSLCFG={CLIENT_INDEX},{}", endpoint.ssl_context),
                        "OK",
                    ))
                    .await?
            }
            ConnectStep::WillTopic => {
                let topic = endpoint.will_topic.as_bytes();
                return Ok(self
                    .upload(
                        format!("AT+CMQTTWILLTOPIC={CLIENT_INDEX},{}", topic.len()),
                        topic,
                    )
                    .await?
                    .is_success());
            }
            ConnectStep::WillMessage => {
                let message = endpoint.will_message.as_bytes();
                return Ok(self
                    .upload(
                        format!("AT+CMQTTWILLMSG={CLIENT_INDEX},{},1", message.len()),
                        message,
                    )
                    .await?
                    .is_success());
            }
            ConnectStep::Connect => {
                self.engine
                    .execute(
                        &AtCommand::new(
                            format!(
                                "AT+CMQTTCONNECT={CLIENT_INDEX},\"tcp://{}:{}\",{},1",
                                endpoint.host, endpoint.port, endpoint.keepalive_secs
                            ),
                            "+CMQTTCONNECT: 0,0",
                        )
                        .timeout_ms(timing::CONNECT_TIMEOUT_MS),
                    )
                    .await?
            }
        };
        Ok(outcome.is_success())
    }

    /// Subscribe to a topic on the current session
    pub async fn subscribe(&mut self, topic: &str) -> Result<bool, ModemError> {
        let announced = self
            .upload(
                format!("AT+CMQTTSUBTOPIC={CLIENT_INDEX},{},1", topic.len()),
                topic.as_bytes(),
            )
            .await?
            .is_success();
        let confirmed = self
            .engine
            .execute(&AtCommand::new(format!("AT+CMQTTSUB={CLIENT_INDEX}"), "OK"))
            .await?
            .is_success();

        let ok = announced && confirmed;
        self.record(ok, SessionEvent::Subscribed(topic.to_string()));
        Ok(ok)
    }

    /// Publish one message with QoS 1
    pub async fn publish(&mut self, topic: &str, payload: Payload<'_>) -> Result<bool, ModemError> {
        if !self.state.is_connected() {
            warn!("Publishing while MQTT session is {:?}", self.state.phase());
        }

        let body = payload.as_bytes();
        let topic_ok = self
            .upload(
                format!("AT+CMQTTTOPIC={CLIENT_INDEX},{}", topic.len()),
                topic.as_bytes(),
            )
            .await?
            .is_success();
        let payload_ok = self
            .upload(format!("AT+CMQTTPAYLOAD={CLIENT_INDEX},{}", body.len()), body)
            .await?
            .is_success();
        let published = self
            .engine
            .execute(&AtCommand::new(
                format!("AT+CMQTTPUB={CLIENT_INDEX},1,60"),
                "+CMQTTPUB: 0,0",
            ))
            .await?
            .is_success();

        Ok(topic_ok && payload_ok && published)
    }

    /// Disconnect, release the client and stop the MQTT service
    pub async fn disconnect(&mut self) -> Result<bool, ModemError> {
        let steps = [
            (format!("AT+CMQTTDISC={CLIENT_INDEX},120"), SessionEvent::Disconnected),
            (format!("AT+CMQTTREL={CLIENT_INDEX}"), SessionEvent::ClientReleased),
            ("AT+CMQTTSTOP".to_string(), SessionEvent::ServiceStopped),
        ];

        let mut all_ok = true;
        for (command, event) in steps {
            let ok = self
                .engine
                .execute(&AtCommand::new(command, "OK"))
                .await?
                .is_success();
            self.record(ok, event);
            all_ok &= ok;
        }

        info!("MQTT session closed (phase {:?})", self.state.phase());
        Ok(all_ok)
    }

    async fn upload(&mut self, announce: String, body: &[u8]) -> Result<PromptedOutcome, ModemError> {
        self.engine.prompted(&AtCommand::prompt(announce), body).await
    }
}
