//! Modem Session State Machine
//!
//! Tracks what the modem has actually confirmed. The AT dialogue is
//! fail-open, so the session keeps issuing commands after a failed step;
//! this machine records the furthest phase reached instead of assuming
//! every step succeeded.

/// Power state of the modem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    #[default]
    Off,
    On,
}

/// MQTT service phase, in the order the connect sequence walks through it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum MqttPhase {
    /// MQTT service not running
    #[default]
    Stopped,
    /// `AT+CMQTTSTART` confirmed
    ServiceStarted,
    /// Client slot acquired
    ClientAcquired,
    /// SSL context bound to the client
    SslBound,
    /// Will topic uploaded
    WillTopicSet,
    /// Will message uploaded
    WillMessageSet,
    /// Broker connection confirmed
    Connected,
}

/// Events confirmed by the modem
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PoweredOn,
    PoweredDown,
    NetworkReady,
    TlsConfigured,
    ServiceStarted,
    ClientAcquired,
    SslBound,
    WillTopicSet,
    WillMessageSet,
    Connected,
    Subscribed(String),
    Disconnected,
    ClientReleased,
    ServiceStopped,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid; carries the resulting MQTT phase
    Success(MqttPhase),
    /// Transition was invalid from the current state
    Invalid { from: MqttPhase, event: SessionEvent },
}

/// Explicit record of the modem session
#[derive(Debug, Default)]
pub struct ModemStateMachine {
    power: PowerState,
    network_ready: bool,
    tls_configured: bool,
    phase: MqttPhase,
    subscriptions: Vec<String>,
}

impl ModemStateMachine {
    /// Create a state machine for a powered-off modem
    pub fn new() -> Self {
        Self::default()
    }

    pub fn power(&self) -> PowerState {
        self.power
    }

    pub fn phase(&self) -> MqttPhase {
        self.phase
    }

    pub fn network_ready(&self) -> bool {
        self.network_ready
    }

    pub fn tls_configured(&self) -> bool {
        self.tls_configured
    }

    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    /// Whether publish/subscribe can be expected to reach the broker
    pub fn is_connected(&self) -> bool {
        self.phase == MqttPhase::Connected
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: SessionEvent) -> TransitionResult {
        use MqttPhase::*;

        // Power loss wipes everything the modem held in RAM
        if event == SessionEvent::PoweredDown {
            *self = Self::default();
            return TransitionResult::Success(Stopped);
        }
        if event == SessionEvent::PoweredOn {
            self.power = PowerState::On;
            return TransitionResult::Success(self.phase);
        }
        if self.power == PowerState::Off {
            return self.invalid(event);
        }

        let next = match (&event, self.phase) {
            (SessionEvent::NetworkReady, phase) => {
                self.network_ready = true;
                Some(phase)
            }
            (SessionEvent::TlsConfigured, phase) => {
                self.tls_configured = true;
                Some(phase)
            }
            (SessionEvent::ServiceStarted, Stopped) => Some(ServiceStarted),
            (SessionEvent::ClientAcquired, ServiceStarted) => Some(ClientAcquired),
            (SessionEvent::SslBound, ClientAcquired) => Some(SslBound),
            (SessionEvent::WillTopicSet, SslBound) => Some(WillTopicSet),
            (SessionEvent::WillMessageSet, WillTopicSet) => Some(WillMessageSet),

            // Will and SSL binding are optional for the broker
            (SessionEvent::Connected, ClientAcquired | SslBound | WillTopicSet | WillMessageSet) => {
                Some(Connected)
            }

            (SessionEvent::Subscribed(topic), Connected) => {
                if !self.subscriptions.contains(topic) {
                    self.subscriptions.push(topic.clone());
                }
                Some(Connected)
            }

            (SessionEvent::Disconnected, Connected) => {
                self.subscriptions.clear();
                Some(ClientAcquired)
            }
            (SessionEvent::ClientReleased, ClientAcquired | SslBound | WillTopicSet | WillMessageSet) => {
                Some(ServiceStarted)
            }
            (SessionEvent::ServiceStopped, ServiceStarted) => Some(Stopped),

            _ => None,
        };

        match next {
            Some(phase) => {
                self.phase = phase;
                TransitionResult::Success(phase)
            }
            None => self.invalid(event),
        }
    }

    fn invalid(&self, event: SessionEvent) -> TransitionResult {
        TransitionResult::Invalid {
            from: self.phase,
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn powered() -> ModemStateMachine {
        let mut fsm = ModemStateMachine::new();
        fsm.process_event(SessionEvent::PoweredOn);
        fsm
    }

    #[test]
    fn test_initial_state() {
        let fsm = ModemStateMachine::new();
        assert_eq!(fsm.power(), PowerState::Off);
        assert_eq!(fsm.phase(), MqttPhase::Stopped);
        assert!(!fsm.network_ready());
        assert!(!fsm.tls_configured());
    }

    #[test]
    fn test_full_connect_flow() {
        let mut fsm = powered();

        for (event, phase) in [
            (SessionEvent::ServiceStarted, MqttPhase::ServiceStarted),
            (SessionEvent::ClientAcquired, MqttPhase::ClientAcquired),
            (SessionEvent::SslBound, MqttPhase::SslBound),
            (SessionEvent::WillTopicSet, MqttPhase::WillTopicSet),
            (SessionEvent::WillMessageSet, MqttPhase::WillMessageSet),
            (SessionEvent::Connected, MqttPhase::Connected),
        ] {
            assert_eq!(fsm.process_event(event), TransitionResult::Success(phase));
        }
        assert!(fsm.is_connected());

        fsm.process_event(SessionEvent::Subscribed("devices/buoy".into()));
        fsm.process_event(SessionEvent::Subscribed("devices/buoy".into()));
        assert_eq!(fsm.subscriptions(), &["devices/buoy".to_string()]);

        assert_eq!(
            fsm.process_event(SessionEvent::Disconnected),
            TransitionResult::Success(MqttPhase::ClientAcquired)
        );
        assert!(fsm.subscriptions().is_empty());
        fsm.process_event(SessionEvent::ClientReleased);
        assert_eq!(
            fsm.process_event(SessionEvent::ServiceStopped),
            TransitionResult::Success(MqttPhase::Stopped)
        );
    }

    #[test]
    fn test_skipped_step_is_invalid() {
        let mut fsm = powered();
        fsm.process_event(SessionEvent::ServiceStarted);

        // Client acquisition failed, so the SSL binding cannot be recorded
        let result = fsm.process_event(SessionEvent::SslBound);
        assert!(matches!(
            result,
            TransitionResult::Invalid {
                from: MqttPhase::ServiceStarted,
                ..
            }
        ));
        assert_eq!(fsm.phase(), MqttPhase::ServiceStarted);
    }

    #[test]
    fn test_connect_without_will_message() {
        let mut fsm = powered();
        for event in [
            SessionEvent::ServiceStarted,
            SessionEvent::ClientAcquired,
            SessionEvent::SslBound,
            SessionEvent::WillTopicSet,
        ] {
            fsm.process_event(event);
        }

        assert_eq!(
            fsm.process_event(SessionEvent::Connected),
            TransitionResult::Success(MqttPhase::Connected)
        );
        assert!(fsm.is_connected());
    }

    #[test]
    fn test_connect_needs_a_client() {
        let mut fsm = powered();
        fsm.process_event(SessionEvent::ServiceStarted);
        assert!(matches!(
            fsm.process_event(SessionEvent::Connected),
            TransitionResult::Invalid { .. }
        ));
    }

    #[test]
    fn test_events_rejected_while_off() {
        let mut fsm = ModemStateMachine::new();
        assert!(matches!(
            fsm.process_event(SessionEvent::ServiceStarted),
            TransitionResult::Invalid { .. }
        ));
        assert!(matches!(
            fsm.process_event(SessionEvent::NetworkReady),
            TransitionResult::Invalid { .. }
        ));
        assert!(!fsm.network_ready());
    }

    #[test]
    fn test_power_down_resets() {
        let mut fsm = powered();
        fsm.process_event(SessionEvent::NetworkReady);
        fsm.process_event(SessionEvent::TlsConfigured);
        fsm.process_event(SessionEvent::ServiceStarted);

        fsm.process_event(SessionEvent::PoweredDown);
        assert_eq!(fsm.power(), PowerState::Off);
        assert_eq!(fsm.phase(), MqttPhase::Stopped);
        assert!(!fsm.network_ready());
        assert!(!fsm.tls_configured());
    }
}
