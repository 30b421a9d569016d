//! Frame transmitter: publishes one image as a Start / chunks / End run

use crate::modem::{ModemSession, Payload, PowerKey};
use crate::transport::ModemChannel;
use anyhow::{Context, Result};
use bytes::Bytes;
use oceanwatch_shared::codec::{encode_chunk, split_payload, start_token};
use oceanwatch_shared::{FrameMetadata, DEFAULT_CHUNK_SIZE, END_TOKEN};
use tracing::{debug, info, warn};

/// Encoder settings
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Maximum chunk size in bytes, before hex encoding
    pub chunk_size: usize,
    /// Topic every token is published to
    pub topic: String,
    /// Append a `seq=<n>` field to each start token
    pub sequence_numbers: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            topic: "aws/things/simcom7600_device01/".into(),
            sequence_numbers: false,
        }
    }
}

/// Outcome of one frame transmission
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransmitReport {
    pub payload_bytes: usize,
    pub chunks: usize,
    /// Tokens the modem confirmed
    pub published: usize,
    /// Tokens the modem did not confirm (never resent)
    pub unconfirmed: usize,
    pub sequence: Option<u64>,
}

impl TransmitReport {
    pub fn is_complete(&self) -> bool {
        self.unconfirmed == 0
    }
}

/// Serializes frames onto an MQTT session
#[derive(Debug)]
pub struct FrameTransmitter {
    config: EncoderConfig,
    next_sequence: u64,
}

impl FrameTransmitter {
    pub fn new(config: EncoderConfig) -> Self {
        Self {
            config,
            next_sequence: 0,
        }
    }

    /// Publish one frame, strictly in order and without per-chunk retries
    pub async fn transmit<C: ModemChannel, P: PowerKey>(
        &mut self,
        session: &mut ModemSession<C, P>,
        payload: Bytes,
        metadata: Option<FrameMetadata>,
    ) -> Result<TransmitReport> {
        let mut metadata = metadata;
        let mut sequence = None;
        if self.config.sequence_numbers {
            if let Some(meta) = metadata.as_mut() {
                meta.sequence = Some(self.next_sequence);
                sequence = meta.sequence;
                self.next_sequence += 1;
            }
        }

        let payload_bytes = payload.len();
        let chunks = split_payload(payload, self.config.chunk_size)
            .context("Failed to split payload")?;
        let start = start_token(metadata.as_ref()).context("Failed to build start token")?;

        let mut report = TransmitReport {
            payload_bytes,
            chunks: chunks.len(),
            sequence,
            ..Default::default()
        };
        match &metadata {
            Some(meta) => info!("Sending frame: {} bytes in {} chunks, {}", payload_bytes, chunks.len(), meta),
            None => info!("Sending frame: {} bytes in {} chunks", payload_bytes, chunks.len()),
        }

        let topic = self.config.topic.as_str();
        self.tally(&mut report, session.publish(topic, Payload::Text(&start)).await?);
        for (index, chunk) in chunks.iter().enumerate() {
            let encoded = encode_chunk(chunk);
            debug!("Chunk {}/{} ({} bytes)", index + 1, chunks.len(), chunk.len());
            let ok = session.publish(topic, Payload::Raw(encoded.as_bytes())).await?;
            self.tally(&mut report, ok);
        }
        self.tally(&mut report, session.publish(topic, Payload::Text(END_TOKEN)).await?);

        if report.is_complete() {
            info!("Frame sent ({} tokens)", report.published);
        } else {
            warn!(
                "Frame sent with {} unconfirmed token(s) out of {}",
                report.unconfirmed,
                report.published + report.unconfirmed
            );
        }
        Ok(report)
    }

    fn tally(&self, report: &mut TransmitReport, ok: bool) {
        if ok {
            report.published += 1;
        } else {
            report.unconfirmed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::RecordedPowerKey;
    use crate::transport::SimulatedModem;
    use oceanwatch_shared::codec::FrameAssembler;

    fn metadata() -> FrameMetadata {
        FrameMetadata {
            latitude: 54.1,
            longitude: -20.5,
            cluster_count: 3,
            capture_label: "10-15-30_19-05-21".into(),
            temperature: 14.0,
            humidity: 81.5,
            pressure: 1012.0,
            pitch: 1.5,
            roll: -0.5,
            yaw: 270.0,
            sequence: None,
        }
    }

    fn image(len: usize) -> Bytes {
        (0..len).map(|i| (i * 7 % 256) as u8).collect::<Vec<u8>>().into()
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmitted_frame_reassembles() {
        let (channel, log) = SimulatedModem::new().spawn();
        let mut session = ModemSession::new(channel, RecordedPowerKey::new());
        session.assume_powered();

        let mut transmitter = FrameTransmitter::new(EncoderConfig {
            chunk_size: 5_000,
            topic: "t".into(),
            sequence_numbers: false,
        });
        let report = transmitter
            .transmit(&mut session, image(12_000), Some(metadata()))
            .await
            .expect("transmit");
        assert_eq!(report.chunks, 3);
        assert_eq!(report.published, 5);
        assert!(report.is_complete());

        // Each publish uploads the topic, then the payload
        let bodies = log.bodies();
        assert_eq!(bodies.len(), 10);
        let mut assembler = FrameAssembler::new();
        let mut frames = Vec::new();
        for body in bodies.iter().skip(1).step_by(2) {
            let text = String::from_utf8(body.clone()).expect("utf8 body");
            frames.extend(assembler.push(&text, ()));
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, image(12_000));
        assert_eq!(
            FrameMetadata::from_fields(&frames[0].fields).expect("metadata"),
            metadata()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_numbers_increment() {
        let (channel, log) = SimulatedModem::new().spawn();
        let mut session = ModemSession::new(channel, RecordedPowerKey::new());

        let mut transmitter = FrameTransmitter::new(EncoderConfig {
            sequence_numbers: true,
            ..Default::default()
        });
        for expected in 0..2u64 {
            let report = transmitter
                .transmit(&mut session, image(10), Some(metadata()))
                .await
                .expect("transmit");
            assert_eq!(report.sequence, Some(expected));
        }

        let starts: Vec<String> = log
            .bodies()
            .into_iter()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .filter(|b| b.starts_with("{Image Start"))
            .collect();
        assert_eq!(starts.len(), 2);
        assert!(starts[1].ends_with(",seq=1}"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_tokens_are_counted_not_resent() {
        let (channel, log) = SimulatedModem::new()
            .respond("AT+CMQTTPUB=", "\r\nERROR\r\n")
            .spawn();
        let mut session = ModemSession::new(channel, RecordedPowerKey::new());

        let mut transmitter = FrameTransmitter::new(EncoderConfig::default());
        let report = transmitter
            .transmit(&mut session, image(100), Some(metadata()))
            .await
            .expect("transmit");
        assert_eq!(report.unconfirmed, 3);
        assert!(!report.is_complete());
        let publishes = log
            .commands()
            .iter()
            .filter(|c| c.starts_with("AT+CMQTTPUB="))
            .count();
        assert_eq!(publishes, 3);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_rejected() {
        let (channel, _log) = SimulatedModem::new().spawn();
        let mut session = ModemSession::new(channel, RecordedPowerKey::new());
        let mut transmitter = FrameTransmitter::new(EncoderConfig {
            chunk_size: 0,
            ..Default::default()
        });
        assert!(transmitter
            .transmit(&mut session, image(10), None)
            .await
            .is_err());
    }
}
