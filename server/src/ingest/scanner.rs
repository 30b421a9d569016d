//! Ingestion scanner: stored objects to candidate detections

use crate::store::StoredObject;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use oceanwatch_shared::codec::{AssemblerStats, FrameAssembler};
use tracing::{debug, warn};

/// A reassembled frame awaiting dedup
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Image bytes
    pub payload: Bytes,
    /// Last-modified time of the end token object
    pub arrived: DateTime<Utc>,
    /// Raw metadata fields from the start token
    pub fields: Vec<String>,
}

/// Result of one pass over a listing
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub candidates: Vec<Candidate>,
    pub stats: AssemblerStats,
    /// A frame was still open when the listing ran out
    pub unterminated: bool,
}

/// Walks a full listing in order and re-derives frames
#[derive(Debug, Default)]
pub struct Scanner {
    assembler: FrameAssembler,
    scans: u64,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scans run so far
    pub fn scans(&self) -> u64 {
        self.scans
    }

    /// Scan a complete listing
    ///
    /// Every scan starts idle; a frame left open at the end of the listing
    /// is discarded rather than carried into the next scan.
    pub fn scan(&mut self, objects: &[StoredObject]) -> ScanOutcome {
        self.assembler = FrameAssembler::new();
        self.scans += 1;

        let mut candidates = Vec::new();
        for object in objects {
            let body = object.text();
            if let Some(frame) = self.assembler.push(&body, object.last_modified) {
                debug!(
                    "Frame closed by {} ({} bytes)",
                    object.key,
                    frame.payload.len()
                );
                candidates.push(Candidate {
                    payload: frame.payload,
                    arrived: frame.stamp,
                    fields: frame.fields,
                });
            }
        }

        let unterminated = self.assembler.reset();
        let stats = self.assembler.stats();
        if stats.malformed_frames > 0 {
            warn!("Skipped {} malformed frame(s)", stats.malformed_frames);
        }
        if stats.corrupt_chunks > 0 {
            warn!("Dropped {} frame(s) with corrupt chunks", stats.corrupt_chunks);
        }
        if unterminated {
            debug!("Listing ended inside an open frame");
        }

        ScanOutcome {
            candidates,
            stats,
            unterminated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use oceanwatch_shared::codec::encode_frame;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_621_418_400 + secs, 0).unwrap()
    }

    fn start(fields: usize) -> String {
        let values: Vec<String> = (0..fields).map(|i| i.to_string()).collect();
        format!("{{Image Start,{}}}", values.join(","))
    }

    fn objects(bodies: &[String]) -> Vec<StoredObject> {
        bodies
            .iter()
            .enumerate()
            .map(|(i, b)| StoredObject::new(format!("{i:04}"), b.clone().into_bytes(), at(i as i64)))
            .collect()
    }

    #[test]
    fn test_frame_uses_end_token_timestamp() {
        let tokens = encode_frame(Bytes::from_static(b"\xff\xd8jpeg"), None, 3).expect("encode");
        let mut bodies = vec![start(10)];
        bodies.extend(tokens.into_iter().skip(1));

        let outcome = Scanner::new().scan(&objects(&bodies));
        assert_eq!(outcome.candidates.len(), 1);
        let candidate = &outcome.candidates[0];
        assert_eq!(candidate.payload.as_ref(), b"\xff\xd8jpeg");
        assert_eq!(candidate.arrived, at(bodies.len() as i64 - 1));
        assert_eq!(candidate.fields.len(), 10);
    }

    #[test]
    fn test_missing_end_and_short_start() {
        let bodies = vec![
            "00ff".to_string(),
            start(10),
            "0102".to_string(),
            // abandons the open frame, then is itself malformed
            start(3),
            "0304".to_string(),
            "{Image End}".to_string(),
            start(10),
            "0506".to_string(),
            "{Image End}".to_string(),
            start(10),
            "0708".to_string(),
        ];

        let outcome = Scanner::new().scan(&objects(&bodies));
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].payload.as_ref(), &[5, 6]);
        assert_eq!(outcome.stats.malformed_frames, 1);
        assert_eq!(outcome.stats.abandoned_frames, 1);
        assert_eq!(outcome.stats.ignored_objects, 3);
        assert!(outcome.unterminated);
    }

    #[test]
    fn test_each_scan_starts_idle() {
        let mut scanner = Scanner::new();
        scanner.scan(&objects(&[start(10), "0a".to_string()]));

        // A lone end token must not close the frame left open last time
        let outcome = scanner.scan(&objects(&["{Image End}".to_string()]));
        assert!(outcome.candidates.is_empty());
        assert_eq!(scanner.scans(), 2);
    }
}
