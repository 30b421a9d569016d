//! Ingestion pipeline for uplinked frames
//!
//! This module handles:
//! - Re-deriving frames from a full object listing
//! - Deduplicating arrivals by timestamp key
//! - Persisting images and aggregating detections
//! - Exporting a JSON snapshot

mod aggregate;
mod puller;
mod scanner;
mod sink;
mod snapshot;

pub use puller::Ingestor;
pub use sink::{DirectoryImageSink, ImageSink};
pub use snapshot::write_snapshot;

#[cfg(test)]
pub use sink::MemoryImageSink;
