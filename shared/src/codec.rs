//! Frame token codec
//!
//! A frame is transmitted as an ordered run of text tokens:
//! ```text
//! {Image Start,<metadata fields...>}
//! <hex chunk 0>
//! ...
//! <hex chunk n>
//! {Image End}
//! ```
//!
//! Chunks carry no sequence number, so reassembly relies entirely on the
//! order in which the receiver sees the tokens.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::{FrameMetadata, END_TOKEN, MIN_METADATA_FIELDS, START_MARKER};

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("Field {field} contains reserved character {found:?}")]
    ReservedCharacter { field: &'static str, found: char },

    #[error("Start token has {found} metadata fields (need {required})")]
    TooFewFields { found: usize, required: usize },

    #[error("Invalid {name} field: {value:?}")]
    InvalidField { name: &'static str, value: String },

    #[error("Chunk is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Split a payload into contiguous segments of at most `chunk_size` bytes
///
/// The segments share the payload's buffer; the last one may be shorter.
/// An empty payload yields no segments.
pub fn split_payload(payload: Bytes, chunk_size: usize) -> Result<Vec<Bytes>, CodecError> {
    if chunk_size == 0 {
        return Err(CodecError::InvalidChunkSize);
    }

    let len = payload.len();
    Ok((0..len)
        .step_by(chunk_size)
        .map(|start| payload.slice(start..(start + chunk_size).min(len)))
        .collect())
}

/// Build the start token for a frame
pub fn start_token(metadata: Option<&FrameMetadata>) -> Result<String, CodecError> {
    let mut token = format!("{{{START_MARKER}");
    if let Some(meta) = metadata {
        for field in meta.to_fields()? {
            token.push(',');
            token.push_str(&field);
        }
    }
    token.push('}');
    Ok(token)
}

/// Hex-encode one chunk for transmission
pub fn encode_chunk(chunk: &[u8]) -> String {
    hex::encode(chunk)
}

/// Decode one received hex chunk
pub fn decode_chunk(body: &str) -> Result<Vec<u8>, CodecError> {
    Ok(hex::decode(body.trim())?)
}

/// Encode a complete frame into its token sequence
pub fn encode_frame(
    payload: Bytes,
    metadata: Option<&FrameMetadata>,
    chunk_size: usize,
) -> Result<Vec<String>, CodecError> {
    let chunks = split_payload(payload, chunk_size)?;
    let mut tokens = Vec::with_capacity(chunks.len() + 2);
    tokens.push(start_token(metadata)?);
    tokens.extend(chunks.iter().map(|c| encode_chunk(c)));
    tokens.push(END_TOKEN.to_string());
    Ok(tokens)
}

/// Classification of a single stored object body
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    /// Start marker with its raw metadata fields
    Start(Vec<String>),
    /// End marker
    End,
    /// Anything else, assumed to be a hex chunk
    Chunk(&'a str),
}

/// Classify an object body
///
/// Any body containing the start marker counts as a start token; the
/// metadata is everything after the first comma with braces and list
/// brackets stripped.
pub fn classify(body: &str) -> Token<'_> {
    if body.contains(START_MARKER) {
        let cleaned: String = body
            .chars()
            .filter(|c| !matches!(c, '}' | '[' | ']'))
            .collect();
        let fields = cleaned.split(',').skip(1).map(str::to_owned).collect();
        return Token::Start(fields);
    }

    if body.trim() == END_TOKEN {
        return Token::End;
    }

    Token::Chunk(body)
}

/// A fully reassembled frame
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedFrame<T> {
    /// Concatenated chunk bytes
    pub payload: Bytes,
    /// Raw metadata fields from the start token
    pub fields: Vec<String>,
    /// Arrival stamp of the end token
    pub stamp: T,
}

/// Counters collected while assembling frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    pub frames_started: usize,
    pub frames_completed: usize,
    /// Start tokens with too few metadata fields
    pub malformed_frames: usize,
    /// Open frames dropped by a later start token
    pub abandoned_frames: usize,
    /// Open frames dropped because a chunk failed to decode
    pub corrupt_chunks: usize,
    /// Objects seen outside of any frame
    pub ignored_objects: usize,
}

#[derive(Debug, Default)]
enum AssemblerState {
    #[default]
    Idle,
    Accumulating {
        fields: Vec<String>,
        buffer: BytesMut,
    },
}

/// Decoder state machine reassembling frames from a token stream
#[derive(Debug, Default)]
pub struct FrameAssembler {
    state: AssemblerState,
    stats: AssemblerStats,
}

impl FrameAssembler {
    /// Create a new assembler in the idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a frame is currently open
    pub fn is_accumulating(&self) -> bool {
        matches!(self.state, AssemblerState::Accumulating { .. })
    }

    /// Counters since creation
    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    /// Feed one object body; returns a frame when an end token closes one
    pub fn push<T>(&mut self, body: &str, stamp: T) -> Option<CompletedFrame<T>> {
        match classify(body) {
            Token::Start(fields) => {
                if self.is_accumulating() {
                    self.stats.abandoned_frames += 1;
                }
                if fields.len() < MIN_METADATA_FIELDS {
                    self.stats.malformed_frames += 1;
                    self.state = AssemblerState::Idle;
                    return None;
                }
                self.stats.frames_started += 1;
                self.state = AssemblerState::Accumulating {
                    fields,
                    buffer: BytesMut::new(),
                };
                None
            }
            Token::End => match std::mem::take(&mut self.state) {
                AssemblerState::Accumulating { fields, buffer } => {
                    self.stats.frames_completed += 1;
                    Some(CompletedFrame {
                        payload: buffer.freeze(),
                        fields,
                        stamp,
                    })
                }
                AssemblerState::Idle => {
                    self.stats.ignored_objects += 1;
                    None
                }
            },
            Token::Chunk(chunk) => {
                let AssemblerState::Accumulating { buffer, .. } = &mut self.state else {
                    self.stats.ignored_objects += 1;
                    return None;
                };
                match decode_chunk(chunk) {
                    Ok(bytes) => buffer.extend_from_slice(&bytes),
                    Err(_) => {
                        self.stats.corrupt_chunks += 1;
                        self.state = AssemblerState::Idle;
                    }
                }
                None
            }
        }
    }

    /// Drop any open frame, returning whether one was discarded
    pub fn reset(&mut self) -> bool {
        let was_open = self.is_accumulating();
        self.state = AssemblerState::Idle;
        was_open
    }
}
