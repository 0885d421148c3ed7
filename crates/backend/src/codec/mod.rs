//! Transfer codec for the worker boundary
//!
//! Commands and results cross into and out of import workers only as
//! [`Envelope`]s. An envelope carries a JSON header (always a deep copy) and a
//! list of binary attachments. Attachments are reference-counted [`Bytes`],
//! so a document payload moves across the boundary without its bytes being
//! duplicated. The header refers to attachments through transfer slots:
//!
//! ```text
//! { "path": "a.md", "generation": 2, "payload": { "$transfer": 0 }, ... }
//!                                                            │
//! transfer: [ Bytes("# Title") ] ◀───────────────────────────┘
//! ```
//!
//! Decoding never panics. Unknown kinds and broken headers come back as
//! [`CodecError::Malformed`], and an error envelope sent by a worker comes back
//! as [`CodecError::Remote`].

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::actor::message::{Generation, ImportCommand, ImportMetadata, ImportOutcome, ImportResult};

/// Kind tag of an error envelope
pub const ERROR_KIND: &str = "$error";

/// Errors produced while decoding an envelope
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
  #[error("Malformed message: {0}")]
  Malformed(String),
  #[error("Worker error: {0}")]
  Remote(String),
}

/// Wire-safe representation of a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
  /// Message shape, e.g. `import/command`
  pub kind: String,
  /// JSON-encoded header
  pub header: Vec<u8>,
  /// Binary attachments referenced from the header by slot index
  pub transfer: Vec<Bytes>,
}

impl Envelope {
  /// Build an error envelope carrying a message.
  pub fn error(message: impl Into<String>) -> Self {
    let header = ErrorHeader { error: message.into() };
    Self {
      kind: ERROR_KIND.to_string(),
      header: serde_json::to_vec(&header).unwrap_or_default(),
      transfer: Vec::new(),
    }
  }

  pub fn is_error(&self) -> bool {
    self.kind == ERROR_KIND
  }
}

/// A message shape that can cross the worker boundary.
pub trait WireMessage: Sized {
  /// Kind tag written into the envelope
  const KIND: &'static str;

  /// Convert into an envelope. Serialization errors are reported, not panicked.
  fn into_envelope(self) -> Result<Envelope, CodecError>;

  /// Rebuild the value from an envelope of kind [`Self::KIND`].
  fn from_envelope(envelope: Envelope) -> Result<Self, CodecError>;
}

/// Encode a value for the worker boundary.
///
/// Total: if the header cannot be serialized, an error envelope is returned
/// instead, which decodes to [`CodecError::Remote`] on the other side.
pub fn encode<T: WireMessage>(value: T) -> Envelope {
  value
    .into_envelope()
    .unwrap_or_else(|e| Envelope::error(format!("failed to encode {}: {}", T::KIND, e)))
}

/// Decode a value received from the worker boundary.
pub fn decode<T: WireMessage>(envelope: Envelope) -> Result<T, CodecError> {
  if envelope.is_error() {
    let header: ErrorHeader = read_header(&envelope)?;
    return Err(CodecError::Remote(header.error));
  }
  if envelope.kind != T::KIND {
    return Err(CodecError::Malformed(format!(
      "expected `{}` message, got `{}`",
      T::KIND,
      envelope.kind
    )));
  }
  T::from_envelope(envelope)
}

// ============================================================================
// Headers
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct ErrorHeader {
  #[serde(rename = "$error")]
  error: String,
}

/// Reference from a header to an attachment
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct TransferSlot {
  #[serde(rename = "$transfer")]
  index: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct CommandHeader {
  path: String,
  format: String,
  generation: Generation,
  payload: TransferSlot,
  metadata: ImportMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResultHeader {
  path: String,
  generation: Generation,
  outcome: ImportOutcome,
}

fn read_header<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, CodecError> {
  serde_json::from_slice(&envelope.header).map_err(|e| CodecError::Malformed(format!("bad header: {}", e)))
}

fn write_header<T: Serialize>(header: &T) -> Result<Vec<u8>, CodecError> {
  serde_json::to_vec(header).map_err(|e| CodecError::Malformed(format!("unserializable header: {}", e)))
}

/// Take an attachment out of the envelope without copying it.
fn take_transfer(transfer: &mut [Bytes], slot: TransferSlot) -> Result<Bytes, CodecError> {
  transfer
    .get_mut(slot.index)
    .map(std::mem::take)
    .ok_or_else(|| CodecError::Malformed(format!("missing transfer slot {}", slot.index)))
}

// ============================================================================
// Message shapes
// ============================================================================

impl WireMessage for ImportCommand {
  const KIND: &'static str = "import/command";

  fn into_envelope(self) -> Result<Envelope, CodecError> {
    let header = CommandHeader {
      path: self.path,
      format: self.format,
      generation: self.generation,
      payload: TransferSlot { index: 0 },
      metadata: self.metadata,
    };
    Ok(Envelope {
      kind: Self::KIND.to_string(),
      header: write_header(&header)?,
      transfer: vec![self.payload],
    })
  }

  fn from_envelope(mut envelope: Envelope) -> Result<Self, CodecError> {
    let header: CommandHeader = read_header(&envelope)?;
    let payload = take_transfer(&mut envelope.transfer, header.payload)?;
    Ok(Self {
      path: header.path,
      format: header.format,
      generation: header.generation,
      payload,
      metadata: header.metadata,
    })
  }
}

impl WireMessage for ImportResult {
  const KIND: &'static str = "import/result";

  fn into_envelope(self) -> Result<Envelope, CodecError> {
    let header = ResultHeader {
      path: self.path,
      generation: self.generation,
      outcome: self.outcome,
    };
    Ok(Envelope {
      kind: Self::KIND.to_string(),
      header: write_header(&header)?,
      transfer: Vec::new(),
    })
  }

  fn from_envelope(envelope: Envelope) -> Result<Self, CodecError> {
    let header: ResultHeader = read_header(&envelope)?;
    Ok(Self {
      path: header.path,
      generation: header.generation,
      outcome: header.outcome,
    })
  }
}
