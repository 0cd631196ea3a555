//! Wire encodings for remote execution.
//!
//! Values travel inside a versioned envelope:
//!
//! ```text
//! magic "AFWR" | version u32 LE | kind u8 | payload length u64 LE | payload
//! ```
//!
//! The payload is encoded with a `WireFormat` both peers were configured
//! with. Nothing in the envelope says which one; a peer never guesses.

use std::fmt;
use std::io;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::consts::{WIRE_FORMAT_VERSION, WIRE_MAGIC};

/// Refuse to allocate for absurd payload lengths from a confused peer.
const MAX_PAYLOAD_LEN: u64 = 1 << 30;

/// Errors raised while encoding, decoding or exchanging wire messages.
#[derive(Debug, Error)]
pub enum TransportError {
  #[error("binary encoding failed: {0}")]
  Binary(#[from] bincode::Error),

  #[error("json encoding failed: {0}")]
  Json(#[from] serde_json::Error),

  /// The bytes do not start with the envelope magic.
  #[error("not a remote-execution envelope")]
  BadMagic,

  /// The peer speaks a different envelope version.
  #[error("unsupported wire format version {found} (expected {expected})")]
  UnsupportedVersion { found: u32, expected: u32 },

  #[error("unknown envelope kind {0}")]
  UnknownKind(u8),

  #[error("expected a {expected} envelope, got a {found}")]
  UnexpectedKind { expected: EnvelopeKind, found: EnvelopeKind },

  #[error("envelope payload of {0} bytes exceeds the limit")]
  PayloadTooLarge(u64),

  #[error("envelope truncated")]
  Truncated,

  #[error("unknown command type {0:?}")]
  UnknownCommandType(String),

  #[error("unknown wire format {0:?}: expected binary or json")]
  UnknownFormat(String),

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

/// Payload encoding shared by the engine and a remote worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireFormat {
  /// Compact binary encoding (bincode).
  #[default]
  Binary,
  /// Textual structured encoding (JSON).
  Json,
}

impl WireFormat {
  pub fn name(self) -> &'static str {
    match self {
      WireFormat::Binary => "binary",
      WireFormat::Json => "json",
    }
  }

  pub fn serialize<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>, TransportError> {
    match self {
      WireFormat::Binary => Ok(bincode::serialize(value)?),
      WireFormat::Json => Ok(serde_json::to_vec(value)?),
    }
  }

  pub fn deserialize<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, TransportError> {
    match self {
      WireFormat::Binary => Ok(bincode::deserialize(bytes)?),
      WireFormat::Json => Ok(serde_json::from_slice(bytes)?),
    }
  }
}

impl fmt::Display for WireFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for WireFormat {
  type Err = TransportError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "binary" => Ok(WireFormat::Binary),
      "json" => Ok(WireFormat::Json),
      other => Err(TransportError::UnknownFormat(other.to_string())),
    }
  }
}

/// What an envelope carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
  Request,
  Response,
}

impl EnvelopeKind {
  fn tag(self) -> u8 {
    match self {
      EnvelopeKind::Request => 1,
      EnvelopeKind::Response => 2,
    }
  }

  fn from_tag(tag: u8) -> Result<Self, TransportError> {
    match tag {
      1 => Ok(EnvelopeKind::Request),
      2 => Ok(EnvelopeKind::Response),
      other => Err(TransportError::UnknownKind(other)),
    }
  }
}

impl fmt::Display for EnvelopeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EnvelopeKind::Request => f.write_str("request"),
      EnvelopeKind::Response => f.write_str("response"),
    }
  }
}

const HEADER_LEN: usize = 4 + 4 + 1 + 8;

/// A tagged, versioned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
  pub kind: EnvelopeKind,
  pub payload: Vec<u8>,
}

impl Envelope {
  pub fn new(kind: EnvelopeKind, payload: Vec<u8>) -> Self {
    Self { kind, payload }
  }

  /// Encode `value` with `format` and wrap it.
  pub fn wrap<T: Serialize + ?Sized>(kind: EnvelopeKind, format: WireFormat, value: &T) -> Result<Self, TransportError> {
    Ok(Self::new(kind, format.serialize(value)?))
  }

  /// Check the kind and decode the payload with `format`.
  pub fn open<T: DeserializeOwned>(&self, expected: EnvelopeKind, format: WireFormat) -> Result<T, TransportError> {
    if self.kind != expected {
      return Err(TransportError::UnexpectedKind {
        expected,
        found: self.kind,
      });
    }
    format.deserialize(&self.payload)
  }

  pub fn to_bytes(&self) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
    bytes.extend_from_slice(&WIRE_MAGIC);
    bytes.extend_from_slice(&WIRE_FORMAT_VERSION.to_le_bytes());
    bytes.push(self.kind.tag());
    bytes.extend_from_slice(&(self.payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&self.payload);
    bytes
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
    let Some((header, rest)) = bytes.split_first_chunk::<HEADER_LEN>() else {
      return Err(check_prefix(bytes).err().unwrap_or(TransportError::Truncated));
    };
    let (kind, len) = parse_header(header)?;
    let len = usize::try_from(len).map_err(|_| TransportError::PayloadTooLarge(len))?;
    if rest.len() < len {
      return Err(TransportError::Truncated);
    }
    Ok(Self::new(kind, rest[..len].to_vec()))
  }

  /// Read one envelope from a stream.
  pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, TransportError> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await.map_err(eof_as_truncated)?;
    let (kind, len) = parse_header(&header)?;

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(eof_as_truncated)?;
    Ok(Self::new(kind, payload))
  }

  /// Write one envelope to a stream and flush it.
  pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<(), TransportError> {
    writer.write_all(&self.to_bytes()).await?;
    writer.flush().await?;
    Ok(())
  }
}

/// Validate the magic and version of a possibly short buffer.
fn check_prefix(bytes: &[u8]) -> Result<(), TransportError> {
  if bytes.len() >= 4 && bytes[..4] != WIRE_MAGIC {
    return Err(TransportError::BadMagic);
  }
  if let Some(version) = bytes.get(4..8) {
    let found = u32::from_le_bytes([version[0], version[1], version[2], version[3]]);
    if found != WIRE_FORMAT_VERSION {
      return Err(TransportError::UnsupportedVersion {
        found,
        expected: WIRE_FORMAT_VERSION,
      });
    }
  }
  Ok(())
}

fn parse_header(header: &[u8; HEADER_LEN]) -> Result<(EnvelopeKind, u64), TransportError> {
  check_prefix(header)?;
  let kind = EnvelopeKind::from_tag(header[8])?;
  let mut len = [0u8; 8];
  len.copy_from_slice(&header[9..]);
  let len = u64::from_le_bytes(len);
  if len > MAX_PAYLOAD_LEN {
    return Err(TransportError::PayloadTooLarge(len));
  }
  Ok((kind, len))
}

fn eof_as_truncated(err: io::Error) -> TransportError {
  if err.kind() == io::ErrorKind::UnexpectedEof {
    TransportError::Truncated
  } else {
    TransportError::Io(err)
  }
}
