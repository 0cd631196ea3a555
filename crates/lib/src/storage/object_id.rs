//! 128-bit content identifiers.
//!
//! This module provides:
//! - `ObjectId`: the cache key and storage key for every object the engine touches
//! - `ObjectIdBuilder`: an incremental MurmurHash3 (x86, 128-bit) hasher producing `ObjectId`s
//!
//! `ObjectId` is a non-cryptographic hash. It identifies content, it does not
//! authenticate it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::consts::OBJECT_SERIALIZATION_VERSION;

/// Length of an `ObjectId` in bytes.
pub const OBJECT_ID_LEN: usize = 16;

/// Length of the textual form of an `ObjectId`.
pub const OBJECT_ID_HEX_LEN: usize = OBJECT_ID_LEN * 2;

/// A 128-bit content hash.
///
/// Stored as four little-endian 32-bit words. Equality and ordering compare
/// all four words in order; the `Hash` impl only feeds the first word, which
/// is already uniformly distributed.
///
/// # Format
///
/// The textual form is 32 lowercase hex characters of the little-endian byte
/// image, e.g. `"a044242bf7de91dbb631db9ab631db9a"`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ObjectId([u32; 4]);

/// Error returned when parsing a malformed `ObjectId` string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid object id {0:?}: expected {OBJECT_ID_HEX_LEN} lowercase hex characters")]
pub struct ParseObjectIdError(String);

impl ObjectId {
  /// The all-zero id. Also the hash of empty input.
  pub const EMPTY: ObjectId = ObjectId([0; 4]);

  /// Create an id from its four words.
  pub const fn from_words(words: [u32; 4]) -> Self {
    Self(words)
  }

  /// The four words of this id.
  pub const fn words(&self) -> [u32; 4] {
    self.0
  }

  /// Create a random id from a v4 UUID.
  ///
  /// The result is unique, not reproducible. Never use it as a content key.
  pub fn new() -> Self {
    Self::from(*uuid::Uuid::new_v4().as_bytes())
  }

  /// Hash a byte slice.
  pub fn from_bytes(data: &[u8]) -> Self {
    let mut builder = ObjectIdBuilder::new();
    builder.write(data);
    builder.compute_hash()
  }

  /// Hash a serializable value through its binary encoding.
  ///
  /// A format version word is hashed ahead of the value, so ids change when
  /// either the value or the serialization schema changes.
  pub fn from_object<T: Serialize + ?Sized>(value: &T) -> Result<Self, bincode::Error> {
    let mut builder = ObjectIdBuilder::new();
    builder.write_u32(OBJECT_SERIALIZATION_VERSION);
    bincode::serialize_into(&mut builder, value)?;
    Ok(builder.compute_hash())
  }

  /// Mix two ids with a non-carrying weighted sum (`left * 3 + right` per word).
  ///
  /// Cheap and order-sensitive, but weaker than hashing the concatenation:
  /// structured inputs can cancel out. Callers needing a strong identity
  /// over many similar values should feed an `ObjectIdBuilder` instead.
  pub fn combine(left: ObjectId, right: ObjectId) -> ObjectId {
    let mut words = [0u32; 4];
    for (i, word) in words.iter_mut().enumerate() {
      *word = left.0[i].wrapping_mul(3).wrapping_add(right.0[i]);
    }
    ObjectId(words)
  }

  /// Whether this is the all-zero id.
  pub fn is_empty(&self) -> bool {
    *self == Self::EMPTY
  }

  /// The little-endian byte image of this id.
  pub fn to_bytes(&self) -> [u8; OBJECT_ID_LEN] {
    let mut bytes = [0u8; OBJECT_ID_LEN];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(self.0) {
      chunk.copy_from_slice(&word.to_le_bytes());
    }
    bytes
  }

  /// Parse the 32-character lowercase hex form.
  ///
  /// Returns `None` for any other length or any character outside `[0-9a-f]`.
  pub fn try_parse(s: &str) -> Option<Self> {
    if s.len() != OBJECT_ID_HEX_LEN {
      return None;
    }
    if !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
      return None;
    }
    let mut bytes = [0u8; OBJECT_ID_LEN];
    hex::decode_to_slice(s, &mut bytes).ok()?;
    Some(Self::from(bytes))
  }
}

impl From<[u8; OBJECT_ID_LEN]> for ObjectId {
  fn from(bytes: [u8; OBJECT_ID_LEN]) -> Self {
    let mut words = [0u32; 4];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
      *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Self(words)
  }
}

impl Hash for ObjectId {
  fn hash<H: Hasher>(&self, state: &mut H) {
    state.write_u32(self.0[0]);
  }
}

impl fmt::Display for ObjectId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", hex::encode(self.to_bytes()))
  }
}

impl fmt::Debug for ObjectId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ObjectId({self})")
  }
}

impl FromStr for ObjectId {
  type Err = ParseObjectIdError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::try_parse(s).ok_or_else(|| ParseObjectIdError(s.to_string()))
  }
}

impl Serialize for ObjectId {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
      serializer.collect_str(self)
    } else {
      self.to_bytes().serialize(serializer)
    }
  }
}

impl<'de> Deserialize<'de> for ObjectId {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    if deserializer.is_human_readable() {
      let s = String::deserialize(deserializer)?;
      s.parse().map_err(serde::de::Error::custom)
    } else {
      <[u8; OBJECT_ID_LEN]>::deserialize(deserializer).map(Self::from)
    }
  }
}

const C1: u32 = 0x239b_961b;
const C2: u32 = 0xab0e_9789;
const C3: u32 = 0x38b3_4ae5;
const C4: u32 = 0xa1e3_8b93;

/// Incremental MurmurHash3 x86 128-bit hasher.
///
/// Data may be written in any number of pieces; the result only depends on
/// the concatenated bytes. `compute_hash` borrows the builder, so it can be
/// called repeatedly and writing may continue afterwards.
#[derive(Debug, Clone)]
pub struct ObjectIdBuilder {
  seed: u32,
  state: [u32; 4],
  tail: [u8; 16],
  tail_len: usize,
  length: u64,
}

impl Default for ObjectIdBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl ObjectIdBuilder {
  /// Create a builder with seed 0.
  pub fn new() -> Self {
    Self::with_seed(0)
  }

  /// Create a builder with an explicit seed.
  pub fn with_seed(seed: u32) -> Self {
    Self {
      seed,
      state: [seed; 4],
      tail: [0; 16],
      tail_len: 0,
      length: 0,
    }
  }

  /// Discard everything written so far.
  pub fn reset(&mut self) {
    *self = Self::with_seed(self.seed);
  }

  /// Number of bytes written since creation or the last reset.
  pub fn len(&self) -> u64 {
    self.length
  }

  /// Whether nothing has been written yet.
  pub fn is_empty(&self) -> bool {
    self.length == 0
  }

  /// Feed bytes into the hash.
  pub fn write(&mut self, mut data: &[u8]) {
    self.length += data.len() as u64;

    if self.tail_len > 0 {
      let take = (16 - self.tail_len).min(data.len());
      self.tail[self.tail_len..self.tail_len + take].copy_from_slice(&data[..take]);
      self.tail_len += take;
      data = &data[take..];
      if self.tail_len < 16 {
        return;
      }
      let block = self.tail;
      self.mix_block(&block);
      self.tail_len = 0;
    }

    let mut blocks = data.chunks_exact(16);
    for block in &mut blocks {
      let mut buf = [0u8; 16];
      buf.copy_from_slice(block);
      self.mix_block(&buf);
    }

    let rest = blocks.remainder();
    self.tail[..rest.len()].copy_from_slice(rest);
    self.tail_len = rest.len();
  }

  pub fn write_u8(&mut self, value: u8) {
    self.write(&[value]);
  }

  pub fn write_u32(&mut self, value: u32) {
    self.write(&value.to_le_bytes());
  }

  pub fn write_u64(&mut self, value: u64) {
    self.write(&value.to_le_bytes());
  }

  /// Feed a string's UTF-8 bytes.
  pub fn write_str(&mut self, value: &str) {
    self.write(value.as_bytes());
  }

  /// Feed the byte image of another id.
  pub fn write_object_id(&mut self, id: &ObjectId) {
    self.write(&id.to_bytes());
  }

  /// Finalize the bytes written so far into an `ObjectId`.
  pub fn compute_hash(&self) -> ObjectId {
    let [mut h1, mut h2, mut h3, mut h4] = self.state;

    let mut k = [0u32; 4];
    for (i, &b) in self.tail[..self.tail_len].iter().enumerate() {
      k[i / 4] ^= (b as u32) << (8 * (i % 4));
    }
    h4 ^= k[3].wrapping_mul(C4).rotate_left(18).wrapping_mul(C1);
    h3 ^= k[2].wrapping_mul(C3).rotate_left(17).wrapping_mul(C4);
    h2 ^= k[1].wrapping_mul(C2).rotate_left(16).wrapping_mul(C3);
    h1 ^= k[0].wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

    // The reference algorithm folds in a 32-bit length.
    let len = self.length as u32;
    h1 ^= len;
    h2 ^= len;
    h3 ^= len;
    h4 ^= len;

    h1 = h1.wrapping_add(h2).wrapping_add(h3).wrapping_add(h4);
    h2 = h2.wrapping_add(h1);
    h3 = h3.wrapping_add(h1);
    h4 = h4.wrapping_add(h1);

    h1 = fmix(h1);
    h2 = fmix(h2);
    h3 = fmix(h3);
    h4 = fmix(h4);

    h1 = h1.wrapping_add(h2).wrapping_add(h3).wrapping_add(h4);
    h2 = h2.wrapping_add(h1);
    h3 = h3.wrapping_add(h1);
    h4 = h4.wrapping_add(h1);

    ObjectId([h1, h2, h3, h4])
  }

  fn mix_block(&mut self, block: &[u8; 16]) {
    let word = |i: usize| u32::from_le_bytes([block[i], block[i + 1], block[i + 2], block[i + 3]]);
    let (k1, k2, k3, k4) = (word(0), word(4), word(8), word(12));
    let [mut h1, mut h2, mut h3, mut h4] = self.state;

    h1 ^= k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
    h1 = h1.rotate_left(19).wrapping_add(h2).wrapping_mul(5).wrapping_add(0x561c_cd1b);

    h2 ^= k2.wrapping_mul(C2).rotate_left(16).wrapping_mul(C3);
    h2 = h2.rotate_left(17).wrapping_add(h3).wrapping_mul(5).wrapping_add(0x0bca_a747);

    h3 ^= k3.wrapping_mul(C3).rotate_left(17).wrapping_mul(C4);
    h3 = h3.rotate_left(15).wrapping_add(h4).wrapping_mul(5).wrapping_add(0x96cd_1c35);

    h4 ^= k4.wrapping_mul(C4).rotate_left(18).wrapping_mul(C1);
    h4 = h4.rotate_left(13).wrapping_add(h1).wrapping_mul(5).wrapping_add(0x32ac_3b17);

    self.state = [h1, h2, h3, h4];
  }
}

fn fmix(mut h: u32) -> u32 {
  h ^= h >> 16;
  h = h.wrapping_mul(0x85eb_ca6b);
  h ^= h >> 13;
  h = h.wrapping_mul(0xc2b2_ae35);
  h ^= h >> 16;
  h
}

/// Lets serializers stream straight into the hash.
impl io::Write for ObjectIdBuilder {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    ObjectIdBuilder::write(self, buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}
