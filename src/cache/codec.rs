//! On-disk encodings for cache entries
//!
//! Payloads are framed as `DMC1 | sha256(body) | body`, where the body is the
//! bincode encoding of the cached value. bincode keeps what JSON would lose
//! (`Some(None)`, NaN, signed zero, 128-bit integers, non-string map keys), so
//! a hit hands back exactly the value that was stored. The checksum lets a
//! truncated or scribbled-over file be told apart from a value that merely has
//! an unexpected shape.
//!
//! bincode is not self-describing. A body written for one type is only
//! rejected as another when its bytes do not fit, which trailing-byte
//! rejection makes the common case.
//!
//! Filenames carry the rest of the entry: `{fingerprint}_{rfc3339}.cache`.

use bincode::Options;
use chrono::{DateTime, Local, SecondsFormat};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::key::Fingerprint;

/// Extension shared by every entry file
pub const CACHE_SUFFIX: &str = ".cache";

const MAGIC: &[u8; 4] = b"DMC1";
const DIGEST_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + DIGEST_LEN;

/// Errors that can occur when reading a payload back
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Fewer bytes than the frame header
    #[error("Payload truncated: {0} bytes")]
    Truncated(usize),

    /// Not a payload written by this crate
    #[error("Payload has an unknown header")]
    BadMagic,

    /// Body bytes do not match the recorded checksum
    #[error("Payload checksum mismatch")]
    ChecksumMismatch,

    /// Body is intact but is not a valid value of the requested type
    #[error("Payload body could not be decoded: {0}")]
    Body(#[from] bincode::Error),
}

/// Errors that can occur when reading an entry filename
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Filename does not end in .cache")]
    MissingSuffix,

    #[error("Filename has {0} underscore-delimited parts, expected 2")]
    WrongPartCount(usize),

    #[error("Filename fingerprint is not a hex digest")]
    BadFingerprint,

    #[error("Filename timestamp is not RFC3339: {0}")]
    BadTimestamp(String),
}

/// What a filename says about its entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryName {
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Local>,
}

/// Varint little-endian bincode that refuses bytes left over after the value
fn body_options() -> impl Options {
    bincode::DefaultOptions::new().reject_trailing_bytes()
}

/// Serializes a value into a framed payload
pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, bincode::Error> {
    let body = body_options().serialize(value)?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&Sha256::digest(&body));
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Reads a framed payload back into a value
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::Truncated(bytes.len()));
    }
    let (magic, rest) = bytes.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let (digest, body) = rest.split_at(DIGEST_LEN);
    if Sha256::digest(body).as_slice() != digest {
        return Err(DecodeError::ChecksumMismatch);
    }
    Ok(body_options().deserialize(body)?)
}

/// Renders a timestamp losslessly, keeping the local UTC offset
pub fn encode_timestamp(time: &DateTime<Local>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

pub fn decode_timestamp(s: &str) -> Option<DateTime<Local>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Local))
}

/// Builds the filename for an entry written at `created_at`
pub fn encode_filename(fingerprint: &Fingerprint, created_at: &DateTime<Local>) -> String {
    format!(
        "{}_{}{}",
        fingerprint,
        encode_timestamp(created_at),
        CACHE_SUFFIX
    )
}

/// Splits an entry filename into fingerprint and creation time
pub fn decode_filename(name: &str) -> Result<EntryName, ParseError> {
    let stem = name
        .strip_suffix(CACHE_SUFFIX)
        .ok_or(ParseError::MissingSuffix)?;
    let parts: Vec<&str> = stem.split('_').collect();
    let [fingerprint, timestamp] = parts.as_slice() else {
        return Err(ParseError::WrongPartCount(parts.len()));
    };
    let fingerprint = Fingerprint::parse(fingerprint).ok_or(ParseError::BadFingerprint)?;
    let created_at = decode_timestamp(timestamp)
        .ok_or_else(|| ParseError::BadTimestamp((*timestamp).to_string()))?;
    Ok(EntryName {
        fingerprint,
        created_at,
    })
}
