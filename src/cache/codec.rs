//! Value encoding: JSON, then gzip.
//!
//! Gzip is used for its CRC32 trailer as much as for size: a blob that was
//! truncated or bit-flipped on disk fails to decode and is treated as a miss.

use std::io::{Read, Write};

use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize cache value: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize cache value: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("corrupt cache blob: {0}")]
    Corrupt(#[source] std::io::Error),
}

pub(crate) fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(value).map_err(CodecError::Serialize)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::fast());
    encoder.write_all(&json).map_err(CodecError::Corrupt)?;
    encoder.finish().map_err(CodecError::Corrupt)
}

pub(crate) fn decode<T: DeserializeOwned>(blob: &[u8]) -> Result<T, CodecError> {
    let mut json = Vec::new();
    GzDecoder::new(blob)
        .read_to_end(&mut json)
        .map_err(CodecError::Corrupt)?;
    serde_json::from_slice(&json).map_err(CodecError::Deserialize)
}
