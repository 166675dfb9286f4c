//! Sampling key derivation.
//!
//! A key seeds the per-decision PRNG. Keys derived from a header or the
//! client address are stable, so the same value always gets the same
//! forward/drop outcome; random keys are drawn fresh per request.

use crc::{Crc, CRC_64_XZ};
use http::HeaderName;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::config::{SamplingConfig, ValidationError};
use crate::http::CapturedRequest;

/// CRC-64 with the reflected ECMA-182 polynomial `0xC96C5795D7870F42`.
const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// What a sampling decision is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SamplingKeyKind {
    /// Fresh OS entropy per request.
    #[default]
    Random,
    /// First value of the named request header (empty if absent).
    Header(HeaderName),
    /// The client IP address.
    RemoteAddr,
}

impl SamplingKeyKind {
    /// Build from the `by` / `header` settings.
    pub fn from_config(config: &SamplingConfig) -> Result<Self, ValidationError> {
        match config.by.as_str() {
            "" => Ok(SamplingKeyKind::Random),
            "remoteaddr" => Ok(SamplingKeyKind::RemoteAddr),
            "header" => {
                if config.header.is_empty() {
                    return Err(ValidationError::MissingSamplingHeader);
                }
                HeaderName::from_bytes(config.header.as_bytes())
                    .map(SamplingKeyKind::Header)
                    .map_err(|_| ValidationError::InvalidSamplingHeader(config.header.clone()))
            }
            other => Err(ValidationError::UnknownSamplingKey(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingKeyKind::Random => "random",
            SamplingKeyKind::Header(_) => "header",
            SamplingKeyKind::RemoteAddr => "remoteaddr",
        }
    }
}

/// CRC-64 of a key string.
pub fn checksum(value: &[u8]) -> u64 {
    CRC64.checksum(value)
}

/// Derive the sampling key for one request.
pub fn sampling_key(kind: &SamplingKeyKind, request: &CapturedRequest) -> Result<u64, rand::Error> {
    match kind {
        SamplingKeyKind::Random => {
            let mut bytes = [0u8; 8];
            OsRng.try_fill_bytes(&mut bytes)?;
            Ok(u64::from_le_bytes(bytes))
        }
        SamplingKeyKind::Header(name) => {
            let value = request.headers.get(name).map_or(&[][..], |v| v.as_bytes());
            Ok(checksum(value))
        }
        SamplingKeyKind::RemoteAddr => Ok(checksum(request.client_ip().to_string().as_bytes())),
    }
}
