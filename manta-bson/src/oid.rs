//! 12-byte unique document identifiers.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{BsonError, BsonResult};

/// Process-stable 5 random bytes plus the starting value for the counter.
fn process_entropy() -> &'static ([u8; 5], u32) {
    static ENTROPY: OnceLock<([u8; 5], u32)> = OnceLock::new();
    ENTROPY.get_or_init(|| {
        let bytes = *uuid::Uuid::new_v4().as_bytes();
        let random = [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]];
        let seed = u32::from_be_bytes([0, bytes[5], bytes[6], bytes[7]]);
        (random, seed)
    })
}

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// A 12-byte unique object identifier.
///
/// Layout: 4-byte big-endian seconds since the Unix epoch, 5 random bytes
/// fixed per process, 3-byte big-endian counter. Identifiers generated in
/// the same process therefore sort roughly by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    bytes: [u8; 12],
}

impl ObjectId {
    /// Generate a new identifier.
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let (random, seed) = *process_entropy();
        let count = COUNTER
            .fetch_add(1, Ordering::Relaxed)
            .wrapping_add(seed)
            & 0x00FF_FFFF;

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&random);
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        Self { bytes }
    }

    /// Create an identifier from raw bytes.
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self { bytes }
    }

    /// The raw 12 bytes.
    pub fn bytes(&self) -> [u8; 12] {
        self.bytes
    }

    /// Parse an identifier from its 24-character hex form.
    pub fn parse_str(s: &str) -> BsonResult<Self> {
        if s.len() != 24 {
            return Err(BsonError::InvalidObjectId(format!(
                "expected 24 hex characters, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 12];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk)
                .map_err(|_| BsonError::InvalidObjectId(s.to_string()))?;
            bytes[i] = u8::from_str_radix(pair, 16)
                .map_err(|_| BsonError::InvalidObjectId(s.to_string()))?;
        }
        Ok(Self { bytes })
    }

    /// Render the identifier as 24 lowercase hex characters.
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(24);
        for b in &self.bytes {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    /// Seconds since the Unix epoch embedded in the identifier.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]])
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
