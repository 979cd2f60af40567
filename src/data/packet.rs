//! Event packet wire format.
//!
//! ```text
//! [ timestamp : 4 or 8 bytes ][ sample_0 : 2 bytes ] ... [ sample_{k-1} : 2 bytes ]
//! ```
//!
//! Everything is big-endian. The timestamp width is fixed by configuration and is
//! not carried on the wire, so the receiver must know it to decode.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::data::sample_store::Sample;
use crate::error::{NodeError, NodeResult};

/// Seconds or milliseconds since the Unix epoch, depending on [`TimestampWidth`].
pub type Timestamp = u64;

/// Width and unit of the packet timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampWidth {
    /// 4-byte Unix seconds.
    #[default]
    Seconds32,
    /// 8-byte Unix milliseconds.
    Millis64,
}

impl TimestampWidth {
    /// Encoded size in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::Seconds32 => 4,
            Self::Millis64 => 8,
        }
    }

    /// Largest encoded payload for a window of `samples` samples.
    #[must_use]
    pub const fn payload_len(self, samples: usize) -> usize {
        self.bytes() + samples * std::mem::size_of::<Sample>()
    }
}

impl std::str::FromStr for TimestampWidth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "seconds32" | "s32" => Ok(Self::Seconds32),
            "millis64" | "ms64" => Ok(Self::Millis64),
            other => Err(format!(
                "Invalid timestamp width '{}'. Must be one of: seconds32, millis64",
                other
            )),
        }
    }
}

/// Write `timestamp` followed by `samples` into `out`.
///
/// A `Seconds32` timestamp is truncated to its low 32 bits. `out` is appended to, so
/// callers reusing a buffer should clear it first.
pub fn encode_into<B: BufMut>(
    out: &mut B,
    width: TimestampWidth,
    timestamp: Timestamp,
    samples: &[Sample],
) {
    match width {
        TimestampWidth::Seconds32 => out.put_u32(timestamp as u32),
        TimestampWidth::Millis64 => out.put_u64(timestamp),
    }
    for &sample in samples {
        out.put_i16(sample);
    }
}

/// Decoded event packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitPacket {
    /// Capture time of the snapshot.
    pub timestamp: Timestamp,
    /// Samples in write order, oldest first.
    pub samples: Vec<Sample>,
}

impl TransmitPacket {
    /// Encode into a freshly allocated byte vector.
    #[must_use]
    pub fn encode(&self, width: TimestampWidth) -> Vec<u8> {
        let mut out = Vec::with_capacity(width.payload_len(self.samples.len()));
        encode_into(&mut out, width, self.timestamp, &self.samples);
        out
    }

    /// Parse a payload produced by [`encode_into`].
    ///
    /// # Errors
    /// [`NodeError::Packet`] if the payload is shorter than the timestamp or the sample
    /// body has an odd length.
    pub fn decode(mut payload: &[u8], width: TimestampWidth) -> NodeResult<Self> {
        if payload.len() < width.bytes() {
            return Err(NodeError::Packet(format!(
                "payload of {} bytes is shorter than a {}-byte timestamp",
                payload.len(),
                width.bytes()
            )));
        }

        let timestamp = match width {
            TimestampWidth::Seconds32 => Timestamp::from(payload.get_u32()),
            TimestampWidth::Millis64 => payload.get_u64(),
        };

        if payload.remaining() % 2 != 0 {
            return Err(NodeError::Packet(format!(
                "sample body of {} bytes is not a whole number of samples",
                payload.remaining()
            )));
        }

        let mut samples = Vec::with_capacity(payload.remaining() / 2);
        while payload.has_remaining() {
            samples.push(payload.get_i16());
        }

        Ok(Self { timestamp, samples })
    }
}
