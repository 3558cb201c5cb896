//! Raw transport frame messages
//!
//! Byte payloads moving between the transport modules and the protocol
//! translators, tagged with the channel they arrived on or should leave
//! through. The bytes are opaque to the core; encoding and decoding is
//! the protocol collaborator's job.

use furrow_core::{FurrowError, FurrowResult, TimestampMetadata};
use serde::{Deserialize, Serialize};
use serde_arrays;

/// Physical channel a frame crosses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportChannel {
    Serial,
    Udp,
    Can,
}

impl TransportChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Udp => "udp",
            Self::Can => "can",
        }
    }
}

impl std::fmt::Display for TransportChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether the frame came off the wire or is headed for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameDirection {
    Inbound,
    Outbound,
}

/// One raw frame: fixed buffer plus valid length, so the message stays
/// a flat value type with no per-publish allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    pub stamp: TimestampMetadata,
    pub channel: TransportChannel,
    pub direction: FrameDirection,
    #[serde(with = "serde_arrays")]
    pub data: [u8; RawFrame::CAPACITY],
    pub len: u16,
}

impl RawFrame {
    pub const CAPACITY: usize = 256;

    /// Build a frame from `bytes`. Refused if the payload exceeds the
    /// fixed capacity; frames are never silently truncated.
    pub fn new(
        channel: TransportChannel,
        direction: FrameDirection,
        bytes: &[u8],
        stamp: TimestampMetadata,
    ) -> FurrowResult<Self> {
        if bytes.len() > Self::CAPACITY {
            return Err(FurrowError::invalid_input(format!(
                "frame of {} bytes exceeds {} byte capacity",
                bytes.len(),
                Self::CAPACITY
            )));
        }
        let mut data = [0u8; Self::CAPACITY];
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            stamp,
            channel,
            direction,
            data,
            len: bytes.len() as u16,
        })
    }

    /// The valid bytes of the frame.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use furrow_core::{SimClock, TimestampGenerator};

    fn stamp() -> TimestampMetadata {
        TimestampGenerator::new(SimClock::manual()).stamp::<RawFrame>()
    }

    #[test]
    fn payload_round_trip() {
        let bytes = [0x80, 0x81, 0x7F, 0xFD, 0x08];
        let frame =
            RawFrame::new(TransportChannel::Udp, FrameDirection::Inbound, &bytes, stamp()).unwrap();
        assert_eq!(frame.payload(), &bytes);
        assert_eq!(frame.len, 5);
        assert!(!frame.is_empty());
    }

    #[test]
    fn oversized_frame_is_refused() {
        let bytes = [0u8; RawFrame::CAPACITY + 1];
        let result = RawFrame::new(
            TransportChannel::Serial,
            FrameDirection::Outbound,
            &bytes,
            stamp(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_frame_is_valid() {
        let frame =
            RawFrame::new(TransportChannel::Can, FrameDirection::Inbound, &[], stamp()).unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.payload(), &[] as &[u8]);
    }

    #[test]
    fn serde_round_trip_preserves_payload() {
        let frame = RawFrame::new(
            TransportChannel::Serial,
            FrameDirection::Outbound,
            &[1, 2, 3],
            stamp(),
        )
        .unwrap();
        let json = serde_json::to_string(&frame).unwrap();
        let back: RawFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
