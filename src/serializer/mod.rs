//! Versioned wire encodings of [Frame]s.
//!
//! Decoding never panics on malformed input: it returns a [DecodeFailure] that the connection
//!  state machine maps to a connection error.

pub mod codec;
pub mod v0_1;
pub mod v1_0;

use std::fmt::{Display, Formatter};
use std::sync::Arc;

use anyhow::anyhow;
use bytes::{Bytes, TryGetError};

use crate::frame::frame_header::FrameType;
use crate::frame::frames::{Frame, FrameVariant};
use crate::frame::protocol_version::ProtocolVersion;
use crate::serializer::v0_1::V0Serializer;
use crate::serializer::v1_0::V1Serializer;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DecodeFailure {
    Truncated { requested: usize, available: usize },
    UnknownFrameType(u16),
    /// unknown frame type with the IGNORE flag set: the frame should be skipped
    IgnoredFrameType(u16),
    InvalidFlags { frame_type: FrameType, flags: u16 },
    InvalidErrorCode(u32),
    InvalidMimeType,
    InvalidLength(usize),
    UnexpectedFrameType { expected: FrameType, actual: FrameType },
    UnsupportedVersion(ProtocolVersion),
}

impl DecodeFailure {
    pub fn is_ignorable(&self) -> bool {
        matches!(self, DecodeFailure::IgnoredFrameType(_))
    }
}

impl Display for DecodeFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeFailure::Truncated { requested, available } => write!(f, "truncated frame: {} bytes requested, {} available", requested, available),
            DecodeFailure::UnknownFrameType(t) => write!(f, "unknown frame type {:#x}", t),
            DecodeFailure::IgnoredFrameType(t) => write!(f, "ignored frame type {:#x}", t),
            DecodeFailure::InvalidFlags { frame_type, flags } => write!(f, "invalid flags {:#x} for {:?}", flags, frame_type),
            DecodeFailure::InvalidErrorCode(c) => write!(f, "invalid error code {:#x}", c),
            DecodeFailure::InvalidMimeType => write!(f, "mime type is not ASCII"),
            DecodeFailure::InvalidLength(l) => write!(f, "invalid length {}", l),
            DecodeFailure::UnexpectedFrameType { expected, actual } => write!(f, "expected {:?}, was {:?}", expected, actual),
            DecodeFailure::UnsupportedVersion(v) => write!(f, "unsupported protocol version {}", v),
        }
    }
}

impl std::error::Error for DecodeFailure {}

impl From<TryGetError> for DecodeFailure {
    fn from(value: TryGetError) -> Self {
        DecodeFailure::Truncated {
            requested: value.requested,
            available: value.available,
        }
    }
}


pub trait FrameSerializer: Send + Sync {
    fn protocol_version(&self) -> ProtocolVersion;

    fn serialize(&self, frame: &Frame) -> Bytes;
    fn deserialize(&self, buf: Bytes) -> Result<Frame, DecodeFailure>;
}

pub fn serializer_for(version: ProtocolVersion) -> Option<Arc<dyn FrameSerializer>> {
    match version {
        ProtocolVersion::V1_0 => Some(Arc::new(V1Serializer)),
        ProtocolVersion::V0_1 => Some(Arc::new(V0Serializer)),
        _ => None,
    }
}

pub fn encode(frame: &Frame, version: ProtocolVersion) -> anyhow::Result<Bytes> {
    let serializer = serializer_for(version)
        .ok_or_else(|| anyhow!("unsupported protocol version {}", version))?;
    Ok(serializer.serialize(frame))
}

pub fn decode(buf: Bytes, version: ProtocolVersion, expected_type: FrameType) -> Result<Frame, DecodeFailure> {
    let serializer = serializer_for(version)
        .ok_or(DecodeFailure::UnsupportedVersion(version))?;
    let frame = serializer.deserialize(buf)?;
    if frame.frame_type() != expected_type {
        return Err(DecodeFailure::UnexpectedFrameType { expected: expected_type, actual: frame.frame_type() });
    }
    Ok(frame)
}

/// Decodes a frame that must be of variant `F`
pub fn deserialize_as<F: FrameVariant>(serializer: &dyn FrameSerializer, buf: Bytes) -> Result<F, DecodeFailure> {
    let frame = serializer.deserialize(buf)?;
    let actual = frame.frame_type();
    F::from_frame(frame)
        .ok_or(DecodeFailure::UnexpectedFrameType { expected: F::FRAME_TYPE, actual })
}

/// Determines the protocol version from the first frame on a connection, which must be a SETUP or
///  RESUME frame on stream 0.
///
/// For 1.0 style frames, the version is taken from the frame even if it is not supported, so that
///  the caller can reject it with UNSUPPORTED_SETUP.
pub fn detect_protocol_version(buf: &[u8]) -> Option<ProtocolVersion> {
    if buf.len() >= 10 {
        let stream_id = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) & 0x7fff_ffff;
        let frame_type = buf[4] >> 2;
        let version = ProtocolVersion::new(u16::from_be_bytes([buf[6], buf[7]]), u16::from_be_bytes([buf[8], buf[9]]));

        if stream_id == 0
            && (frame_type == u8::from(FrameType::Setup) || frame_type == u8::from(FrameType::Resume))
            && version.major >= 1
        {
            return Some(version);
        }
    }

    if buf.len() >= 8 {
        let frame_type = u16::from_be_bytes([buf[0], buf[1]]);
        let stream_id = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]) & 0x7fff_ffff;
        if stream_id == 0 {
            if frame_type == V0Serializer::RESUME_TYPE_CODE {
                return Some(ProtocolVersion::V0_1);
            }
            if frame_type == V0Serializer::SETUP_TYPE_CODE && buf.len() >= 12 {
                let version = ProtocolVersion::new(u16::from_be_bytes([buf[8], buf[9]]), u16::from_be_bytes([buf[10], buf[11]]));
                if version == ProtocolVersion::V0_1 {
                    return Some(version);
                }
            }
        }
    }

    None
}
