use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::frame::frame_header::{FrameFlags, FrameHeader, FrameType, StreamId};
use crate::frame::frames::Frame;
use crate::frame::protocol_version::ProtocolVersion;
use crate::serializer::codec::{deserialize_frame, resolve_header, serialize_frame, WireDialect};
use crate::serializer::{DecodeFailure, FrameSerializer};
use crate::util::buf_ext::{BufExt, BufMutExt};

const FLAGS_SHIFT: u16 = 6;
const METADATA_LEN_SIZE: usize = size_of::<u32>();

/// Wire format of the pre-1.0 draft (protocol version 0.1):
///
/// ```ascii
/// 0: frame type (u16)
/// 2: flags (u16, 10 flag bits in the high bits)
/// 4: stream id (u31)
/// 8: frame type specific fields
/// ```
///
/// Metadata is prefixed with a u32 length that includes the prefix itself. RESUME frames carry no
///  protocol version.
pub struct V0Serializer;

fn type_code(frame_type: FrameType) -> u16 {
    match frame_type {
        FrameType::Setup => 0x01,
        FrameType::Lease => 0x02,
        FrameType::Keepalive => 0x03,
        FrameType::RequestResponse => 0x04,
        FrameType::RequestFnf => 0x05,
        FrameType::RequestStream => 0x06,
        FrameType::RequestChannel => 0x08,
        FrameType::RequestN => 0x09,
        FrameType::Cancel => 0x0a,
        FrameType::Payload => 0x0b,
        FrameType::Error => 0x0c,
        FrameType::MetadataPush => 0x0d,
        FrameType::Resume => 0x0e,
        FrameType::ResumeOk => 0x0f,
    }
}

fn frame_type(code: u16) -> Option<FrameType> {
    let frame_type = match code {
        0x01 => FrameType::Setup,
        0x02 => FrameType::Lease,
        0x03 => FrameType::Keepalive,
        0x04 => FrameType::RequestResponse,
        0x05 => FrameType::RequestFnf,
        0x06 => FrameType::RequestStream,
        0x08 => FrameType::RequestChannel,
        0x09 => FrameType::RequestN,
        0x0a => FrameType::Cancel,
        0x0b => FrameType::Payload,
        0x0c => FrameType::Error,
        0x0d => FrameType::MetadataPush,
        0x0e => FrameType::Resume,
        0x0f => FrameType::ResumeOk,
        _ => return None,
    };
    Some(frame_type)
}

impl V0Serializer {
    pub(crate) const SETUP_TYPE_CODE: u16 = 0x01;
    pub(crate) const RESUME_TYPE_CODE: u16 = 0x0e;
}

impl WireDialect for V0Serializer {
    const VERSION: ProtocolVersion = ProtocolVersion::V0_1;

    fn put_header(buf: &mut BytesMut, header: &FrameHeader) {
        buf.put_u16(type_code(header.frame_type));
        buf.put_u16((header.flags.bits() & FrameFlags::WIRE_MASK) << FLAGS_SHIFT);
        buf.put_u31(header.stream_id.0);
    }

    fn get_header(buf: &mut Bytes) -> Result<FrameHeader, DecodeFailure> {
        let raw_type = buf.try_get_u16()?;
        let flags = FrameFlags::from_bits_retain(buf.try_get_u16()? >> FLAGS_SHIFT);
        let stream_id = StreamId(buf.try_get_u31()?);
        resolve_header(frame_type(raw_type), raw_type, flags, stream_id)
    }

    fn put_metadata(buf: &mut BytesMut, metadata: &Bytes) {
        buf.put_u32((metadata.len() + METADATA_LEN_SIZE) as u32);
        buf.put_slice(metadata);
    }

    fn get_metadata(buf: &mut Bytes) -> Result<Bytes, DecodeFailure> {
        let len = buf.try_get_u32()? as usize;
        if len < METADATA_LEN_SIZE {
            return Err(DecodeFailure::InvalidLength(len));
        }
        Ok(buf.try_get_bytes(len - METADATA_LEN_SIZE)?)
    }

    fn put_trailing_metadata(buf: &mut BytesMut, metadata: &Bytes) {
        Self::put_metadata(buf, metadata);
    }

    fn get_trailing_metadata(buf: &mut Bytes) -> Result<Bytes, DecodeFailure> {
        let metadata = Self::get_metadata(buf)?;
        if buf.has_remaining() {
            return Err(DecodeFailure::InvalidLength(buf.remaining()));
        }
        Ok(metadata)
    }

    fn put_resume_version(_buf: &mut BytesMut, _version: ProtocolVersion) {
    }

    fn get_resume_version(_buf: &mut Bytes) -> Result<ProtocolVersion, DecodeFailure> {
        Ok(ProtocolVersion::V0_1)
    }
}

impl FrameSerializer for V0Serializer {
    fn protocol_version(&self) -> ProtocolVersion {
        <Self as WireDialect>::VERSION
    }

    fn serialize(&self, frame: &Frame) -> Bytes {
        serialize_frame::<Self>(frame)
    }

    fn deserialize(&self, buf: Bytes) -> Result<Frame, DecodeFailure> {
        deserialize_frame::<Self>(buf)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::frames::*;
    use crate::frame::payload::Payload;
    use crate::frame::protocol_version::ResumeToken;

    #[test]
    fn test_payload_golden_bytes() {
        let frame: Frame = FramePayload::next(StreamId(3), Payload::with_metadata("d", "m"), false).into();
        let bytes = V0Serializer.serialize(&frame);
        assert_eq!(&bytes[..], &[
            0x00,0x0b,
            0x48,0x00,
            0,0,0,3,
            0,0,0,5, b'm',
            b'd',
        ]);
        assert_eq!(V0Serializer.deserialize(bytes).unwrap(), frame);
    }

    #[test]
    fn test_channel_uses_draft_type_code() {
        let frame: Frame = FrameRequestChannel::new(StreamId(1), FrameFlags::COMPLETE, 4, Payload::new("x")).into();
        let bytes = V0Serializer.serialize(&frame);
        assert_eq!(&bytes[..4], &[0x00,0x08, 0x10,0x00]);
        assert_eq!(V0Serializer.deserialize(bytes).unwrap(), frame);
    }

    #[test]
    fn test_resume_has_no_version() {
        let frame: Frame = FrameResume::new(ProtocolVersion::V0_1, ResumeToken(Bytes::from_static(b"t")), 7, 9).into();
        let bytes = V0Serializer.serialize(&frame);
        assert_eq!(bytes.len(), 8 + 2 + 1 + 8 + 8);
        assert_eq!(V0Serializer.deserialize(bytes).unwrap(), frame);
    }

    #[test]
    fn test_metadata_length_below_prefix_size() {
        let bytes = Bytes::from_static(&[0x00,0x04, 0x40,0x00, 0,0,0,1, 0,0,0,2]);
        assert_eq!(V0Serializer.deserialize(bytes).unwrap_err(), DecodeFailure::InvalidLength(2));
    }

    #[test]
    fn test_subscription_type_is_unknown() {
        let bytes = Bytes::from_static(&[0x00,0x07, 0x00,0x00, 0,0,0,1]);
        assert_eq!(V0Serializer.deserialize(bytes).unwrap_err(), DecodeFailure::UnknownFrameType(7));
    }
}
