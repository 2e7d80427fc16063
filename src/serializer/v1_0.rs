use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::frame::frame_header::{FrameFlags, FrameHeader, FrameType, StreamId};
use crate::frame::frames::Frame;
use crate::frame::protocol_version::ProtocolVersion;
use crate::serializer::codec::{deserialize_frame, resolve_header, serialize_frame, WireDialect};
use crate::serializer::{DecodeFailure, FrameSerializer};
use crate::util::buf_ext::{BufExt, BufMutExt, U24_MAX};

/// Wire format of protocol version 1.0:
///
/// ```ascii
/// 0: stream id (u31, reserved top bit)
/// 4: frame type (6 bits) | flags (10 bits)
/// 6: frame type specific fields
/// ```
///
/// Metadata in payloads is prefixed with a u24 length.
pub struct V1Serializer;

impl WireDialect for V1Serializer {
    const VERSION: ProtocolVersion = ProtocolVersion::V1_0;

    fn put_header(buf: &mut BytesMut, header: &FrameHeader) {
        buf.put_u31(header.stream_id.0);
        let type_code = u8::from(header.frame_type) as u16;
        buf.put_u16((type_code << 10) | (header.flags.bits() & FrameFlags::WIRE_MASK));
    }

    fn get_header(buf: &mut Bytes) -> Result<FrameHeader, DecodeFailure> {
        let stream_id = StreamId(buf.try_get_u31()?);
        let type_and_flags = buf.try_get_u16()?;

        let raw_type = type_and_flags >> 10;
        let flags = FrameFlags::from_bits_retain(type_and_flags & FrameFlags::WIRE_MASK);
        let frame_type = FrameType::try_from(raw_type as u8).ok();
        resolve_header(frame_type, raw_type, flags, stream_id)
    }

    fn put_metadata(buf: &mut BytesMut, metadata: &Bytes) {
        debug_assert!(metadata.len() <= U24_MAX);
        let len = metadata.len().min(U24_MAX);
        buf.put_u24(len as u32);
        buf.put_slice(&metadata[..len]);
    }

    fn get_metadata(buf: &mut Bytes) -> Result<Bytes, DecodeFailure> {
        let len = buf.try_get_u24()? as usize;
        Ok(buf.try_get_bytes(len)?)
    }

    fn put_trailing_metadata(buf: &mut BytesMut, metadata: &Bytes) {
        buf.put_slice(metadata);
    }

    fn get_trailing_metadata(buf: &mut Bytes) -> Result<Bytes, DecodeFailure> {
        Ok(std::mem::take(buf))
    }

    fn put_resume_version(buf: &mut BytesMut, version: ProtocolVersion) {
        buf.put_u16(version.major);
        buf.put_u16(version.minor);
    }

    fn get_resume_version(buf: &mut Bytes) -> Result<ProtocolVersion, DecodeFailure> {
        Ok(ProtocolVersion::new(buf.try_get_u16()?, buf.try_get_u16()?))
    }
}

impl FrameSerializer for V1Serializer {
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
    use crate::frame::error_code::ErrorCode;
    use crate::frame::frames::*;
    use crate::frame::payload::Payload;
    use crate::frame::protocol_version::ResumeToken;
    use rstest::*;

    #[rstest]
    #[case::request_n(FrameRequestN::new(StreamId(5), 10).into(), vec![0,0,0,5, 0x20,0x00, 0,0,0,10])]
    #[case::cancel(FrameCancel::new(StreamId(7)).into(), vec![0,0,0,7, 0x24,0x00])]
    #[case::keepalive(FrameKeepalive::new(FrameFlags::RESPOND, 3, Bytes::from_static(b"x")).into(),
        vec![0,0,0,0, 0x0c,0x80, 0,0,0,0,0,0,0,3, b'x'])]
    #[case::payload(FramePayload::next(StreamId(1), Payload::with_metadata("d", "m"), true).into(),
        vec![0,0,0,1, 0x29,0x60, 0,0,1, b'm', b'd'])]
    #[case::error(FrameError::connection_error("e").into(), vec![0,0,0,0, 0x2c,0x00, 0,0,1,1, b'e'])]
    #[case::resume_ok(FrameResumeOk::new(0x0102).into(), vec![0,0,0,0, 0x38,0x00, 0,0,0,0,0,0,1,2])]
    #[case::metadata_push(FrameMetadataPush::new(Bytes::from_static(b"md")).into(), vec![0,0,0,0, 0x31,0x00, b'm', b'd'])]
    #[case::lease(FrameLease::new(1000, 5, None).into(), vec![0,0,0,0, 0x08,0x00, 0,0,0x03,0xe8, 0,0,0,5])]
    fn test_golden_bytes(#[case] frame: Frame, #[case] expected: Vec<u8>) {
        let bytes = V1Serializer.serialize(&frame);
        assert_eq!(&bytes[..], &expected[..]);
        assert_eq!(V1Serializer.deserialize(bytes).unwrap(), frame);
    }

    #[test]
    fn test_setup_golden_bytes() {
        let frame = FrameSetup::new(
            FrameFlags::RESUME_ENABLE,
            ProtocolVersion::V1_0,
            500,
            2000,
            ResumeToken(Bytes::from_static(b"tk")),
            "m".to_string(),
            "d".to_string(),
            Payload::new("p"),
        );
        let bytes = V1Serializer.serialize(&frame.clone().into());
        assert_eq!(&bytes[..], &[
            0,0,0,0, 0x04,0x80,
            0,1, 0,0,
            0,0,0x01,0xf4,
            0,0,0x07,0xd0,
            0,2, b't', b'k',
            1, b'm',
            1, b'd',
            b'p',
        ]);
        assert_eq!(V1Serializer.deserialize(bytes).unwrap(), Frame::Setup(frame));
    }

    #[test]
    fn test_resume_golden_bytes() {
        let frame: Frame = FrameResume::new(ProtocolVersion::V1_0, ResumeToken(Bytes::from_static(b"tk")), 7, 3).into();
        let bytes = V1Serializer.serialize(&frame);
        assert_eq!(&bytes[..], &[
            0,0,0,0, 0x34,0x00,
            0,1, 0,0,
            0,2, b't', b'k',
            0,0,0,0,0,0,0,7,
            0,0,0,0,0,0,0,3,
        ]);
        assert_eq!(V1Serializer.deserialize(bytes).unwrap(), frame);
    }

    #[test]
    fn test_reserved_stream_id_bit_is_ignored() {
        let bytes = Bytes::from_static(&[0x80,0,0,7, 0x24,0x00]);
        assert_eq!(V1Serializer.deserialize(bytes).unwrap(), FrameCancel::new(StreamId(7)).into());
    }

    #[rstest]
    #[case::empty(vec![], DecodeFailure::Truncated { requested: 4, available: 0 })]
    #[case::short_header(vec![0,0,0,1, 0x24], DecodeFailure::Truncated { requested: 2, available: 1 })]
    #[case::short_request_n(vec![0,0,0,1, 0x20,0x00, 0,0], DecodeFailure::Truncated { requested: 4, available: 2 })]
    #[case::unknown_type(vec![0,0,0,1, 0xfc,0x00], DecodeFailure::UnknownFrameType(0x3f))]
    #[case::reserved_type(vec![0,0,0,1, 0x00,0x00], DecodeFailure::UnknownFrameType(0))]
    #[case::ignorable_type(vec![0,0,0,1, 0xfe,0x00], DecodeFailure::IgnoredFrameType(0x3f))]
    #[case::metadata_on_cancel(vec![0,0,0,1, 0x25,0x00], DecodeFailure::InvalidFlags { frame_type: FrameType::Cancel, flags: 0x100 })]
    #[case::next_on_request(vec![0,0,0,1, 0x10,0x20], DecodeFailure::InvalidFlags { frame_type: FrameType::RequestResponse, flags: 0x20 })]
    #[case::unknown_error_code(vec![0,0,0,1, 0x2c,0x00, 0,0,0x30,0], DecodeFailure::InvalidErrorCode(0x3000))]
    #[case::metadata_overrun(vec![0,0,0,1, 0x11,0x00, 0,0,5, b'a'], DecodeFailure::Truncated { requested: 5, available: 1 })]
    fn test_decode_failures(#[case] bytes: Vec<u8>, #[case] expected: DecodeFailure) {
        assert_eq!(V1Serializer.deserialize(Bytes::from(bytes)).unwrap_err(), expected);
    }

    #[test]
    fn test_error_code_on_wire() {
        let frame: Frame = FrameError::rejected(StreamId(3), "no").into();
        let bytes = V1Serializer.serialize(&frame);
        assert_eq!(&bytes[6..10], &u32::from(ErrorCode::Rejected).to_be_bytes());
    }
}
