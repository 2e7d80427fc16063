//! Frame bodies are laid out the same way in all supported protocol versions, apart from a few
//!  version specific pieces (header, metadata length prefix, RESUME version fields). Those are
//!  abstracted as a [WireDialect], and the body code here is generic over it.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::frame::error_code::ErrorCode;
use crate::frame::frame_header::{FrameFlags, FrameHeader, FrameType, StreamId};
use crate::frame::frames::*;
use crate::frame::payload::Payload;
use crate::frame::protocol_version::{ProtocolVersion, ResumeToken};
use crate::serializer::DecodeFailure;
use crate::util::buf_ext::{BufExt, BufMutExt};

pub trait WireDialect {
    const VERSION: ProtocolVersion;

    fn put_header(buf: &mut BytesMut, header: &FrameHeader);
    fn get_header(buf: &mut Bytes) -> Result<FrameHeader, DecodeFailure>;

    /// length prefixed metadata ahead of a payload's data
    fn put_metadata(buf: &mut BytesMut, metadata: &Bytes);
    fn get_metadata(buf: &mut Bytes) -> Result<Bytes, DecodeFailure>;

    /// metadata as the last element of METADATA_PUSH and LEASE frames
    fn put_trailing_metadata(buf: &mut BytesMut, metadata: &Bytes);
    fn get_trailing_metadata(buf: &mut Bytes) -> Result<Bytes, DecodeFailure>;

    fn put_resume_version(buf: &mut BytesMut, version: ProtocolVersion);
    fn get_resume_version(buf: &mut Bytes) -> Result<ProtocolVersion, DecodeFailure>;
}

/// Validates a decoded header's type and flags
pub fn resolve_header(frame_type: Option<FrameType>, raw_type: u16, flags: FrameFlags, stream_id: StreamId) -> Result<FrameHeader, DecodeFailure> {
    let frame_type = match frame_type {
        Some(t) => t,
        None if flags.contains(FrameFlags::IGNORE) => return Err(DecodeFailure::IgnoredFrameType(raw_type)),
        None => return Err(DecodeFailure::UnknownFrameType(raw_type)),
    };

    if !frame_type.allowed_flags().contains(flags) {
        return Err(DecodeFailure::InvalidFlags { frame_type, flags: flags.bits() });
    }

    Ok(FrameHeader {
        frame_type,
        flags,
        stream_id,
    })
}

/// The header as it goes on the wire: the METADATA flag always mirrors the presence of metadata
fn wire_header(frame: &Frame) -> FrameHeader {
    let mut header = *frame.header();
    let has_metadata = match frame {
        Frame::Lease(f) => f.metadata.is_some(),
        Frame::MetadataPush(_) => true,
        other => other.payload().map(|p| p.has_metadata()).unwrap_or(false),
    };
    header.flags.set(FrameFlags::METADATA, has_metadata);
    header
}

pub fn serialize_frame<D: WireDialect>(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::with_capacity(32 + frame.payload().map(|p| p.len()).unwrap_or(0));
    let header = wire_header(frame);
    D::put_header(&mut buf, &header);

    match frame {
        Frame::Setup(f) => {
            buf.put_u16(f.version.major);
            buf.put_u16(f.version.minor);
            buf.put_u31(f.keepalive_time_ms);
            buf.put_u31(f.max_lifetime_ms);
            if header.has(FrameFlags::RESUME_ENABLE) {
                put_token(&mut buf, &f.token);
            }
            put_mime_type(&mut buf, &f.metadata_mime_type);
            put_mime_type(&mut buf, &f.data_mime_type);
            put_payload::<D>(&mut buf, &f.payload);
        }
        Frame::Lease(f) => {
            buf.put_u31(f.ttl_ms);
            buf.put_u31(f.number_of_requests);
            if let Some(metadata) = &f.metadata {
                D::put_trailing_metadata(&mut buf, metadata);
            }
        }
        Frame::Keepalive(f) => {
            buf.put_u63(f.position);
            buf.put_slice(&f.data);
        }
        Frame::RequestResponse(f) => put_payload::<D>(&mut buf, &f.payload),
        Frame::RequestFnf(f) => put_payload::<D>(&mut buf, &f.payload),
        Frame::RequestStream(f) => {
            buf.put_u31(f.request_n);
            put_payload::<D>(&mut buf, &f.payload);
        }
        Frame::RequestChannel(f) => {
            buf.put_u31(f.request_n);
            put_payload::<D>(&mut buf, &f.payload);
        }
        Frame::RequestN(f) => buf.put_u31(f.request_n),
        Frame::Cancel(_) => {}
        Frame::Payload(f) => put_payload::<D>(&mut buf, &f.payload),
        Frame::Error(f) => {
            buf.put_u32(f.error_code.into());
            buf.put_slice(&f.message);
        }
        Frame::MetadataPush(f) => D::put_trailing_metadata(&mut buf, &f.metadata),
        Frame::Resume(f) => {
            D::put_resume_version(&mut buf, f.version);
            put_token(&mut buf, &f.token);
            buf.put_u63(f.last_received_server_position);
            buf.put_u63(f.first_client_position);
        }
        Frame::ResumeOk(f) => buf.put_u63(f.position),
    }

    buf.freeze()
}

pub fn deserialize_frame<D: WireDialect>(mut buf: Bytes) -> Result<Frame, DecodeFailure> {
    let header = D::get_header(&mut buf)?;
    let buf = &mut buf;

    let frame = match header.frame_type {
        FrameType::Setup => {
            let version = ProtocolVersion::new(buf.try_get_u16()?, buf.try_get_u16()?);
            let keepalive_time_ms = buf.try_get_u31()?;
            let max_lifetime_ms = buf.try_get_u31()?;
            let token = if header.has(FrameFlags::RESUME_ENABLE) {
                get_token(buf)?
            }
            else {
                ResumeToken::empty()
            };
            let metadata_mime_type = get_mime_type(buf)?;
            let data_mime_type = get_mime_type(buf)?;
            let payload = get_payload::<D>(&header, buf)?;
            Frame::Setup(FrameSetup {
                header,
                version,
                keepalive_time_ms,
                max_lifetime_ms,
                token,
                metadata_mime_type,
                data_mime_type,
                payload,
            })
        }
        FrameType::Lease => {
            let ttl_ms = buf.try_get_u31()?;
            let number_of_requests = buf.try_get_u31()?;
            let metadata = if header.has(FrameFlags::METADATA) {
                Some(D::get_trailing_metadata(buf)?)
            }
            else {
                None
            };
            Frame::Lease(FrameLease { header, ttl_ms, number_of_requests, metadata })
        }
        FrameType::Keepalive => {
            let position = buf.try_get_u63()?;
            Frame::Keepalive(FrameKeepalive { header, position, data: take_rest(buf) })
        }
        FrameType::RequestResponse => {
            let payload = get_payload::<D>(&header, buf)?;
            Frame::RequestResponse(FrameRequestResponse { header, payload })
        }
        FrameType::RequestFnf => {
            let payload = get_payload::<D>(&header, buf)?;
            Frame::RequestFnf(FrameRequestFnf { header, payload })
        }
        FrameType::RequestStream => {
            let request_n = buf.try_get_u31()?;
            let payload = get_payload::<D>(&header, buf)?;
            Frame::RequestStream(FrameRequestStream { header, request_n, payload })
        }
        FrameType::RequestChannel => {
            let request_n = buf.try_get_u31()?;
            let payload = get_payload::<D>(&header, buf)?;
            Frame::RequestChannel(FrameRequestChannel { header, request_n, payload })
        }
        FrameType::RequestN => {
            let request_n = buf.try_get_u31()?;
            Frame::RequestN(FrameRequestN { header, request_n })
        }
        FrameType::Cancel => Frame::Cancel(FrameCancel { header }),
        FrameType::Payload => {
            let payload = get_payload::<D>(&header, buf)?;
            Frame::Payload(FramePayload { header, payload })
        }
        FrameType::Error => {
            let raw_code = buf.try_get_u32()?;
            let error_code = ErrorCode::try_from(raw_code)
                .map_err(|_| DecodeFailure::InvalidErrorCode(raw_code))?;
            Frame::Error(FrameError { header, error_code, message: take_rest(buf) })
        }
        FrameType::MetadataPush => {
            let metadata = D::get_trailing_metadata(buf)?;
            Frame::MetadataPush(FrameMetadataPush { header, metadata })
        }
        FrameType::Resume => {
            let version = D::get_resume_version(buf)?;
            let token = get_token(buf)?;
            let last_received_server_position = buf.try_get_u63()?;
            let first_client_position = buf.try_get_u63()?;
            Frame::Resume(FrameResume { header, version, token, last_received_server_position, first_client_position })
        }
        FrameType::ResumeOk => {
            let position = buf.try_get_u63()?;
            Frame::ResumeOk(FrameResumeOk { header, position })
        }
    };
    Ok(frame)
}

fn take_rest(buf: &mut Bytes) -> Bytes {
    std::mem::take(buf)
}

fn put_payload<D: WireDialect>(buf: &mut BytesMut, payload: &Payload) {
    if let Some(metadata) = &payload.metadata {
        D::put_metadata(buf, metadata);
    }
    buf.put_slice(&payload.data);
}

fn get_payload<D: WireDialect>(header: &FrameHeader, buf: &mut Bytes) -> Result<Payload, DecodeFailure> {
    let metadata = if header.has(FrameFlags::METADATA) {
        Some(D::get_metadata(buf)?)
    }
    else {
        None
    };
    Ok(Payload {
        data: take_rest(buf),
        metadata,
    })
}

fn put_token(buf: &mut BytesMut, token: &ResumeToken) {
    let len = token.len().min(u16::MAX as usize);
    buf.put_u16(len as u16);
    buf.put_slice(&token.0[..len]);
}

fn get_token(buf: &mut Bytes) -> Result<ResumeToken, DecodeFailure> {
    let len = buf.try_get_u16()? as usize;
    Ok(ResumeToken(buf.try_get_bytes(len)?))
}

fn put_mime_type(buf: &mut BytesMut, mime_type: &str) {
    let len = mime_type.len().min(u8::MAX as usize);
    buf.put_u8(len as u8);
    buf.put_slice(&mime_type.as_bytes()[..len]);
}

fn get_mime_type(buf: &mut Bytes) -> Result<String, DecodeFailure> {
    let len = buf.try_get_u8()? as usize;
    let raw = buf.try_get_bytes(len)?;
    if !raw.is_ascii() {
        return Err(DecodeFailure::InvalidMimeType);
    }
    String::from_utf8(raw.to_vec())
        .map_err(|_| DecodeFailure::InvalidMimeType)
}
