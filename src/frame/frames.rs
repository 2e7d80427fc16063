use std::borrow::Cow;
use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::frame::error_code::{ErrorCode, PeerError};
use crate::frame::frame_header::{FrameFlags, FrameHeader, FrameType, StreamId};
use crate::frame::payload::Payload;
use crate::frame::protocol_version::{ProtocolVersion, ResumePosition, ResumeToken};
use crate::util::buf_ext::U31_MASK;

pub const MAX_REQUEST_N: u32 = U31_MASK;
pub const MAX_KEEPALIVE_TIME_MS: u32 = U31_MASK;
pub const MAX_LIFETIME_MS: u32 = U31_MASK;
pub const MAX_LEASE_TTL_MS: u32 = U31_MASK;
pub const MAX_LEASE_REQUESTS: u32 = U31_MASK;

fn payload_flags(flags: FrameFlags, payload: &Payload) -> FrameFlags {
    if payload.has_metadata() {
        flags | FrameFlags::METADATA
    }
    else {
        flags - FrameFlags::METADATA
    }
}


#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameRequestResponse {
    pub header: FrameHeader,
    pub payload: Payload,
}
impl FrameRequestResponse {
    pub fn new(stream_id: StreamId, flags: FrameFlags, payload: Payload) -> FrameRequestResponse {
        FrameRequestResponse {
            header: FrameHeader::new(FrameType::RequestResponse, payload_flags(flags, &payload), stream_id),
            payload,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameRequestFnf {
    pub header: FrameHeader,
    pub payload: Payload,
}
impl FrameRequestFnf {
    pub fn new(stream_id: StreamId, flags: FrameFlags, payload: Payload) -> FrameRequestFnf {
        FrameRequestFnf {
            header: FrameHeader::new(FrameType::RequestFnf, payload_flags(flags, &payload), stream_id),
            payload,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameRequestStream {
    pub header: FrameHeader,
    pub request_n: u32,
    pub payload: Payload,
}
impl FrameRequestStream {
    pub fn new(stream_id: StreamId, flags: FrameFlags, request_n: u32, payload: Payload) -> FrameRequestStream {
        FrameRequestStream {
            header: FrameHeader::new(FrameType::RequestStream, payload_flags(flags, &payload), stream_id),
            request_n: request_n.min(MAX_REQUEST_N),
            payload,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameRequestChannel {
    pub header: FrameHeader,
    pub request_n: u32,
    pub payload: Payload,
}
impl FrameRequestChannel {
    pub fn new(stream_id: StreamId, flags: FrameFlags, request_n: u32, payload: Payload) -> FrameRequestChannel {
        FrameRequestChannel {
            header: FrameHeader::new(FrameType::RequestChannel, payload_flags(flags, &payload), stream_id),
            request_n: request_n.min(MAX_REQUEST_N),
            payload,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameRequestN {
    pub header: FrameHeader,
    pub request_n: u32,
}
impl FrameRequestN {
    pub fn new(stream_id: StreamId, request_n: u32) -> FrameRequestN {
        FrameRequestN {
            header: FrameHeader::new(FrameType::RequestN, FrameFlags::empty(), stream_id),
            request_n: request_n.min(MAX_REQUEST_N),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameCancel {
    pub header: FrameHeader,
}
impl FrameCancel {
    pub fn new(stream_id: StreamId) -> FrameCancel {
        FrameCancel {
            header: FrameHeader::new(FrameType::Cancel, FrameFlags::empty(), stream_id),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FramePayload {
    pub header: FrameHeader,
    pub payload: Payload,
}
impl FramePayload {
    pub fn new(stream_id: StreamId, flags: FrameFlags, payload: Payload) -> FramePayload {
        FramePayload {
            header: FrameHeader::new(FrameType::Payload, payload_flags(flags, &payload), stream_id),
            payload,
        }
    }

    /// PAYLOAD with NEXT, and COMPLETE if `complete`
    pub fn next(stream_id: StreamId, payload: Payload, complete: bool) -> FramePayload {
        let flags = if complete {
            FrameFlags::NEXT | FrameFlags::COMPLETE
        }
        else {
            FrameFlags::NEXT
        };
        Self::new(stream_id, flags, payload)
    }

    /// terminal PAYLOAD without data
    pub fn complete(stream_id: StreamId) -> FramePayload {
        Self::new(stream_id, FrameFlags::COMPLETE, Payload::empty())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameError {
    pub header: FrameHeader,
    pub error_code: ErrorCode,
    pub message: Bytes,
}
impl FrameError {
    /// Unchecked construction, e.g. when decoding. Prefer the named constructors.
    pub fn new(stream_id: StreamId, error_code: ErrorCode, message: Bytes) -> FrameError {
        FrameError {
            header: FrameHeader::new(FrameType::Error, FrameFlags::empty(), stream_id),
            error_code,
            message,
        }
    }

    fn connection(error_code: ErrorCode, message: impl Into<String>) -> FrameError {
        Self::new(StreamId::CONNECTION, error_code, Bytes::from(message.into()))
    }

    /// A stream scoped error. Panics for stream 0: connection level conditions must use the
    ///  connection level constructors.
    pub fn stream_error(stream_id: StreamId, error_code: ErrorCode, message: impl Into<String>) -> FrameError {
        assert!(!stream_id.is_connection(), "stream scoped error {:?} must not target stream 0", error_code);
        Self::new(stream_id, error_code, Bytes::from(message.into()))
    }

    pub fn invalid_setup(message: impl Into<String>) -> FrameError {
        Self::connection(ErrorCode::InvalidSetup, message)
    }
    pub fn unsupported_setup(message: impl Into<String>) -> FrameError {
        Self::connection(ErrorCode::UnsupportedSetup, message)
    }
    pub fn rejected_setup(message: impl Into<String>) -> FrameError {
        Self::connection(ErrorCode::RejectedSetup, message)
    }
    pub fn rejected_resume(message: impl Into<String>) -> FrameError {
        Self::connection(ErrorCode::RejectedResume, message)
    }
    pub fn connection_error(message: impl Into<String>) -> FrameError {
        Self::connection(ErrorCode::ConnectionError, message)
    }
    pub fn connection_close(message: impl Into<String>) -> FrameError {
        Self::connection(ErrorCode::ConnectionClose, message)
    }

    pub fn application_error(stream_id: StreamId, message: impl Into<String>) -> FrameError {
        Self::stream_error(stream_id, ErrorCode::ApplicationError, message)
    }
    pub fn rejected(stream_id: StreamId, message: impl Into<String>) -> FrameError {
        Self::stream_error(stream_id, ErrorCode::Rejected, message)
    }
    pub fn canceled(stream_id: StreamId, message: impl Into<String>) -> FrameError {
        Self::stream_error(stream_id, ErrorCode::Canceled, message)
    }
    pub fn invalid(stream_id: StreamId, message: impl Into<String>) -> FrameError {
        Self::stream_error(stream_id, ErrorCode::Invalid, message)
    }

    pub fn message_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.message)
    }

    pub fn to_peer_error(&self) -> PeerError {
        PeerError {
            code: self.error_code,
            message: self.message_str().into_owned(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameMetadataPush {
    pub header: FrameHeader,
    pub metadata: Bytes,
}
impl FrameMetadataPush {
    pub fn new(metadata: Bytes) -> FrameMetadataPush {
        FrameMetadataPush {
            header: FrameHeader::new(FrameType::MetadataPush, FrameFlags::METADATA, StreamId::CONNECTION),
            metadata,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameKeepalive {
    pub header: FrameHeader,
    /// the sender's implied position, i.e. how far it has received resumable frames
    pub position: ResumePosition,
    pub data: Bytes,
}
impl FrameKeepalive {
    pub fn new(flags: FrameFlags, position: ResumePosition, data: Bytes) -> FrameKeepalive {
        FrameKeepalive {
            header: FrameHeader::new(FrameType::Keepalive, flags, StreamId::CONNECTION),
            position,
            data,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameSetup {
    pub header: FrameHeader,
    pub version: ProtocolVersion,
    pub keepalive_time_ms: u32,
    pub max_lifetime_ms: u32,
    /// only transmitted if RESUME_ENABLE is set
    pub token: ResumeToken,
    pub metadata_mime_type: String,
    pub data_mime_type: String,
    pub payload: Payload,
}
impl FrameSetup {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        flags: FrameFlags,
        version: ProtocolVersion,
        keepalive_time_ms: u32,
        max_lifetime_ms: u32,
        token: ResumeToken,
        metadata_mime_type: String,
        data_mime_type: String,
        payload: Payload,
    ) -> FrameSetup {
        let mut flags = payload_flags(flags, &payload);
        if token.is_empty() {
            flags -= FrameFlags::RESUME_ENABLE;
        }
        let token = if flags.contains(FrameFlags::RESUME_ENABLE) { token } else { ResumeToken::empty() };

        FrameSetup {
            header: FrameHeader::new(FrameType::Setup, flags, StreamId::CONNECTION),
            version,
            keepalive_time_ms: keepalive_time_ms.min(MAX_KEEPALIVE_TIME_MS),
            max_lifetime_ms: max_lifetime_ms.min(MAX_LIFETIME_MS),
            token,
            metadata_mime_type,
            data_mime_type,
            payload,
        }
    }

    pub fn is_resumable(&self) -> bool {
        self.header.has(FrameFlags::RESUME_ENABLE)
    }

    pub fn requires_lease(&self) -> bool {
        self.header.has(FrameFlags::LEASE)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameLease {
    pub header: FrameHeader,
    pub ttl_ms: u32,
    pub number_of_requests: u32,
    pub metadata: Option<Bytes>,
}
impl FrameLease {
    pub fn new(ttl_ms: u32, number_of_requests: u32, metadata: Option<Bytes>) -> FrameLease {
        let flags = if metadata.is_some() { FrameFlags::METADATA } else { FrameFlags::empty() };
        FrameLease {
            header: FrameHeader::new(FrameType::Lease, flags, StreamId::CONNECTION),
            ttl_ms: ttl_ms.min(MAX_LEASE_TTL_MS),
            number_of_requests: number_of_requests.min(MAX_LEASE_REQUESTS),
            metadata,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameResume {
    pub header: FrameHeader,
    pub version: ProtocolVersion,
    pub token: ResumeToken,
    pub last_received_server_position: ResumePosition,
    pub first_client_position: ResumePosition,
}
impl FrameResume {
    pub fn new(version: ProtocolVersion, token: ResumeToken, last_received_server_position: ResumePosition, first_client_position: ResumePosition) -> FrameResume {
        FrameResume {
            header: FrameHeader::new(FrameType::Resume, FrameFlags::empty(), StreamId::CONNECTION),
            version,
            token,
            last_received_server_position,
            first_client_position,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameResumeOk {
    pub header: FrameHeader,
    pub position: ResumePosition,
}
impl FrameResumeOk {
    pub fn new(position: ResumePosition) -> FrameResumeOk {
        FrameResumeOk {
            header: FrameHeader::new(FrameType::ResumeOk, FrameFlags::empty(), StreamId::CONNECTION),
            position,
        }
    }
}


/// All frame variants. Dispatch code matches on this exhaustively, so a new variant needs
///  handling in the serializers and in the connection state machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Frame {
    Setup(FrameSetup),
    Lease(FrameLease),
    Keepalive(FrameKeepalive),
    RequestResponse(FrameRequestResponse),
    RequestFnf(FrameRequestFnf),
    RequestStream(FrameRequestStream),
    RequestChannel(FrameRequestChannel),
    RequestN(FrameRequestN),
    Cancel(FrameCancel),
    Payload(FramePayload),
    Error(FrameError),
    MetadataPush(FrameMetadataPush),
    Resume(FrameResume),
    ResumeOk(FrameResumeOk),
}

impl Frame {
    pub fn header(&self) -> &FrameHeader {
        match self {
            Frame::Setup(f) => &f.header,
            Frame::Lease(f) => &f.header,
            Frame::Keepalive(f) => &f.header,
            Frame::RequestResponse(f) => &f.header,
            Frame::RequestFnf(f) => &f.header,
            Frame::RequestStream(f) => &f.header,
            Frame::RequestChannel(f) => &f.header,
            Frame::RequestN(f) => &f.header,
            Frame::Cancel(f) => &f.header,
            Frame::Payload(f) => &f.header,
            Frame::Error(f) => &f.header,
            Frame::MetadataPush(f) => &f.header,
            Frame::Resume(f) => &f.header,
            Frame::ResumeOk(f) => &f.header,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.header().frame_type
    }

    pub fn stream_id(&self) -> StreamId {
        self.header().stream_id
    }

    pub fn flags(&self) -> FrameFlags {
        self.header().flags
    }

    /// The payload of frame types that carry one
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            Frame::Setup(f) => Some(&f.payload),
            Frame::RequestResponse(f) => Some(&f.payload),
            Frame::RequestFnf(f) => Some(&f.payload),
            Frame::RequestStream(f) => Some(&f.payload),
            Frame::RequestChannel(f) => Some(&f.payload),
            Frame::Payload(f) => Some(&f.payload),
            _ => None,
        }
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.header())?;
        match self {
            Frame::Error(e) => write!(f, " {:?}: {}", e.error_code, e.message_str()),
            Frame::RequestStream(r) => write!(f, " n={} {:?}", r.request_n, r.payload),
            Frame::RequestChannel(r) => write!(f, " n={} {:?}", r.request_n, r.payload),
            Frame::RequestN(r) => write!(f, " n={}", r.request_n),
            Frame::Keepalive(k) => write!(f, " position={}", k.position),
            Frame::ResumeOk(r) => write!(f, " position={}", r.position),
            Frame::Resume(r) => write!(f, " server position={}, client position={}", r.last_received_server_position, r.first_client_position),
            other => match other.payload() {
                Some(p) => write!(f, " {:?}", p),
                None => Ok(()),
            },
        }
    }
}


/// Typed access to a single frame variant, used for decoding a frame of a known type
pub trait FrameVariant: Sized {
    const FRAME_TYPE: FrameType;

    fn from_frame(frame: Frame) -> Option<Self>;
    fn into_frame(self) -> Frame;
}

macro_rules! frame_variant {
    ($variant: ident, $ty: ty) => {
        impl FrameVariant for $ty {
            const FRAME_TYPE: FrameType = FrameType::$variant;

            fn from_frame(frame: Frame) -> Option<Self> {
                match frame {
                    Frame::$variant(f) => Some(f),
                    _ => None,
                }
            }

            fn into_frame(self) -> Frame {
                Frame::$variant(self)
            }
        }

        impl From<$ty> for Frame {
            fn from(value: $ty) -> Frame {
                Frame::$variant(value)
            }
        }
    }
}

frame_variant!(Setup, FrameSetup);
frame_variant!(Lease, FrameLease);
frame_variant!(Keepalive, FrameKeepalive);
frame_variant!(RequestResponse, FrameRequestResponse);
frame_variant!(RequestFnf, FrameRequestFnf);
frame_variant!(RequestStream, FrameRequestStream);
frame_variant!(RequestChannel, FrameRequestChannel);
frame_variant!(RequestN, FrameRequestN);
frame_variant!(Cancel, FrameCancel);
frame_variant!(Payload, FramePayload);
frame_variant!(Error, FrameError);
frame_variant!(MetadataPush, FrameMetadataPush);
frame_variant!(Resume, FrameResume);
frame_variant!(ResumeOk, FrameResumeOk);


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[should_panic]
    fn test_stream_error_on_connection_stream_panics(
        #[values(ErrorCode::InvalidSetup, ErrorCode::UnsupportedSetup, ErrorCode::RejectedSetup, ErrorCode::RejectedResume,
            ErrorCode::ConnectionError, ErrorCode::ConnectionClose, ErrorCode::ApplicationError, ErrorCode::Rejected,
            ErrorCode::Canceled, ErrorCode::Invalid)]
        code: ErrorCode,
    ) {
        FrameError::stream_error(StreamId::CONNECTION, code, "boom");
    }

    #[rstest]
    #[case::application_error(|s: StreamId| FrameError::application_error(s, "boom"))]
    #[case::rejected(|s: StreamId| FrameError::rejected(s, "boom"))]
    #[case::canceled(|s: StreamId| FrameError::canceled(s, "boom"))]
    #[case::invalid(|s: StreamId| FrameError::invalid(s, "boom"))]
    #[should_panic]
    fn test_named_stream_errors_on_connection_stream_panic(#[case] ctor: fn(StreamId) -> FrameError) {
        ctor(StreamId::CONNECTION);
    }

    #[rstest]
    #[case::invalid_setup(FrameError::invalid_setup("x"), ErrorCode::InvalidSetup)]
    #[case::unsupported_setup(FrameError::unsupported_setup("x"), ErrorCode::UnsupportedSetup)]
    #[case::rejected_setup(FrameError::rejected_setup("x"), ErrorCode::RejectedSetup)]
    #[case::rejected_resume(FrameError::rejected_resume("x"), ErrorCode::RejectedResume)]
    #[case::connection_error(FrameError::connection_error("x"), ErrorCode::ConnectionError)]
    #[case::connection_close(FrameError::connection_close("x"), ErrorCode::ConnectionClose)]
    fn test_connection_errors(#[case] frame: FrameError, #[case] code: ErrorCode) {
        assert_eq!(frame.error_code, code);
        assert!(frame.header.stream_id.is_connection());
        assert_eq!(frame.message_str(), "x");
    }

    #[rstest]
    #[case::application_error(FrameError::application_error(StreamId(3), "x"), ErrorCode::ApplicationError)]
    #[case::rejected(FrameError::rejected(StreamId(3), "x"), ErrorCode::Rejected)]
    #[case::canceled(FrameError::canceled(StreamId(3), "x"), ErrorCode::Canceled)]
    #[case::invalid(FrameError::invalid(StreamId(3), "x"), ErrorCode::Invalid)]
    fn test_stream_errors(#[case] frame: FrameError, #[case] code: ErrorCode) {
        assert_eq!(frame.error_code, code);
        assert_eq!(frame.header.stream_id, StreamId(3));
        assert_eq!(frame.to_peer_error(), PeerError { code, message: "x".to_string() });
    }

    #[test]
    fn test_metadata_flag_follows_payload() {
        let with = FrameRequestResponse::new(StreamId(1), FrameFlags::empty(), Payload::with_metadata("d", "m"));
        assert!(with.header.has(FrameFlags::METADATA));

        let without = FrameRequestResponse::new(StreamId(1), FrameFlags::METADATA, Payload::new("d"));
        assert!(!without.header.has(FrameFlags::METADATA));
    }

    #[test]
    fn test_request_n_is_capped() {
        let frame = FrameRequestN::new(StreamId(1), u32::MAX);
        assert_eq!(frame.request_n, MAX_REQUEST_N);
    }

    #[test]
    fn test_setup_without_token_is_not_resumable() {
        let frame = FrameSetup::new(FrameFlags::RESUME_ENABLE, ProtocolVersion::V1_0, 1000, 5000, ResumeToken::empty(),
            "a".to_string(), "b".to_string(), Payload::empty());
        assert!(!frame.is_resumable());
    }

    #[test]
    fn test_variant_access() {
        let frame: Frame = FrameCancel::new(StreamId(5)).into();
        assert_eq!(frame.frame_type(), FrameType::Cancel);
        assert_eq!(frame.stream_id(), StreamId(5));
        assert!(FrameRequestN::from_frame(frame.clone()).is_none());
        assert_eq!(FrameCancel::from_frame(frame), Some(FrameCancel::new(StreamId(5))));
    }

    #[test]
    fn test_display() {
        let frame: Frame = FrameError::rejected(StreamId(7), "nope").into();
        assert_eq!(frame.to_string(), "Error[stream 7, flags 0x0] Rejected: nope");
    }
}
