use std::fmt::{Display, Formatter};

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::util::buf_ext::U31_MASK;

/// 31 bit stream id. Stream 0 is reserved for connection level frames, client initiated streams
///  have odd ids and server initiated streams have even ids.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct StreamId(pub u32);

impl StreamId {
    pub const CONNECTION: StreamId = StreamId(0);
    pub const MAX: StreamId = StreamId(U31_MASK);

    pub fn is_connection(&self) -> bool {
        self.0 == 0
    }

    pub fn is_client_initiated(&self) -> bool {
        self.0 % 2 == 1
    }

    pub fn is_server_initiated(&self) -> bool {
        self.0 != 0 && self.0 % 2 == 0
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}


#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum FrameType {
    Setup = 0x01,
    Lease = 0x02,
    Keepalive = 0x03,
    RequestResponse = 0x04,
    RequestFnf = 0x05,
    RequestStream = 0x06,
    RequestChannel = 0x07,
    RequestN = 0x08,
    Cancel = 0x09,
    Payload = 0x0A,
    Error = 0x0B,
    MetadataPush = 0x0C,
    Resume = 0x0D,
    ResumeOk = 0x0E,
}

impl FrameType {
    /// Flags that carry meaning for this frame type. IGNORE is valid for all types.
    pub fn allowed_flags(&self) -> FrameFlags {
        use FrameType::*;

        let specific = match self {
            Setup => FrameFlags::METADATA | FrameFlags::RESUME_ENABLE | FrameFlags::LEASE,
            Lease => FrameFlags::METADATA,
            Keepalive => FrameFlags::RESPOND,
            RequestResponse | RequestFnf | RequestStream => FrameFlags::METADATA | FrameFlags::FOLLOWS,
            RequestChannel => FrameFlags::METADATA | FrameFlags::FOLLOWS | FrameFlags::COMPLETE,
            Payload => FrameFlags::METADATA | FrameFlags::FOLLOWS | FrameFlags::COMPLETE | FrameFlags::NEXT,
            MetadataPush => FrameFlags::METADATA,
            RequestN | Cancel | Error | Resume | ResumeOk => FrameFlags::empty(),
        };
        specific | FrameFlags::IGNORE
    }

    /// true for the frame types whose sent instances are retained for warm resumption
    pub fn is_resumable(&self) -> bool {
        use FrameType::*;

        matches!(self, RequestResponse | RequestFnf | RequestStream | RequestChannel | RequestN | Cancel | Payload | Error)
    }
}


bitflags! {
    /// Frame flags in their 1.0 wire positions. Some bits are shared between flags whose meaning
    ///  depends on the frame type (FOLLOWS / RESUME_ENABLE / RESPOND, COMPLETE / LEASE).
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default)]
    pub struct FrameFlags: u16 {
        const IGNORE = 0x200;
        const METADATA = 0x100;
        const FOLLOWS = 0x80;
        const RESUME_ENABLE = 0x80;
        const RESPOND = 0x80;
        const COMPLETE = 0x40;
        const LEASE = 0x40;
        const NEXT = 0x20;
    }
}

impl FrameFlags {
    /// all bits a flag can occupy
    pub const WIRE_MASK: u16 = 0x3ff;
}


#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub frame_type: FrameType,
    pub flags: FrameFlags,
    pub stream_id: StreamId,
}

impl FrameHeader {
    pub fn new(frame_type: FrameType, flags: FrameFlags, stream_id: StreamId) -> FrameHeader {
        FrameHeader {
            frame_type,
            flags: flags & frame_type.allowed_flags(),
            stream_id,
        }
    }

    pub fn has(&self, flag: FrameFlags) -> bool {
        self.flags.contains(flag)
    }
}

impl Display for FrameHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[stream {}, flags {:#x}]", self.frame_type, self.stream_id, self.flags.bits())
    }
}


/// The logical interaction model of a stream
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum StreamType {
    RequestResponse,
    Stream,
    Channel,
    FireAndForget,
}

impl StreamType {
    pub fn opening_frame_type(&self) -> FrameType {
        match self {
            StreamType::RequestResponse => FrameType::RequestResponse,
            StreamType::Stream => FrameType::RequestStream,
            StreamType::Channel => FrameType::RequestChannel,
            StreamType::FireAndForget => FrameType::RequestFnf,
        }
    }
}

/// Does a frame of this type open a new stream?
pub fn is_new_stream_frame(frame_type: FrameType) -> bool {
    matches!(frame_type, FrameType::RequestResponse | FrameType::RequestFnf | FrameType::RequestStream | FrameType::RequestChannel)
}

/// Stream category for a stream opening frame type.
///
/// Panics for all other frame types: calling it with one means the dispatch code and the frame
///  model disagree.
pub fn get_stream_type(frame_type: FrameType) -> StreamType {
    match frame_type {
        FrameType::RequestResponse => StreamType::RequestResponse,
        FrameType::RequestFnf => StreamType::FireAndForget,
        FrameType::RequestStream => StreamType::Stream,
        FrameType::RequestChannel => StreamType::Channel,
        other => panic!("frame type {:?} does not open a stream", other),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::request_response(FrameType::RequestResponse, StreamType::RequestResponse)]
    #[case::fnf(FrameType::RequestFnf, StreamType::FireAndForget)]
    #[case::stream(FrameType::RequestStream, StreamType::Stream)]
    #[case::channel(FrameType::RequestChannel, StreamType::Channel)]
    fn test_get_stream_type(#[case] frame_type: FrameType, #[case] expected: StreamType) {
        assert!(is_new_stream_frame(frame_type));
        assert_eq!(get_stream_type(frame_type), expected);
        assert_eq!(expected.opening_frame_type(), frame_type);
    }

    #[rstest]
    #[should_panic]
    fn test_get_stream_type_rejects_other_types(
        #[values(FrameType::Setup, FrameType::Lease, FrameType::Keepalive, FrameType::RequestN, FrameType::Cancel,
            FrameType::Payload, FrameType::Error, FrameType::MetadataPush, FrameType::Resume, FrameType::ResumeOk)]
        frame_type: FrameType,
    ) {
        assert!(!is_new_stream_frame(frame_type));
        get_stream_type(frame_type);
    }

    #[rstest]
    #[case::connection(0, false, false)]
    #[case::client(1, true, false)]
    #[case::server(2, false, true)]
    #[case::large_client(0x7fff_ffff, true, false)]
    fn test_stream_id_parity(#[case] id: u32, #[case] client: bool, #[case] server: bool) {
        let id = StreamId(id);
        assert_eq!(id.is_connection(), id.0 == 0);
        assert_eq!(id.is_client_initiated(), client);
        assert_eq!(id.is_server_initiated(), server);
    }

    #[test]
    fn test_header_drops_meaningless_flags() {
        let header = FrameHeader::new(FrameType::Cancel, FrameFlags::METADATA | FrameFlags::IGNORE, StreamId(3));
        assert_eq!(header.flags, FrameFlags::IGNORE);

        let header = FrameHeader::new(FrameType::Payload, FrameFlags::NEXT | FrameFlags::COMPLETE, StreamId(3));
        assert!(header.has(FrameFlags::NEXT));
        assert!(header.has(FrameFlags::COMPLETE));
    }

    #[test]
    fn test_frame_type_codes() {
        assert_eq!(u8::from(FrameType::Setup), 1);
        assert_eq!(u8::from(FrameType::ResumeOk), 0x0e);
        assert_eq!(FrameType::try_from(0x0au8).unwrap(), FrameType::Payload);
        assert!(FrameType::try_from(0u8).is_err());
        assert!(FrameType::try_from(0x3fu8).is_err());
    }
}
