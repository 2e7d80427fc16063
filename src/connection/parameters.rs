use std::time::Duration;

use crate::connection::connection_config::ConnectionConfig;
use crate::frame::frame_header::FrameFlags;
use crate::frame::frames::{FrameResume, FrameSetup};
use crate::frame::payload::Payload;
use crate::frame::protocol_version::{ProtocolVersion, ResumePosition, ResumeToken};

/// The contents of a SETUP frame
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SetupParameters {
    pub version: ProtocolVersion,
    pub keepalive_interval: Duration,
    pub max_lifetime: Duration,
    pub resumable: bool,
    pub token: ResumeToken,
    pub lease: bool,
    pub metadata_mime_type: String,
    pub data_mime_type: String,
    pub payload: Payload,
}

impl SetupParameters {
    pub fn new(config: &ConnectionConfig, payload: Payload) -> SetupParameters {
        SetupParameters {
            version: ProtocolVersion::LATEST,
            keepalive_interval: config.keepalive_interval,
            max_lifetime: config.max_lifetime,
            resumable: false,
            token: ResumeToken::empty(),
            lease: false,
            metadata_mime_type: config.metadata_mime_type.clone(),
            data_mime_type: config.data_mime_type.clone(),
            payload,
        }
    }

    /// makes the session resumable with a freshly generated token
    pub fn resumable(self) -> SetupParameters {
        self.resumable_with_token(ResumeToken::generate())
    }

    pub fn resumable_with_token(self, token: ResumeToken) -> SetupParameters {
        SetupParameters {
            resumable: true,
            token,
            ..self
        }
    }

    pub fn to_frame(&self) -> FrameSetup {
        let mut flags = FrameFlags::empty();
        if self.resumable {
            flags |= FrameFlags::RESUME_ENABLE;
        }
        if self.lease {
            flags |= FrameFlags::LEASE;
        }

        FrameSetup::new(
            flags,
            self.version,
            self.keepalive_interval.as_millis().min(u32::MAX as u128) as u32,
            self.max_lifetime.as_millis().min(u32::MAX as u128) as u32,
            self.token.clone(),
            self.metadata_mime_type.clone(),
            self.data_mime_type.clone(),
            self.payload.clone(),
        )
    }

    pub fn from_frame(frame: FrameSetup) -> SetupParameters {
        SetupParameters {
            version: frame.version,
            keepalive_interval: Duration::from_millis(frame.keepalive_time_ms as u64),
            max_lifetime: Duration::from_millis(frame.max_lifetime_ms as u64),
            resumable: frame.is_resumable(),
            lease: frame.requires_lease(),
            token: frame.token,
            metadata_mime_type: frame.metadata_mime_type,
            data_mime_type: frame.data_mime_type,
            payload: frame.payload,
        }
    }
}


/// The contents of a RESUME frame
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResumeParameters {
    pub version: ProtocolVersion,
    pub token: ResumeToken,
    /// how far the client received resumable frames from the server
    pub server_position: ResumePosition,
    /// the first position from which the client can replay its own frames
    pub client_position: ResumePosition,
}

impl ResumeParameters {
    pub fn from_frame(frame: FrameResume) -> ResumeParameters {
        ResumeParameters {
            version: frame.version,
            token: frame.token,
            server_position: frame.last_received_server_position,
            client_position: frame.first_client_position,
        }
    }

    pub fn to_frame(&self) -> FrameResume {
        FrameResume::new(self.version, self.token.clone(), self.server_position, self.client_position)
    }
}
