use std::time::Duration;

use anyhow::bail;

use crate::frame::frames::{MAX_KEEPALIVE_TIME_MS, MAX_LIFETIME_MS};

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// interval between KEEPALIVE frames sent by a client, announced to the server in SETUP
    pub keepalive_interval: Duration,
    /// Announced to the server in SETUP. A disconnected resumable session is closed if it is not
    ///  resumed within this time.
    pub max_lifetime: Duration,

    /// number of bytes of sent frames retained for warm resumption
    pub resume_buffer_capacity: usize,

    /// Upper bound for frames queued while a connection is disconnected or resuming. Exceeding it
    ///  closes the connection.
    pub max_pending_output_frames: usize,

    /// Upper bound for the payload of a fragmented request. Exceeding it closes the connection.
    pub max_reassembled_payload_len: usize,

    pub metadata_mime_type: String,
    pub data_mime_type: String,
}

impl ConnectionConfig {
    pub fn new() -> ConnectionConfig {
        ConnectionConfig {
            keepalive_interval: Duration::from_secs(5),
            max_lifetime: Duration::from_secs(60),
            resume_buffer_capacity: 1024*1024,
            max_pending_output_frames: 4096,
            max_reassembled_payload_len: 16*1024*1024,
            metadata_mime_type: DEFAULT_MIME_TYPE.to_string(),
            data_mime_type: DEFAULT_MIME_TYPE.to_string(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.keepalive_interval.is_zero() || self.keepalive_interval.as_millis() > MAX_KEEPALIVE_TIME_MS as u128 {
            bail!("keepalive interval must be between 1ms and {}ms", MAX_KEEPALIVE_TIME_MS);
        }
        if self.max_lifetime.is_zero() || self.max_lifetime.as_millis() > MAX_LIFETIME_MS as u128 {
            bail!("max lifetime must be between 1ms and {}ms", MAX_LIFETIME_MS);
        }
        if self.max_pending_output_frames == 0 {
            bail!("max pending output frames must be positive");
        }
        for mime_type in [&self.metadata_mime_type, &self.data_mime_type] {
            if !mime_type.is_ascii() || mime_type.len() > u8::MAX as usize {
                bail!("mime type {:?} must be ASCII with at most 255 characters", mime_type);
            }
        }
        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[test]
    fn test_defaults_are_valid() {
        ConnectionConfig::new().validate().unwrap();
    }

    #[rstest]
    #[case::zero_keepalive(|c: &mut ConnectionConfig| c.keepalive_interval = Duration::ZERO)]
    #[case::huge_keepalive(|c: &mut ConnectionConfig| c.keepalive_interval = Duration::from_secs(30 * 24 * 3600))]
    #[case::zero_lifetime(|c: &mut ConnectionConfig| c.max_lifetime = Duration::ZERO)]
    #[case::no_pending_frames(|c: &mut ConnectionConfig| c.max_pending_output_frames = 0)]
    #[case::non_ascii_mime_type(|c: &mut ConnectionConfig| c.data_mime_type = "text/plän".to_string())]
    #[case::long_mime_type(|c: &mut ConnectionConfig| c.metadata_mime_type = "x".repeat(256))]
    fn test_invalid(#[case] modify: fn(&mut ConnectionConfig)) {
        let mut config = ConnectionConfig::new();
        modify(&mut config);
        assert!(config.validate().is_err());
    }
}
