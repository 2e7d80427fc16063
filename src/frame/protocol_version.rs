use std::fmt::{Debug, Display, Formatter};

use bytes::Bytes;
use rand::RngCore;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const V0_1: ProtocolVersion = ProtocolVersion::new(0, 1);
    pub const V1_0: ProtocolVersion = ProtocolVersion::new(1, 0);
    pub const LATEST: ProtocolVersion = ProtocolVersion::V1_0;

    pub const fn new(major: u16, minor: u16) -> ProtocolVersion {
        ProtocolVersion { major, minor }
    }
}

impl Display for ProtocolVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}


/// Byte offset into a connection's stream of resumable frames
pub type ResumePosition = u64;


/// Opaque token identifying a resumable session across transports
#[derive(Clone, Eq, PartialEq, Hash, Default)]
pub struct ResumeToken(pub Bytes);

impl ResumeToken {
    pub const DEFAULT_LEN: usize = 16;

    pub fn generate() -> ResumeToken {
        let mut buf = vec![0u8; Self::DEFAULT_LEN];
        rand::thread_rng().fill_bytes(&mut buf);
        ResumeToken(buf.into())
    }

    pub fn empty() -> ResumeToken {
        Default::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Display for ResumeToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl Debug for ResumeToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResumeToken({})", self)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_display_and_order() {
        assert_eq!(ProtocolVersion::V1_0.to_string(), "1.0");
        assert!(ProtocolVersion::V0_1 < ProtocolVersion::V1_0);
    }

    #[test]
    fn test_generated_tokens() {
        let a = ResumeToken::generate();
        let b = ResumeToken::generate();
        assert_eq!(a.len(), ResumeToken::DEFAULT_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_token_display() {
        let token = ResumeToken(Bytes::from_static(&[0x01, 0xab]));
        assert_eq!(token.to_string(), "01ab");
    }
}
