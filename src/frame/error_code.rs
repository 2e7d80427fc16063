use std::fmt::{Display, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Error codes carried by ERROR frames
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum ErrorCode {
    InvalidSetup = 0x001,
    UnsupportedSetup = 0x002,
    RejectedSetup = 0x003,
    RejectedResume = 0x004,
    ConnectionError = 0x101,
    ConnectionClose = 0x102,
    ApplicationError = 0x201,
    Rejected = 0x202,
    Canceled = 0x203,
    Invalid = 0x204,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 10] = [
        ErrorCode::InvalidSetup,
        ErrorCode::UnsupportedSetup,
        ErrorCode::RejectedSetup,
        ErrorCode::RejectedResume,
        ErrorCode::ConnectionError,
        ErrorCode::ConnectionClose,
        ErrorCode::ApplicationError,
        ErrorCode::Rejected,
        ErrorCode::Canceled,
        ErrorCode::Invalid,
    ];

    /// Connection scoped errors are sent on stream 0, all others on the affected stream
    pub fn is_connection_scoped(&self) -> bool {
        u32::from(*self) < 0x200
    }
}


/// An error reported by the peer in an ERROR frame
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerError {
    pub code: ErrorCode,
    pub message: String,
}

impl Display for PeerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for PeerError {}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::invalid_setup(ErrorCode::InvalidSetup, true)]
    #[case::unsupported_setup(ErrorCode::UnsupportedSetup, true)]
    #[case::rejected_setup(ErrorCode::RejectedSetup, true)]
    #[case::rejected_resume(ErrorCode::RejectedResume, true)]
    #[case::connection_error(ErrorCode::ConnectionError, true)]
    #[case::connection_close(ErrorCode::ConnectionClose, true)]
    #[case::application_error(ErrorCode::ApplicationError, false)]
    #[case::rejected(ErrorCode::Rejected, false)]
    #[case::canceled(ErrorCode::Canceled, false)]
    #[case::invalid(ErrorCode::Invalid, false)]
    fn test_scope(#[case] code: ErrorCode, #[case] connection_scoped: bool) {
        assert_eq!(code.is_connection_scoped(), connection_scoped);
        assert_eq!(ErrorCode::try_from(u32::from(code)).unwrap(), code);
    }

    #[test]
    fn test_unknown_code() {
        assert!(ErrorCode::try_from(0x300u32).is_err());
    }
}
