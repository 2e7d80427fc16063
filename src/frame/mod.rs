pub mod error_code;
pub mod frame_header;
pub mod frames;
pub mod payload;
pub mod protocol_version;
