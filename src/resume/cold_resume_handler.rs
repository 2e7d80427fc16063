use std::sync::Arc;

#[cfg(test)] use mockall::automock;

use crate::resume::resume_manager::StreamResumeInfo;
use crate::streams::stream_state_machine::{StreamStateMachine, StreamsWriter};

/// Recreates stream handles from persisted [StreamResumeInfo]s when a session is resumed by a
///  process that has no live stream objects for it (cold resumption).
#[cfg_attr(test, automock)]
pub trait ColdResumeHandler: Send + Sync {
    /// `None` drops the stream: it is not registered and receives no further frames
    fn resume_stream(&self, info: &StreamResumeInfo, writer: Arc<dyn StreamsWriter>) -> Option<Arc<dyn StreamStateMachine>>;
}
