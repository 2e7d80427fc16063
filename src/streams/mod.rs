pub mod fragment_accumulator;
pub mod stream_registry;
pub mod stream_state_machine;
