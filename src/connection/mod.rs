//! The per-connection state machine and everything that runs it: the driver task that owns it,
//!  the handle through which all other code talks to it, keepalive and the server side acceptor.

pub mod acceptor;
pub mod connection_config;
pub mod connection_events;
pub mod connection_set;
pub mod driver;
pub mod handle;
pub mod keepalive_timer;
pub mod parameters;
pub mod state_machine;
