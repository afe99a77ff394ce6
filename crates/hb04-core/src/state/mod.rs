//! Session state machine module.

pub mod machine;

pub use machine::{ConnectionState, SessionState};
