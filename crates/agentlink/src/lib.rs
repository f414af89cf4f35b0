//! Multiplexed sessions and correlated control tasks over a single
//! byte connection.
//!
//! agentlink turns one bidirectional connection between an IDE and a
//! remote agent into any number of independent logical channels, with
//! an asynchronous request/response protocol on the control channel
//! for starting sessions and attaching debuggers.
//!
//! # Crate Structure
//!
//! - [`frame`] — Varint-delimited frame codec over raw byte streams
//! - [`mux`] — Channel multiplexing with per-channel stream pairs
//! - [`remote`] — Control protocol, session coordination, and the
//!   agent-side bootstrap

/// Re-export frame types.
pub mod frame {
    pub use agentlink_frame::*;
}

/// Re-export multiplexor types.
pub mod mux {
    pub use agentlink_mux::*;
}

/// Re-export control-protocol and session types.
pub mod remote {
    pub use agentlink_remote::*;
}
