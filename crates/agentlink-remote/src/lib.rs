//! Control-channel protocol and session coordination.
//!
//! Channel 0 of a multiplexed connection carries typed, correlated
//! request/response traffic: the IDE side runs a [`Sender`] (send a
//! task, get a future), the agent side runs a [`Responder`] (dispatch
//! tasks to handlers). On top of both sits the session protocol:
//! [`Connection::new_session`] allocates a fresh channel, announces it
//! over the control channel, and hands back a ready-to-use logical
//! stream pair once the remote side acknowledges.

pub mod agent;
pub mod control;
pub mod error;
pub mod responder;
pub mod sender;
pub mod session;

pub use agent::{Agent, AgentSession, SessionFactory};
pub use control::{AttachDebugger, Outcome, SessionParams, StartSession, TaskKind};
pub use error::{RemoteError, Result};
pub use responder::{Responder, ResponderBuilder};
pub use sender::{ResponseFuture, Sender};
pub use session::{
    open_connection, open_connection_with_config, Connection, SessionHandle, SessionState,
};
