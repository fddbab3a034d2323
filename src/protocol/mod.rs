//! Wire protocol: request framing, replies, and per-connection state
//! (§4.6 of the design).

pub mod connection;
pub mod frame;

pub use connection::{AuthState, Connection};
pub use frame::{read_frame, Frame, Reply, Request};
