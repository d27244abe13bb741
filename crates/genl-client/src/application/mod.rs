//! Application layer for the genltest client.
//!
//! # Sub-modules
//!
//! - **`session`**   – The two-session lifecycle: connect, resolve, join,
//!   request, listen, close.
//! - **`sink`**      – Where decoded messages are delivered.
//! - **`transport`** – The socket operations the session depends on.
//! - **`error`**     – [`error::ClientError`].

pub mod error;
pub mod session;
pub mod sink;
pub mod transport;
