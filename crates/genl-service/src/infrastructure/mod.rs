//! Infrastructure layer for the genltest service.
//!
//! Contains the OS-facing adapters: the in-process message bus that plays
//! the kernel transport, the Unix sockets clients and the trigger connect
//! to, the TOML config file, and the host that wires them together.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `genl_core`, but MUST NOT be imported by the `application` layer.

pub mod bus;
pub mod config;
pub mod host;
pub mod listener;
pub mod trigger;
