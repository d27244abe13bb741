//! Infrastructure layer for the client application.
//!
//! Contains the Unix-socket transport that implements the application
//! layer's `GenlTransport` seam, and the client settings.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `genl_core`, but MUST NOT be imported by the `application` layer.

pub mod config;
pub mod socket;
