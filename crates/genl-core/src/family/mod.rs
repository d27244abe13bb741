//! Family schemas shared by both ends of the protocol.
//!
//! - [`genltest`]: the application family (ECHO command, MSG attribute, `mcgrp` group).
//! - [`ctrl`]: the controller family used to resolve names to runtime ids.

pub mod ctrl;
pub mod genltest;
