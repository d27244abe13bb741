//! Application layer for the genltest service.
//!
//! Nothing here touches a socket or a file. The use cases depend on the
//! traits in [`transport`]; the infrastructure layer supplies the concrete
//! message bus.
//!
//! # Sub-modules
//!
//! - **`registry`**   – The family's register/unregister lifecycle and the
//!   immutable command and group tables.
//! - **`dispatcher`** – Parses, validates, and routes one inbound request to
//!   its handler.
//! - **`emitter`**    – Broadcasts a notification to a named group.
//! - **`echo`**       – The ECHO handler and the `genltest` family descriptor.
//! - **`handler`**    – The command-handler trait and its request type.
//! - **`transport`**  – Seams to the transport (naming, unicast, multicast).

pub mod dispatcher;
pub mod echo;
pub mod emitter;
pub mod handler;
pub mod registry;
pub mod transport;
