//! Message sinks: where a session delivers what it receives.

use crate::application::error::ClientError;

/// One decoded `genltest` message, reply or notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub family_id: u16,
    pub cmd: u8,
    /// 0 for notifications.
    pub seq: u32,
    /// The MSG attribute, if the message carried one.
    pub msg: Option<String>,
}

/// Receives every message a socket decodes.
///
/// Called from the socket's receive path, once per frame. Implementations
/// must not block.
#[cfg_attr(test, mockall::automock)]
pub trait MessageSink: Send + Sync {
    fn on_message(&self, message: &ReceivedMessage);

    /// A frame could not be delivered. The session keeps running.
    fn on_error(&self, error: &ClientError);
}

/// Collects messages in memory. Used by tests and embedders that poll.
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: std::sync::Mutex<Vec<ReceivedMessage>>,
    errors: std::sync::Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the messages received so far.
    pub fn messages(&self) -> Vec<ReceivedMessage> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Returns the display text of every reported error.
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl MessageSink for CollectingSink {
    fn on_message(&self, message: &ReceivedMessage) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.clone());
        }
    }

    fn on_error(&self, error: &ClientError) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(error.to_string());
        }
    }
}
