//! Recognising failures caused by the client going away.
//!
//! When the client disconnects mid-cycle there is nobody to resume the
//! request for. The manager still commits the failure but skips the
//! dispatch, and the detector logs it quietly on the
//! `webasync::disconnected_client` target instead of surfacing an error.

use std::io::ErrorKind;

use tracing::debug;

use crate::error::AsyncError;

/// Log target for disconnected-client records.
pub const DISCONNECTED_CLIENT_TARGET: &str = "webasync::disconnected_client";

const DEFAULT_PHRASES: [&str; 2] = ["broken pipe", "connection reset by peer"];

/// Decides whether a committed failure means the client is gone.
pub trait DisconnectDetector: Send + Sync {
    /// Return `true` (and log) when `error` is a client disconnect.
    fn check_and_log(&self, error: &AsyncError) -> bool;
}

/// Default detector: I/O error kinds plus well-known message phrases.
#[derive(Debug, Clone)]
pub struct DisconnectedClientDetector {
    phrases: Vec<String>,
}

impl Default for DisconnectedClientDetector {
    fn default() -> Self {
        Self {
            phrases: DEFAULT_PHRASES.iter().map(|p| (*p).to_string()).collect(),
        }
    }
}

impl DisconnectedClientDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also treat messages containing any of `phrases` as disconnects.
    #[must_use]
    pub fn with_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.phrases
            .extend(phrases.into_iter().map(|p| p.into().to_lowercase()));
        self
    }

    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Pure predicate, without logging.
    #[must_use]
    pub fn is_disconnect(&self, error: &AsyncError) -> bool {
        let message = match error {
            AsyncError::Io { kind, message } => {
                if matches!(
                    kind,
                    ErrorKind::BrokenPipe
                        | ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::UnexpectedEof
                ) {
                    return true;
                }
                message
            }
            AsyncError::Failed { message } => message,
            _ => return false,
        };
        let message = message.to_lowercase();
        self.phrases.iter().any(|p| message.contains(p.as_str()))
    }
}

impl DisconnectDetector for DisconnectedClientDetector {
    fn check_and_log(&self, error: &AsyncError) -> bool {
        if !self.is_disconnect(error) {
            return false;
        }
        debug!(
            target: DISCONNECTED_CLIENT_TARGET,
            error = %error,
            "Client disconnected; skipping dispatch"
        );
        true
    }
}
