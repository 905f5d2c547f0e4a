//! Timestamped events for whoever is presenting the run.
//!
//! The stream is an observation side-channel: dropping the receiver never
//! affects the run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventLevel::Debug => "DEBUG",
            EventLevel::Info => "INFO",
            EventLevel::Warn => "WARN",
            EventLevel::Error => "ERROR",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:<5} {}",
            self.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Sending half of the event stream. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<Event>>,
}

impl EventSink {
    /// A sink with a receiver for the presentation layer.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that only mirrors to `tracing`.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, level: EventLevel, message: impl Into<String>) {
        let message = message.into();
        debug!(target: "sponsor_catcher::events", "{} {}", level, message);
        if let Some(ref tx) = self.tx {
            let _ = tx.send(Event {
                timestamp: Utc::now(),
                level,
                message,
            });
        }
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.emit(EventLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(EventLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(EventLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(EventLevel::Error, message);
    }
}
