//! Syslog integration for audit logging.

use std::sync::Mutex;

use syslog::{Facility, Formatter3164};
use tracing::{debug, error};

use super::error::TelemetryError;
use super::events::AuditEvent;

/// Syslog tag for all audit events.
pub const SYSLOG_TAG: &str = "CENSORBOX";

/// Audit logger that writes structured JSON events to syslog.
///
/// Shared between all proxies behind an `Arc`; the writer sits behind a
/// mutex because syslog writes need `&mut`.
pub struct AuditLogger {
    /// Syslog writer. None indicates a null logger.
    writer: Option<Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>>,
    /// Run tag attached to every event, if any.
    tag: Option<String>,
}

impl AuditLogger {
    /// Create a new audit logger connected to the local syslog daemon.
    pub fn new() -> Result<Self, TelemetryError> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: SYSLOG_TAG.to_string(),
            pid: std::process::id(),
        };

        let writer = syslog::unix(formatter)
            .map_err(|e| TelemetryError::SyslogConnection(e.to_string()))?;

        debug!("Connected to syslog with tag '{}'", SYSLOG_TAG);
        Ok(Self {
            writer: Some(Mutex::new(writer)),
            tag: None,
        })
    }

    /// Create a null audit logger that discards all events.
    pub fn new_null() -> Self {
        Self {
            writer: None,
            tag: None,
        }
    }

    /// Attach a run tag to every subsequent event.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        self.tag = (!tag.is_empty()).then_some(tag);
        self
    }

    /// Log an audit event.
    ///
    /// The event is serialized to JSON with an ISO8601 timestamp. A null
    /// logger discards it.
    pub fn log(&self, event: AuditEvent) {
        let Some(ref writer) = self.writer else {
            return;
        };

        #[derive(serde::Serialize)]
        struct Tagged<'a, T> {
            #[serde(flatten)]
            inner: T,
            #[serde(skip_serializing_if = "Option::is_none")]
            tag: Option<&'a str>,
        }

        let tagged = Tagged {
            inner: event.with_timestamp(),
            tag: self.tag.as_deref(),
        };

        match serde_json::to_string(&tagged) {
            Ok(json) => {
                match writer.lock() {
                    Ok(mut writer) => {
                        if let Err(e) = writer.info(&json) {
                            error!("Failed to write to syslog: {}", e);
                        }
                    }
                    Err(e) => {
                        error!("Failed to acquire syslog writer lock: {}", e);
                    }
                }
                debug!("Logged audit event: {}", json);
            }
            Err(e) => {
                error!("Failed to serialize audit event: {}", e);
            }
        }
    }

    /// Check if this is a null logger.
    pub fn is_null(&self) -> bool {
        self.writer.is_none()
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("null", &self.is_null())
            .field("tag", &self.tag)
            .finish()
    }
}
