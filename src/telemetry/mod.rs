//! Audit trail for censorship decisions.
//!
//! Every intended censorship outcome (a blocked query, a hijacked name, a
//! reset connection, an installed firewall policy) is logged as a structured
//! event to syslog with the `CENSORBOX` tag, so a measurement run can later be
//! matched against what the appliance actually did.
//!
//! # Architecture
//!
//! - **Audit logging** (syslog): censorship decisions, one JSON line each
//! - **Debug logging** (tracing): development logs to stderr via `tracing`
//! - These are separate concerns; the proxies emit both
//!
//! # Event Format
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"dns_block","name":"mia-ps.ooni.io.","keyword":"ooni.io","tag":"run-42"}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, FirewallAction};
pub use self::syslog::{AuditLogger, SYSLOG_TAG};
