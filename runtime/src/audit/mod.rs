//! Append-only audit trail of batch outcomes.

pub mod logger;

pub use logger::{AuditEvent, AuditLogger};
