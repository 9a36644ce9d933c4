//! Structured audit logging for selector table changes.
//!
//! Every change to hardware-visible selector state (group lifecycle, member
//! placement, fallback, HA restart phases) is emitted as an [`AuditRecord`]
//! through [`audit_log!`]. Records serialize to JSON so they can be shipped
//! to a log collector and correlated with the MoveList batches that the
//! programming layer consumed.
//!
//! Plain operational logging goes through the thin `debug_log!`,
//! `info_log!`, `warn_log!` and `error_log!` wrappers, which tag every
//! event with a `source` field.
//!
//! | Level | Usage |
//! |-------|-------|
//! | Error | Failed operations, aborted restart passes |
//! | Warn  | Rollbacks, HA cleanup of hardware-only groups |
//! | Info  | Group lifecycle and audit success records |
//! | Debug | Per-slot packing decisions |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audit event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Table creation and configuration
    ConfigurationChange,
    /// Group create / destroy / resize
    GroupLifecycle,
    /// Member add / delete / enable / disable
    MembershipChange,
    /// Table fallback member changes
    FallbackChange,
    /// Match-entry reference attach / detach
    ReferenceChange,
    /// HA restart phases (decode, replay, reconcile)
    WarmRestart,
    /// Error and failure events
    ErrorCondition,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::ConfigurationChange => write!(f, "CONFIGURATION_CHANGE"),
            AuditCategory::GroupLifecycle => write!(f, "GROUP_LIFECYCLE"),
            AuditCategory::MembershipChange => write!(f, "MEMBERSHIP_CHANGE"),
            AuditCategory::FallbackChange => write!(f, "FALLBACK_CHANGE"),
            AuditCategory::ReferenceChange => write!(f, "REFERENCE_CHANGE"),
            AuditCategory::WarmRestart => write!(f, "WARM_RESTART"),
            AuditCategory::ErrorCondition => write!(f, "ERROR_CONDITION"),
        }
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    InProgress,
    /// Rejected before any state changed (e.g. references still exist)
    Denied,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
            AuditOutcome::Denied => write!(f, "denied"),
        }
    }
}

/// Structured audit record.
///
/// Built with the `with_*` methods and handed to [`audit_log!`]. The
/// timestamp is captured at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,

    pub category: AuditCategory,

    /// Component generating the event (e.g. "SelTable", "SelHaLlp")
    pub source: String,

    pub action: String,

    pub outcome: AuditOutcome,

    /// Object identifier, usually a group or member handle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    /// Examples: "sel_group", "sel_member", "sel_table"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Session that issued the call, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<u32>,
}

impl AuditRecord {
    /// Creates a record with the current timestamp. The outcome defaults to
    /// `InProgress` until set.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            object_id: None,
            object_type: None,
            details: None,
            error: None,
            session: None,
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_object_id(mut self, id: impl Into<String>) -> Self {
        self.object_id = Some(id.into());
        self
    }

    pub fn with_object_type(mut self, obj_type: impl Into<String>) -> Self {
        self.object_type = Some(obj_type.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Sets the error message and marks the outcome as Failure.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    pub fn with_session(mut self, session: u32) -> Self {
        self.session = Some(session);
        self
    }

    /// Serializes the record to a JSON line.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Debug-level logging with a `source` tag.
///
/// ```ignore
/// debug_log!("SelPacking", word = 2, slot = 7, "placed member");
/// ```
#[macro_export]
macro_rules! debug_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::debug!(
            source = $source,
            $($arg)*
        )
    };
}

/// Info-level logging with a `source` tag.
#[macro_export]
macro_rules! info_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::info!(
            source = $source,
            $($arg)*
        )
    };
}

/// Warn-level logging with a `source` tag.
#[macro_export]
macro_rules! warn_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::warn!(
            source = $source,
            $($arg)*
        )
    };
}

/// Error-level logging with a `source` tag.
#[macro_export]
macro_rules! error_log {
    ($source:expr, $($arg:tt)*) => {
        tracing::error!(
            source = $source,
            $($arg)*
        )
    };
}

/// Emits an [`AuditRecord`] on the `audit` target.
///
/// Success is logged at info, InProgress at debug, Failure and Denied at warn.
///
/// ```ignore
/// let record = AuditRecord::new(AuditCategory::GroupLifecycle, "SelTable", "group_create")
///     .with_outcome(AuditOutcome::Success)
///     .with_object_id("0x4")
///     .with_object_type("sel_group");
/// audit_log!(record);
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::Failure | $crate::audit::AuditOutcome::Denied => {
                tracing::warn!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    error = record.error.as_deref().unwrap_or(""),
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_record_creation() {
        let record = AuditRecord::new(AuditCategory::GroupLifecycle, "SelTable", "group_create")
            .with_outcome(AuditOutcome::Success)
            .with_object_id("0x4")
            .with_object_type("sel_group")
            .with_session(7);

        assert_eq!(record.category, AuditCategory::GroupLifecycle);
        assert_eq!(record.source, "SelTable");
        assert_eq!(record.outcome, AuditOutcome::Success);
        assert_eq!(record.object_id, Some("0x4".to_string()));
        assert_eq!(record.session, Some(7));
    }

    #[test]
    fn test_audit_record_with_error() {
        let record = AuditRecord::new(AuditCategory::MembershipChange, "SelTable", "member_add")
            .with_error("No space: group 0x4");
        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(record.error.as_deref(), Some("No space: group 0x4"));
    }

    #[test]
    fn test_audit_record_json() {
        let record = AuditRecord::new(AuditCategory::WarmRestart, "SelHaHlp", "reconcile")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({ "matched": 3 }));
        let json = record.to_json();
        assert!(json.contains("\"category\":\"WARM_RESTART\""));
        assert!(json.contains("\"outcome\":\"success\""));
        assert!(json.contains("\"matched\":3"));
        assert!(!json.contains("object_id"));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(AuditCategory::FallbackChange.to_string(), "FALLBACK_CHANGE");
        assert_eq!(AuditOutcome::Denied.to_string(), "denied");
    }
}
