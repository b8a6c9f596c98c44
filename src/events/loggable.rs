use serde::{Deserialize, Serialize};

/// Severity levels for the security audit trail.
/// Controls retention policies and log filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Grant changes and deletions: long-term retention, never auto-delete
    Critical,
    /// Record creation (default)
    Important,
    /// Noise events: aggressively trimmed
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Important
    }
}

/// Trait for security records that are written to the audit trail.
pub trait Loggable: Serialize + Send + Sync {
    /// The entity type name (e.g., "permission", "role_grant").
    /// This becomes the prefix in event names like "permission.created"
    fn entity_type() -> &'static str;

    /// Human readable identity of the record (names are unique in this model)
    fn subject(&self) -> String;

    /// Severity level for logs (defaults to Important)
    fn severity(&self) -> Severity {
        Severity::Important
    }

    /// Override severity based on action (e.g., "deleted" -> Critical)
    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "granted" | "revoked" => Severity::Critical,
            "created" => self.severity(),
            _ => Severity::Important,
        }
    }
}
