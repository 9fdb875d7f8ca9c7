//! User-facing reporting.
//!
//! [`Reporter`] is the host's warning channel. Message areas are not
//! guaranteed to refresh on their own, so every warning is followed by a
//! redraw request. [`BuildReport`] records what the last regeneration of a
//! root produced.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Prefix of every regeneration failure shown to the user.
pub const REGENERATE_FAILED: &str = "Failed to regenerate BlendQuery object";

/// Prefix of the message shown when the kernel cannot be imported.
pub const INSTALL_FAILED: &str = "Failed to import BlendQuery dependencies";

/// Non-blocking warning channel provided by the host.
pub trait Reporter {
    fn warn(&mut self, message: &str);

    /// Force message/log areas to redraw.
    fn request_redraw(&mut self);
}

/// Reporter that writes to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn warn(&mut self, message: &str) {
        log::warn!("{}", message);
    }

    fn request_redraw(&mut self) {
        log::trace!("Redraw requested");
    }
}

/// Hex SHA-256 of a script's source text.
pub fn script_digest(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Outcome of one regeneration of one root.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    /// Digest of the script text as read when the job started.
    pub script_digest: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Number of host objects created.
    pub object_count: usize,
    /// User-facing failure text, if the regeneration failed.
    pub failure: Option<String>,
}

impl BuildReport {
    pub fn new(
        script_digest: String,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        object_count: usize,
        failure: Option<String>,
    ) -> Self {
        Self {
            script_digest,
            started_at,
            finished_at: Utc::now(),
            duration_ms: elapsed.as_millis() as u64,
            object_count,
            failure,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_hex() {
        let a = script_digest("let a = 1;");
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, script_digest("let a = 1;"));
        assert_ne!(a, script_digest("let a = 2;"));
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = BuildReport::new(
            script_digest(""),
            Utc::now(),
            Duration::from_millis(12),
            3,
            None,
        );
        assert!(report.succeeded());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["objectCount"], 3);
        assert_eq!(json["durationMs"], 12);
        assert!(json["startedAt"].is_string());
    }
}
