use serde::{Deserialize, Serialize};

/// Typed, flat configuration record. Every field is an unsigned integer with
/// its own validation bound; see `sprint_core::settings_store` for the
/// validated, persisted singleton built on top of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub project_context_max_age_hours: i64,
    pub injection_warning_kb: i64,
    pub injection_error_kb: i64,
    pub default_max_cycles: i64,
    pub max_code_review_attempts: i64,
    pub haiku_after_review: i64,
    pub server_port: i64,
    pub websocket_heartbeat_seconds: i64,
    pub default_batch_list_limit: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_context_max_age_hours: 24,
            injection_warning_kb: 100,
            injection_error_kb: 150,
            default_max_cycles: 2,
            max_code_review_attempts: 10,
            haiku_after_review: 2,
            server_port: 8080,
            websocket_heartbeat_seconds: 30,
            default_batch_list_limit: 20,
        }
    }
}

impl Settings {
    pub fn injection_warning_bytes(&self) -> u64 {
        (self.injection_warning_kb * 1024) as u64
    }

    pub fn injection_error_bytes(&self) -> u64 {
        (self.injection_error_kb * 1024) as u64
    }

    /// Every field name this struct accepts through a partial update.
    pub fn field_names() -> &'static [&'static str] {
        &[
            "project_context_max_age_hours",
            "injection_warning_kb",
            "injection_error_kb",
            "default_max_cycles",
            "max_code_review_attempts",
            "haiku_after_review",
            "server_port",
            "websocket_heartbeat_seconds",
            "default_batch_list_limit",
        ]
    }
}
