use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use sprint_types::Settings;
use tokio::sync::RwLock;

use crate::error::SettingsError;

/// Lazily-loaded, validated, persisted configuration singleton.
///
/// The path is a constructor dependency rather than a process-global so
/// tests can point multiple stores at distinct temp files concurrently.
pub struct SettingsStore {
    path: PathBuf,
    inner: RwLock<Settings>,
}

impl SettingsStore {
    /// Load settings from `path`, falling back to defaults (with a warning)
    /// if the file is missing, unreadable, or not valid JSON.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Settings>(&bytes) {
                Ok(settings) => settings,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to parse settings, using defaults");
                    Settings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Settings::default(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to read settings, using defaults");
                Settings::default()
            }
        };
        Self {
            path,
            inner: RwLock::new(settings),
        }
    }

    pub async fn get(&self) -> Settings {
        *self.inner.read().await
    }

    /// Apply a partial update. Validates every supplied key before applying
    /// any of them: an update touching one unknown key changes nothing.
    pub async fn update(&self, patch: &Map<String, Value>) -> Result<Settings, SettingsError> {
        for key in patch.keys() {
            if !Settings::field_names().contains(&key.as_str()) {
                return Err(SettingsError::UnknownField(key.clone()));
            }
        }

        let mut candidate = *self.inner.read().await;
        for (key, value) in patch {
            apply_field(&mut candidate, key, value)?;
        }
        validate(&candidate)?;

        self.persist(&candidate).await?;
        *self.inner.write().await = candidate;
        Ok(candidate)
    }

    pub async fn reset(&self) -> Result<Settings, SettingsError> {
        let defaults = Settings::default();
        self.persist(&defaults).await?;
        *self.inner.write().await = defaults;
        Ok(defaults)
    }

    async fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(SettingsError::Persist)?;
        }
        let bytes = serde_json::to_vec_pretty(settings).expect("Settings always serializes");
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(SettingsError::Persist)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn apply_field(settings: &mut Settings, key: &str, value: &Value) -> Result<(), SettingsError> {
    let int = value
        .as_i64()
        .ok_or_else(|| SettingsError::InvalidValue {
            field: field_static(key),
            reason: "must be an integer".to_string(),
        })?;

    match key {
        "project_context_max_age_hours" => settings.project_context_max_age_hours = int,
        "injection_warning_kb" => settings.injection_warning_kb = int,
        "injection_error_kb" => settings.injection_error_kb = int,
        "default_max_cycles" => settings.default_max_cycles = int,
        "max_code_review_attempts" => settings.max_code_review_attempts = int,
        "haiku_after_review" => settings.haiku_after_review = int,
        "server_port" => settings.server_port = int,
        "websocket_heartbeat_seconds" => settings.websocket_heartbeat_seconds = int,
        "default_batch_list_limit" => settings.default_batch_list_limit = int,
        other => return Err(SettingsError::UnknownField(other.to_string())),
    }
    Ok(())
}

fn field_static(key: &str) -> &'static str {
    Settings::field_names()
        .iter()
        .find(|&&f| f == key)
        .copied()
        .unwrap_or("unknown")
}

fn validate(settings: &Settings) -> Result<(), SettingsError> {
    let checks: &[(&'static str, i64, i64, i64)] = &[
        ("project_context_max_age_hours", settings.project_context_max_age_hours, 0, i64::MAX),
        ("injection_warning_kb", settings.injection_warning_kb, 1, i64::MAX),
        ("injection_error_kb", settings.injection_error_kb, 1, i64::MAX),
        ("default_max_cycles", settings.default_max_cycles, 0, i64::MAX),
        ("max_code_review_attempts", settings.max_code_review_attempts, 0, i64::MAX),
        ("haiku_after_review", settings.haiku_after_review, 0, i64::MAX),
        ("server_port", settings.server_port, 1, 65535),
        ("websocket_heartbeat_seconds", settings.websocket_heartbeat_seconds, 0, i64::MAX),
        ("default_batch_list_limit", settings.default_batch_list_limit, 0, i64::MAX),
    ];
    for (field, value, min, max) in checks {
        if value < min || value > max {
            return Err(SettingsError::InvalidValue {
                field,
                reason: format!("must be between {min} and {max}"),
            });
        }
    }
    if settings.injection_warning_kb >= settings.injection_error_kb {
        return Err(SettingsError::InvalidValue {
            field: "injection_error_kb",
            reason: "must be greater than injection_warning_kb".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_path() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("sprint-settings-test-{}.json", uuid_like()));
        p
    }

    fn uuid_like() -> String {
        format!("{:x}", std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos())
    }

    #[tokio::test]
    async fn loads_defaults_when_file_missing() {
        let store = SettingsStore::load(temp_path()).await;
        assert_eq!(store.get().await, Settings::default());
    }

    #[tokio::test]
    async fn update_round_trips_and_persists() {
        let path = temp_path();
        let store = SettingsStore::load(&path).await;
        let updated = store
            .update(&json!({"server_port": 9090}).as_object().unwrap().clone())
            .await
            .unwrap();
        assert_eq!(updated.server_port, 9090);

        let reloaded = SettingsStore::load(&path).await;
        assert_eq!(reloaded.get().await.server_port, 9090);
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn unknown_key_rejects_whole_update() {
        let store = SettingsStore::load(temp_path()).await;
        let before = store.get().await;
        let err = store
            .update(&json!({"server_port": 9090, "bogus_field": 1}).as_object().unwrap().clone())
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::UnknownField(_)));
        assert_eq!(store.get().await, before);
    }

    #[tokio::test]
    async fn rejects_warning_not_less_than_error() {
        let store = SettingsStore::load(temp_path()).await;
        let err = store
            .update(&json!({"injection_warning_kb": 200, "injection_error_kb": 150}).as_object().unwrap().clone())
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { field: "injection_error_kb", .. }));
    }

    #[tokio::test]
    async fn rejects_server_port_out_of_range() {
        let store = SettingsStore::load(temp_path()).await;
        let err = store
            .update(&json!({"server_port": 70000}).as_object().unwrap().clone())
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { field: "server_port", .. }));
    }

    #[tokio::test]
    async fn reset_restores_defaults() {
        let store = SettingsStore::load(temp_path()).await;
        store
            .update(&json!({"server_port": 1234}).as_object().unwrap().clone())
            .await
            .unwrap();
        let reset = store.reset().await.unwrap();
        assert_eq!(reset, Settings::default());
    }
}
