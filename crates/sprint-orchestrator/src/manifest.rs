use std::path::Path;

use serde_yaml::{Mapping, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("sprint manifest not found at {0}")]
    Missing(String),
    #[error("sprint manifest at {path} is not valid YAML: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("sprint manifest missing 'development_status' mapping")]
    MissingDevelopmentStatus,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The sprint manifest: an external YAML document owned by the user's
/// tooling, read every cycle and mutated in place by `update_status`. The
/// raw document is kept so that a write-back preserves key order and any
/// sibling keys untouched by this engine.
pub struct SprintManifest {
    raw: Value,
    pub development_status: Vec<(String, String)>,
}

impl SprintManifest {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path_ref = path.as_ref();
        let text = std::fs::read_to_string(path_ref).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ManifestError::Missing(path_ref.display().to_string())
            } else {
                ManifestError::Io(err)
            }
        })?;
        let raw: Value = serde_yaml::from_str(&text).map_err(|source| ManifestError::Parse {
            path: path_ref.display().to_string(),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: Value) -> Result<Self, ManifestError> {
        let mapping = raw
            .get("development_status")
            .and_then(Value::as_mapping)
            .ok_or(ManifestError::MissingDevelopmentStatus)?;
        let development_status = mapping_to_pairs(mapping);
        Ok(Self {
            raw,
            development_status,
        })
    }

    #[cfg(test)]
    pub fn from_mapping(mapping: Mapping) -> Self {
        let mut root = Mapping::new();
        root.insert(Value::from("development_status"), Value::Mapping(mapping.clone()));
        Self {
            raw: Value::Mapping(root),
            development_status: mapping_to_pairs(&mapping),
        }
    }

    pub fn status_of(&self, story_key: &str) -> Option<&str> {
        self.development_status
            .iter()
            .find(|(k, _)| k == story_key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets `story_key`'s status, preserving key order, and returns the
    /// previous value (if the key existed).
    pub fn update_status(&mut self, story_key: &str, new_status: &str) -> Option<String> {
        let mapping = self
            .raw
            .as_mapping_mut()
            .and_then(|root| root.get_mut(&Value::from("development_status")))
            .and_then(Value::as_mapping_mut)
            .expect("development_status present, checked at construction");
        let key = Value::from(story_key);
        let old = mapping
            .insert(key, Value::from(new_status))
            .and_then(|v| v.as_str().map(str::to_string));

        if let Some(entry) = self
            .development_status
            .iter_mut()
            .find(|(k, _)| k == story_key)
        {
            entry.1 = new_status.to_string();
        } else {
            self.development_status
                .push((story_key.to_string(), new_status.to_string()));
        }
        old
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ManifestError> {
        let file = std::fs::File::create(path)?;
        serde_yaml::to_writer(file, &self.raw).map_err(|source| ManifestError::Parse {
            path: "<write>".to_string(),
            source,
        })
    }
}

fn mapping_to_pairs(mapping: &Mapping) -> Vec<(String, String)> {
    mapping
        .iter()
        .filter_map(|(k, v)| {
            let key = k.as_str()?.to_string();
            let value = v.as_str()?.to_string();
            Some((key, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_preserves_key_order_and_returns_old_status() {
        let mut map = Mapping::new();
        map.insert("1-1".into(), "backlog".into());
        map.insert("1-2".into(), "backlog".into());
        let mut manifest = SprintManifest::from_mapping(map);

        let old = manifest.update_status("1-1", "done");
        assert_eq!(old, Some("backlog".to_string()));
        assert_eq!(
            manifest.development_status,
            vec![
                ("1-1".to_string(), "done".to_string()),
                ("1-2".to_string(), "backlog".to_string()),
            ]
        );
    }

    #[test]
    fn read_missing_file_is_fatal() {
        let err = SprintManifest::read("/nonexistent/sprint-status.yaml").unwrap_err();
        assert!(matches!(err, ManifestError::Missing(_)));
    }

    #[test]
    fn round_trip_preserves_untouched_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sprint-status.yaml");
        std::fs::write(&path, "development_status:\n  1-1: backlog\n  1-2: review\n").unwrap();

        let mut manifest = SprintManifest::read(&path).unwrap();
        manifest.update_status("1-1", "done");
        manifest.write(&path).unwrap();

        let reloaded = SprintManifest::read(&path).unwrap();
        assert_eq!(reloaded.status_of("1-1"), Some("done"));
        assert_eq!(reloaded.status_of("1-2"), Some("review"));
    }
}
