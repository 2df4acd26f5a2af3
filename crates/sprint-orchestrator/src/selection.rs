use regex::Regex;
use std::sync::OnceLock;

use crate::manifest::SprintManifest;

fn epic_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+[a-z]?(?:-[a-z]+)?)-\d+").unwrap())
}

fn sort_key_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)([a-z]?(?:-[a-z]+)?)-(\d+)").unwrap())
}

/// Derives the epic prefix shared by stories that may be paired in a cycle.
/// `epic_id("2a-1") == "2a"`, `epic_id("5-sr-3") == "5-sr"`.
pub fn epic_id(story_key: &str) -> String {
    if let Some(caps) = epic_pattern().captures(story_key) {
        return caps[1].to_string();
    }
    match story_key.rsplit_once('-') {
        Some((prefix, _)) => prefix.to_string(),
        None => story_key.to_string(),
    }
}

/// Total, stable ordering key: `(major, suffix, minor)`. Unparseable keys
/// sort after every parseable key.
pub fn story_sort_key(story_key: &str) -> (u64, String, u64) {
    match sort_key_pattern().captures(story_key) {
        Some(caps) => {
            let major: u64 = caps[1].parse().unwrap_or(u64::MAX);
            let suffix = caps[2].to_string();
            let minor: u64 = caps[3].parse().unwrap_or(u64::MAX);
            (major, suffix, minor)
        }
        None => (u64::MAX, String::new(), u64::MAX),
    }
}

/// Reads the manifest's `development_status` mapping, drops epics/
/// retrospectives/terminal stories, and returns either `[s0]` or
/// `[s0, s_same_epic]` when a later story shares `s0`'s epic. Empty means
/// no selectable work remains.
pub fn select_stories(manifest: &SprintManifest) -> Vec<String> {
    let mut candidates: Vec<String> = manifest
        .development_status
        .iter()
        .filter(|(key, status)| {
            !key.starts_with("epic-")
                && !key.ends_with("-retrospective")
                && *status != "done"
                && *status != "blocked"
        })
        .map(|(key, _)| key.clone())
        .collect();

    candidates.sort_by_key(|k| story_sort_key(k));

    let Some(first) = candidates.first().cloned() else {
        return Vec::new();
    };
    let first_epic = epic_id(&first);
    let paired = candidates
        .iter()
        .skip(1)
        .find(|key| epic_id(key) == first_epic)
        .cloned();

    match paired {
        Some(second) => vec![first, second],
        None => vec![first],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_of(pairs: &[(&str, &str)]) -> SprintManifest {
        let mut map = serde_yaml::Mapping::new();
        for (k, v) in pairs {
            map.insert((*k).into(), (*v).into());
        }
        SprintManifest::from_mapping(map)
    }

    #[test]
    fn epic_extraction_examples() {
        assert_eq!(epic_id("2a-1"), "2a");
        assert_eq!(epic_id("5-sr-3"), "5-sr");
        assert_eq!(epic_id("2a-1-session-scanner"), "2a");
        assert_eq!(epic_id("5-sr-3-python-orchestrator"), "5-sr");
    }

    #[test]
    fn epic_id_is_idempotent_under_suffix_append() {
        for key in ["2a-1", "5-sr-3", "1-1"] {
            let suffixed = format!("{key}-suffix");
            assert_eq!(epic_id(key), epic_id(&suffixed));
        }
    }

    #[test]
    fn unparseable_keys_sort_last() {
        let mut keys = vec!["zzz", "1-1", "2a-3"];
        keys.sort_by_key(|k| story_sort_key(k));
        assert_eq!(keys, vec!["1-1", "2a-3", "zzz"]);
    }

    #[test]
    fn scenario_pairing_same_epic() {
        let manifest = manifest_of(&[
            ("epic-1", "in-progress"),
            ("1-1", "done"),
            ("1-2", "ready-for-dev"),
            ("1-3", "backlog"),
        ]);
        assert_eq!(select_stories(&manifest), vec!["1-2", "1-3"]);
    }

    #[test]
    fn scenario_single_story_different_epic() {
        let manifest = manifest_of(&[("1-1", "backlog"), ("2a-1", "backlog")]);
        assert_eq!(select_stories(&manifest), vec!["1-1"]);
    }

    #[test]
    fn scenario_all_terminal_selects_nothing() {
        let manifest = manifest_of(&[("1-1", "done"), ("1-2", "blocked")]);
        assert!(select_stories(&manifest).is_empty());
    }
}
