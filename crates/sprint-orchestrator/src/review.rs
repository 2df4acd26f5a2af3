/// The five severities a code-review subagent can report, plus `Unknown`
/// for output that names none of the recognized markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Zero,
    Low,
    Medium,
    High,
    Critical,
    Unknown,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Zero => "ZERO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

/// Scans review output for `ZERO ISSUES` first, then the highest severity
/// word found as a substring, checked in the fixed order
/// CRITICAL > HIGH > MEDIUM > LOW. Output naming none of these is `Unknown`.
pub fn parse_highest_severity(review_output: &str) -> Severity {
    let upper = review_output.to_uppercase();
    if upper.contains("ZERO ISSUES") {
        return Severity::Zero;
    }
    if upper.contains("HIGHEST SEVERITY: CRITICAL") {
        return Severity::Critical;
    }
    if upper.contains("HIGHEST SEVERITY: HIGH") {
        return Severity::High;
    }
    if upper.contains("HIGHEST SEVERITY: MEDIUM") {
        return Severity::Medium;
    }
    if upper.contains("HIGHEST SEVERITY: LOW") {
        return Severity::Low;
    }
    Severity::Unknown
}

/// True when the last three recorded severities are identical and at least
/// three reviews have run, signalling a stuck review loop.
pub fn same_errors_3x(history: &[Severity]) -> bool {
    if history.len() < 3 {
        return false;
    }
    let n = history.len();
    history[n - 1] == history[n - 2] && history[n - 2] == history[n - 3]
}

pub fn has_critical_marker(review_output: &str) -> bool {
    let upper = review_output.to_uppercase();
    upper.contains("HIGHEST SEVERITY: CRITICAL") || upper.contains("[CRITICAL-ISSUES-FOUND: YES]")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TechSpecDecision {
    Required,
    Skip,
}

/// Extracts one `[TECH-SPEC-DECISION: REQUIRED|SKIP]` marker per story, in
/// the order they appear, pairing the i-th marker with `story_keys[i]`.
/// A story with no matching marker defaults to `Required`.
pub fn parse_tech_spec_decisions(
    review_output: &str,
    story_keys: &[String],
) -> Vec<(String, TechSpecDecision)> {
    let decisions = extract_decision_markers(review_output);
    story_keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let decision = decisions.get(i).copied().unwrap_or(TechSpecDecision::Required);
            (key.clone(), decision)
        })
        .collect()
}

/// Single-story variant: the first marker found, defaulting to `Required`.
pub fn parse_tech_spec_decision(review_output: &str) -> TechSpecDecision {
    extract_decision_markers(review_output)
        .into_iter()
        .next()
        .unwrap_or(TechSpecDecision::Required)
}

fn extract_decision_markers(review_output: &str) -> Vec<TechSpecDecision> {
    use std::sync::OnceLock;
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"(?i)\[TECH-SPEC-DECISION:\s*(REQUIRED|SKIP)\]").unwrap()
    });
    re.captures_iter(review_output)
        .map(|caps| {
            if caps[1].eq_ignore_ascii_case("skip") {
                TechSpecDecision::Skip
            } else {
                TechSpecDecision::Required
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_issues_takes_priority_over_any_severity_marker() {
        let output = "ZERO ISSUES found. HIGHEST SEVERITY: CRITICAL mentioned only in an example";
        assert_eq!(parse_highest_severity(output), Severity::Zero);
    }

    #[test]
    fn severity_order_picks_highest_present() {
        assert_eq!(
            parse_highest_severity("HIGHEST SEVERITY: HIGH found two issues"),
            Severity::High
        );
        assert_eq!(
            parse_highest_severity("HIGHEST SEVERITY: LOW, nothing else notable"),
            Severity::Low
        );
    }

    #[test]
    fn no_recognized_marker_is_unknown() {
        assert_eq!(parse_highest_severity("looks fine to me"), Severity::Unknown);
    }

    #[test]
    fn same_errors_3x_requires_three_identical_in_a_row() {
        assert!(!same_errors_3x(&[Severity::High, Severity::High]));
        assert!(same_errors_3x(&[Severity::Low, Severity::High, Severity::High, Severity::High]));
        assert!(!same_errors_3x(&[Severity::High, Severity::High, Severity::Medium]));
    }

    #[test]
    fn critical_marker_variants_detected() {
        assert!(has_critical_marker("HIGHEST SEVERITY: CRITICAL"));
        assert!(has_critical_marker("[CRITICAL-ISSUES-FOUND: YES]"));
        assert!(!has_critical_marker("[CRITICAL-ISSUES-FOUND: NO]"));
    }

    #[test]
    fn tech_spec_decisions_pair_by_position_and_default_to_required() {
        let output = "[TECH-SPEC-DECISION: SKIP] ... [TECH-SPEC-DECISION: required]";
        let keys = vec!["1-1".to_string(), "1-2".to_string(), "1-3".to_string()];
        let decisions = parse_tech_spec_decisions(output, &keys);
        assert_eq!(decisions[0], ("1-1".to_string(), TechSpecDecision::Skip));
        assert_eq!(decisions[1], ("1-2".to_string(), TechSpecDecision::Required));
        assert_eq!(decisions[2], ("1-3".to_string(), TechSpecDecision::Required));
    }

    #[test]
    fn single_story_decision_defaults_to_required_when_absent() {
        assert_eq!(parse_tech_spec_decision("no marker here"), TechSpecDecision::Required);
        assert_eq!(
            parse_tech_spec_decision("[TECH-SPEC-DECISION: SKIP]"),
            TechSpecDecision::Skip
        );
    }
}
