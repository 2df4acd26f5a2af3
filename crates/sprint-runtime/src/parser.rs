use serde_json::Value;

/// One accepted structured log record extracted from a tool-result line.
/// Column order matches the subagent's embedded CSV protocol exactly:
/// `timestamp,epic_id,story_key,command,task_id,status,message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub timestamp: i64,
    pub epic_id: String,
    pub story_key: String,
    pub command: String,
    pub task_id: String,
    pub status: String,
    pub message: String,
}

impl TaskRecord {
    /// The event type a record of this kind is broadcast under.
    pub fn event_type(&self) -> &'static str {
        if self.status == "start" {
            "command:start"
        } else {
            "command:end"
        }
    }
}

/// One line-delimited JSON record as emitted by the subagent CLI.
pub enum StreamRecord {
    /// An assistant message; its text blocks are accumulated into stdout.
    AssistantText(String),
    /// A tool-result record whose content was a string, eligible for CSV
    /// task-record extraction.
    ToolResult(String),
    /// Any other well-formed record; carries no accumulation or extraction.
    Other,
}

/// Parses one line of the subagent's stdout. Malformed JSON is tolerated by
/// returning `None` rather than propagating an error.
pub fn parse_ldjson_line(line: &str) -> Option<StreamRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(line).ok()?;
    let record_type = value.get("type").and_then(Value::as_str)?;

    match record_type {
        "assistant" => {
            let mut text = String::new();
            if let Some(blocks) = value
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_array)
            {
                for block in blocks {
                    if block.get("type").and_then(Value::as_str) == Some("text") {
                        if let Some(t) = block.get("text").and_then(Value::as_str) {
                            text.push_str(t);
                        }
                    }
                }
            }
            Some(StreamRecord::AssistantText(text))
        }
        "tool_result" => match value.get("content") {
            Some(Value::String(s)) => Some(StreamRecord::ToolResult(s.clone())),
            _ => Some(StreamRecord::Other),
        },
        _ => Some(StreamRecord::Other),
    }
}

/// Parses one line of a tool-result's string content as a task log record.
/// Accepted iff the line has at least 7 comma-separated fields and the
/// timestamp falls within `[now - 31_536_000, now + 3_600]` seconds.
pub fn parse_csv_log_line(line: &str, now_secs: i64) -> Option<TaskRecord> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let row = reader.records().next()?.ok()?;
    if row.len() < 7 {
        return None;
    }
    let timestamp: i64 = row.get(0)?.trim().parse().ok()?;
    if !is_within_window(timestamp, now_secs) {
        return None;
    }
    Some(TaskRecord {
        timestamp,
        epic_id: row.get(1)?.to_string(),
        story_key: row.get(2)?.to_string(),
        command: row.get(3)?.to_string(),
        task_id: row.get(4)?.to_string(),
        status: row.get(5)?.to_string(),
        message: row.get(6)?.to_string(),
    })
}

pub const CSV_TIMESTAMP_PAST_WINDOW_SECS: i64 = 31_536_000;
pub const CSV_TIMESTAMP_FUTURE_TOLERANCE_SECS: i64 = 3_600;

pub fn is_within_window(timestamp: i64, now_secs: i64) -> bool {
    timestamp >= now_secs - CSV_TIMESTAMP_PAST_WINDOW_SECS
        && timestamp <= now_secs + CSV_TIMESTAMP_FUTURE_TOLERANCE_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_json_line_is_skipped() {
        assert!(parse_ldjson_line("not json").is_none());
    }

    #[test]
    fn assistant_text_blocks_concatenate() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello "},{"type":"text","text":"world"}]}}"#;
        match parse_ldjson_line(line) {
            Some(StreamRecord::AssistantText(text)) => assert_eq!(text, "hello world"),
            _ => panic!("expected assistant text"),
        }
    }

    #[test]
    fn tool_result_with_non_string_content_is_other() {
        let line = r#"{"type":"tool_result","content":{"nested":true}}"#;
        assert!(matches!(parse_ldjson_line(line), Some(StreamRecord::Other)));
    }

    #[test]
    fn csv_boundary_accepts_within_window_rejects_outside() {
        let now = 1_700_000_000;
        let accepted = format!("{},1,1-1,sprint-dev-story,t1,start,go", now + 1_800);
        let rejected = format!("{},1,1-1,sprint-dev-story,t1,start,go", now - 32_000_000);
        assert!(parse_csv_log_line(&accepted, now).is_some());
        assert!(parse_csv_log_line(&rejected, now).is_none());
    }

    #[test]
    fn csv_requires_at_least_seven_fields() {
        let now = 1_700_000_000;
        let short = format!("{},1,1-1,sprint-dev-story", now);
        assert!(parse_csv_log_line(&short, now).is_none());
    }

    #[test]
    fn csv_non_integer_timestamp_is_rejected() {
        let line = "not-a-number,1,1-1,sprint-dev-story,t1,start,go";
        assert!(parse_csv_log_line(line, 1_700_000_000).is_none());
    }

    #[test]
    fn event_type_derives_from_status() {
        let record = TaskRecord {
            timestamp: 0,
            epic_id: "1".into(),
            story_key: "1-1".into(),
            command: "sprint-dev-story".into(),
            task_id: "t1".into(),
            status: "start".into(),
            message: "go".into(),
        };
        assert_eq!(record.event_type(), "command:start");
        let mut ended = record.clone();
        ended.status = "completed".into();
        assert_eq!(ended.event_type(), "command:end");
    }
}
