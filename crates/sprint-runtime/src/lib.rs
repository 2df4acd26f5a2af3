pub mod parser;
pub mod runner;

pub use parser::{parse_csv_log_line, parse_ldjson_line, StreamRecord, TaskRecord};
pub use runner::{handle_line, RunContext, RunOutcome, RunRequest, SubagentRunner};
