pub mod injection;
pub mod manifest;
pub mod orchestrator;
pub mod review;
pub mod selection;

pub use injection::{InjectionError, InjectionScope};
pub use manifest::{ManifestError, SprintManifest};
pub use orchestrator::{parse_max_cycles_arg, Orchestrator, OrchestratorState};
pub use review::{parse_highest_severity, parse_tech_spec_decision, parse_tech_spec_decisions, same_errors_3x, Severity, TechSpecDecision};
