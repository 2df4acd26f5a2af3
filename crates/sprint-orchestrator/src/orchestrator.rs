use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use sprint_core::{EventBus, SettingsStore};
use sprint_runtime::{RunContext, RunOutcome, RunRequest, SubagentRunner};
use sprint_store::StateStore;
use sprint_types::{BatchStatus, Story, StoryStatus};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::injection::{self, InjectionScope};
use crate::manifest::SprintManifest;
use crate::review::{self, Severity, TechSpecDecision};
use crate::selection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Starting,
    Running,
    Waiting,
    Stopping,
}

/// Mirrors the reference CLI's positional batch-size argument: a bare
/// integer, or the literal `"all"` for effectively unbounded cycles.
pub fn parse_max_cycles_arg(raw: Option<&str>) -> Result<i64, String> {
    let raw = raw.unwrap_or("2");
    if raw.eq_ignore_ascii_case("all") {
        return Ok(999);
    }
    raw.parse::<i64>()
        .map_err(|_| format!("invalid batch size: {raw}"))
}

/// One instance per batch. Holds its dependencies by constructor injection
/// so a server can wire a single long-lived instance and tests can wire a
/// disposable one without touching global state.
pub struct Orchestrator {
    store: Arc<StateStore>,
    bus: Arc<EventBus>,
    settings: Arc<SettingsStore>,
    runner: Arc<SubagentRunner>,
    project_root: PathBuf,
    state: AsyncMutex<OrchestratorState>,
    stop_requested: AtomicBool,
    background_tasks: AsyncMutex<Vec<JoinHandle<()>>>,
    tech_spec_decisions: AsyncMutex<HashMap<String, TechSpecDecision>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<StateStore>,
        bus: Arc<EventBus>,
        settings: Arc<SettingsStore>,
        runner: Arc<SubagentRunner>,
        project_root: PathBuf,
    ) -> Self {
        Self {
            store,
            bus,
            settings,
            runner,
            project_root,
            state: AsyncMutex::new(OrchestratorState::Idle),
            stop_requested: AtomicBool::new(false),
            background_tasks: AsyncMutex::new(Vec::new()),
            tech_spec_decisions: AsyncMutex::new(HashMap::new()),
        }
    }

    pub async fn state(&self) -> OrchestratorState {
        *self.state.lock().await
    }

    // ------------------------------------------------------------- lifecycle

    pub async fn start(&self, max_cycles: i64) -> anyhow::Result<i64> {
        *self.state.lock().await = OrchestratorState::Starting;
        self.stop_requested.store(false, Ordering::SeqCst);

        let now = chrono::Utc::now().timestamp();
        let batch = self.store.create_batch(now, max_cycles)?;
        self.emit(
            batch.id,
            "batch:start",
            json!({"batch_id": batch.id, "max_cycles": max_cycles}),
        );

        self.step0_context_check(batch.id).await?;
        if !self.copy_project_context(batch.id).await {
            self.emit(
                batch.id,
                "batch:warning",
                json!({"batch_id": batch.id, "message": "project context copy failed", "warning_type": "context_copy"}),
            );
        }

        *self.state.lock().await = OrchestratorState::Running;

        let mut cycles_completed = 0i64;
        let already_emitted_end = loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                break false;
            }
            let manifest = match SprintManifest::read(self.manifest_path()) {
                Ok(m) => m,
                Err(err) => {
                    self.emit(
                        batch.id,
                        "batch:warning",
                        json!({"batch_id": batch.id, "message": err.to_string(), "warning_type": "manifest_read"}),
                    );
                    break false;
                }
            };
            let selected = selection::select_stories(&manifest);
            if selected.is_empty() || cycles_completed >= max_cycles {
                break false;
            }

            self.run_cycle(batch.id, &selected, cycles_completed).await?;
            cycles_completed += 1;
            self.store
                .update_batch(batch.id, &json!({"cycles_completed": cycles_completed}))?;
        };

        let stopped = self.stop_requested.load(Ordering::SeqCst);
        let status = if stopped {
            BatchStatus::Stopped
        } else {
            BatchStatus::Completed
        };
        let ended_at = chrono::Utc::now().timestamp();
        self.store.update_batch(
            batch.id,
            &json!({"ended_at": ended_at, "status": status.as_str()}),
        )?;
        if !already_emitted_end {
            self.emit(
                batch.id,
                "batch:end",
                json!({"batch_id": batch.id, "cycles_completed": cycles_completed, "status": status.as_str()}),
            );
        }
        *self.state.lock().await = OrchestratorState::Idle;
        Ok(batch.id)
    }

    /// Flips the stop flag, aborts every tracked background task, and emits
    /// `batch:end` with status `stopped`. In-flight synchronous children are
    /// not killed here; the main loop observes the flag at the next cycle
    /// or story boundary.
    pub async fn stop(&self, batch_id: i64) {
        self.stop_requested.store(true, Ordering::SeqCst);
        *self.state.lock().await = OrchestratorState::Stopping;
        let mut tasks = self.background_tasks.lock().await;
        for handle in tasks.drain(..) {
            handle.abort();
        }
        drop(tasks);
        self.emit(
            batch_id,
            "batch:end",
            json!({"batch_id": batch_id, "status": "stopped"}),
        );
    }

    // ---------------------------------------------------------------- step 0

    async fn step0_context_check(&self, batch_id: i64) -> anyhow::Result<()> {
        let max_age_hours = self.settings.get().await.project_context_max_age_hours;
        let path = self.project_context_path();
        match tokio::fs::metadata(&path).await {
            Err(_) => {
                self.emit(
                    batch_id,
                    "context:create",
                    json!({"path": path.display().to_string()}),
                );
                let _ = self
                    .run_subagent(batch_id, None, "project-context", "sprint-create-context", None, None)
                    .await?;
            }
            Ok(meta) => {
                let age_seconds = meta
                    .modified()
                    .ok()
                    .and_then(|m| m.elapsed().ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                if age_seconds > max_age_hours * 3600 {
                    self.emit(batch_id, "context:refresh", json!({}));
                    self.spawn_context_refresh(batch_id).await;
                } else {
                    self.emit(batch_id, "context:fresh", json!({}));
                }
            }
        }
        Ok(())
    }

    async fn spawn_context_refresh(&self, batch_id: i64) {
        let store = Arc::clone(&self.store);
        let bus = Arc::clone(&self.bus);
        let runner = Arc::clone(&self.runner);
        let cwd = self.project_root.clone();
        let handle = tokio::spawn(async move {
            let ctx = RunContext {
                store: store.as_ref(),
                bus: bus.as_ref(),
                batch_id,
            };
            let request = RunRequest {
                prompt: "sprint-create-context".to_string(),
                model: None,
                injection: None,
                cwd,
            };
            match runner.run(&request, &ctx).await {
                Ok(_) => bus.emit("context:complete", json!({"batch_id": batch_id})),
                Err(err) => bus.emit(
                    "context:error",
                    json!({"batch_id": batch_id, "error": err.to_string()}),
                ),
            };
        });
        self.background_tasks.lock().await.push(handle);
    }

    /// Copies the project-context document to a frozen per-batch snapshot
    /// exactly once, so every subagent in the batch sees identical content.
    async fn copy_project_context(&self, batch_id: i64) -> bool {
        let src = self.project_context_path();
        let dst = self.sprint_project_context_path();

        if !src.exists() {
            self.emit(
                batch_id,
                "context:copy_failed",
                json!({"reason": "missing_source"}),
            );
            return false;
        }
        if let Some(parent) = dst.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                self.emit(
                    batch_id,
                    "context:copy_failed",
                    json!({"reason": "mkdir_failed", "error": err.to_string()}),
                );
                return false;
            }
        }
        let content = match tokio::fs::read_to_string(&src).await {
            Ok(c) => c,
            Err(err) => {
                self.emit(
                    batch_id,
                    "context:copy_failed",
                    json!({"reason": "read_failed", "error": err.to_string()}),
                );
                return false;
            }
        };
        if let Err(err) = tokio::fs::write(&dst, content).await {
            self.emit(
                batch_id,
                "context:copy_failed",
                json!({"reason": "write_failed", "error": err.to_string()}),
            );
            return false;
        }
        true
    }

    // ---------------------------------------------------------------- cycle

    async fn run_cycle(&self, batch_id: i64, selected: &[String], cycle_number: i64) -> anyhow::Result<()> {
        self.emit(
            batch_id,
            "cycle:start",
            json!({"cycle_number": cycle_number, "story_keys": selected}),
        );

        let now = chrono::Utc::now().timestamp();
        for key in selected {
            if self.store.get_story_by_key(batch_id, key).is_err() {
                let epic = selection::epic_id(key);
                self.store.create_story(batch_id, key, &epic, now)?;
            }
        }

        let manifest = SprintManifest::read(self.manifest_path())?;
        let first_status = manifest.status_of(&selected[0]).unwrap_or("backlog").to_string();

        if first_status == "backlog" {
            self.run_phase2_create_story(batch_id, selected).await?;
            self.run_phase2b_story_review(batch_id, selected).await?;
            if self.tech_spec_needed().await {
                self.run_phase3_tech_spec(batch_id, selected).await?;
                self.run_phase3b_tech_spec_review(batch_id, selected).await?;
            }
        }
        // "review" status and every other status both fall straight through
        // to phase 4, matching the reference branching.

        let mut completed = Vec::new();
        for key in selected {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            if self.run_phase4_dev_and_review(batch_id, key).await? {
                completed.push(key.clone());
            }
        }

        if !completed.is_empty() {
            self.run_phase4c_batch_commit(batch_id, &completed).await?;
            self.cleanup_batch_files(batch_id, &completed).await;
        }

        self.emit(
            batch_id,
            "cycle:end",
            json!({"cycle_number": cycle_number, "completed_stories": completed}),
        );
        Ok(())
    }

    async fn tech_spec_needed(&self) -> bool {
        self.tech_spec_decisions
            .lock()
            .await
            .values()
            .any(|d| matches!(d, TechSpecDecision::Required))
    }

    // --------------------------------------------------------------- phase 2

    async fn run_phase2_create_story(&self, batch_id: i64, selected: &[String]) -> anyhow::Result<()> {
        let story_keys = selected.join(",");
        let bundle = self
            .build_bundle(
                batch_id,
                selected,
                InjectionScope {
                    project_context: true,
                    discovery: false,
                    tech_spec: false,
                },
                &[],
            )
            .await?;

        let (create_result, discovery_result) = tokio::join!(
            self.run_subagent(batch_id, None, &story_keys, "sprint-create-story", None, Some(bundle.clone())),
            self.run_subagent(
                batch_id,
                None,
                &story_keys,
                "sprint-create-story-discovery",
                None,
                Some(bundle.clone())
            ),
        );
        let create_outcome = create_result?;
        discovery_result?;

        let decisions = review::parse_tech_spec_decisions(&create_outcome.stdout, selected)
            .into_iter()
            .collect::<HashMap<_, _>>();
        *self.tech_spec_decisions.lock().await = decisions;
        Ok(())
    }

    async fn run_phase2b_story_review(&self, batch_id: i64, selected: &[String]) -> anyhow::Result<()> {
        let story_keys = selected.join(",");
        let bundle = self
            .build_bundle(
                batch_id,
                selected,
                InjectionScope {
                    project_context: true,
                    discovery: true,
                    tech_spec: false,
                },
                &[],
            )
            .await?;
        let outcome = self
            .run_subagent(batch_id, None, &story_keys, "sprint-story-review", None, Some(bundle.clone()))
            .await?;
        if review::has_critical_marker(&outcome.stdout) {
            self.spawn_review_chain(batch_id, story_keys, bundle).await;
        }
        Ok(())
    }

    // --------------------------------------------------------------- phase 3

    async fn run_phase3_tech_spec(&self, batch_id: i64, selected: &[String]) -> anyhow::Result<()> {
        let story_keys = selected.join(",");
        let bundle = self
            .build_bundle(
                batch_id,
                selected,
                InjectionScope {
                    project_context: true,
                    discovery: true,
                    tech_spec: false,
                },
                &[],
            )
            .await?;
        self.run_subagent(batch_id, None, &story_keys, "sprint-create-tech-spec", None, Some(bundle))
            .await?;
        Ok(())
    }

    async fn run_phase3b_tech_spec_review(&self, batch_id: i64, selected: &[String]) -> anyhow::Result<()> {
        let story_keys = selected.join(",");
        let bundle = self
            .build_bundle(
                batch_id,
                selected,
                InjectionScope {
                    project_context: true,
                    discovery: true,
                    tech_spec: true,
                },
                &[],
            )
            .await?;
        let outcome = self
            .run_subagent(batch_id, None, &story_keys, "sprint-tech-spec-review", None, Some(bundle.clone()))
            .await?;
        if review::has_critical_marker(&outcome.stdout) {
            self.spawn_review_chain(batch_id, story_keys, bundle).await;
        }
        Ok(())
    }

    // --------------------------------------------------------------- phase 4

    /// Runs dev, then the code-review loop, to resolution. Returns whether
    /// the story ended in `done` (and is therefore eligible for the batch
    /// commit phase).
    async fn run_phase4_dev_and_review(&self, batch_id: i64, key: &str) -> anyhow::Result<bool> {
        let story = self.story_for(batch_id, key)?;
        self.update_sprint_status(batch_id, key, "in-progress").await?;
        let story_keys = [key.to_string()];
        let bundle = self
            .build_bundle(
                batch_id,
                &story_keys,
                InjectionScope {
                    project_context: true,
                    discovery: true,
                    tech_spec: true,
                },
                &[],
            )
            .await?;

        self.run_subagent(batch_id, Some(story.id), key, "sprint-dev-story", None, Some(bundle.clone()))
            .await?;

        let settings = self.settings.get().await;
        let mut history: Vec<Severity> = Vec::new();
        let mut final_status = StoryStatus::Blocked;

        for attempt in 1..=settings.max_code_review_attempts {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            let model = if attempt >= settings.haiku_after_review {
                Some("haiku".to_string())
            } else {
                None
            };
            let outcome = self
                .run_subagent(batch_id, Some(story.id), key, "sprint-code-review", model, Some(bundle.clone()))
                .await?;
            let severity = review::parse_highest_severity(&outcome.stdout);
            history.push(severity);

            if review::has_critical_marker(&outcome.stdout) {
                self.spawn_review_chain(batch_id, key.to_string(), bundle.clone()).await;
            }

            if severity == Severity::Zero {
                final_status = StoryStatus::Done;
                break;
            }
            if attempt >= 3 {
                if review::same_errors_3x(&history) {
                    final_status = StoryStatus::Blocked;
                    break;
                }
                if severity != Severity::Critical {
                    final_status = StoryStatus::Done;
                    break;
                }
            }
        }

        self.update_sprint_status(batch_id, key, final_status.as_str()).await?;
        let now = chrono::Utc::now().timestamp();
        self.store
            .update_story(story.id, &json!({"status": final_status.as_str()}), now)?;
        Ok(final_status == StoryStatus::Done)
    }

    async fn run_phase4c_batch_commit(&self, batch_id: i64, completed: &[String]) -> anyhow::Result<()> {
        let bundle = self
            .build_bundle(
                batch_id,
                completed,
                InjectionScope {
                    project_context: false,
                    discovery: false,
                    tech_spec: false,
                },
                &[],
            )
            .await?;
        let git_status = injection::capture_git_status(&self.project_root).await;
        let settings = self.settings.get().await;
        let (bundle_with_git, _warned) = injection::append_git_status(
            &bundle,
            &git_status,
            settings.injection_warning_bytes(),
            settings.injection_error_bytes(),
        )?;

        self.run_subagent(batch_id, None, "batch", "sprint-commit", None, Some(bundle_with_git))
            .await?;
        Ok(())
    }

    // ----------------------------------------------------------- background

    async fn spawn_review_chain(&self, batch_id: i64, story_key: String, bundle: String) {
        let store = Arc::clone(&self.store);
        let bus = Arc::clone(&self.bus);
        let runner = Arc::clone(&self.runner);
        let cwd = self.project_root.clone();
        let _ = store.create_background_task(batch_id, &story_key, "review_chain", chrono::Utc::now().timestamp());
        let handle = tokio::spawn(async move {
            let ctx = RunContext {
                store: store.as_ref(),
                bus: bus.as_ref(),
                batch_id,
            };
            let request = RunRequest {
                prompt: format!("sprint-review-chain {story_key}"),
                model: Some("haiku".to_string()),
                injection: Some(bundle),
                cwd,
            };
            // Fire-and-forget: this is an advisory second pass. Its output is
            // intentionally never read by the orchestrator.
            let _ = runner.run(&request, &ctx).await;
        });
        self.background_tasks.lock().await.push(handle);
    }

    // -------------------------------------------------------------- archival

    pub async fn cleanup_batch_files(&self, batch_id: i64, story_keys: &[String]) {
        let source = self.artifacts_dir();
        if story_keys.is_empty() || !source.exists() {
            self.emit(
                batch_id,
                "cleanup:complete",
                json!({"files_moved": 0, "story_keys": story_keys, "message": "nothing to archive"}),
            );
            return;
        }

        let archive = self.archive_dir();
        if let Err(err) = tokio::fs::create_dir_all(&archive).await {
            self.emit(
                batch_id,
                "cleanup:file_error",
                json!({"error": err.to_string()}),
            );
            return;
        }

        let mut matched: HashSet<PathBuf> = HashSet::new();
        if let Ok(mut entries) = tokio::fs::read_dir(&source).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let name_lower = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                if story_keys.iter().any(|k| name_lower.contains(&k.to_lowercase())) {
                    matched.insert(path);
                }
            }
        }

        let mut files: Vec<PathBuf> = matched.into_iter().collect();
        files.sort_by_key(|p| p.file_name().map(|n| n.to_string_lossy().to_lowercase()));

        let mut moved = 0;
        for path in files {
            let file_name = path.file_name().expect("filtered to files").to_owned();
            let dest = archive.join(&file_name);
            match tokio::fs::rename(&path, &dest).await {
                Ok(()) => {
                    moved += 1;
                    self.emit(
                        batch_id,
                        "cleanup:file_moved",
                        json!({"file": file_name.to_string_lossy()}),
                    );
                }
                Err(err) => {
                    self.emit(
                        batch_id,
                        "cleanup:file_error",
                        json!({"file": file_name.to_string_lossy(), "error": err.to_string()}),
                    );
                }
            }
        }

        self.emit(
            batch_id,
            "cleanup:complete",
            json!({"files_moved": moved, "story_keys": story_keys, "message": format!("archived {moved} files")}),
        );
    }

    // ------------------------------------------------------------- manifest

    async fn update_sprint_status(&self, batch_id: i64, story_key: &str, new_status: &str) -> anyhow::Result<()> {
        let mut manifest = SprintManifest::read(self.manifest_path())?;
        let old = manifest.update_status(story_key, new_status);
        manifest.write(self.manifest_path())?;
        self.emit(
            batch_id,
            "story:status",
            json!({"story_key": story_key, "old_status": old, "new_status": new_status}),
        );
        Ok(())
    }

    // --------------------------------------------------------------- support

    async fn build_bundle(
        &self,
        batch_id: i64,
        story_keys: &[String],
        scope: InjectionScope,
        extra: &[PathBuf],
    ) -> anyhow::Result<String> {
        let settings = self.settings.get().await;
        let project_context_path = self.sprint_project_context_path();
        let project_context = scope.project_context.then_some(project_context_path.as_path());
        let (result, warned_or_empty) = injection::build_injection_bundle(
            &self.artifacts_dir(),
            project_context,
            story_keys,
            scope,
            extra,
            settings.injection_warning_bytes(),
            settings.injection_error_bytes(),
        )?;
        if warned_or_empty {
            if result.file_count == 0 {
                self.emit(batch_id, "injection:empty", json!({"story_keys": story_keys}));
            } else {
                self.emit(
                    batch_id,
                    "injection:warning",
                    json!({"story_keys": story_keys, "size": result.size}),
                );
            }
        }
        Ok(result.xml)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_subagent(
        &self,
        batch_id: i64,
        story_id: Option<i64>,
        story_key: &str,
        command: &str,
        model: Option<String>,
        injection: Option<String>,
    ) -> anyhow::Result<RunOutcome> {
        let now = chrono::Utc::now().timestamp();
        let task_id = format!("{command}-{now}");
        let command_row = match story_id {
            Some(sid) => Some(self.store.create_command(sid, command, &task_id, now)?),
            None => None,
        };
        self.emit(
            batch_id,
            "command:start",
            json!({"story_key": story_key, "command": command, "task_id": task_id}),
        );

        let request = RunRequest {
            prompt: format!("{command} {story_key}"),
            model,
            injection,
            cwd: self.project_root.clone(),
        };
        let ctx = RunContext {
            store: self.store.as_ref(),
            bus: self.bus.as_ref(),
            batch_id,
        };
        let outcome = self.runner.run(&request, &ctx).await;

        let (status, summary) = match &outcome {
            Ok(result) => ("completed", truncate(&result.stdout, 500)),
            Err(err) => ("failed", err.to_string()),
        };
        if let Some(cmd) = command_row {
            let ended_at = chrono::Utc::now().timestamp();
            let _ = self.store.update_command(
                cmd.id,
                &json!({"ended_at": ended_at, "status": status, "output_summary": summary}),
            );
        }
        self.emit(
            batch_id,
            "command:end",
            json!({"story_key": story_key, "command": command, "task_id": task_id, "status": status}),
        );

        outcome
    }

    fn story_for(&self, batch_id: i64, key: &str) -> anyhow::Result<Story> {
        Ok(self.store.get_story_by_key(batch_id, key)?)
    }

    fn emit(&self, batch_id: i64, event_type: &str, payload: serde_json::Value) {
        let event = self.bus.emit(event_type, payload.clone());
        let payload_json = serde_json::to_string(&payload).ok();
        if let Err(err) = self.store.create_event(
            batch_id,
            None,
            None,
            event.timestamp,
            event_type,
            None,
            None,
            None,
            None,
            None,
            None,
            payload_json.as_deref(),
        ) {
            tracing::warn!(error = %err, event_type, "failed to persist orchestrator event");
        }
    }

    fn project_context_path(&self) -> PathBuf {
        self.project_root.join("project-context.md")
    }

    fn sprint_project_context_path(&self) -> PathBuf {
        self.project_root.join("sprint-project-context.md")
    }

    fn manifest_path(&self) -> PathBuf {
        self.project_root.join("sprint-status.yaml")
    }

    fn artifacts_dir(&self) -> PathBuf {
        self.project_root.join("implementation-artifacts")
    }

    fn archive_dir(&self) -> PathBuf {
        self.artifacts_dir().join("archive")
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn orchestrator(project_root: PathBuf) -> Orchestrator {
        let settings_path = project_root.join("settings.json");
        Orchestrator::new(
            Arc::new(StateStore::open_in_memory().unwrap()),
            Arc::new(EventBus::new()),
            Arc::new(SettingsStore::load(settings_path).await),
            Arc::new(SubagentRunner::new("true")),
            project_root,
        )
    }

    #[test]
    fn max_cycles_arg_defaults_to_two() {
        assert_eq!(parse_max_cycles_arg(None), Ok(2));
    }

    #[test]
    fn max_cycles_arg_all_means_unbounded_sentinel() {
        assert_eq!(parse_max_cycles_arg(Some("all")), Ok(999));
        assert_eq!(parse_max_cycles_arg(Some("ALL")), Ok(999));
    }

    #[test]
    fn max_cycles_arg_rejects_non_integer() {
        assert!(parse_max_cycles_arg(Some("banana")).is_err());
    }

    #[tokio::test]
    async fn cleanup_with_empty_story_keys_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path().to_path_buf()).await;
        let batch = orch.store.create_batch(0, 2).unwrap();
        orch.cleanup_batch_files(batch.id, &[]).await;
        let events = orch.store.recent_events(batch.id, 10).unwrap();
        assert_eq!(events[0].event_type, "cleanup:complete");
    }

    #[tokio::test]
    async fn cleanup_moves_matching_files_and_skips_others() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dir.path().join("implementation-artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();
        std::fs::write(artifacts.join("1-1-story.md"), "x").unwrap();
        std::fs::write(artifacts.join("2-1-story.md"), "y").unwrap();

        let orch = orchestrator(dir.path().to_path_buf()).await;
        let batch = orch.store.create_batch(0, 2).unwrap();
        orch.cleanup_batch_files(batch.id, &["1-1".to_string()]).await;

        assert!(artifacts.join("archive").join("1-1-story.md").exists());
        assert!(artifacts.join("2-1-story.md").exists());
    }
}
