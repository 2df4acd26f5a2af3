use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sprint_core::{EventBus, SettingsStore};
use sprint_orchestrator::Orchestrator;
use sprint_runtime::SubagentRunner;
use sprint_server::{serve, AppState};
use sprint_store::StateStore;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sprint-server")]
#[command(about = "HTTP and websocket front end for the sprint orchestration engine")]
struct Cli {
    /// Directory the engine operates on: sprint-status.yaml, project-context.md,
    /// implementation-artifacts/, and the engine's own state live here.
    #[arg(long, env = "SPRINT_PROJECT_ROOT", default_value = ".")]
    project_root: PathBuf,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long)]
    port: Option<u16>,

    /// Name or path of the subagent CLI binary to invoke for every phase.
    #[arg(long, env = "SPRINT_SUBAGENT_BIN", default_value = "claude")]
    subagent_bin: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let project_root = cli
        .project_root
        .canonicalize()
        .unwrap_or(cli.project_root.clone());

    let settings = Arc::new(SettingsStore::load(project_root.join("settings.json")).await);
    let port = cli.port.unwrap_or(settings.get().await.server_port as u16);

    let store = Arc::new(
        StateStore::open(project_root.join("state.db")).context("failed to open state store")?,
    );
    let finalized = store
        .finalize_stale_running_batches(chrono::Utc::now().timestamp())
        .context("failed to finalize stale batches")?;
    for batch_id in &finalized {
        info!(batch_id, "finalized lingering batch left running at startup");
    }

    let bus = Arc::new(EventBus::new());
    let runner = Arc::new(SubagentRunner::new(cli.subagent_bin));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&settings),
        runner,
        project_root.clone(),
    ));

    let state = AppState::new(store, bus, settings, orchestrator, project_root);
    let addr: SocketAddr = format!("{}:{}", cli.host, port)
        .parse()
        .context("invalid host or port")?;

    info!(%addr, "starting sprint-server");
    serve(addr, state).await
}
