use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use sprint_core::{EventBus, SettingsStore};
use sprint_orchestrator::{parse_max_cycles_arg, Orchestrator, OrchestratorState, SprintManifest};
use sprint_store::StateStore;
use sprint_types::Settings;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

/// Shared application state, handed to every handler via axum's `State`
/// extractor. Cloning is cheap: every field is an `Arc` or a `PathBuf`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StateStore>,
    pub bus: Arc<EventBus>,
    pub settings: Arc<SettingsStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub project_root: PathBuf,
    running: Arc<AsyncMutex<Option<(i64, JoinHandle<()>)>>>,
}

impl AppState {
    pub fn new(
        store: Arc<StateStore>,
        bus: Arc<EventBus>,
        settings: Arc<SettingsStore>,
        orchestrator: Arc<Orchestrator>,
        project_root: PathBuf,
    ) -> Self {
        Self {
            store,
            bus,
            settings,
            orchestrator,
            project_root,
            running: Arc::new(AsyncMutex::new(None)),
        }
    }

    fn manifest_path(&self) -> PathBuf {
        self.project_root.join("sprint-status.yaml")
    }

    fn artifacts_dir(&self) -> PathBuf {
        self.project_root.join("implementation-artifacts")
    }
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/story-descriptions.json", get(story_descriptions))
        .route("/api/orchestrator/start", post(orchestrator_start))
        .route("/api/orchestrator/stop", post(orchestrator_stop))
        .route("/api/orchestrator/status", get(orchestrator_status))
        .route("/api/sprint-status", get(sprint_status))
        .route("/api/orchestrator-status", get(orchestrator_activity_log))
        .route("/api/batches", get(list_batches))
        .route("/api/batches/{id}", get(get_batch))
        .route("/api/settings", get(get_settings).put(put_settings))
        .layer(cors)
        .with_state(state)
}

/// Binds, serves until a Ctrl-C signal, then returns. Process startup order
/// (finalize stale batches, start the heartbeat) is the caller's
/// responsibility, matching the reference process entry point.
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let heartbeat_state = state.clone();
    let heartbeat = tokio::spawn(async move {
        loop {
            let secs = heartbeat_state
                .settings
                .get()
                .await
                .websocket_heartbeat_seconds
                .max(1) as u64;
            tokio::time::sleep(Duration::from_secs(secs)).await;
            let pruned = heartbeat_state.bus.sweep();
            if pruned > 0 {
                tracing::debug!(pruned, "heartbeat swept closed websocket peers");
            }
        }
    });

    let app = app_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "sprint-server listening");
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;
    heartbeat.abort();
    result.map_err(anyhow::Error::from)
}

async fn index() -> Html<&'static str> {
    Html("<html><body><h1>sprint orchestration engine</h1><p>See /api/orchestrator/status and /ws.</p></body></html>")
}

// ------------------------------------------------------------- websocket

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_stream(socket, state))
}

async fn ws_stream(mut socket: WebSocket, state: AppState) {
    let (peer_id, mut rx) = state.bus.add();

    let batch = state.store.active_batch().ok().flatten();
    let events = match &batch {
        Some(b) => state.store.recent_events(b.id, 50).unwrap_or_default(),
        None => Vec::new(),
    };
    let init = json!({
        "type": "init",
        "payload": {"batch": batch, "events": events},
        "timestamp": chrono::Utc::now().timestamp_millis(),
    });
    if socket.send(WsMessage::Text(init.to_string().into())).await.is_err() {
        state.bus.remove(peer_id);
        return;
    }

    let heartbeat_secs = state.settings.get().await.websocket_heartbeat_seconds.max(1) as u64;
    let mut heartbeat = tokio::time::interval(Duration::from_secs(heartbeat_secs));

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let frame = json!({"type": event.event_type, "payload": event.payload, "timestamp": event.timestamp});
                if socket.send(WsMessage::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if socket.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        let is_ping = serde_json::from_str::<Value>(&text)
                            .ok()
                            .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
                            == Some("ping".to_string());
                        if is_ping {
                            let pong = json!({"type": "pong", "payload": {}, "timestamp": chrono::Utc::now().timestamp_millis()});
                            if socket.send(WsMessage::Text(pong.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        // every other client message is accepted and ignored
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
        }
    }
    state.bus.remove(peer_id);
}

// ------------------------------------------------------------- orchestrator

#[derive(Debug, Deserialize)]
struct StartBody {
    batch_size: Option<Value>,
}

async fn orchestrator_start(
    State(state): State<AppState>,
    Json(body): Json<StartBody>,
) -> Result<Json<Value>, StatusCode> {
    let mut running = state.running.lock().await;
    if let Some((_, handle)) = running.as_ref() {
        if !handle.is_finished() {
            return Err(StatusCode::CONFLICT);
        }
    }

    let raw = body.batch_size.as_ref().map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    let max_cycles = parse_max_cycles_arg(raw.as_deref()).map_err(|_| StatusCode::BAD_REQUEST)?;
    if max_cycles < 1 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let orchestrator = Arc::clone(&state.orchestrator);
    let handle = tokio::spawn(async move {
        if let Err(err) = orchestrator.start(max_cycles).await {
            tracing::error!(error = %err, "orchestrator run ended with an error");
        }
    });
    // A placeholder id; the real batch id is resolved by the caller via
    // `/api/orchestrator/status` once the row has been inserted.
    *running = Some((0, handle));

    Ok(Json(json!({"status": "started", "batch_size": max_cycles})))
}

async fn orchestrator_stop(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let running = state.running.lock().await;
    let in_flight = running.as_ref().map(|(_, h)| !h.is_finished()).unwrap_or(false);
    drop(running);

    if in_flight {
        if let Some(batch) = state.store.active_batch().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)? {
            state.orchestrator.stop(batch.id).await;
        }
        return Ok(Json(json!({"status": "stopping"})));
    }

    if let Some(batch) = state.store.active_batch().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)? {
        let now = chrono::Utc::now().timestamp();
        state
            .store
            .update_batch(batch.id, &json!({"ended_at": now, "status": "stopped"}))
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        return Ok(Json(json!({"status": "cleaned", "batch_id": batch.id})));
    }

    Ok(Json(json!({"status": "idle"})))
}

async fn orchestrator_status(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let state_name = match state.orchestrator.state().await {
        OrchestratorState::Idle => "idle",
        OrchestratorState::Starting => "starting",
        OrchestratorState::Running => "running",
        OrchestratorState::Waiting => "waiting",
        OrchestratorState::Stopping => "stopping",
    };
    let active = state.store.active_batch().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let current_stories = match &active {
        Some(batch) => state
            .store
            .stories_of_batch(batch.id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .into_iter()
            .filter(|s| !matches!(s.status.as_str(), "done" | "failed" | "blocked" | "skipped"))
            .map(|s| s.story_key)
            .collect::<Vec<_>>(),
        None => Vec::new(),
    };

    Ok(Json(json!({
        "status": state_name,
        "batch_id": active.as_ref().map(|b| b.id),
        "cycles_completed": active.as_ref().map(|b| b.cycles_completed),
        "max_cycles": active.as_ref().map(|b| b.max_cycles),
        "current_stories": current_stories,
    })))
}

// ----------------------------------------------------------------- manifest

async fn sprint_status(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let manifest = SprintManifest::read(state.manifest_path()).map_err(|_| StatusCode::NOT_FOUND)?;
    let value = serde_json::json!({
        "development_status": manifest.development_status.into_iter().collect::<HashMap<_, _>>(),
    });
    Ok(Json(value))
}

async fn story_descriptions(State(state): State<AppState>) -> Json<Value> {
    let mut descriptions = HashMap::new();
    if let Ok(mut entries) = tokio::fs::read_dir(state.artifacts_dir()).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.ends_with("-story.md") {
                continue;
            }
            let story_key = name.trim_end_matches("-story.md").to_string();
            if let Ok(content) = tokio::fs::read_to_string(&path).await {
                let first_line = content
                    .lines()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or_default()
                    .trim_start_matches('#')
                    .trim()
                    .to_string();
                descriptions.insert(story_key, first_line);
            }
        }
    }
    Json(json!(descriptions))
}

// ------------------------------------------------------------------- events

async fn orchestrator_activity_log(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let batch = state.store.active_batch().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let events = match &batch {
        Some(b) => state
            .store
            .recent_events(b.id, 200)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
        None => Vec::new(),
    };
    let activities: Vec<String> = events
        .iter()
        .map(|e| format!("[{}] {}", e.event_type, e.message.clone().unwrap_or_default()))
        .collect();
    let raw = activities.join("\n");
    Ok(Json(json!({"activities": activities, "raw": raw})))
}

// ------------------------------------------------------------------ batches

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list_batches(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Value>, StatusCode> {
    let default_limit = state.settings.get().await.default_batch_list_limit;
    let limit = page.limit.unwrap_or(default_limit).max(1);
    let offset = page.offset.unwrap_or(0).max(0);
    let (batches, total) = state
        .store
        .list_batches(limit, offset)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let batches: Vec<Value> = batches
        .into_iter()
        .map(|b| {
            let duration_seconds = b.ended_at.map(|end| end - b.started_at);
            json!({
                "id": b.id,
                "started_at": b.started_at,
                "ended_at": b.ended_at,
                "max_cycles": b.max_cycles,
                "cycles_completed": b.cycles_completed,
                "status": b.status,
                "duration_seconds": duration_seconds,
            })
        })
        .collect();
    Ok(Json(json!({"batches": batches, "total": total})))
}

async fn get_batch(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Value>, StatusCode> {
    let batch = state.store.get_batch(id).map_err(|_| StatusCode::NOT_FOUND)?;
    let stories = state
        .store
        .stories_of_batch(id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut done = 0;
    let mut blocked = 0;
    let mut failed = 0;
    let mut story_payloads = Vec::with_capacity(stories.len());
    for story in &stories {
        match story.status.as_str() {
            "done" => done += 1,
            "blocked" => blocked += 1,
            "failed" => failed += 1,
            _ => {}
        }
        let commands = state
            .store
            .commands_of_story(story.id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let duration_seconds = story.ended_at.map(|end| end - story.started_at);
        story_payloads.push(json!({
            "id": story.id,
            "story_key": story.story_key,
            "epic_id": story.epic_id,
            "status": story.status,
            "started_at": story.started_at,
            "ended_at": story.ended_at,
            "duration_seconds": duration_seconds,
            "commands": commands,
        }));
    }

    let stats = json!({
        "total_stories": stories.len(),
        "done": done,
        "blocked": blocked,
        "failed": failed,
    });

    Ok(Json(json!({"batch": batch, "stories": story_payloads, "stats": stats})))
}

// ------------------------------------------------------------------ settings

async fn get_settings(State(state): State<AppState>) -> Json<Settings> {
    Json(state.settings.get().await)
}

async fn put_settings(
    State(state): State<AppState>,
    Json(patch): Json<Value>,
) -> Result<Json<Settings>, StatusCode> {
    let object = patch.as_object().cloned().unwrap_or_default();
    let updated = state.settings.update(&object).await.map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use sprint_orchestrator::Orchestrator;
    use tower::ServiceExt;

    async fn test_state() -> (AppState, PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "sprint-http-test-{}",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        tokio::fs::create_dir_all(&root).await.unwrap();
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let bus = Arc::new(EventBus::new());
        let settings = Arc::new(SettingsStore::load(root.join("settings.json")).await);
        let runner = Arc::new(sprint_runtime::SubagentRunner::new("true"));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            Arc::clone(&settings),
            runner,
            root.clone(),
        ));
        let state = AppState::new(store, bus, settings, orchestrator, root.clone());
        (state, root)
    }

    #[tokio::test]
    async fn index_responds_with_html() {
        let (state, _root) = test_state().await;
        let app = app_router(state);
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_settings_returns_defaults() {
        let (state, _root) = test_state().await;
        let app = app_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/settings")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let settings: Settings = serde_json::from_slice(&body).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[tokio::test]
    async fn orchestrator_status_is_idle_with_no_batch() {
        let (state, _root) = test_state().await;
        let app = app_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/orchestrator/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "idle");
        assert!(value["batch_id"].is_null());
    }

    #[tokio::test]
    async fn stop_with_nothing_running_reports_idle() {
        let (state, _root) = test_state().await;
        let app = app_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/orchestrator/stop")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["status"], "idle");
    }

    #[tokio::test]
    async fn unknown_settings_field_is_rejected() {
        let (state, _root) = test_state().await;
        let app = app_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/settings")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"not_a_real_field": 1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn batches_list_starts_empty() {
        let (state, _root) = test_state().await;
        let app = app_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/batches")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["total"], 0);
    }
}
