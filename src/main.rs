//! War Room Server - Hackathon Team Collaboration
//!
//! A shared-project-state server using:
//! - Sled-backed project documents with per-document change feeds
//! - Field-level last-write-wins updates translated from user actions
//! - Axum with WebSocket: one dashboard socket per mounted view, plus a
//!   stateless room-broadcast relay for presence payloads

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

mod project;
mod relay;
mod session;
mod storage;
mod sync;

use project::Project;
use relay::{RelayEnvelope, RelayHub, RelayReply, RelayRequest};
use session::Session;
use storage::{ProjectStore, ProjectSummary, SledProjectStore, StoreConfig, StoreError};
use sync::protocol::{DashboardReply, DashboardRequest};
use sync::{DashboardController, SyncResult, ViewEvent, ViewState};

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Shared application state
pub struct AppState {
    /// Project document store with change feeds
    store: Arc<SledProjectStore>,
    /// Room-broadcast presence relay
    relay: Arc<RelayHub>,
    /// Active-project session, loaded once at startup
    session: Arc<Session>,
    /// Currently mounted dashboard views
    open_views: AtomicUsize,
    /// Server start time
    started_at: std::time::Instant,
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    projects: usize,
    open_views: usize,
    relay_rooms: usize,
}

#[derive(Debug, Deserialize)]
struct CreateProjectRequest {
    team_name: String,
    idea: String,
    team_strength: Option<u32>,
}

#[derive(Debug, Serialize)]
struct CreateProjectResponse {
    project_id: String,
    team_name: String,
    ws_url: String,
}

#[derive(Debug, Serialize)]
struct ProjectListResponse {
    projects: Vec<ProjectSummary>,
    total: usize,
}

// ============================================================================
// HTTP HANDLERS
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        projects: state.store.project_count(),
        open_views: state.open_views.load(Ordering::Relaxed),
        relay_rooms: state.relay.room_count(),
    })
}

/// Setup flow: bootstrap and persist a new project
async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<Json<CreateProjectResponse>, (StatusCode, String)> {
    let team_name = payload.team_name.trim();
    let idea = payload.idea.trim();

    if team_name.is_empty() || idea.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Team name and project idea are required".to_string(),
        ));
    }

    let project = Project::bootstrap(team_name, idea, payload.team_strength.unwrap_or(2));

    state
        .store
        .create(&project)
        .await
        .map_err(store_error_response)?;

    // The new project becomes the active session; a persistence failure
    // is not fatal, the document itself is already committed
    if let Err(e) = state.session.set_active(project.id.as_str()) {
        error!("Failed to persist session state: {}", e);
    }

    info!("Created project: {} ({})", project.team_name, project.id);

    Ok(Json(CreateProjectResponse {
        project_id: project.id.clone(),
        team_name: project.team_name.clone(),
        ws_url: format!("/ws/{}", project.id),
    }))
}

/// List all projects
async fn list_projects(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.list().await {
        Ok(projects) => {
            let total = projects.len();
            Json(ProjectListResponse { projects, total })
        }
        Err(e) => {
            error!("Failed to list projects: {}", e);
            Json(ProjectListResponse {
                projects: vec![],
                total: 0,
            })
        }
    }
}

/// Fetch one project document
async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Result<Json<Project>, (StatusCode, String)> {
    let project = state
        .store
        .get(&project_id)
        .await
        .map_err(store_error_response)?;
    Ok(Json(project))
}

/// "Finish" action: delete the document and release the session.
/// Every subscribed view observes the removal and leaves the dashboard.
async fn finish_project(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .store
        .remove(&project_id)
        .await
        .map_err(store_error_response)?;

    match state.session.clear_if(&project_id) {
        Ok(true) => debug!("Cleared active session for {}", project_id),
        Ok(false) => {}
        Err(e) => error!("Failed to clear session state: {}", e),
    }

    info!("Finished project: {}", project_id);
    Ok(StatusCode::NO_CONTENT)
}

fn store_error_response(err: StoreError) -> (StatusCode, String) {
    let status = match &err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

// ============================================================================
// DASHBOARD WEBSOCKET
// ============================================================================

/// WebSocket upgrade for one dashboard view
async fn dashboard_ws_handler(
    ws: WebSocketUpgrade,
    Path(project_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("Dashboard socket upgrade for project: {}", project_id);
    ws.on_upgrade(move |socket| handle_dashboard_socket(socket, project_id, state))
}

/// Drive one mounted dashboard view over its socket
async fn handle_dashboard_socket(socket: WebSocket, project_id: String, state: Arc<AppState>) {
    state.open_views.fetch_add(1, Ordering::Relaxed);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let store: Arc<dyn ProjectStore> = state.store.clone();
    let (controller, mut view_events) = DashboardController::open(store, project_id.clone()).await;
    let controller = Arc::new(controller);

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<DashboardReply>();

    // Initial snapshot decides Found vs NotFound for the client
    let initial = match controller.snapshot() {
        ViewState::Found(project) => DashboardReply::Project { project },
        _ => DashboardReply::NotFound,
    };
    let _ = reply_tx.send(initial);

    // Task to translate view events into wire replies
    let event_tx = reply_tx.clone();
    let event_task = tokio::spawn(async move {
        while let Some(event) = view_events.recv().await {
            let reply = match event {
                ViewEvent::Replaced(project) => DashboardReply::Project { project },
                ViewEvent::Removed => DashboardReply::Removed,
                ViewEvent::Countdown(display) => DashboardReply::Countdown { display },
            };
            if event_tx.send(reply).is_err() {
                break;
            }
        }
    });

    // Task to forward replies to the socket
    let send_task = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            match serde_json::to_string(&reply) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to encode dashboard reply: {}", e);
                }
            }
        }
    });

    // Task to handle incoming requests
    let request_controller = controller.clone();
    let request_tx = reply_tx.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<DashboardRequest>(&text) {
                    Ok(request) => {
                        if let Err(e) = dispatch_request(&request_controller, request).await {
                            let _ = request_tx.send(DashboardReply::Error {
                                message: e.to_string(),
                            });
                        }
                    }
                    Err(e) => {
                        warn!("Invalid dashboard request: {}", e);
                        let _ = request_tx.send(DashboardReply::Error {
                            message: format!("Invalid request: {}", e),
                        });
                    }
                },
                Message::Close(_) => {
                    break;
                }
                _ => {}
            }
        }
    });

    // Wait for either direction to end
    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    // Cleanup: the view unmounts, releasing its feed and ticker
    event_task.abort();
    controller.close();
    state.open_views.fetch_sub(1, Ordering::Relaxed);
    info!("Dashboard view closed for project {}", project_id);
}

/// Translate one wire request into a controller operation
async fn dispatch_request(
    controller: &DashboardController,
    request: DashboardRequest,
) -> SyncResult<()> {
    match request {
        DashboardRequest::ToggleTask { task_id } => controller.toggle_task(&task_id).await,
        DashboardRequest::AddTask {
            task_name,
            assigned_to,
            priority,
        } => controller.add_task(task_name, assigned_to, priority).await,
        DashboardRequest::RemoveTask { task_id } => controller.remove_task(&task_id).await,
        DashboardRequest::AssignTask {
            task_id,
            assigned_to,
        } => controller.assign_task(&task_id, assigned_to).await,
        DashboardRequest::RenameTeam { team_name } => controller.rename_team(team_name).await,
        DashboardRequest::PostMessage { text, sender } => {
            controller.post_message(text, sender).await
        }
        DashboardRequest::StartTimer { duration_hours } => {
            controller.start_timer(duration_hours).await
        }
        DashboardRequest::ToggleTimer => controller.toggle_timer().await,
        DashboardRequest::ResetTimer => controller.reset_timer().await,
        DashboardRequest::SaveFlowchart { data } => controller.save_flowchart(data).await,
    }
}

// ============================================================================
// RELAY WEBSOCKET
// ============================================================================

/// WebSocket upgrade for a presence relay client
async fn relay_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_relay_socket(socket, state))
}

/// Forward room broadcasts between relay clients
async fn handle_relay_socket(socket: WebSocket, state: Arc<AppState>) {
    let client_id = uuid::Uuid::new_v4().to_string();
    info!("Relay client connected: {}", client_id);

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<RelayReply>();

    // Task to forward replies to the socket
    let send_task = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            match serde_json::to_string(&reply) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to encode relay reply: {}", e);
                }
            }
        }
    });

    // Task to handle joins and broadcasts
    let hub = state.relay.clone();
    let recv_client_id = client_id.clone();
    let recv_task = tokio::spawn(async move {
        // One forwarding task per joined room; the client's own
        // envelopes are filtered out here
        let mut room_tasks = Vec::new();

        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RelayRequest>(&text) {
                    Ok(RelayRequest::JoinTeam { team_id }) => {
                        debug!("Client {} joined team {}", recv_client_id, team_id);
                        let mut room_rx = hub.join(&team_id);
                        let forward_tx = reply_tx.clone();
                        let me = recv_client_id.clone();
                        room_tasks.push(tokio::spawn(async move {
                            loop {
                                match room_rx.recv().await {
                                    Ok(envelope) => {
                                        if envelope.sender == me {
                                            continue;
                                        }
                                        let reply = RelayReply::ReceiveUpdate {
                                            team_id: envelope.room_id,
                                            sender: envelope.sender,
                                            payload: envelope.payload,
                                        };
                                        if forward_tx.send(reply).is_err() {
                                            break;
                                        }
                                    }
                                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                                    Err(broadcast::error::RecvError::Closed) => break,
                                }
                            }
                        }));
                    }
                    Ok(RelayRequest::UpdateProject { team_id, payload }) => {
                        hub.broadcast(RelayEnvelope {
                            room_id: team_id,
                            sender: recv_client_id.clone(),
                            payload,
                        });
                    }
                    Err(e) => {
                        warn!("Invalid relay request from {}: {}", recv_client_id, e);
                    }
                },
                Message::Close(_) => {
                    break;
                }
                _ => {}
            }
        }

        for task in room_tasks {
            task.abort();
        }
    });

    // Wait for either direction to end
    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    state.relay.prune();
    info!("Relay client disconnected: {}", client_id);
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warroom_server=info,tower_http=info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let storage_path =
        std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./data/warroom.sled".to_string());
    let session_path =
        std::env::var("SESSION_PATH").unwrap_or_else(|_| "./data/session.json".to_string());

    info!("Initializing storage at: {}", storage_path);
    let store = SledProjectStore::open(StoreConfig::new(&storage_path))?;

    let session = Session::load(&session_path);
    if let Some(project_id) = session.active_project() {
        info!("Resuming active project from session: {}", project_id);
    }

    let state = Arc::new(AppState {
        store: Arc::new(store),
        relay: Arc::new(RelayHub::new()),
        session: Arc::new(session),
        open_views: AtomicUsize::new(0),
        started_at: std::time::Instant::now(),
    });

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        // Health check
        .route("/health", get(health_check))
        // Project setup flow
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/:project_id",
            get(get_project).delete(finish_project),
        )
        // Dashboard view socket
        .route("/ws/:project_id", get(dashboard_ws_handler))
        // Presence relay socket
        .route("/relay", get(relay_ws_handler))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("War Room server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Listening on: http://{}", addr);
    info!("   Dashboard socket: ws://{}/ws/:project_id", addr);
    info!("   Presence relay: ws://{}/relay", addr);
    info!("   Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
