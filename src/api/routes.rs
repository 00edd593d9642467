//! HTTP route handlers.

use std::future::Future;
use std::sync::Arc;

use axum::middleware;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::config::HubConfig;
use crate::hub::{AnalyticsLog, AnalyticsSummary, SharedHubController};
use crate::narrative::NarrativeSnapshot;
use crate::nodes::NodeRegistry;

use super::accessibility;
use super::auth;
use super::types::*;

/// Shared application state.
pub struct AppState {
    pub config: HubConfig,
    /// The running hub (or a stand-in during tests)
    pub hub: SharedHubController,
    /// Installed nodes
    pub nodes: NodeRegistry,
    /// Trigger log backing the analytics endpoint
    pub analytics: AnalyticsLog,
    /// Serialises read-modify-write cycles on the profiles file
    pub profiles_lock: Mutex<()>,
}

impl AppState {
    pub fn new(config: HubConfig, hub: SharedHubController, nodes: NodeRegistry) -> Self {
        let analytics = AnalyticsLog::new(config.analytics_path.clone());
        Self {
            config,
            hub,
            nodes,
            analytics,
            profiles_lock: Mutex::new(()),
        }
    }
}

/// Build the dashboard router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/healthz", get(ping));

    let protected_routes = Router::new()
        .route("/", get(overview))
        .route("/api/state", get(get_state))
        .route("/api/reset-state", post(reset_state))
        .route("/api/health", get(get_health))
        .route("/api/nodes", get(list_nodes))
        .route("/api/analytics/summary", get(analytics_summary))
        .route("/api/accessibility", get(accessibility::get_profiles))
        .route("/api/apply-preset", post(accessibility::apply_preset))
        .route(
            "/api/accessibility/override",
            post(accessibility::set_node_override),
        )
        .route("/api/push-config", post(accessibility::push_config))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the dashboard until `shutdown` resolves.
pub async fn serve<F>(state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if state.config.admin.is_none() {
        tracing::warn!(
            "ECHOTRACE_ADMIN_USER/ECHOTRACE_ADMIN_PASS not set; dashboard requests will be refused"
        );
    }

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Dashboard listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Liveness probe, no auth.
async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_state(State(state): State<Arc<AppState>>) -> Json<NarrativeSnapshot> {
    Json(state.hub.state_snapshot().await)
}

async fn reset_state(State(state): State<Arc<AppState>>) -> Json<ResetResponse> {
    let snapshot = state.hub.reset_state().await;
    Json(ResetResponse {
        ok: true,
        state: snapshot,
    })
}

async fn get_health(
    State(state): State<Arc<AppState>>,
) -> Json<std::collections::BTreeMap<String, f64>> {
    Json(state.hub.health_snapshot().await)
}

async fn node_statuses(state: &AppState) -> Vec<NodeStatus> {
    let health = state.hub.health_snapshot().await;
    state
        .nodes
        .entries()
        .iter()
        .map(|(id, entry)| NodeStatus {
            node_id: id.clone(),
            role: entry.role,
            label: entry.label.clone(),
            last_seen: health.get(id).copied(),
        })
        .collect()
}

async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<Vec<NodeStatus>> {
    Json(node_statuses(&state).await)
}

async fn analytics_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<AnalyticsSummary>, (StatusCode, String)> {
    match state.analytics.summary().await {
        Ok(Some(summary)) => Ok(Json(summary)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            "No analytics data recorded yet".to_string(),
        )),
        Err(e) => {
            tracing::error!("Failed to read analytics: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

/// GET / - server-rendered installation snapshot.
async fn overview(State(state): State<Arc<AppState>>) -> Html<String> {
    let narrative = state.hub.state_snapshot().await;
    let nodes = node_statuses(&state).await;
    let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;

    let rows: String = nodes
        .iter()
        .map(|node| {
            let seen = match node.last_seen {
                Some(at) => format!("{:.0}s ago", (now - at).max(0.0)),
                None => "offline".to_string(),
            };
            let heard = if narrative.triggered.contains(&node.node_id) {
                "yes"
            } else {
                "no"
            };
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&node.node_id),
                escape_html(node.label.as_deref().unwrap_or("")),
                node.role.as_str(),
                heard,
                seen
            )
        })
        .collect();

    Html(format!(
        "<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>EchoTrace Hub</title></head>\n\
         <body>\n<h1>Installation Snapshot</h1>\n\
         <p>Narrative: <strong>{}</strong> ({} of {} fragments heard)</p>\n\
         <table>\n<tr><th>Node</th><th>Label</th><th>Role</th><th>Heard</th><th>Last seen</th></tr>\n{}</table>\n\
         </body></html>\n",
        if narrative.unlocked { "unlocked" } else { "locked" },
        narrative.triggered.len(),
        state.nodes.required_fragments(),
        rows
    ))
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
