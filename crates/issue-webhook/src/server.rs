//! HTTP server for GitHub issue webhooks.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, info, warn, Level};

use crate::config::Config;
use crate::error::WebhookError;
use crate::runner::CommandRunner;
use crate::webhooks::{
    classify, verify_signature, Dispatch, EventKind, IssueEvent, DELIVERY_HEADER, EVENT_HEADER,
    SIGNATURE_HEADER,
};
use crate::workflow::{Dispatcher, WorkflowOutcome};

/// GitHub caps webhook payloads at 25 MB.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Shared application state.
///
/// Read-only after startup; each delivery is handled independently.
#[derive(Clone)]
pub struct AppState {
    /// Configuration.
    pub config: Arc<Config>,
    /// Workflow dispatcher.
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// Build state around a command runner.
    #[must_use]
    pub fn new(config: Config, runner: Arc<dyn CommandRunner>) -> Self {
        let config = Arc::new(config);
        let dispatcher = Dispatcher::new(config.clone(), runner);
        Self { config, dispatcher }
    }
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_check))
        .route("/health", get(health_check))
        .route("/webhook", post(github_webhook_handler))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
        .with_state(state)
}

/// Start the HTTP server on the configured port.
///
/// # Errors
///
/// Returns an error if the server fails to bind or serve.
pub async fn run_server(state: AppState) -> Result<()> {
    let port = state.config.port;
    let app = build_router(state);

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind to port {port}"))?;

    info!(port = port, "Issue webhook service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Issue webhook service stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Root endpoint, used as a liveness probe.
async fn root_check() -> Json<Value> {
    Json(json!({ "status": "GitHub issue webhook is running" }))
}

/// Health check endpoint.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Handle incoming GitHub webhooks.
///
/// This handler:
/// 1. Verifies the `X-Hub-Signature-256` signature
/// 2. Parses the payload
/// 3. Classifies the event by label
/// 4. Runs the selected workflow to completion
pub async fn github_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    let delivery_id = header_str(&headers, DELIVERY_HEADER).unwrap_or("unknown").to_string();
    let kind = EventKind::from_header(header_str(&headers, EVENT_HEADER));

    info!(
        delivery_id = %delivery_id,
        event_type = %kind.as_str(),
        "Received GitHub webhook"
    );

    let signature = header_str(&headers, SIGNATURE_HEADER);
    if let Err(e) = verify_signature(&body, signature, &state.config.webhook_secret) {
        warn!(delivery_id = %delivery_id, error = %e, "Rejected webhook signature");
        return Err(e.into());
    }
    debug!(delivery_id = %delivery_id, "Webhook signature verified");

    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        warn!(delivery_id = %delivery_id, error = %e, "Webhook body is not JSON");
        WebhookError::MalformedPayload(e.to_string())
    })?;

    if !matches!(kind, EventKind::Issues | EventKind::IssueComment) {
        debug!(event_type = %kind.as_str(), "Ignoring unhandled event type");
        return Ok(Json(json!({
            "status": "ignored",
            "reason": format!("event ignored: {}", kind.as_str()),
            "delivery_id": delivery_id,
        })));
    }

    let event = IssueEvent::from_value(payload).map_err(|e| {
        warn!(delivery_id = %delivery_id, error = %e, "Failed to parse webhook payload");
        WebhookError::MalformedPayload(e)
    })?;

    let dispatch = classify(&kind, &event, &state.config);
    if let Dispatch::Ignore(reason) = &dispatch {
        info!(
            delivery_id = %delivery_id,
            issue = event.issue.number,
            reason = %reason,
            "Ignoring webhook event"
        );
        return Ok(Json(json!({
            "status": "ignored",
            "reason": reason,
            "delivery_id": delivery_id,
        })));
    }

    info!(
        delivery_id = %delivery_id,
        repo = %event.repository.full_name,
        issue = event.issue.number,
        dispatch = ?dispatch,
        "Dispatching workflow"
    );

    let outcome = state.dispatcher.dispatch(&dispatch, &event).await;
    if let WorkflowOutcome::Failed { step, .. } = &outcome {
        warn!(delivery_id = %delivery_id, step = %step, "Workflow reported failure");
    }

    let mut response = json!(outcome);
    response["delivery_id"] = Value::String(delivery_id);
    Ok(Json(response))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
