use std::sync::Arc;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::approval::ApprovalEngine;
use crate::auth::TokenService;
use crate::database::ApprovalStore;
use crate::handlers;
use crate::middleware::jwt_auth_middleware;
use crate::notification::Notifier;

/// Shared handler state
pub struct AppState<S: ApprovalStore, N: Notifier> {
    pub engine: ApprovalEngine<S, N>,
    pub tokens: Arc<TokenService>,
}

impl<S: ApprovalStore, N: Notifier> Clone for AppState<S, N> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            tokens: Arc::clone(&self.tokens),
        }
    }
}

impl<S: ApprovalStore, N: Notifier> AppState<S, N> {
    pub fn new(engine: ApprovalEngine<S, N>, tokens: TokenService) -> Self {
        Self {
            engine,
            tokens: Arc::new(tokens),
        }
    }
}

pub fn app<S, N>(state: AppState<S, N>) -> Router
where
    S: ApprovalStore + 'static,
    N: Notifier + 'static,
{
    Router::new()
        // Public
        .route("/health", get(handlers::health))
        // Protected API
        .merge(approval_routes(state))
        // Global middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn approval_routes<S, N>(state: AppState<S, N>) -> Router
where
    S: ApprovalStore + 'static,
    N: Notifier + 'static,
{
    use handlers::approval;

    Router::new()
        .route("/api/approvals", post(approval::create::<S, N>))
        .route("/api/approvals/:id", get(approval::get::<S, N>))
        .route("/api/approvals/:id/submit", post(approval::submit::<S, N>))
        .route(
            "/api/approvals/:id/lines/:line_id/decision",
            post(approval::decide::<S, N>),
        )
        .route(
            "/api/approvals/:id/lines/:line_id/delegate",
            post(approval::delegate::<S, N>),
        )
        .route("/api/approvals/:id/cancel", post(approval::cancel::<S, N>))
        .route_layer(from_fn_with_state(Arc::clone(&state.tokens), jwt_auth_middleware))
        .with_state(state)
}
