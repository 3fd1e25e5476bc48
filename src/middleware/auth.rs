use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::{TokenKind, TokenService};
use crate::error::ApiError;
use crate::tenant::ContextScope;

/// JWT authentication middleware.
///
/// Validates the access token, establishes the request's tenant context, and
/// exposes it to handlers as `Extension<Arc<TenantContext>>`. The scope lives
/// exactly as long as the downstream handler.
pub async fn jwt_auth_middleware(
    State(tokens): State<Arc<TokenService>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let claims = match extract_jwt_from_headers(&headers)
        .map_err(ApiError::unauthorized)
        .and_then(|token| tokens.validate(&token, TokenKind::Access).map_err(ApiError::from))
    {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };

    let mut scope = ContextScope::new();
    let ctx = match scope.install(claims.context()) {
        Ok(ctx) => ctx,
        Err(e) => return ApiError::internal_server_error(e.to_string()).into_response(),
    };

    tracing::debug!(tenant_id = %ctx.tenant_id, user_id = %ctx.user_id, "Request context established");
    request.extensions_mut().insert(ctx);

    let response = next.run(request).await;
    scope.teardown();
    response
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get("authorization")
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    if let Some(token) = auth_str.strip_prefix("Bearer ") {
        if token.trim().is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token.to_string())
    } else {
        Err("Authorization header must use Bearer token format".to_string())
    }
}
