pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use service_core::axum::{
    extract::State,
    http::{HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    client_ip_rate_limit_middleware, security_headers_middleware, request_id_middleware,
    ClientIpRateLimiter, REQUEST_ID_HEADER,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::dtos::HealthResponse;
use crate::services::{
    ExpiringCache, LoginOrchestrator, RefreshOrchestrator, RegistrationOrchestrator, TokenService,
};

#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub service_version: String,
    pub login: LoginOrchestrator,
    pub refresh: RefreshOrchestrator,
    pub registration: RegistrationOrchestrator,
    pub tokens: TokenService,
    pub cache: Arc<dyn ExpiringCache>,
    /// Browser origins allowed to call the API; empty disables CORS.
    pub allowed_origins: Vec<String>,
    /// Shared quota for the routes that send or accept one-time codes.
    pub code_rate_limiter: ClientIpRateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.allowed_origins);

    let code_routes = Router::new()
        .route(
            "/auth/login/two-factor",
            post(handlers::auth::verify_two_factor),
        )
        .route("/auth/register/phone", post(handlers::auth::register_phone))
        .route(
            "/auth/step-up/send",
            post(handlers::auth::send_step_up_code),
        )
        .route_layer(from_fn_with_state(
            state.code_rate_limiter.clone(),
            client_ip_rate_limit_middleware,
        ));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/login/ldap", post(handlers::auth::login_ldap))
        .route("/auth/login/google", post(handlers::auth::login_google))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/revoke", post(handlers::auth::revoke))
        .route("/auth/introspect", post(handlers::auth::introspect))
        .route("/auth/register", post(handlers::auth::register))
        .route(
            "/auth/register/google",
            post(handlers::auth::register_google),
        )
        .merge(code_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware));

    match cors {
        Some(cors) => app.layer(cors),
        None => app,
    }
}

fn cors_layer(allowed_origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                service_core::axum::http::header::AUTHORIZATION,
                service_core::axum::http::header::CONTENT_TYPE,
            ]),
    )
}

/// Service health check: token store and cache must both respond.
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    state.tokens.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Token store health check failed");
        AppError::ServiceUnavailable
    })?;

    state.cache.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Cache health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        service: state.service_name.clone(),
        version: state.service_version.clone(),
        token_store: "up".to_string(),
        cache: "up".to_string(),
    }))
}
