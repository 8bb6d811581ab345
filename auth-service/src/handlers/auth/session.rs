use service_core::{
    axum::{extract::State, response::IntoResponse, Json},
    error::AppError,
    utils::RequestOrigin,
};

use crate::{
    dtos::auth::{
        GoogleLoginRequest, IntrospectRequest, IntrospectResponse, LoginRequest, RefreshRequest,
        RevokeRequest, RevokeResponse, TwoFactorRequest,
    },
    services::LoginAttempt,
    utils::{Password, ValidatedJson},
    AppState,
};

/// Login with username and password against the local user directory
pub async fn login(
    State(state): State<AppState>,
    origin: RequestOrigin,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client_ip = origin.client_ip(req.ip_address.as_deref());
    let password = Password::new(req.password);
    let attempt = LoginAttempt {
        captcha: req.captcha.as_deref(),
        two_factor_code: req.two_factor_code.as_deref(),
        client_ip: &client_ip,
    };

    let res = state
        .login
        .login_with_password(&req.username, &password, attempt)
        .await?;
    Ok((res.status(), Json(res)))
}

/// Login with username and password against the LDAP directory
pub async fn login_ldap(
    State(state): State<AppState>,
    origin: RequestOrigin,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client_ip = origin.client_ip(req.ip_address.as_deref());
    let password = Password::new(req.password);
    let attempt = LoginAttempt {
        captcha: req.captcha.as_deref(),
        two_factor_code: req.two_factor_code.as_deref(),
        client_ip: &client_ip,
    };

    let res = state
        .login
        .login_with_directory(&req.username, &password, attempt)
        .await?;
    Ok((res.status(), Json(res)))
}

/// Login with a Google access token
pub async fn login_google(
    State(state): State<AppState>,
    origin: RequestOrigin,
    ValidatedJson(req): ValidatedJson<GoogleLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client_ip = origin.client_ip(req.ip_address.as_deref());
    let attempt = LoginAttempt {
        captcha: req.captcha.as_deref(),
        two_factor_code: req.two_factor_code.as_deref(),
        client_ip: &client_ip,
    };

    let res = state
        .login
        .login_with_federated(&req.access_token, attempt)
        .await?;
    Ok((res.status(), Json(res)))
}

/// Complete a step-up login with the code sent to the user's phone
pub async fn verify_two_factor(
    State(state): State<AppState>,
    origin: RequestOrigin,
    ValidatedJson(req): ValidatedJson<TwoFactorRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client_ip = origin.client_ip(req.ip_address.as_deref());
    let res = state
        .login
        .verify_two_factor(&req.username, &req.code, &client_ip)
        .await?;
    Ok((res.status(), Json(res)))
}

/// Rotate a refresh token
pub async fn refresh(
    State(state): State<AppState>,
    origin: RequestOrigin,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client_ip = origin.client_ip(req.ip_address.as_deref());
    let res = state.refresh.refresh(&req.refresh_token, &client_ip).await?;
    Ok((res.status(), Json(res)))
}

/// Revoke a refresh token (logout)
pub async fn revoke(
    State(state): State<AppState>,
    origin: RequestOrigin,
    ValidatedJson(req): ValidatedJson<RevokeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client_ip = origin.client_ip(None);
    let revoked = state.refresh.revoke(&req.refresh_token, &client_ip).await?;
    Ok(Json(RevokeResponse { revoked }))
}

/// Introspect an access token
pub async fn introspect(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<IntrospectRequest>,
) -> impl IntoResponse {
    let res = match state.tokens.validate_access_token(&req.token) {
        Ok(claims) => IntrospectResponse::from(claims),
        Err(_) => IntrospectResponse::inactive(),
    };
    Json(res)
}
