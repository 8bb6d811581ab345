use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    error::AppError,
    utils::RequestOrigin,
};

use crate::{
    dtos::auth::{
        AuthResult, GoogleRegisterRequest, PhoneRegisterRequest, RegisterRequest,
        StepUpSendRequest, StepUpSendResponse,
    },
    services::Registration,
    utils::{Password, ValidatedJson},
    AppState,
};

fn registration_status(res: &AuthResult) -> StatusCode {
    if res.success {
        StatusCode::CREATED
    } else {
        res.status()
    }
}

/// Register a new user with username and password
pub async fn register(
    State(state): State<AppState>,
    origin: RequestOrigin,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client_ip = origin.client_ip(None);
    let registration = Registration {
        username: req.username,
        password: Password::new(req.password),
        email: req.email,
        phone_number: req.phone_number,
    };

    let res = state.registration.register(registration, &client_ip).await?;
    Ok((registration_status(&res), Json(res)))
}

/// Register a password-less account from a Google access token
pub async fn register_google(
    State(state): State<AppState>,
    origin: RequestOrigin,
    ValidatedJson(req): ValidatedJson<GoogleRegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client_ip = origin.client_ip(None);
    let res = state
        .registration
        .register_with_federated(&req.access_token, &client_ip)
        .await?;
    Ok((registration_status(&res), Json(res)))
}

/// Register an account for a phone number verified with a step-up code
pub async fn register_phone(
    State(state): State<AppState>,
    origin: RequestOrigin,
    ValidatedJson(req): ValidatedJson<PhoneRegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client_ip = origin.client_ip(None);
    let res = state
        .registration
        .register_with_phone(&req.phone_number, &req.code, &client_ip)
        .await?;
    Ok((registration_status(&res), Json(res)))
}

/// Send a verification code to a phone number ahead of phone registration
pub async fn send_step_up_code(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<StepUpSendRequest>,
) -> Result<impl IntoResponse, AppError> {
    let masked_phone = state
        .registration
        .request_phone_code(&req.phone_number)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StepUpSendResponse {
            masked_phone,
            expires_in: state.registration.phone_code_ttl_seconds().unwrap_or_default(),
        }),
    ))
}
