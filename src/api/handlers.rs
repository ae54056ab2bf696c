//! HTTP Request Handlers
//!
//! Axum handlers for processing HTTP requests and responses.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    api::middleware::AuthUser,
    models::requests::*,
    service::{
        LoginOutcome, LoginService, PaymentWebhookService, PhoneOtpService, TokenService,
        TwoFactorService, UserService,
    },
    utils::error::{AppError, AppResult},
    VERSION,
};

use crate::service::login::ClientInfo;

/// Signature header sent by the payment processor
const WEBHOOK_SIGNATURE_HEADER: &str = "stripe-signature";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub login_service: Arc<LoginService>,
    pub two_factor_service: Arc<TwoFactorService>,
    pub phone_otp_service: Arc<PhoneOtpService>,
    pub token_service: Arc<TokenService>,
    pub webhook_service: Option<Arc<PaymentWebhookService>>,
}

/// Standard success response wrapper
#[derive(serde::Serialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

fn client_info(headers: &HeaderMap) -> ClientInfo {
    ClientInfo {
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        ip_address: headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string()),
    }
}

fn login_response(tokens: crate::models::TokenPair, user: crate::models::User) -> LoginResponse {
    LoginResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_type: tokens.token_type,
        expires_in: tokens.expires_in,
        user,
    }
}

/// Health check endpoint
pub async fn health_check(
    State(state): State<AppState>,
) -> AppResult<Json<SuccessResponse<HealthCheckResponse>>> {
    state.user_service.health_check().await?;

    Ok(Json(SuccessResponse::new(HealthCheckResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: VERSION.to_string(),
    })))
}

/// Register a new account
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<SuccessResponse<RegisterResponse>>)> {
    let user = state.user_service.register(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::new(RegisterResponse {
            message: "Account created, check your email for a verification code".to_string(),
            user,
        })),
    ))
}

/// Password login; completes with tokens or pauses as a 202 challenge
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> AppResult<Response> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid request: {}", e)))?;

    let outcome = state
        .login_service
        .login(&request.identifier, &request.password, client_info(&headers))
        .await?;

    Ok(outcome_response(outcome))
}

/// Completes a challenged password login with a second-factor code
pub async fn login_2fa(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginTwoFactorRequest>,
) -> AppResult<Json<SuccessResponse<LoginResponse>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid request: {}", e)))?;

    let (tokens, user) = state
        .login_service
        .verify_login_2fa(request.user_id, &request.code, client_info(&headers))
        .await?;

    Ok(Json(SuccessResponse::new(login_response(tokens, user))))
}

/// Social login via a provider authorization code
pub async fn social_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SocialLoginRequest>,
) -> AppResult<Response> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid request: {}", e)))?;

    let outcome = state
        .login_service
        .social_login(&provider, &request.code, client_info(&headers))
        .await?;

    Ok(outcome_response(outcome))
}

/// Completes a challenged social login
pub async fn social_login_2fa(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SocialLoginTwoFactorRequest>,
) -> AppResult<Json<SuccessResponse<LoginResponse>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid request: {}", e)))?;

    let (tokens, user) = state
        .login_service
        .social_login_verify_2fa(
            &request.session_token,
            request.user_id,
            &request.code,
            client_info(&headers),
        )
        .await?;

    Ok(Json(SuccessResponse::new(login_response(tokens, user))))
}

fn outcome_response(outcome: LoginOutcome) -> Response {
    match outcome {
        LoginOutcome::Complete { tokens, user } => {
            Json(SuccessResponse::new(login_response(tokens, user))).into_response()
        }
        LoginOutcome::Challenge {
            user_id,
            provider,
            session_token,
        } => (
            StatusCode::ACCEPTED,
            Json(SuccessResponse::new(TwoFactorChallengeResponse {
                requires_2fa: true,
                user_id,
                provider,
                session_token,
            })),
        )
            .into_response(),
    }
}

/// Exchange a refresh token for a new access token
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> AppResult<Json<SuccessResponse<RefreshTokenResponse>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid request: {}", e)))?;

    let tokens = state
        .token_service
        .refresh_access_token(&request.refresh_token)
        .await?;

    Ok(Json(SuccessResponse::new(RefreshTokenResponse {
        access_token: tokens.access_token,
        token_type: tokens.token_type,
        expires_in: tokens.expires_in,
    })))
}

/// Revoke a refresh token
pub async fn logout(
    State(state): State<AppState>,
    Json(request): Json<LogoutRequest>,
) -> AppResult<Json<SuccessResponse<MessageResponse>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid request: {}", e)))?;

    state
        .token_service
        .revoke_refresh_token(&request.refresh_token)
        .await?;

    Ok(Json(SuccessResponse::new(MessageResponse::new(
        "Logged out",
    ))))
}

/// Verify an email address with the mailed code
pub async fn verify_email(
    State(state): State<AppState>,
    Json(request): Json<VerifyEmailRequest>,
) -> AppResult<Json<SuccessResponse<MessageResponse>>> {
    state.user_service.verify_email(request).await?;

    Ok(Json(SuccessResponse::new(MessageResponse::new(
        "Email verified",
    ))))
}

/// Resend the verification code to an unverified account
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(request): Json<ResendVerificationRequest>,
) -> AppResult<Json<SuccessResponse<MessageResponse>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid request: {}", e)))?;

    state
        .user_service
        .resend_verification_email(&request.email)
        .await?;

    Ok(Json(SuccessResponse::new(MessageResponse::new(
        "Verification email sent",
    ))))
}

/// Current account profile
pub async fn me(
    State(state): State<AppState>,
    Extension(AuthUser(ctx)): Extension<AuthUser>,
) -> AppResult<Json<SuccessResponse<crate::models::User>>> {
    let user = state.user_service.get_user_by_id(ctx.user_id).await?;
    Ok(Json(SuccessResponse::new(user)))
}

/// Change the account password; all refresh sessions are revoked
pub async fn change_password(
    State(state): State<AppState>,
    Extension(AuthUser(ctx)): Extension<AuthUser>,
    Json(request): Json<ChangePasswordRequest>,
) -> AppResult<Json<SuccessResponse<MessageResponse>>> {
    state
        .user_service
        .change_password(ctx.user_id, request)
        .await?;

    Ok(Json(SuccessResponse::new(MessageResponse::new(
        "Password changed, please log in again",
    ))))
}

/// Update or clear the account phone number
pub async fn update_phone(
    State(state): State<AppState>,
    Extension(AuthUser(ctx)): Extension<AuthUser>,
    Json(request): Json<UpdatePhoneRequest>,
) -> AppResult<Json<SuccessResponse<crate::models::User>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid request: {}", e)))?;

    let user = state
        .user_service
        .set_phone(ctx.user_id, request.phone_number.as_deref())
        .await?;

    Ok(Json(SuccessResponse::new(user)))
}

/// Send a verification code to a phone number
pub async fn send_phone_code(
    State(state): State<AppState>,
    Extension(AuthUser(ctx)): Extension<AuthUser>,
    Json(request): Json<SendPhoneCodeRequest>,
) -> AppResult<Json<SuccessResponse<SendPhoneCodeResponse>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid request: {}", e)))?;

    let sent = state
        .phone_otp_service
        .send(ctx.user_id, &request.phone_number)
        .await?;

    Ok(Json(SuccessResponse::new(SendPhoneCodeResponse {
        message: "Verification code sent".to_string(),
        expires_in: sent.expires_in as i64,
    })))
}

/// Verify a phone number with the received code
pub async fn verify_phone(
    State(state): State<AppState>,
    Extension(AuthUser(ctx)): Extension<AuthUser>,
    Json(request): Json<VerifyPhoneRequest>,
) -> AppResult<Json<SuccessResponse<MessageResponse>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid request: {}", e)))?;

    state
        .phone_otp_service
        .verify(ctx.user_id, &request.phone_number, &request.code)
        .await?;

    Ok(Json(SuccessResponse::new(MessageResponse::new(
        "Phone number verified",
    ))))
}

/// Begin TOTP enrollment
pub async fn setup_two_factor(
    State(state): State<AppState>,
    Extension(AuthUser(ctx)): Extension<AuthUser>,
) -> AppResult<Json<SuccessResponse<crate::models::TwoFactorSetup>>> {
    let user = state.user_service.get_user_by_id(ctx.user_id).await?;
    let setup = state
        .two_factor_service
        .begin_setup(ctx.user_id, &user.email)
        .await?;

    Ok(Json(SuccessResponse::new(setup)))
}

/// Confirm TOTP enrollment; the response carries the one-time backup codes
pub async fn confirm_two_factor(
    State(state): State<AppState>,
    Extension(AuthUser(ctx)): Extension<AuthUser>,
    Json(request): Json<ConfirmTwoFactorRequest>,
) -> AppResult<Json<SuccessResponse<ConfirmTwoFactorResponse>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid request: {}", e)))?;

    let backup_codes = state
        .two_factor_service
        .confirm_setup(ctx.user_id, request.device_id, &request.code)
        .await?;

    Ok(Json(SuccessResponse::new(ConfirmTwoFactorResponse {
        message: "Two-factor authentication enabled. Store these backup codes safely; \
                  they will not be shown again."
            .to_string(),
        backup_codes,
    })))
}

/// Disable two-factor auth; requires the account password
pub async fn disable_two_factor(
    State(state): State<AppState>,
    Extension(AuthUser(ctx)): Extension<AuthUser>,
    Json(request): Json<DisableTwoFactorRequest>,
) -> AppResult<Json<SuccessResponse<MessageResponse>>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(format!("Invalid request: {}", e)))?;

    if !state
        .user_service
        .verify_user_password(ctx.user_id, &request.password)
        .await?
    {
        return Err(AppError::Authentication("Invalid credentials".into()));
    }

    state.two_factor_service.disable(ctx.user_id).await?;

    Ok(Json(SuccessResponse::new(MessageResponse::new(
        "Two-factor authentication disabled",
    ))))
}

/// Enrollment status and remaining backup codes
pub async fn two_factor_status(
    State(state): State<AppState>,
    Extension(AuthUser(ctx)): Extension<AuthUser>,
) -> AppResult<Json<SuccessResponse<crate::models::TwoFactorStatus>>> {
    let status = state.two_factor_service.status(ctx.user_id).await?;
    Ok(Json(SuccessResponse::new(status)))
}

/// Payment processor webhook; signature is verified over the raw body
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<Json<SuccessResponse<MessageResponse>>> {
    let webhook_service = state
        .webhook_service
        .as_ref()
        .ok_or_else(|| AppError::Configuration("Payment webhook is not configured".into()))?;

    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing signature header".into()))?;

    webhook_service.verify_signature(&body, signature)?;
    webhook_service.handle_event(&body).await?;

    Ok(Json(SuccessResponse::new(MessageResponse::new("Received"))))
}
