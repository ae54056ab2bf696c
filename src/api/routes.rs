//! API Route Definitions
//!
//! All HTTP routes. Account-scoped routes sit behind the authentication
//! middleware; the login, registration, and webhook surfaces are public.

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};

use super::handlers::{self, AppState};
use super::middleware::auth_middleware;

/// Creates the full API router
pub fn create_routes(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/login/2fa", post(handlers::login_2fa))
        .route("/auth/social/{provider}", post(handlers::social_login))
        .route("/auth/social/2fa", post(handlers::social_login_2fa))
        .route("/auth/refresh", post(handlers::refresh_token))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/verify-email", post(handlers::verify_email))
        .route(
            "/auth/resend-verification",
            post(handlers::resend_verification),
        )
        .route("/webhooks/payment", post(handlers::payment_webhook));

    let protected = Router::new()
        .route("/users/me", get(handlers::me))
        .route("/users/me/password", post(handlers::change_password))
        .route("/users/me/phone", put(handlers::update_phone))
        .route("/users/me/phone/send-code", post(handlers::send_phone_code))
        .route("/users/me/phone/verify", post(handlers::verify_phone))
        .route(
            "/users/me/2fa",
            get(handlers::two_factor_status).post(handlers::setup_two_factor),
        )
        .route("/users/me/2fa/confirm", post(handlers::confirm_two_factor))
        .route("/users/me/2fa/disable", post(handlers::disable_two_factor))
        .route_layer(from_fn_with_state(
            state.token_service.clone(),
            auth_middleware,
        ));

    public.merge(protected).with_state(state)
}
