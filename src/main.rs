//! Storefront Auth Server
//!
//! Development server wiring every endpoint together: password and social
//! login with two-factor support, phone verification over SMS, JWT session
//! management, and the payment webhook. Gateways without credentials in the
//! environment fall back to logging implementations so the server always
//! starts locally.

use std::sync::Arc;

use chrono::Duration;
use dotenv::dotenv;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use storefront_auth::{
    api::{create_routes, AppState},
    config::AppConfig,
    database::DatabaseConfig,
    service::{
        EmailGateway, FacebookProvider, GoogleProvider, LoggingEmailGateway, LoggingSmsGateway,
        LoginService, PaymentWebhookService, PhoneOtpService, ProviderRegistry, SessionStore,
        SmsGateway, SmtpEmailer, TokenService, TwilioGateway, TwoFactorService, UserService,
    },
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenv().ok();

    env_logger::init();

    log::info!("Starting Storefront Auth v{}", storefront_auth::VERSION);

    let config = AppConfig::from_env()?;
    config.validate()?;

    log::info!("Configuration loaded and validated");

    let db_config = DatabaseConfig {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        min_connections: config.database.min_connections,
        connect_timeout: std::time::Duration::from_secs(config.database.connect_timeout_seconds),
        idle_timeout: std::time::Duration::from_secs(config.database.idle_timeout_seconds),
        max_lifetime: std::time::Duration::from_secs(config.database.max_lifetime_seconds),
    };
    let database_pool = db_config.create_pool().await?;

    log::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&database_pool).await?;
    log::info!("Database migrations completed");

    // Outbound gateways; logging stand-ins keep local development working
    // without provider credentials.
    let email_gateway: Arc<dyn EmailGateway> = match &config.email {
        Some(email_config) => Arc::new(SmtpEmailer::new(email_config.clone())?),
        None => {
            log::warn!("SMTP not configured; verification emails will only be logged");
            Arc::new(LoggingEmailGateway)
        }
    };

    let sms_gateway: Arc<dyn SmsGateway> = match &config.sms {
        Some(sms_config) => Arc::new(TwilioGateway::new(sms_config.clone())?),
        None => {
            log::warn!("SMS provider not configured; phone codes will only be logged");
            Arc::new(LoggingSmsGateway)
        }
    };

    let mut providers = ProviderRegistry::new();
    if let Some(oauth) = &config.oauth {
        if let Some(google) = &oauth.google {
            providers = providers.register(Arc::new(GoogleProvider::new(google)?));
            log::info!("Google login enabled");
        }
        if let Some(facebook) = &oauth.facebook {
            providers = providers.register(Arc::new(FacebookProvider::new(facebook)?));
            log::info!("Facebook login enabled");
        }
    }
    if providers.is_empty() {
        log::warn!("No social providers configured");
    }

    // Core services
    let token_service = Arc::new(TokenService::with_expiration(
        database_pool.clone(),
        config.jwt.access_secret.clone(),
        config.jwt.refresh_secret.clone(),
        Duration::hours(config.jwt.access_token_expires_hours),
        Duration::days(config.jwt.refresh_token_expires_days),
    ));

    let user_service = Arc::new(UserService::with_gateways(
        database_pool.clone(),
        email_gateway,
        token_service.clone(),
    ));

    let two_factor_service = Arc::new(TwoFactorService::new(database_pool.clone()));

    let phone_otp_service = Arc::new(PhoneOtpService::new(
        database_pool.clone(),
        config.otp.clone(),
        sms_gateway,
    ));

    let session_store = SessionStore::new(database_pool.clone());

    let login_service = Arc::new(LoginService::new(
        database_pool.clone(),
        (*user_service).clone(),
        (*two_factor_service).clone(),
        (*token_service).clone(),
        session_store,
        providers,
    ));

    let webhook_service = match &config.webhook {
        Some(webhook_config) => Some(Arc::new(PaymentWebhookService::new(
            database_pool.clone(),
            webhook_config.clone(),
        ))),
        None => {
            log::warn!("Payment webhook not configured; /webhooks/payment will refuse deliveries");
            None
        }
    };

    log::info!("Services initialized");

    let app_state = AppState {
        user_service,
        login_service,
        two_factor_service,
        phone_otp_service,
        token_service,
        webhook_service,
    };

    let app = create_routes(app_state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .into_inner(),
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
