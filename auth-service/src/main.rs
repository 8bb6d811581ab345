use auth_service::{
    build_router,
    config::AuthConfig,
    db,
    services::{
        AuditSink, Capability, CaptchaVerifier, DirectoryConnector, DirectoryVerifier,
        ExpiringCache, FederatedVerifier, GoogleIdentityProvider, LdapConnector,
        LoggingSmsSender, LoginOrchestrator, PgAuditSink, PgTokenStore, PgUserDirectory,
        PolicyService, RecaptchaVerifier, RedisCache, RefreshOrchestrator,
        RegistrationOrchestrator, StepUpService, TokenService, UserDirectory,
    },
    AppState,
};
use service_core::middleware::create_client_ip_rate_limiter;
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    dotenvy::dotenv().ok();

    // Fail fast on invalid configuration
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting authentication service"
    );

    let pool = db::connect(&config.database).await?;
    let cache: Arc<dyn ExpiringCache> = Arc::new(RedisCache::new(&config.redis).await?);

    let policy = PolicyService::new(config.password_policy.clone(), config.lockout.clone());
    let users: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(pool.clone(), policy));
    let tokens = TokenService::new(
        Arc::new(config.token.clone()),
        Arc::new(PgTokenStore::new(pool.clone())),
    );
    let audit: Arc<dyn AuditSink> = Arc::new(PgAuditSink::new(pool));

    let step_up = StepUpService::new(cache.clone(), Arc::new(LoggingSmsSender), &config.step_up);

    let captcha: Arc<dyn CaptchaVerifier> = Arc::new(RecaptchaVerifier::new(&config.captcha)?);
    let directory = config.ldap.as_ref().map(|ldap| {
        tracing::info!(url = %ldap.url(), base_dn = %ldap.base_dn, "Directory login enabled");
        let connector: Arc<dyn DirectoryConnector> = Arc::new(LdapConnector::new(ldap));
        DirectoryVerifier::new(connector, users.clone(), ldap)
    });
    let federated = FederatedVerifier::new(
        Arc::new(GoogleIdentityProvider::new(&config.google)?),
        users.clone(),
    );

    let policy = &config.policy;
    tracing::info!(
        captcha = policy.captcha_enabled,
        two_factor = policy.two_factor_enabled,
        oauth = policy.oauth_enabled,
        phone_registration = policy.phone_registration_enabled,
        ip_lock = policy.ip_lock_enabled,
        email_verification = policy.email_verification_required,
        "Authentication policy loaded"
    );

    let login = LoginOrchestrator::new(
        users.clone(),
        tokens.clone(),
        audit.clone(),
        policy.email_verification_required,
    )
    .with_captcha(Capability::when(policy.captcha_enabled, captcha))
    .with_step_up(Capability::when(policy.two_factor_enabled, step_up.clone()))
    .with_directory(Capability::from(directory))
    .with_federated(Capability::when(policy.oauth_enabled, federated.clone()));

    let refresh = RefreshOrchestrator::new(
        tokens.clone(),
        users.clone(),
        audit.clone(),
        policy.ip_lock_enabled,
    );

    let registration = RegistrationOrchestrator::new(users, audit)
        .with_federated(Capability::when(policy.oauth_enabled, federated))
        .with_phone(Capability::when(policy.phone_registration_enabled, step_up));

    let code_rate_limiter = create_client_ip_rate_limiter(
        config.rate_limit.code_attempts,
        config.rate_limit.window_seconds,
    );

    let state = AppState {
        service_name: config.service_name.clone(),
        service_version: config.service_version.clone(),
        login,
        refresh,
        registration,
        tokens,
        cache,
        allowed_origins: config.allowed_origins.clone(),
        code_rate_limiter,
    };

    let app = build_router(state);
    let addr = config.common.socket_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
