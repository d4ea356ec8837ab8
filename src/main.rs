use axum::{
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use audix_server::config::Config;
use audix_server::state::AppState;
use audix_server::{db, handlers, websocket};

const CSP: &str = "default-src 'self'; style-src 'self' 'unsafe-inline'; script-src 'self'; connect-src 'self'; img-src 'self' data:;";

/// Restricts `/metrics` to loopback connections only — mirrors the
/// production-hardening posture the rest of the security-headers stack
/// already applies.
async fn require_loopback(
    connect_info: Option<axum::extract::ConnectInfo<SocketAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match connect_info {
        Some(axum::extract::ConnectInfo(addr)) if addr.ip().is_loopback() => next.run(req).await,
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "audix_server=info,tower_http=info,sqlx=warn".parse().unwrap());

    if std::env::var("NODE_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("audix-server starting...");

    // Fatal if SESSION_SECRET / AUDIX_LIVE_TOKEN / DATABASE_URL are missing
    // (spec §6: "absent ⇒ abort").
    let config = Config::from_env().expect("failed to load configuration");
    info!("configuration loaded");

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("failed to create database pool");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run database migrations");
    info!("database migrations applied");

    db::health_check(&pool).await.expect("database health check failed");
    info!("database health check passed");

    let cors = if config.is_production {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!("CORS: no ALLOWED_ORIGINS configured — all cross-origin requests will be denied");
        }
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true)
    } else {
        info!("CORS: permissive (dev mode)");
        CorsLayer::permissive()
    };

    let addr = config.server_addr();
    let state = AppState::new(pool, config);

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    // Global limit: 10 req/s per IP, burst 20.
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .finish()
            .expect("invalid global governor configuration"),
    );

    // Stricter limit on the public credential-bearing endpoints.
    let auth_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(5)
            .finish()
            .expect("invalid auth governor configuration"),
    );

    let public_router = Router::new()
        .route("/api/request-access", post(handlers::access::request_access))
        .route("/api/setup-status", get(handlers::access::setup_status))
        .route("/api/setup-pin", post(handlers::access::setup_pin))
        .route("/api/login", post(handlers::auth::login))
        .route_layer(GovernorLayer {
            config: auth_governor_conf,
        });

    let app = Router::new()
        .route("/", get(handlers::pages::root))
        .route("/login", get(handlers::pages::login_page))
        .route("/setup", get(handlers::pages::setup_page))
        .route("/app", get(handlers::pages::app_page))
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(move || async move { metric_handle.render() })
                .route_layer(middleware::from_fn(require_loopback)),
        )
        .merge(public_router)
        .route("/api/logout", post(handlers::auth::logout))
        .route("/api/live", get(handlers::live::live))
        .route("/api/report", post(handlers::live::report))
        .route("/api/internal/live-snapshot", get(handlers::live::live_snapshot))
        .route("/ws/presence", get(websocket::presence::ws_presence))
        .route("/ws/signal", get(websocket::signaling::ws_signal))
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("content-security-policy"),
            HeaderValue::from_static(CSP),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(prometheus_layer)
        .layer(cors)
        .with_state(state);

    info!("audix-server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind to address");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server failed to start");
}
