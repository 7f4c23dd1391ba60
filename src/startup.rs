use crate::components::google_calendar::CalendarService;
use crate::config::{Config, Environment};
use crate::error::{config_error, AppResult, Error};
use crate::handlers::{router, AppState};
use crate::shutdown;
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with environment-based configuration.
///
/// Production logs are emitted as JSON.
pub fn init_logging() -> miette::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let production = std::env::var("APP_ENV")
        .ok()
        .and_then(|name| Environment::from_name(&name))
        .is_some_and(|env| env.is_production());

    let registry = tracing_subscriber::registry().with(filter);
    let result = if production {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| Error::Other(format!("Failed to set up logging: {}", e)))?;
    Ok(())
}

/// Load the application config
pub fn load_config() -> miette::Result<Config> {
    match Config::load() {
        Ok(config) => Ok(config),
        Err(e) => {
            error!("Failed to load configuration: {:?}", e);
            Err(e.into())
        }
    }
}

/// CORS restricted to the configured origins, with credentials
pub fn cors_layer(origins: &[String]) -> AppResult<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| config_error(&format!("Invalid CORS origin: {}", origin)))
        })
        .collect::<AppResult<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]))
}

/// Full application: API routes, optional front-end assets and middleware
pub fn build_app(config: &Config, state: AppState) -> AppResult<Router> {
    let mut app = router(state);

    if let Some(dir) = &config.static_dir {
        info!("Serving static files from {}", dir.display());
        let index = ServeFile::new(dir.join("index.html"));
        app = app.fallback_service(ServeDir::new(dir).fallback(index));
    }

    Ok(app
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.cors_origins)?))
}

/// Start the HTTP server and run until a shutdown signal arrives
pub async fn serve(config: Config) -> miette::Result<()> {
    info!(
        "Configured calendars: {}",
        config.calendars.keys().collect::<Vec<_>>().join(", ")
    );

    let calendar = Arc::new(CalendarService::from_config(&config));
    calendar.begin_initialization();

    let app = build_app(&config, AppState::new(calendar))?;

    let addr = SocketAddr::new(config.host, config.port);
    let listener = TcpListener::bind(addr).await.map_err(Error::from)?;
    info!("Server running in {} mode on {}", config.environment, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::wait_for_signal())
        .await
        .map_err(Error::from)?;

    info!("Server shut down");
    Ok(())
}
