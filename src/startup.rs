use crate::components::calendar::{CalendarApi, GoogleCalendarGateway};
use crate::components::planner::{GeminiGateway, PlannerModel};
use crate::components::token::{GoogleIdentityProvider, TokenManager};
use crate::config::Config;
use crate::error::Error;
use crate::handlers::{build_router, AppState};
use crate::session::{InMemorySessionStore, RedisSessionStore, SessionStore};
use crate::shutdown;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize logging with environment-based configuration
pub fn init_logging() -> miette::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Other(format!("Failed to set up logging: {}", e)))?;

    Ok(())
}

/// Load and initialize the application config
pub fn load_config() -> miette::Result<Arc<Config>> {
    match Config::load() {
        Ok(config) => Ok(Arc::new(config)),
        Err(e) => {
            error!("Failed to load configuration: {:?}", e);
            Err(e.into())
        }
    }
}

/// Wire up the external gateways and start the HTTP server
pub async fn start_server(config: Arc<Config>) -> miette::Result<()> {
    // Session store, with an in-memory fallback when Redis is unreachable
    let sessions: Arc<dyn SessionStore> = match RedisSessionStore::new(&config.redis_url) {
        Ok(store) => {
            info!("Connected to Redis successfully");
            Arc::new(store)
        }
        Err(e) => {
            error!("Failed to connect to Redis: {}", e);
            info!("Using in-memory session store as fallback");
            Arc::new(InMemorySessionStore::default())
        }
    };

    // One HTTP client shared by all outbound gateways
    let client = reqwest::Client::new();

    let identity = GoogleIdentityProvider::new(
        client.clone(),
        config.token_url.clone(),
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        config.oauth_redirect_url.clone(),
    );
    let token_manager = TokenManager::new(sessions, Arc::new(identity));

    let planner: Arc<dyn PlannerModel> = Arc::new(GeminiGateway::new(
        client.clone(),
        config.model_api_url.clone(),
        config.gemini_model.clone(),
        config.gemini_api_key.clone(),
    ));

    let calendar: Arc<dyn CalendarApi> = Arc::new(GoogleCalendarGateway::new(
        client,
        config.calendar_api_url.clone(),
        config.google_calendar_id.clone(),
    ));

    let state = AppState {
        config: Arc::clone(&config),
        token_manager,
        planner,
        calendar,
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(Error::from)?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::wait_for_signal())
        .await
        .map_err(Error::from)?;

    info!("Server shut down");
    Ok(())
}
