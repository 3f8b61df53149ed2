//! Beacon - geospatial safety monitoring and alert lifecycle engine.
//!
//! # API Endpoints
//!
//! - `POST /agents` - Register a tracked agent
//! - `POST /agents/:id/location` - Record a location fix and score it
//! - `POST /agents/:id/sos` - Raise an SOS
//! - `GET /agents/:id` - Fetch an agent
//! - `POST /authorities` - Register a responder
//! - `POST /zones`, `PUT /zones/:id`, `DELETE /zones/:id` - Manage zones
//! - `GET /zones/containing`, `GET /zones/nearby` - Zone queries
//! - `POST /alerts` - Raise a manual alert
//! - `POST /alerts/:id/transition` - Advance an alert's lifecycle
//! - `GET /alerts/recent`, `GET /alerts/:id` - Alert queries
//! - `POST /incidents`, `GET /incidents/:id` - Incident filing and lookup
//! - `GET /health` - Health check

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use chrono::FixedOffset;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use beacon::api::{
    AppState, containing_zones, create_manual_alert, create_zone, delete_zone, file_incident,
    get_agent, get_alert, get_incident, health_check, nearby_zones, raise_sos, recent_alerts,
    register_agent, register_authority, transition_alert, update_location, update_zone,
};
use beacon::incidents::IncidentLedger;
use beacon::notify::{LogDispatcher, NotificationDispatcher, NotificationOutbox, WebhookDispatcher};
use beacon::storage::Storage;
use beacon::zones::ZoneIndex;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:beacon.db?mode=rwc";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("beacon=info".parse()?))
        .init();

    // Load configuration from environment
    let port: u16 = env::var("BEACON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let db_url = env::var("BEACON_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

    // Deployment-local offset for the night-hours term of the safety score.
    let offset_hours: i32 = env::var("BEACON_UTC_OFFSET_HOURS")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    let utc_offset = FixedOffset::east_opt(offset_hours * 3600)
        .ok_or_else(|| anyhow::anyhow!("BEACON_UTC_OFFSET_HOURS out of range: {offset_hours}"))?;

    info!(port, db_url = %db_url, offset_hours, "Starting Beacon server");

    // Initialize storage and seed the zone index from it
    let storage = Storage::new(&db_url).await?;
    let zones = Arc::new(ZoneIndex::from_zones(storage.active_zones().await?));
    info!(zone_count = zones.len(), "Zone index loaded");

    // Notification outbox: webhook relay when configured, log-only otherwise
    let dispatcher: Arc<dyn NotificationDispatcher> = match env::var("BEACON_WEBHOOK_URL") {
        Ok(url) => {
            info!(relay_url = %url, "Using webhook notification dispatcher");
            Arc::new(WebhookDispatcher::new(&url))
        }
        Err(_) => {
            info!("No relay configured; notifications go to the log");
            Arc::new(LogDispatcher)
        }
    };
    let outbox = NotificationOutbox::spawn(dispatcher);

    // Create application state
    let state = AppState {
        storage,
        zones,
        outbox,
        ledger: Arc::new(IncidentLedger::new()),
        utc_offset,
    };

    // Build router
    let app = Router::new()
        .route("/agents", post(register_agent))
        .route("/agents/:id", get(get_agent))
        .route("/agents/:id/location", post(update_location))
        .route("/agents/:id/sos", post(raise_sos))
        .route("/authorities", post(register_authority))
        .route("/zones", post(create_zone))
        .route("/zones/containing", get(containing_zones))
        .route("/zones/nearby", get(nearby_zones))
        .route("/zones/:id", put(update_zone).delete(delete_zone))
        .route("/alerts", post(create_manual_alert))
        .route("/alerts/recent", get(recent_alerts))
        .route("/alerts/:id", get(get_alert))
        .route("/alerts/:id/transition", post(transition_alert))
        .route("/incidents", post(file_incident))
        .route("/incidents/:id", get(get_incident))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Beacon is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
