//! HTTP API handlers for Beacon.
//!
//! A thin shell over the engine: handlers decode the request, resolve the
//! acting principal where an operation is role-gated, call into the
//! zones/scoring/lifecycle/incidents modules, and map the error taxonomy to
//! status codes. No business rule lives here.
//!
//! Error mapping: validation 400, permission 403, not-found 404, invalid
//! transition 409, record-store failure 502 (retryable).

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::CoreError;
use crate::incidents::IncidentLedger;
use crate::lifecycle::{self, NewAlert};
use crate::model::{
    Agent, AgentStatus, Alert, AlertKind, AlertStatus, Authority, Coordinates, Department,
    Incident, IncidentReport, Position, Severity, Zone, ZoneKind,
};
use crate::notify::NotificationOutbox;
use crate::scoring;
use crate::storage::Storage;
use crate::zones::ZoneIndex;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub zones: Arc<ZoneIndex>,
    pub outbox: NotificationOutbox,
    pub ledger: Arc<IncidentLedger>,
    /// Deployment-local offset applied before the night-hours check.
    pub utc_offset: FixedOffset,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Permission => StatusCode::FORBIDDEN,
            CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
            CoreError::Collaborator(_) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

async fn require_capability(
    storage: &Storage,
    actor_id: &str,
    check: fn(&crate::model::Role) -> bool,
) -> Result<(), CoreError> {
    let role = lifecycle::resolve_role(storage, actor_id).await?;
    if !check(&role) {
        return Err(CoreError::Permission);
    }
    Ok(())
}

// ============================================================================
// Agents
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    pub id: Option<String>,
    pub name: String,
    pub emergency_contact: Option<String>,
    #[serde(default = "default_true")]
    pub location_sharing: bool,
}

fn default_true() -> bool {
    true
}

/// POST /agents - Register a tracked agent.
#[instrument(skip(state, request))]
pub async fn register_agent(
    State(state): State<AppState>,
    Json(request): Json<RegisterAgentRequest>,
) -> Result<(StatusCode, Json<Agent>), CoreError> {
    if request.name.trim().is_empty() {
        return Err(CoreError::Validation(
            "agent name must not be empty".to_string(),
        ));
    }

    let agent = Agent {
        id: request.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: request.name,
        status: AgentStatus::Active,
        emergency_contact: request.emergency_contact,
        location_sharing: request.location_sharing,
        position: None,
        safety_score: None,
    };
    state.storage.insert_agent(&agent).await?;

    info!(agent_id = %agent.id, "Agent registered");
    Ok((StatusCode::CREATED, Json(agent)))
}

/// GET /agents/:id - Fetch an agent record.
#[instrument(skip(state))]
pub async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<Agent>, CoreError> {
    let agent = state
        .storage
        .get_agent(&agent_id)
        .await?
        .ok_or_else(|| CoreError::not_found("agent", agent_id))?;
    Ok(Json(agent))
}

#[derive(Debug, Deserialize)]
pub struct LocationUpdateRequest {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Serialize)]
pub struct LocationUpdateResponse {
    pub agent_id: String,
    pub safety_score: u8,
    pub in_risk_zone: bool,
    pub recorded_at: DateTime<Utc>,
}

/// POST /agents/:id/location - Record a location fix and score it.
///
/// The fix is timestamped server-side. The response carries the freshly
/// computed safety score, which is also cached on the agent record. Scoring
/// degrades rather than fails: a collaborator error during the recent-alert
/// lookup falls back to the cached score, and the update still succeeds.
#[instrument(skip(state, request), fields(agent_id = %agent_id))]
pub async fn update_location(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<LocationUpdateRequest>,
) -> Result<Json<LocationUpdateResponse>, CoreError> {
    let coordinates = Coordinates {
        latitude: request.latitude,
        longitude: request.longitude,
    };
    coordinates.validate()?;

    let agent = state
        .storage
        .get_agent(&agent_id)
        .await?
        .ok_or_else(|| CoreError::not_found("agent", agent_id.clone()))?;

    let now = Utc::now();
    let safety_score = scoring::score_agent(
        &state.storage,
        &state.zones,
        &agent,
        &coordinates,
        now.with_timezone(&state.utc_offset),
    )
    .await;

    let position = Position::new(coordinates, now);
    state
        .storage
        .update_agent_position(&agent.id, &position, safety_score)
        .await?;

    let in_risk_zone = state.zones.is_in_risk_zone(&coordinates);
    info!(
        agent_id = %agent.id,
        safety_score,
        in_risk_zone,
        "Location recorded"
    );

    Ok(Json(LocationUpdateResponse {
        agent_id: agent.id,
        safety_score,
        in_risk_zone,
        recorded_at: now,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SosRequest {
    /// Where the emergency is. Defaults to the agent's last recorded fix.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub message: Option<String>,
}

/// POST /agents/:id/sos - Raise an SOS for an agent.
///
/// Files a critical alert, flips the agent to emergency status, and
/// notifies the authority pool plus the agent's emergency contact. Works
/// off the agent's last known position when the request carries none.
#[instrument(skip(state, request), fields(agent_id = %agent_id))]
pub async fn raise_sos(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(request): Json<SosRequest>,
) -> Result<(StatusCode, Json<Alert>), CoreError> {
    let agent = state
        .storage
        .get_agent(&agent_id)
        .await?
        .ok_or_else(|| CoreError::not_found("agent", agent_id.clone()))?;

    let coordinates = match (request.latitude, request.longitude) {
        (Some(latitude), Some(longitude)) => Coordinates {
            latitude,
            longitude,
        },
        _ => agent
            .position
            .map(|p| p.coordinates())
            .ok_or_else(|| {
                CoreError::Validation(
                    "SOS without coordinates requires a previously recorded position".to_string(),
                )
            })?,
    };

    let alert = lifecycle::create_alert(
        &state.storage,
        &state.outbox,
        NewAlert {
            kind: AlertKind::Sos,
            subject_id: agent.id,
            coordinates,
            severity: Severity::Critical,
            message: request.message.unwrap_or_else(|| "SOS activated".to_string()),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(alert)))
}

// ============================================================================
// Authorities
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterAuthorityRequest {
    pub id: Option<String>,
    pub name: String,
    pub department: Department,
    pub contact: String,
    #[serde(default = "default_true")]
    pub on_duty: bool,
}

/// POST /authorities - Register a responder.
#[instrument(skip(state, request))]
pub async fn register_authority(
    State(state): State<AppState>,
    Json(request): Json<RegisterAuthorityRequest>,
) -> Result<(StatusCode, Json<Authority>), CoreError> {
    if request.name.trim().is_empty() {
        return Err(CoreError::Validation(
            "authority name must not be empty".to_string(),
        ));
    }

    let authority = Authority {
        id: request.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: request.name,
        department: request.department,
        contact: request.contact,
        on_duty: request.on_duty,
    };
    state.storage.insert_authority(&authority).await?;

    info!(
        authority_id = %authority.id,
        department = authority.department.as_str(),
        "Authority registered"
    );
    Ok((StatusCode::CREATED, Json(authority)))
}

// ============================================================================
// Zones
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ZoneRequest {
    /// Acting principal; must resolve to the authority role.
    pub actor_id: String,
    pub name: String,
    pub kind: ZoneKind,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
    pub region: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl ZoneRequest {
    fn into_zone(self, id: String) -> Zone {
        Zone {
            id,
            name: self.name,
            kind: self.kind,
            center: Coordinates {
                latitude: self.latitude,
                longitude: self.longitude,
            },
            radius_m: self.radius_m,
            region: self.region,
            active: self.active,
        }
    }
}

/// POST /zones - Declare a zone. Authority role required.
///
/// The record store write commits first, then the in-memory index picks the
/// zone up; queries see the zone set atomically either way.
#[instrument(skip(state, request))]
pub async fn create_zone(
    State(state): State<AppState>,
    Json(request): Json<ZoneRequest>,
) -> Result<(StatusCode, Json<Zone>), CoreError> {
    require_capability(&state.storage, &request.actor_id, |r| r.can_manage_zones()).await?;

    let zone = request.into_zone(Uuid::new_v4().to_string());
    zone.validate()?;
    state.storage.insert_zone(&zone).await?;
    state.zones.upsert(zone.clone())?;

    info!(zone_id = %zone.id, kind = zone.kind.as_str(), "Zone created");
    Ok((StatusCode::CREATED, Json(zone)))
}

/// PUT /zones/:id - Replace a zone's definition. Authority role required.
#[instrument(skip(state, request), fields(zone_id = %zone_id))]
pub async fn update_zone(
    State(state): State<AppState>,
    Path(zone_id): Path<String>,
    Json(request): Json<ZoneRequest>,
) -> Result<Json<Zone>, CoreError> {
    require_capability(&state.storage, &request.actor_id, |r| r.can_manage_zones()).await?;

    let zone = request.into_zone(zone_id);
    zone.validate()?;
    state.storage.update_zone(&zone).await?;
    state.zones.upsert(zone.clone())?;

    info!(zone_id = %zone.id, active = zone.active, "Zone updated");
    Ok(Json(zone))
}

#[derive(Debug, Deserialize)]
pub struct ActorQuery {
    pub actor_id: String,
}

/// DELETE /zones/:id - Remove a zone. Authority role required.
#[instrument(skip(state), fields(zone_id = %zone_id))]
pub async fn delete_zone(
    State(state): State<AppState>,
    Path(zone_id): Path<String>,
    Query(query): Query<ActorQuery>,
) -> Result<StatusCode, CoreError> {
    require_capability(&state.storage, &query.actor_id, |r| r.can_manage_zones()).await?;

    state.storage.delete_zone(&zone_id).await?;
    state.zones.remove(&zone_id);

    info!(zone_id = %zone_id, "Zone deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PointQuery {
    pub latitude: f64,
    pub longitude: f64,
}

/// GET /zones/containing - Active zones whose region contains the point.
#[instrument(skip(state))]
pub async fn containing_zones(
    State(state): State<AppState>,
    Query(query): Query<PointQuery>,
) -> Result<Json<Vec<Zone>>, CoreError> {
    let point = Coordinates {
        latitude: query.latitude,
        longitude: query.longitude,
    };
    point.validate()?;
    Ok(Json(state.zones.containing_zones(&point)))
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub latitude: f64,
    pub longitude: f64,
    /// Search radius around the point (default: 5 km).
    #[serde(default = "default_nearby_radius")]
    pub radius_m: f64,
}

fn default_nearby_radius() -> f64 {
    5_000.0
}

#[derive(Debug, Serialize)]
pub struct NearbyZone {
    #[serde(flatten)]
    pub zone: Zone,
    pub distance_m: f64,
}

/// GET /zones/nearby - Active zones whose center is within the radius,
/// nearest first.
#[instrument(skip(state))]
pub async fn nearby_zones(
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyZone>>, CoreError> {
    let point = Coordinates {
        latitude: query.latitude,
        longitude: query.longitude,
    };
    point.validate()?;

    let hits = state
        .zones
        .nearby_zones(&point, query.radius_m)
        .into_iter()
        .map(|(zone, distance_m)| NearbyZone { zone, distance_m })
        .collect();
    Ok(Json(hits))
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ManualAlertRequest {
    /// Acting principal; must resolve to the authority role.
    pub actor_id: String,
    pub subject_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub severity: Severity,
    pub message: String,
}

/// POST /alerts - Raise a manual alert for an observed situation.
/// Authority role required.
#[instrument(skip(state, request))]
pub async fn create_manual_alert(
    State(state): State<AppState>,
    Json(request): Json<ManualAlertRequest>,
) -> Result<(StatusCode, Json<Alert>), CoreError> {
    require_capability(&state.storage, &request.actor_id, |r| {
        r.can_raise_manual_alerts()
    })
    .await?;

    let alert = lifecycle::create_alert(
        &state.storage,
        &state.outbox,
        NewAlert {
            kind: AlertKind::Manual,
            subject_id: request.subject_id,
            coordinates: Coordinates {
                latitude: request.latitude,
                longitude: request.longitude,
            },
            severity: request.severity,
            message: request.message,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(alert)))
}

/// GET /alerts/:id - Fetch an alert.
#[instrument(skip(state))]
pub async fn get_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Json<Alert>, CoreError> {
    let alert = state
        .storage
        .get_alert(&alert_id)
        .await?
        .ok_or_else(|| CoreError::not_found("alert", alert_id))?;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    /// Acting principal; must resolve to the authority role.
    pub actor_id: String,
    pub status: AlertStatus,
    /// Optional response notes; overwrite the alert message when present.
    pub notes: Option<String>,
}

/// POST /alerts/:id/transition - Advance an alert along its lifecycle.
#[instrument(skip(state, request), fields(alert_id = %alert_id))]
pub async fn transition_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Alert>, CoreError> {
    let alert = lifecycle::transition_alert(
        &state.storage,
        &state.outbox,
        &alert_id,
        request.status,
        &request.actor_id,
        request.notes,
    )
    .await?;
    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
pub struct RecentAlertsQuery {
    /// Lookback window in hours (default: 24).
    #[serde(default = "default_lookback_hours")]
    pub hours: u32,
}

fn default_lookback_hours() -> u32 {
    24
}

#[derive(Debug, Serialize)]
pub struct RecentAlertsResponse {
    pub alerts: Vec<Alert>,
    pub lookback_hours: u32,
}

/// GET /alerts/recent - Alerts created inside the lookback window, newest
/// first.
#[instrument(skip(state))]
pub async fn recent_alerts(
    State(state): State<AppState>,
    Query(query): Query<RecentAlertsQuery>,
) -> Result<Json<RecentAlertsResponse>, CoreError> {
    let cutoff = Utc::now() - chrono::Duration::hours(i64::from(query.hours));
    let alerts = state.storage.alerts_since(cutoff).await?;

    info!(
        alert_count = alerts.len(),
        lookback_hours = query.hours,
        "Recent alerts queried"
    );
    Ok(Json(RecentAlertsResponse {
        alerts,
        lookback_hours: query.hours,
    }))
}

// ============================================================================
// Incidents
// ============================================================================

#[derive(Debug, Serialize)]
pub struct IncidentFiledResponse {
    pub incident: Incident,
    pub alert: Alert,
}

/// POST /incidents - File an incident report.
///
/// Returns the incident and its linked alert; filing them is atomic.
#[instrument(skip(state, report))]
pub async fn file_incident(
    State(state): State<AppState>,
    Json(report): Json<IncidentReport>,
) -> Result<(StatusCode, Json<IncidentFiledResponse>), CoreError> {
    let (incident, alert) = state
        .ledger
        .file(&state.storage, &state.outbox, report)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(IncidentFiledResponse { incident, alert }),
    ))
}

/// GET /incidents/:id - Fetch an incident record.
#[instrument(skip(state))]
pub async fn get_incident(
    State(state): State<AppState>,
    Path(incident_id): Path<String>,
) -> Result<Json<Incident>, CoreError> {
    let incident = state
        .storage
        .get_incident(&incident_id)
        .await?
        .ok_or_else(|| CoreError::not_found("incident", incident_id))?;
    Ok(Json(incident))
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
