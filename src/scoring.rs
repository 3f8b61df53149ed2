//! Safety score computation.
//!
//! A score is a 0-100 integer derived from proximity to declared risk
//! zones, the local hour, and the density of recent nearby alerts. The
//! computation is deterministic (same zone set, alert set, and clock always
//! produce the same score), and the pure part is separated from the
//! storage-facing wrapper so it can be tested without a database.
//!
//! Scoring must never block a location update: if the recent-alert lookup
//! fails, the wrapper falls back to the agent's cached score (or the base
//! score) instead of propagating the error.

use chrono::{DateTime, Duration, FixedOffset, Timelike};
use tracing::warn;

use crate::geo::distance_meters;
use crate::model::{Agent, Alert, AlertKind, Coordinates, Zone, ZoneKind};
use crate::storage::Storage;
use crate::zones::ZoneIndex;

/// Everyone starts here; penalties subtract from it.
pub const BASE_SCORE: i32 = 85;

/// Penalty for standing inside a risk zone.
const INSIDE_RISK_PENALTY: i32 = 30;
/// Penalty for being within twice a risk zone's radius of its center.
const NEAR_RISK_PENALTY: i32 = 15;
/// Penalty applied during night hours.
const NIGHT_PENALTY: i32 = 10;
/// Penalty per qualifying recent alert nearby.
const RECENT_ALERT_PENALTY: i32 = 5;

/// An alert counts against the score if it is within this distance.
const RECENT_ALERT_RADIUS_M: f64 = 1_000.0;
/// ...and no older than this.
const RECENT_ALERT_WINDOW_HOURS: i64 = 24;

/// Night hours: 22:00 through 05:59 local.
fn is_night(hour: u32) -> bool {
    hour >= 22 || hour <= 5
}

/// Compute the safety score for a position at a moment in time.
///
/// Zones are evaluated independently: every risk zone the point is inside
/// of subtracts 30, every one it is merely near (within twice the radius)
/// subtracts 15, with no cap on the accumulation. Each sos or incident
/// alert within 1 km created in the last 24 hours subtracts another 5.
/// The result is clamped to [0, 100].
///
/// `now` carries the deployment's local offset; only its hour feeds the
/// night check, the instant itself anchors the recency window.
pub fn compute_score(
    point: &Coordinates,
    now: DateTime<FixedOffset>,
    risk_zones: &[Zone],
    recent_alerts: &[Alert],
) -> u8 {
    let mut score = BASE_SCORE;

    for zone in risk_zones {
        if zone.kind != ZoneKind::Risk {
            continue;
        }
        let d = distance_meters(point, &zone.center);
        if d <= zone.radius_m {
            score -= INSIDE_RISK_PENALTY;
        } else if d <= 2.0 * zone.radius_m {
            score -= NEAR_RISK_PENALTY;
        }
    }

    if is_night(now.hour()) {
        score -= NIGHT_PENALTY;
    }

    let window = Duration::hours(RECENT_ALERT_WINDOW_HOURS);
    for alert in recent_alerts {
        if !matches!(alert.kind, AlertKind::Sos | AlertKind::Incident) {
            continue;
        }
        let age = now.signed_duration_since(alert.created_at);
        if age < Duration::zero() || age > window {
            continue;
        }
        if distance_meters(point, &alert.position.coordinates()) <= RECENT_ALERT_RADIUS_M {
            score -= RECENT_ALERT_PENALTY;
        }
    }

    score.clamp(0, 100) as u8
}

/// Score an agent's position, degrading gracefully on collaborator failure.
///
/// The zone snapshot comes from the in-memory index and cannot fail; the
/// recent-alert lookup goes to the record store and can. On failure the
/// agent's cached score (or the base score, if none was ever computed) is
/// returned so the surrounding location update still succeeds.
pub async fn score_agent(
    storage: &Storage,
    zones: &ZoneIndex,
    agent: &Agent,
    point: &Coordinates,
    now: DateTime<FixedOffset>,
) -> u8 {
    let risk_zones = zones.risk_zones();
    let cutoff = now.with_timezone(&chrono::Utc) - Duration::hours(RECENT_ALERT_WINDOW_HOURS);

    match storage.alerts_since(cutoff).await {
        Ok(recent) => compute_score(point, now, &risk_zones, &recent),
        Err(e) => {
            let fallback = agent.safety_score.unwrap_or(BASE_SCORE as u8);
            warn!(
                agent_id = %agent.id,
                error = %e,
                fallback,
                "Recent-alert lookup failed; falling back to cached score"
            );
            fallback
        }
    }
}
