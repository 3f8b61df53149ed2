//! Data models for Beacon.
//!
//! Everything the engine tracks is expressed here: agent positions, declared
//! geofence zones, alerts, and incident reports. The records reference each
//! other by id only. An alert holds the id of its subject agent and of the
//! responding authority, never the records themselves, so deleting a
//! referenced record degrades to a not-found lookup instead of a dangling
//! link.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A pair of geographic coordinates in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Reject coordinates outside the valid ranges: latitude in [-90, 90],
    /// longitude in [-180, 180]. NaN fails both range checks.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(CoreError::Validation(format!(
                "latitude {} out of range [-90, 90]",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(CoreError::Validation(format!(
                "longitude {} out of range [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// A recorded location fix. Immutable once written; a newer fix replaces it
/// wholesale (last-write-wins).
///
/// The timestamp is always set server-side when the fix is recorded, never
/// taken from the client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(coordinates: Coordinates, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            timestamp,
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        self.coordinates().validate()
    }
}

/// Kind of a declared geofence zone. Only `Risk` zones feed the safety
/// score; the other kinds exist for containment queries and map display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneKind {
    /// Elevated-risk region; entering or nearing one lowers the safety score.
    Risk,
    /// Ordinary region with no scoring effect.
    Neutral,
    /// Point of interest tagged for visitors; no scoring effect.
    Attraction,
}

impl ZoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneKind::Risk => "risk",
            ZoneKind::Neutral => "neutral",
            ZoneKind::Attraction => "attraction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "risk" => Some(ZoneKind::Risk),
            "neutral" => Some(ZoneKind::Neutral),
            "attraction" => Some(ZoneKind::Attraction),
            _ => None,
        }
    }
}

/// A named circular geographic region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    pub kind: ZoneKind,
    pub center: Coordinates,
    /// Radius of the region in meters; must be positive.
    pub radius_m: f64,
    /// Free-form administrative region label (e.g. "north-district").
    pub region: String,
    /// Inactive zones are kept in the record store but excluded from every
    /// containment and proximity query.
    pub active: bool,
}

impl Zone {
    pub fn validate(&self) -> Result<(), CoreError> {
        self.center.validate()?;
        if !(self.radius_m > 0.0) {
            return Err(CoreError::Validation(format!(
                "zone radius must be positive, got {}",
                self.radius_m
            )));
        }
        Ok(())
    }
}

/// Operational status of a tracked agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Normal operation.
    Active,
    /// An SOS is in flight for this agent; cleared when the SOS alert
    /// resolves.
    Emergency,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Emergency => "emergency",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AgentStatus::Active),
            "emergency" => Some(AgentStatus::Emergency),
            _ => None,
        }
    }
}

/// A tracked mobile agent (a tourist, in the original deployment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    /// Contact reached over SMS when this agent raises an SOS.
    pub emergency_contact: Option<String>,
    /// Gates whether dashboard-style consumers may see the position. Core
    /// computation ignores this flag.
    pub location_sharing: bool,
    /// Last recorded fix, if any (last-write-wins).
    pub position: Option<Position>,
    /// Cached result of the most recent score computation, kept so scoring
    /// can degrade to it when a collaborator lookup fails.
    pub safety_score: Option<u8>,
}

/// Department an authority responder belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    Police,
    TouristPolice,
    Medical,
}

impl Department {
    pub fn as_str(&self) -> &'static str {
        match self {
            Department::Police => "police",
            Department::TouristPolice => "tourist_police",
            Department::Medical => "medical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "police" => Some(Department::Police),
            "tourist_police" => Some(Department::TouristPolice),
            "medical" => Some(Department::Medical),
            _ => None,
        }
    }
}

/// A responder permitted to transition alerts and manage zones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authority {
    pub id: String,
    pub name: String,
    pub department: Department,
    /// Address notified when work is routed to this responder.
    pub contact: String,
    pub on_duty: bool,
}

/// Role of an acting principal, resolved from the account directory before
/// any gated operation. Capability checks live here so call sites ask about
/// the capability, not the role name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Tourist,
    Authority,
}

impl Role {
    pub fn can_manage_zones(&self) -> bool {
        matches!(self, Role::Authority)
    }

    pub fn can_transition_alerts(&self) -> bool {
        matches!(self, Role::Authority)
    }

    pub fn can_raise_manual_alerts(&self) -> bool {
        matches!(self, Role::Authority)
    }
}

/// How severe an alert or incident is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// What triggered an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    /// Explicit emergency action by the agent.
    Sos,
    /// Generated alongside a filed incident report.
    Incident,
    /// Raised by an authority observing a situation.
    Manual,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Sos => "sos",
            AlertKind::Incident => "incident",
            AlertKind::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sos" => Some(AlertKind::Sos),
            "incident" => Some(AlertKind::Incident),
            "manual" => Some(AlertKind::Manual),
            _ => None,
        }
    }
}

/// Lifecycle state of an alert.
///
/// The lifecycle only ever moves forward:
///
/// ```text
/// active -> acknowledged -> responding -> resolved -> closed
///    \________________________^
/// ```
///
/// (acknowledged may also resolve directly). There is no backward edge; in
/// particular a resolved alert cannot be reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Responding,
    Resolved,
    Closed,
}

impl AlertStatus {
    /// Whether `next` is a permitted transition from this state.
    ///
    /// Permitted edges, exhaustively: active to acknowledged or responding,
    /// acknowledged to responding or resolved, responding to resolved,
    /// resolved to closed.
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        use AlertStatus::*;
        matches!(
            (self, next),
            (Active, Acknowledged)
                | (Active, Responding)
                | (Acknowledged, Responding)
                | (Acknowledged, Resolved)
                | (Responding, Resolved)
                | (Resolved, Closed)
        )
    }

    /// Closed is terminal; nothing leaves it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Responding => "responding",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AlertStatus::Active),
            "acknowledged" => Some(AlertStatus::Acknowledged),
            "responding" => Some(AlertStatus::Responding),
            "resolved" => Some(AlertStatus::Resolved),
            "closed" => Some(AlertStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trackable incident-response record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    /// Id of the agent this alert concerns (weak reference).
    pub subject_id: String,
    pub position: Position,
    pub severity: Severity,
    pub status: AlertStatus,
    pub message: String,
    /// Id of the authority handling the alert, once one has touched it
    /// (weak reference).
    pub authority_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Classification of a filed incident report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    Theft,
    Assault,
    Harassment,
    Accident,
    MedicalEmergency,
    MissingPerson,
    Other,
}

impl IncidentType {
    /// Departments eligible to take this kind of incident. Medical
    /// emergencies route to medical responders; everything else goes to the
    /// police pools.
    pub fn eligible_departments(&self) -> &'static [Department] {
        match self {
            IncidentType::MedicalEmergency => &[Department::Medical],
            _ => &[Department::Police, Department::TouristPolice],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::Theft => "theft",
            IncidentType::Assault => "assault",
            IncidentType::Harassment => "harassment",
            IncidentType::Accident => "accident",
            IncidentType::MedicalEmergency => "medical_emergency",
            IncidentType::MissingPerson => "missing_person",
            IncidentType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "theft" => Some(IncidentType::Theft),
            "assault" => Some(IncidentType::Assault),
            "harassment" => Some(IncidentType::Harassment),
            "accident" => Some(IncidentType::Accident),
            "medical_emergency" => Some(IncidentType::MedicalEmergency),
            "missing_person" => Some(IncidentType::MissingPerson),
            "other" => Some(IncidentType::Other),
            _ => None,
        }
    }
}

/// Filing state of an incident record. The response lifecycle itself is
/// tracked on the linked alert; this reflects only whether a responder has
/// been attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Reported,
    Assigned,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Reported => "reported",
            IncidentStatus::Assigned => "assigned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reported" => Some(IncidentStatus::Reported),
            "assigned" => Some(IncidentStatus::Assigned),
            _ => None,
        }
    }
}

/// A filed report of an event. Always paired 1:1 with an alert of kind
/// `incident` created in the same transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    /// Globally unique, assigned exactly once at creation, never
    /// regenerated.
    pub reference: String,
    pub reporter_id: String,
    pub incident_type: IncidentType,
    pub title: String,
    pub description: String,
    pub position: Position,
    pub severity: Severity,
    /// Witness names or contacts, in the order the reporter listed them.
    pub witnesses: Vec<String>,
    /// References to collected evidence (photo keys, document ids), in
    /// submission order.
    pub evidence_refs: Vec<String>,
    pub assigned_responder: Option<String>,
    /// Id of the alert generated with this incident (weak reference).
    pub alert_id: String,
    pub status: IncidentStatus,
}

/// Everything the ledger needs to file an incident.
#[derive(Debug, Clone, Deserialize)]
pub struct IncidentReport {
    pub reporter_id: String,
    pub incident_type: IncidentType,
    pub title: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub severity: Severity,
    #[serde(default)]
    pub witnesses: Vec<String>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
}

impl IncidentReport {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_valid_ranges() {
        let ok = Coordinates {
            latitude: 90.0,
            longitude: -180.0,
        };
        assert!(ok.validate().is_ok());

        let bad_lat = Coordinates {
            latitude: 90.0001,
            longitude: 0.0,
        };
        assert!(matches!(bad_lat.validate(), Err(CoreError::Validation(_))));

        let bad_lng = Coordinates {
            latitude: 0.0,
            longitude: 180.5,
        };
        assert!(bad_lng.validate().is_err());

        let nan = Coordinates {
            latitude: f64::NAN,
            longitude: 0.0,
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_zone_rejects_non_positive_radius() {
        let mut zone = Zone {
            id: "z1".to_string(),
            name: "old town".to_string(),
            kind: ZoneKind::Risk,
            center: Coordinates {
                latitude: 10.0,
                longitude: 20.0,
            },
            radius_m: 0.0,
            region: "center".to_string(),
            active: true,
        };
        assert!(zone.validate().is_err());

        zone.radius_m = -5.0;
        assert!(zone.validate().is_err());

        zone.radius_m = 250.0;
        assert!(zone.validate().is_ok());
    }

    #[test]
    fn test_permitted_transitions() {
        use AlertStatus::*;

        assert!(Active.can_transition_to(Acknowledged));
        assert!(Active.can_transition_to(Responding));
        assert!(Acknowledged.can_transition_to(Responding));
        assert!(Acknowledged.can_transition_to(Resolved));
        assert!(Responding.can_transition_to(Resolved));
        assert!(Resolved.can_transition_to(Closed));
    }

    #[test]
    fn test_forbidden_transitions() {
        use AlertStatus::*;

        // No skipping straight to resolved.
        assert!(!Active.can_transition_to(Resolved));
        assert!(!Active.can_transition_to(Closed));

        // No backward edges, no reopening.
        assert!(!Acknowledged.can_transition_to(Active));
        assert!(!Responding.can_transition_to(Acknowledged));
        assert!(!Resolved.can_transition_to(Active));
        assert!(!Resolved.can_transition_to(Responding));

        // Closed is terminal.
        for next in [Active, Acknowledged, Responding, Resolved, Closed] {
            assert!(!Closed.can_transition_to(next));
        }
        assert!(Closed.is_terminal());

        // Self-transitions are not edges.
        for state in [Active, Acknowledged, Responding, Resolved] {
            assert!(!state.can_transition_to(state));
        }
    }

    #[test]
    fn test_role_capabilities() {
        assert!(Role::Authority.can_manage_zones());
        assert!(Role::Authority.can_transition_alerts());
        assert!(!Role::Tourist.can_manage_zones());
        assert!(!Role::Tourist.can_transition_alerts());
    }

    #[test]
    fn test_department_routing() {
        assert_eq!(
            IncidentType::MedicalEmergency.eligible_departments(),
            &[Department::Medical]
        );
        assert_eq!(
            IncidentType::Theft.eligible_departments(),
            &[Department::Police, Department::TouristPolice]
        );
    }

    #[test]
    fn test_status_string_roundtrips() {
        for status in [
            AlertStatus::Active,
            AlertStatus::Acknowledged,
            AlertStatus::Responding,
            AlertStatus::Resolved,
            AlertStatus::Closed,
        ] {
            assert_eq!(AlertStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AlertStatus::parse("reopened"), None);
    }
}
