//! SQLite storage layer for Beacon.
//!
//! This is the record store behind every persistent entity: agents,
//! authorities, zones, alerts, and incidents. Cross-record references are
//! plain id columns; lookups resolve them or report not-found, and nothing
//! at this layer owns anything else's lifecycle.
//!
//! Timestamps are stored as unix seconds in INTEGER columns and always
//! assigned by the server. Ordered sequences (witnesses, evidence
//! references) are stored as JSON arrays in TEXT columns.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::error::CoreError;
use crate::model::{
    Agent, AgentStatus, Alert, AlertKind, AlertStatus, Authority, Coordinates, Department,
    Incident, IncidentStatus, IncidentType, Position, Severity, Zone, ZoneKind,
};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

fn bad_column(column: &'static str, value: &str) -> CoreError {
    CoreError::Validation(format!("stored {column} has unrecognized value: {value}"))
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:beacon.db" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                emergency_contact TEXT,
                location_sharing INTEGER NOT NULL,
                latitude REAL,
                longitude REAL,
                position_ts INTEGER,
                safety_score INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authorities (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                department TEXT NOT NULL,
                contact TEXT NOT NULL,
                on_duty INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS zones (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                radius_m REAL NOT NULL,
                region TEXT NOT NULL,
                active INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                position_ts INTEGER NOT NULL,
                severity TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT NOT NULL,
                authority_id TEXT,
                created_ts INTEGER NOT NULL,
                updated_ts INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for the recent-alert range scan used by scoring.
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_alerts_created_ts
            ON alerts(created_ts)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                reference TEXT NOT NULL UNIQUE,
                reporter_id TEXT NOT NULL,
                incident_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                position_ts INTEGER NOT NULL,
                severity TEXT NOT NULL,
                witnesses TEXT NOT NULL,
                evidence_refs TEXT NOT NULL,
                assigned_responder TEXT,
                alert_id TEXT NOT NULL,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    pub async fn insert_agent(&self, agent: &Agent) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO agents (id, name, status, emergency_contact, location_sharing,
                                latitude, longitude, position_ts, safety_score)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&agent.id)
        .bind(&agent.name)
        .bind(agent.status.as_str())
        .bind(&agent.emergency_contact)
        .bind(agent.location_sharing)
        .bind(agent.position.map(|p| p.latitude))
        .bind(agent.position.map(|p| p.longitude))
        .bind(agent.position.map(|p| p.timestamp.timestamp()))
        .bind(agent.safety_score.map(i64::from))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_agent(&self, id: &str) -> Result<Option<Agent>, CoreError> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| agent_from_row(&r)).transpose()
    }

    pub async fn set_agent_status(&self, id: &str, status: AgentStatus) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE agents SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("agent", id));
        }
        Ok(())
    }

    /// Record a new location fix and the score computed for it.
    /// Last-write-wins: the previous fix is replaced wholesale.
    pub async fn update_agent_position(
        &self,
        id: &str,
        position: &Position,
        safety_score: u8,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE agents
            SET latitude = ?, longitude = ?, position_ts = ?, safety_score = ?
            WHERE id = ?
            "#,
        )
        .bind(position.latitude)
        .bind(position.longitude)
        .bind(position.timestamp.timestamp())
        .bind(i64::from(safety_score))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("agent", id));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Authorities
    // ------------------------------------------------------------------

    pub async fn insert_authority(&self, authority: &Authority) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO authorities (id, name, department, contact, on_duty)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&authority.id)
        .bind(&authority.name)
        .bind(authority.department.as_str())
        .bind(&authority.contact)
        .bind(authority.on_duty)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_authority(&self, id: &str) -> Result<Option<Authority>, CoreError> {
        let row = sqlx::query("SELECT * FROM authorities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| authority_from_row(&r)).transpose()
    }

    /// On-duty authorities in the given departments, in registration order.
    /// Registration order is what makes "first match" deterministic.
    pub async fn on_duty_authorities(
        &self,
        departments: &[Department],
    ) -> Result<Vec<Authority>, CoreError> {
        let rows = sqlx::query("SELECT * FROM authorities WHERE on_duty = 1 ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        let mut authorities = Vec::new();
        for row in &rows {
            let authority = authority_from_row(row)?;
            if departments.contains(&authority.department) {
                authorities.push(authority);
            }
        }
        Ok(authorities)
    }

    // ------------------------------------------------------------------
    // Zones
    // ------------------------------------------------------------------

    pub async fn insert_zone(&self, zone: &Zone) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO zones (id, name, kind, latitude, longitude, radius_m, region, active)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&zone.id)
        .bind(&zone.name)
        .bind(zone.kind.as_str())
        .bind(zone.center.latitude)
        .bind(zone.center.longitude)
        .bind(zone.radius_m)
        .bind(&zone.region)
        .bind(zone.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_zone(&self, zone: &Zone) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE zones
            SET name = ?, kind = ?, latitude = ?, longitude = ?, radius_m = ?, region = ?, active = ?
            WHERE id = ?
            "#,
        )
        .bind(&zone.name)
        .bind(zone.kind.as_str())
        .bind(zone.center.latitude)
        .bind(zone.center.longitude)
        .bind(zone.radius_m)
        .bind(&zone.region)
        .bind(zone.active)
        .bind(&zone.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("zone", zone.id.clone()));
        }
        Ok(())
    }

    pub async fn delete_zone(&self, id: &str) -> Result<(), CoreError> {
        let result = sqlx::query("DELETE FROM zones WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("zone", id));
        }
        Ok(())
    }

    pub async fn get_zone(&self, id: &str) -> Result<Option<Zone>, CoreError> {
        let row = sqlx::query("SELECT * FROM zones WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| zone_from_row(&r)).transpose()
    }

    /// All active zones, for seeding the in-memory index at startup.
    pub async fn active_zones(&self) -> Result<Vec<Zone>, CoreError> {
        let rows = sqlx::query("SELECT * FROM zones WHERE active = 1")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(zone_from_row).collect()
    }

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    pub async fn insert_alert(&self, alert: &Alert) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO alerts (id, kind, subject_id, latitude, longitude, position_ts,
                                severity, status, message, authority_id, created_ts, updated_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.id)
        .bind(alert.kind.as_str())
        .bind(&alert.subject_id)
        .bind(alert.position.latitude)
        .bind(alert.position.longitude)
        .bind(alert.position.timestamp.timestamp())
        .bind(alert.severity.as_str())
        .bind(alert.status.as_str())
        .bind(&alert.message)
        .bind(&alert.authority_id)
        .bind(alert.created_at.timestamp())
        .bind(alert.updated_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_alert(&self, id: &str) -> Result<Option<Alert>, CoreError> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| alert_from_row(&r)).transpose()
    }

    /// Alerts created at or after the cutoff, newest first. Backs the
    /// recent-alert term of the safety score.
    pub async fn alerts_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Alert>, CoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM alerts
            WHERE created_ts >= ?
            ORDER BY created_ts DESC
            "#,
        )
        .bind(cutoff.timestamp())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(alert_from_row).collect()
    }

    /// Commit a lifecycle transition, guarded by the status the caller
    /// validated against: the update only applies if the stored status still
    /// equals `from`. Returns false when a concurrent writer got there
    /// first, in which case the caller re-reads and re-validates.
    ///
    /// A NULL message bind keeps the existing message; the authority claim
    /// sticks to whoever touched the alert first.
    pub async fn transition_alert(
        &self,
        id: &str,
        from: AlertStatus,
        to: AlertStatus,
        message: Option<&str>,
        authority_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET status = ?,
                message = COALESCE(?, message),
                authority_id = COALESCE(authority_id, ?),
                updated_ts = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(to.as_str())
        .bind(message)
        .bind(authority_id)
        .bind(updated_at.timestamp())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ------------------------------------------------------------------
    // Incidents
    // ------------------------------------------------------------------

    /// Write an incident and its generated alert in one transaction, so a
    /// caller never observes one without the other. A UNIQUE violation on
    /// the reference column rolls the whole pair back; the ledger retries
    /// with a fresh reference.
    pub async fn insert_incident_with_alert(
        &self,
        incident: &Incident,
        alert: &Alert,
    ) -> Result<(), CoreError> {
        let witnesses = serde_json::to_string(&incident.witnesses)
            .map_err(|e| CoreError::Validation(format!("witness list not serializable: {e}")))?;
        let evidence_refs = serde_json::to_string(&incident.evidence_refs)
            .map_err(|e| CoreError::Validation(format!("evidence list not serializable: {e}")))?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO incidents (id, reference, reporter_id, incident_type, title, description,
                                   latitude, longitude, position_ts, severity, witnesses,
                                   evidence_refs, assigned_responder, alert_id, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&incident.id)
        .bind(&incident.reference)
        .bind(&incident.reporter_id)
        .bind(incident.incident_type.as_str())
        .bind(&incident.title)
        .bind(&incident.description)
        .bind(incident.position.latitude)
        .bind(incident.position.longitude)
        .bind(incident.position.timestamp.timestamp())
        .bind(incident.severity.as_str())
        .bind(witnesses)
        .bind(evidence_refs)
        .bind(&incident.assigned_responder)
        .bind(&incident.alert_id)
        .bind(incident.status.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO alerts (id, kind, subject_id, latitude, longitude, position_ts,
                                severity, status, message, authority_id, created_ts, updated_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.id)
        .bind(alert.kind.as_str())
        .bind(&alert.subject_id)
        .bind(alert.position.latitude)
        .bind(alert.position.longitude)
        .bind(alert.position.timestamp.timestamp())
        .bind(alert.severity.as_str())
        .bind(alert.status.as_str())
        .bind(&alert.message)
        .bind(&alert.authority_id)
        .bind(alert.created_at.timestamp())
        .bind(alert.updated_at.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_incident(&self, id: &str) -> Result<Option<Incident>, CoreError> {
        let row = sqlx::query("SELECT * FROM incidents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| incident_from_row(&r)).transpose()
    }

    pub async fn assign_responder(
        &self,
        incident_id: &str,
        authority_id: &str,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE incidents
            SET assigned_responder = ?, status = ?
            WHERE id = ?
            "#,
        )
        .bind(authority_id)
        .bind(IncidentStatus::Assigned.as_str())
        .bind(incident_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("incident", incident_id));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Row decoding
// ----------------------------------------------------------------------

fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent, CoreError> {
    let status: String = row.get("status");
    let latitude: Option<f64> = row.get("latitude");
    let longitude: Option<f64> = row.get("longitude");
    let position_ts: Option<i64> = row.get("position_ts");
    let safety_score: Option<i64> = row.get("safety_score");

    let position = match (latitude, longitude, position_ts) {
        (Some(latitude), Some(longitude), Some(seconds)) => Some(Position {
            latitude,
            longitude,
            timestamp: ts(seconds),
        }),
        _ => None,
    };

    Ok(Agent {
        id: row.get("id"),
        name: row.get("name"),
        status: AgentStatus::parse(&status).ok_or_else(|| bad_column("agent status", &status))?,
        emergency_contact: row.get("emergency_contact"),
        location_sharing: row.get("location_sharing"),
        position,
        safety_score: safety_score.map(|s| s.clamp(0, 100) as u8),
    })
}

fn authority_from_row(row: &SqliteRow) -> Result<Authority, CoreError> {
    let department: String = row.get("department");

    Ok(Authority {
        id: row.get("id"),
        name: row.get("name"),
        department: Department::parse(&department)
            .ok_or_else(|| bad_column("department", &department))?,
        contact: row.get("contact"),
        on_duty: row.get("on_duty"),
    })
}

fn zone_from_row(row: &SqliteRow) -> Result<Zone, CoreError> {
    let kind: String = row.get("kind");

    Ok(Zone {
        id: row.get("id"),
        name: row.get("name"),
        kind: ZoneKind::parse(&kind).ok_or_else(|| bad_column("zone kind", &kind))?,
        center: Coordinates {
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
        },
        radius_m: row.get("radius_m"),
        region: row.get("region"),
        active: row.get("active"),
    })
}

fn alert_from_row(row: &SqliteRow) -> Result<Alert, CoreError> {
    let kind: String = row.get("kind");
    let severity: String = row.get("severity");
    let status: String = row.get("status");
    let position_ts: i64 = row.get("position_ts");

    Ok(Alert {
        id: row.get("id"),
        kind: AlertKind::parse(&kind).ok_or_else(|| bad_column("alert kind", &kind))?,
        subject_id: row.get("subject_id"),
        position: Position {
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
            timestamp: ts(position_ts),
        },
        severity: Severity::parse(&severity).ok_or_else(|| bad_column("severity", &severity))?,
        status: AlertStatus::parse(&status).ok_or_else(|| bad_column("alert status", &status))?,
        message: row.get("message"),
        authority_id: row.get("authority_id"),
        created_at: ts(row.get("created_ts")),
        updated_at: ts(row.get("updated_ts")),
    })
}

fn incident_from_row(row: &SqliteRow) -> Result<Incident, CoreError> {
    let incident_type: String = row.get("incident_type");
    let severity: String = row.get("severity");
    let status: String = row.get("status");
    let witnesses: String = row.get("witnesses");
    let evidence_refs: String = row.get("evidence_refs");
    let position_ts: i64 = row.get("position_ts");

    Ok(Incident {
        id: row.get("id"),
        reference: row.get("reference"),
        reporter_id: row.get("reporter_id"),
        incident_type: IncidentType::parse(&incident_type)
            .ok_or_else(|| bad_column("incident type", &incident_type))?,
        title: row.get("title"),
        description: row.get("description"),
        position: Position {
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
            timestamp: ts(position_ts),
        },
        severity: Severity::parse(&severity).ok_or_else(|| bad_column("severity", &severity))?,
        witnesses: serde_json::from_str(&witnesses)
            .map_err(|_| bad_column("witnesses", &witnesses))?,
        evidence_refs: serde_json::from_str(&evidence_refs)
            .map_err(|_| bad_column("evidence_refs", &evidence_refs))?,
        assigned_responder: row.get("assigned_responder"),
        alert_id: row.get("alert_id"),
        status: IncidentStatus::parse(&status)
            .ok_or_else(|| bad_column("incident status", &status))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Coordinates;
    use chrono::Duration;

    async fn test_storage() -> Storage {
        Storage::new("sqlite::memory:").await.unwrap()
    }

    fn test_agent(id: &str) -> Agent {
        Agent {
            id: id.to_string(),
            name: "Ana".to_string(),
            status: AgentStatus::Active,
            emergency_contact: Some("+66-800-000-000".to_string()),
            location_sharing: true,
            position: None,
            safety_score: None,
        }
    }

    fn test_alert(id: &str, status: AlertStatus, created_at: DateTime<Utc>) -> Alert {
        Alert {
            id: id.to_string(),
            kind: AlertKind::Sos,
            subject_id: "agent-1".to_string(),
            position: Position {
                latitude: 13.75,
                longitude: 100.5,
                timestamp: created_at,
            },
            severity: Severity::Critical,
            status,
            message: "help".to_string(),
            authority_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[tokio::test]
    async fn test_agent_roundtrip_and_position_update() {
        let storage = test_storage().await;
        let agent = test_agent("agent-1");
        storage.insert_agent(&agent).await.unwrap();

        let loaded = storage.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Ana");
        assert!(loaded.position.is_none());

        let now = Utc::now();
        let position = Position::new(
            Coordinates {
                latitude: 13.75,
                longitude: 100.5,
            },
            now,
        );
        storage
            .update_agent_position("agent-1", &position, 70)
            .await
            .unwrap();

        let loaded = storage.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(loaded.safety_score, Some(70));
        let stored = loaded.position.unwrap();
        assert_eq!(stored.latitude, 13.75);
        assert_eq!(stored.timestamp.timestamp(), now.timestamp());
    }

    #[tokio::test]
    async fn test_position_update_for_missing_agent() {
        let storage = test_storage().await;
        let position = Position::new(
            Coordinates {
                latitude: 0.0,
                longitude: 0.0,
            },
            Utc::now(),
        );
        let result = storage.update_agent_position("ghost", &position, 85).await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_transition_guard_rejects_stale_status() {
        let storage = test_storage().await;
        let now = Utc::now();
        storage
            .insert_alert(&test_alert("a1", AlertStatus::Active, now))
            .await
            .unwrap();

        // Guarded on the actual stored status: applies.
        let applied = storage
            .transition_alert(
                "a1",
                AlertStatus::Active,
                AlertStatus::Acknowledged,
                None,
                "auth-1",
                now,
            )
            .await
            .unwrap();
        assert!(applied);

        // Guarded on a status the alert no longer has: does not apply.
        let applied = storage
            .transition_alert(
                "a1",
                AlertStatus::Active,
                AlertStatus::Responding,
                None,
                "auth-2",
                now,
            )
            .await
            .unwrap();
        assert!(!applied);

        let alert = storage.get_alert("a1").await.unwrap().unwrap();
        assert_eq!(alert.status, AlertStatus::Acknowledged);
        // First toucher keeps the claim.
        assert_eq!(alert.authority_id.as_deref(), Some("auth-1"));
    }

    #[tokio::test]
    async fn test_transition_keeps_message_without_notes() {
        let storage = test_storage().await;
        let now = Utc::now();
        storage
            .insert_alert(&test_alert("a1", AlertStatus::Active, now))
            .await
            .unwrap();

        storage
            .transition_alert(
                "a1",
                AlertStatus::Active,
                AlertStatus::Acknowledged,
                None,
                "auth-1",
                now,
            )
            .await
            .unwrap();
        let alert = storage.get_alert("a1").await.unwrap().unwrap();
        assert_eq!(alert.message, "help");

        storage
            .transition_alert(
                "a1",
                AlertStatus::Acknowledged,
                AlertStatus::Resolved,
                Some("false alarm"),
                "auth-1",
                now,
            )
            .await
            .unwrap();
        let alert = storage.get_alert("a1").await.unwrap().unwrap();
        assert_eq!(alert.message, "false alarm");
    }

    #[tokio::test]
    async fn test_alerts_since_cutoff() {
        let storage = test_storage().await;
        let now = Utc::now();
        storage
            .insert_alert(&test_alert("fresh", AlertStatus::Active, now))
            .await
            .unwrap();
        storage
            .insert_alert(&test_alert(
                "stale",
                AlertStatus::Active,
                now - Duration::hours(30),
            ))
            .await
            .unwrap();

        let recent = storage.alerts_since(now - Duration::hours(24)).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "fresh");
    }

    #[tokio::test]
    async fn test_incident_reference_unique() {
        let storage = test_storage().await;
        let now = Utc::now();

        let incident = Incident {
            id: "i1".to_string(),
            reference: "INC-20240601-ABC123".to_string(),
            reporter_id: "agent-1".to_string(),
            incident_type: IncidentType::Theft,
            title: "Stolen bag".to_string(),
            description: "Bag taken at the market".to_string(),
            position: Position {
                latitude: 13.75,
                longitude: 100.5,
                timestamp: now,
            },
            severity: Severity::Medium,
            witnesses: vec!["W1".to_string()],
            evidence_refs: vec![],
            assigned_responder: None,
            alert_id: "a1".to_string(),
            status: IncidentStatus::Reported,
        };
        let alert = test_alert("a1", AlertStatus::Active, now);
        storage
            .insert_incident_with_alert(&incident, &alert)
            .await
            .unwrap();

        // Same reference again: the whole pair is rejected.
        let mut duplicate = incident.clone();
        duplicate.id = "i2".to_string();
        duplicate.alert_id = "a2".to_string();
        let second_alert = test_alert("a2", AlertStatus::Active, now);
        let err = storage
            .insert_incident_with_alert(&duplicate, &second_alert)
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert!(storage.get_alert("a2").await.unwrap().is_none());

        let loaded = storage.get_incident("i1").await.unwrap().unwrap();
        assert_eq!(loaded.witnesses, vec!["W1".to_string()]);
        assert_eq!(loaded.status, IncidentStatus::Reported);
    }

    #[tokio::test]
    async fn test_on_duty_filtering_preserves_registration_order() {
        let storage = test_storage().await;
        for (id, department, on_duty) in [
            ("p1", Department::Police, true),
            ("m1", Department::Medical, true),
            ("p2", Department::Police, false),
            ("t1", Department::TouristPolice, true),
        ] {
            storage
                .insert_authority(&Authority {
                    id: id.to_string(),
                    name: id.to_string(),
                    department,
                    contact: format!("{id}@responders.example"),
                    on_duty,
                })
                .await
                .unwrap();
        }

        let pool = storage
            .on_duty_authorities(&[Department::Police, Department::TouristPolice])
            .await
            .unwrap();
        let ids: Vec<&str> = pool.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "t1"]);
    }
}
