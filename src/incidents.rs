//! Incident ledger: filing reports and pairing them with alerts.
//!
//! Filing an incident does three things, in order: generates a reference
//! number the store guarantees unique, writes the incident together with
//! its kind=`incident` alert in one transaction, and tries to attach a
//! responder. Assignment is best-effort: an incident with no eligible
//! responder still files, just unassigned.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{
    Alert, AlertKind, AlertStatus, Authority, Incident, IncidentReport, IncidentStatus,
    IncidentType, Position,
};
use crate::notify::{Channel, Notification, NotificationOutbox};
use crate::storage::Storage;

/// How many fresh references to try before giving up on a pathological
/// collision streak.
const REFERENCE_ATTEMPTS: usize = 5;

/// Strategy for picking a responder out of the eligible on-duty pool.
///
/// The pool arrives already filtered to the departments appropriate for the
/// incident type, in registration order.
pub trait ResponderSelector: Send + Sync {
    fn select<'a>(
        &self,
        incident_type: IncidentType,
        pool: &'a [Authority],
    ) -> Option<&'a Authority>;
}

/// Default policy: the first eligible responder wins. Deliberately does no
/// load balancing and no distance ranking; swap in another
/// [`ResponderSelector`] to change that.
pub struct FirstMatch;

impl ResponderSelector for FirstMatch {
    fn select<'a>(
        &self,
        _incident_type: IncidentType,
        pool: &'a [Authority],
    ) -> Option<&'a Authority> {
        pool.first()
    }
}

pub struct IncidentLedger {
    selector: Arc<dyn ResponderSelector>,
}

impl IncidentLedger {
    pub fn new() -> Self {
        Self::with_selector(Arc::new(FirstMatch))
    }

    pub fn with_selector(selector: Arc<dyn ResponderSelector>) -> Self {
        Self { selector }
    }

    /// File an incident and its linked alert.
    ///
    /// The pair is atomic from the caller's perspective: either both records
    /// exist afterwards or neither does. The alert starts `active` with the
    /// incident's severity and a message synthesized from the title.
    pub async fn file(
        &self,
        storage: &Storage,
        outbox: &NotificationOutbox,
        report: IncidentReport,
    ) -> Result<(Incident, Alert), CoreError> {
        report.coordinates().validate()?;
        if report.title.trim().is_empty() {
            return Err(CoreError::Validation(
                "incident title must not be empty".to_string(),
            ));
        }

        let reporter = storage
            .get_agent(&report.reporter_id)
            .await?
            .ok_or_else(|| CoreError::not_found("agent", report.reporter_id.clone()))?;

        let now = Utc::now();
        let position = Position::new(report.coordinates(), now);

        for attempt in 1..=REFERENCE_ATTEMPTS {
            let alert = Alert {
                id: Uuid::new_v4().to_string(),
                kind: AlertKind::Incident,
                subject_id: reporter.id.clone(),
                position,
                severity: report.severity,
                status: AlertStatus::Active,
                message: format!("Incident reported: {}", report.title),
                authority_id: None,
                created_at: now,
                updated_at: now,
            };
            let incident = Incident {
                id: Uuid::new_v4().to_string(),
                reference: generate_reference(now),
                reporter_id: reporter.id.clone(),
                incident_type: report.incident_type,
                title: report.title.clone(),
                description: report.description.clone(),
                position,
                severity: report.severity,
                witnesses: report.witnesses.clone(),
                evidence_refs: report.evidence_refs.clone(),
                assigned_responder: None,
                alert_id: alert.id.clone(),
                status: IncidentStatus::Reported,
            };

            match storage.insert_incident_with_alert(&incident, &alert).await {
                Ok(()) => {
                    let incident = self.assign(storage, outbox, incident).await;
                    info!(
                        incident_id = %incident.id,
                        reference = %incident.reference,
                        alert_id = %alert.id,
                        incident_type = incident.incident_type.as_str(),
                        assigned = incident.assigned_responder.is_some(),
                        "Incident filed"
                    );
                    return Ok((incident, alert));
                }
                Err(e) if e.is_unique_violation() && attempt < REFERENCE_ATTEMPTS => {
                    warn!(attempt, "Incident reference collided; regenerating");
                }
                Err(e) => return Err(e),
            }
        }

        // The loop either returns the filed pair or the final attempt's
        // error.
        unreachable!("incident filing loop always returns")
    }

    /// Best-effort responder assignment. Every failure path leaves the
    /// incident filed and unassigned.
    async fn assign(
        &self,
        storage: &Storage,
        outbox: &NotificationOutbox,
        mut incident: Incident,
    ) -> Incident {
        let departments = incident.incident_type.eligible_departments();
        let pool = match storage.on_duty_authorities(departments).await {
            Ok(pool) => pool,
            Err(e) => {
                warn!(
                    incident_id = %incident.id,
                    error = %e,
                    "Responder lookup failed; incident left unassigned"
                );
                return incident;
            }
        };

        let Some(responder) = self.selector.select(incident.incident_type, &pool) else {
            info!(
                incident_id = %incident.id,
                incident_type = incident.incident_type.as_str(),
                "No eligible on-duty responder; incident left unassigned"
            );
            return incident;
        };

        match storage.assign_responder(&incident.id, &responder.id).await {
            Ok(()) => {
                outbox.enqueue(Notification {
                    channel: Channel::Email,
                    recipients: vec![responder.contact.clone()],
                    subject: format!("Incident {} assigned to you", incident.reference),
                    body: format!(
                        "{} ({}) at ({:.5}, {:.5}): {}",
                        incident.title,
                        incident.incident_type.as_str(),
                        incident.position.latitude,
                        incident.position.longitude,
                        incident.description
                    ),
                });
                incident.assigned_responder = Some(responder.id.clone());
                incident.status = IncidentStatus::Assigned;
            }
            Err(e) => {
                warn!(
                    incident_id = %incident.id,
                    responder_id = %responder.id,
                    error = %e,
                    "Responder assignment write failed; incident left unassigned"
                );
            }
        }
        incident
    }
}

impl Default for IncidentLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Reference format: `INC-YYYYMMDD-XXXXXX`. The suffix is random; the
/// UNIQUE column plus the retry loop in [`IncidentLedger::file`] is what
/// actually guarantees uniqueness.
fn generate_reference(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..6].to_uppercase();
    format!("INC-{}-{}", now.format("%Y%m%d"), suffix)
}
