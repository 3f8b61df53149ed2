//! Alert lifecycle: creation and role-gated transitions.
//!
//! Every alert starts in `active`. Movement through the lifecycle is
//! validated against the transition table on [`AlertStatus`] and committed
//! with a status-guarded update, so two responders racing on the same alert
//! serialize correctly: the loser re-reads the fresh status and either
//! retries (if its edge is still legal) or fails with an invalid-transition
//! error.
//!
//! SOS alerts carry side effects: creating one flips the subject agent to
//! `emergency` and notifies the authority pool and the agent's emergency
//! contact; resolving it flips the agent back. Notifications go through the
//! post-commit outbox and can never fail the lifecycle operation itself.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::CoreError;
use crate::model::{
    Agent, AgentStatus, Alert, AlertKind, AlertStatus, Coordinates, Department, Position, Role,
    Severity,
};
use crate::notify::{Channel, Notification, NotificationOutbox};
use crate::storage::Storage;

/// Inputs for creating an alert.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub kind: AlertKind,
    pub subject_id: String,
    pub coordinates: Coordinates,
    pub severity: Severity,
    pub message: String,
}

/// Resolve the role of an acting principal through the account directory.
/// Anyone not registered as an authority acts as a tourist.
pub async fn resolve_role(storage: &Storage, actor_id: &str) -> Result<Role, CoreError> {
    Ok(match storage.get_authority(actor_id).await? {
        Some(_) => Role::Authority,
        None => Role::Tourist,
    })
}

/// Create an alert. Always begins in `active`.
///
/// For an SOS the subject agent is marked `emergency` and notifications are
/// enqueued exactly once: email to every on-duty authority, SMS to the
/// agent's emergency contact if one is on file. A failure looking up the
/// recipient pool is logged and skipped; the alert itself stands.
pub async fn create_alert(
    storage: &Storage,
    outbox: &NotificationOutbox,
    new: NewAlert,
) -> Result<Alert, CoreError> {
    new.coordinates.validate()?;
    let agent = storage
        .get_agent(&new.subject_id)
        .await?
        .ok_or_else(|| CoreError::not_found("agent", new.subject_id.clone()))?;

    let now = Utc::now();
    let alert = Alert {
        id: Uuid::new_v4().to_string(),
        kind: new.kind,
        subject_id: agent.id.clone(),
        position: Position::new(new.coordinates, now),
        severity: new.severity,
        status: AlertStatus::Active,
        message: new.message,
        authority_id: None,
        created_at: now,
        updated_at: now,
    };
    storage.insert_alert(&alert).await?;

    if alert.kind == AlertKind::Sos {
        storage
            .set_agent_status(&agent.id, AgentStatus::Emergency)
            .await?;
        notify_sos_raised(storage, outbox, &agent, &alert).await;
    }

    info!(
        alert_id = %alert.id,
        kind = alert.kind.as_str(),
        subject_id = %alert.subject_id,
        severity = alert.severity.as_str(),
        "Alert created"
    );
    Ok(alert)
}

async fn notify_sos_raised(
    storage: &Storage,
    outbox: &NotificationOutbox,
    agent: &Agent,
    alert: &Alert,
) {
    let body = format!(
        "SOS from {} at ({:.5}, {:.5}): {}",
        agent.name, alert.position.latitude, alert.position.longitude, alert.message
    );

    match storage
        .on_duty_authorities(&[
            Department::Police,
            Department::TouristPolice,
            Department::Medical,
        ])
        .await
    {
        Ok(pool) if !pool.is_empty() => outbox.enqueue(Notification {
            channel: Channel::Email,
            recipients: pool.into_iter().map(|a| a.contact).collect(),
            subject: format!("SOS alert {}", alert.id),
            body: body.clone(),
        }),
        Ok(_) => warn!(alert_id = %alert.id, "No on-duty authorities to notify for SOS"),
        Err(e) => warn!(
            alert_id = %alert.id,
            error = %e,
            "Authority lookup failed; SOS notification skipped"
        ),
    }

    if let Some(contact) = &agent.emergency_contact {
        outbox.enqueue(Notification {
            channel: Channel::Sms,
            recipients: vec![contact.clone()],
            subject: format!("SOS alert {}", alert.id),
            body,
        });
    }
}

/// Move an alert along the lifecycle.
///
/// Only an authority-role actor may transition alerts. Optional notes
/// overwrite the alert message. The commit is guarded on the status the
/// transition was validated against; when a concurrent writer wins the
/// race, the loop re-reads and re-validates. Statuses only ever advance, so
/// each raced iteration sees a strictly later status and the loop finishes
/// in a handful of steps at most.
pub async fn transition_alert(
    storage: &Storage,
    outbox: &NotificationOutbox,
    alert_id: &str,
    new_status: AlertStatus,
    actor_id: &str,
    notes: Option<String>,
) -> Result<Alert, CoreError> {
    let role = resolve_role(storage, actor_id).await?;
    if !role.can_transition_alerts() {
        return Err(CoreError::Permission);
    }

    loop {
        let alert = storage
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| CoreError::not_found("alert", alert_id))?;

        if !alert.status.can_transition_to(new_status) {
            return Err(CoreError::InvalidTransition {
                from: alert.status,
                to: new_status,
            });
        }

        let applied = storage
            .transition_alert(
                alert_id,
                alert.status,
                new_status,
                notes.as_deref(),
                actor_id,
                Utc::now(),
            )
            .await?;
        if !applied {
            continue;
        }

        if new_status == AlertStatus::Resolved && alert.kind == AlertKind::Sos {
            clear_emergency(storage, outbox, &alert).await;
        }

        info!(
            alert_id = %alert_id,
            from = alert.status.as_str(),
            to = new_status.as_str(),
            actor_id = %actor_id,
            "Alert transitioned"
        );

        return storage
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| CoreError::not_found("alert", alert_id));
    }
}

/// Resolving an SOS puts its subject back into normal operation and lets
/// the emergency contact know. The agent is a weak reference: if it was
/// deleted in the meantime, the resolution stands and the revert is logged
/// as a no-op.
async fn clear_emergency(storage: &Storage, outbox: &NotificationOutbox, alert: &Alert) {
    match storage
        .set_agent_status(&alert.subject_id, AgentStatus::Active)
        .await
    {
        Ok(()) => {}
        Err(CoreError::NotFound { .. }) => {
            warn!(
                alert_id = %alert.id,
                subject_id = %alert.subject_id,
                "SOS resolved but subject agent no longer exists"
            );
            return;
        }
        Err(e) => {
            warn!(
                alert_id = %alert.id,
                subject_id = %alert.subject_id,
                error = %e,
                "SOS resolved but agent status revert failed"
            );
            return;
        }
    }

    match storage.get_agent(&alert.subject_id).await {
        Ok(Some(agent)) => {
            if let Some(contact) = agent.emergency_contact {
                outbox.enqueue(Notification {
                    channel: Channel::Sms,
                    recipients: vec![contact],
                    subject: format!("SOS alert {} resolved", alert.id),
                    body: format!("The SOS raised by {} has been resolved.", agent.name),
                });
            }
        }
        Ok(None) => {}
        Err(e) => warn!(
            alert_id = %alert.id,
            error = %e,
            "Agent lookup for resolution notice failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Authority;
    use crate::notify::LogDispatcher;
    use std::sync::Arc;

    async fn setup() -> (Storage, NotificationOutbox) {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let outbox = NotificationOutbox::spawn(Arc::new(LogDispatcher));
        (storage, outbox)
    }

    async fn seed_agent(storage: &Storage, id: &str) {
        storage
            .insert_agent(&Agent {
                id: id.to_string(),
                name: "Ana".to_string(),
                status: AgentStatus::Active,
                emergency_contact: Some("+66-800-000-000".to_string()),
                location_sharing: true,
                position: None,
                safety_score: None,
            })
            .await
            .unwrap();
    }

    async fn seed_authority(storage: &Storage, id: &str) {
        storage
            .insert_authority(&Authority {
                id: id.to_string(),
                name: "Officer".to_string(),
                department: Department::TouristPolice,
                contact: format!("{id}@responders.example"),
                on_duty: true,
            })
            .await
            .unwrap();
    }

    fn sos(subject_id: &str) -> NewAlert {
        NewAlert {
            kind: AlertKind::Sos,
            subject_id: subject_id.to_string(),
            coordinates: Coordinates {
                latitude: 13.75,
                longitude: 100.5,
            },
            severity: Severity::Critical,
            message: "need help".to_string(),
        }
    }

    #[tokio::test]
    async fn test_sos_creation_marks_agent_emergency() {
        let (storage, outbox) = setup().await;
        seed_agent(&storage, "agent-1").await;

        let alert = create_alert(&storage, &outbox, sos("agent-1")).await.unwrap();
        assert_eq!(alert.status, AlertStatus::Active);
        assert_eq!(alert.kind, AlertKind::Sos);

        let agent = storage.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Emergency);
    }

    #[tokio::test]
    async fn test_manual_alert_leaves_agent_alone() {
        let (storage, outbox) = setup().await;
        seed_agent(&storage, "agent-1").await;

        let new = NewAlert {
            kind: AlertKind::Manual,
            severity: Severity::Medium,
            ..sos("agent-1")
        };
        create_alert(&storage, &outbox, new).await.unwrap();

        let agent = storage.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Active);
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_agent() {
        let (storage, outbox) = setup().await;
        let result = create_alert(&storage, &outbox, sos("ghost")).await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_coordinates() {
        let (storage, outbox) = setup().await;
        seed_agent(&storage, "agent-1").await;

        let mut new = sos("agent-1");
        new.coordinates.latitude = 91.0;
        let result = create_alert(&storage, &outbox, new).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_non_authority_cannot_transition() {
        let (storage, outbox) = setup().await;
        seed_agent(&storage, "agent-1").await;
        let alert = create_alert(&storage, &outbox, sos("agent-1")).await.unwrap();

        // A tourist (even the subject) has no transition capability.
        let result = transition_alert(
            &storage,
            &outbox,
            &alert.id,
            AlertStatus::Acknowledged,
            "agent-1",
            None,
        )
        .await;
        assert!(matches!(result, Err(CoreError::Permission)));

        let stored = storage.get_alert(&alert.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AlertStatus::Active);
    }

    #[tokio::test]
    async fn test_direct_resolve_is_rejected() {
        let (storage, outbox) = setup().await;
        seed_agent(&storage, "agent-1").await;
        seed_authority(&storage, "auth-1").await;
        let alert = create_alert(&storage, &outbox, sos("agent-1")).await.unwrap();

        let result = transition_alert(
            &storage,
            &outbox,
            &alert.id,
            AlertStatus::Resolved,
            "auth-1",
            None,
        )
        .await;
        assert!(matches!(
            result,
            Err(CoreError::InvalidTransition {
                from: AlertStatus::Active,
                to: AlertStatus::Resolved,
            })
        ));

        // And the rejection left everything untouched.
        let stored = storage.get_alert(&alert.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AlertStatus::Active);
        let agent = storage.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Emergency);
    }

    #[tokio::test]
    async fn test_full_sos_lifecycle_reverts_agent() {
        let (storage, outbox) = setup().await;
        seed_agent(&storage, "agent-1").await;
        seed_authority(&storage, "auth-1").await;
        let alert = create_alert(&storage, &outbox, sos("agent-1")).await.unwrap();

        for status in [
            AlertStatus::Acknowledged,
            AlertStatus::Responding,
            AlertStatus::Resolved,
        ] {
            transition_alert(&storage, &outbox, &alert.id, status, "auth-1", None)
                .await
                .unwrap();
        }

        let agent = storage.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Active);

        let stored = storage.get_alert(&alert.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AlertStatus::Resolved);
        assert_eq!(stored.authority_id.as_deref(), Some("auth-1"));

        // Resolved alerts can still be closed, and closed is the end.
        transition_alert(
            &storage,
            &outbox,
            &alert.id,
            AlertStatus::Closed,
            "auth-1",
            None,
        )
        .await
        .unwrap();
        let result = transition_alert(
            &storage,
            &outbox,
            &alert.id,
            AlertStatus::Resolved,
            "auth-1",
            None,
        )
        .await;
        assert!(matches!(result, Err(CoreError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_resolving_non_sos_keeps_agent_status() {
        let (storage, outbox) = setup().await;
        seed_agent(&storage, "agent-1").await;
        seed_authority(&storage, "auth-1").await;

        // Put the agent into emergency via a real SOS first.
        create_alert(&storage, &outbox, sos("agent-1")).await.unwrap();

        let manual = NewAlert {
            kind: AlertKind::Manual,
            severity: Severity::Low,
            ..sos("agent-1")
        };
        let alert = create_alert(&storage, &outbox, manual).await.unwrap();
        for status in [AlertStatus::Acknowledged, AlertStatus::Resolved] {
            transition_alert(&storage, &outbox, &alert.id, status, "auth-1", None)
                .await
                .unwrap();
        }

        // The open SOS still holds the agent in emergency.
        let agent = storage.get_agent("agent-1").await.unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Emergency);
    }

    #[tokio::test]
    async fn test_notes_overwrite_message() {
        let (storage, outbox) = setup().await;
        seed_agent(&storage, "agent-1").await;
        seed_authority(&storage, "auth-1").await;
        let alert = create_alert(&storage, &outbox, sos("agent-1")).await.unwrap();

        let updated = transition_alert(
            &storage,
            &outbox,
            &alert.id,
            AlertStatus::Acknowledged,
            "auth-1",
            Some("unit dispatched".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(updated.message, "unit dispatched");

        // No notes: message stays.
        let updated = transition_alert(
            &storage,
            &outbox,
            &alert.id,
            AlertStatus::Responding,
            "auth-1",
            None,
        )
        .await
        .unwrap();
        assert_eq!(updated.message, "unit dispatched");
    }

    #[tokio::test]
    async fn test_transition_unknown_alert() {
        let (storage, outbox) = setup().await;
        seed_authority(&storage, "auth-1").await;

        let result = transition_alert(
            &storage,
            &outbox,
            "no-such-alert",
            AlertStatus::Acknowledged,
            "auth-1",
            None,
        )
        .await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }
}
