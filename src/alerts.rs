use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::error::Result;
use crate::models::{Alert, AlertCategory, Severity};
use crate::storage::{id_number, Sequence, Storage};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewAlert {
    #[serde(rename = "type")]
    pub category: AlertCategory,
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

/// All alerts, newest first.
pub fn list(storage: &Storage) -> Result<Vec<Alert>> {
    let mut alerts = storage.alerts()?;
    alerts.sort_by_key(|a| std::cmp::Reverse(id_number(&a.id)));
    Ok(alerts)
}

pub fn raise(storage: &Storage, alert: NewAlert) -> Result<Alert> {
    let alert = Alert {
        id: storage.next_id(Sequence::Alert)?,
        category: alert.category,
        title: alert.title,
        message: alert.message,
        timestamp: Utc::now(),
        severity: alert.severity,
        resolved: false,
    };
    storage.put_alert(&alert)?;
    info!(alert = %alert.id, severity = ?alert.severity, "alert raised");
    Ok(alert)
}

/// Announces the nightly maintenance window.
pub fn broadcast_maintenance(storage: &Storage) -> Result<Alert> {
    raise(
        storage,
        NewAlert {
            category: AlertCategory::System,
            title: "System Maintenance Scheduled".to_string(),
            message: "Routine system maintenance scheduled for tonight at 2:00 AM".to_string(),
            severity: Severity::Medium,
        },
    )
}

pub fn resolve(storage: &Storage, id: &str) -> Result<Alert> {
    let alert = storage.update_alert(id, |a| {
        a.resolved = true;
        Ok(())
    })?;
    info!(alert = %id, "alert resolved");
    Ok(alert)
}

pub fn critical_unresolved(storage: &Storage) -> Result<Vec<Alert>> {
    Ok(list(storage)?.into_iter().filter(Alert::is_open_critical).collect())
}
