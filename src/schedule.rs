//! Resident pickup scheduling.

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{PickupStatus, ScheduledPickup};
use crate::storage::{Sequence, Storage};
use crate::validation::ValidationErrors;

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct PickupRequest {
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub waste_type: String,
    #[serde(default)]
    pub time_slot: String,
}

/// Active (not cancelled) pickups of a resident.
pub fn list(storage: &Storage, account_id: &str) -> Result<Vec<ScheduledPickup>> {
    Ok(storage
        .pickups()?
        .into_iter()
        .filter(|p| p.account_id == account_id && p.status != PickupStatus::Cancelled)
        .collect())
}

pub fn schedule(storage: &Storage, account_id: &str, request: &PickupRequest) -> Result<ScheduledPickup> {
    let waste_type = request.waste_type.trim();
    let time_slot = request.time_slot.trim();
    let date = match request.date {
        Some(date) if !waste_type.is_empty() && !time_slot.is_empty() => date,
        _ => {
            return Err(ValidationErrors::single(
                "form",
                "Please fill in all required fields to schedule a collection.",
            )
            .into())
        }
    };

    let pickup = ScheduledPickup {
        id: storage.next_id(Sequence::Pickup)?,
        account_id: account_id.to_string(),
        waste_type: waste_type.to_string(),
        date,
        time_slot: time_slot.to_string(),
        status: PickupStatus::Scheduled,
    };
    storage.put_pickup(&pickup)?;
    info!(pickup = %pickup.id, account = %account_id, date = %date, "pickup scheduled");
    Ok(pickup)
}

fn owned_update(
    storage: &Storage,
    account_id: &str,
    pickup_id: &str,
    status: PickupStatus,
) -> Result<ScheduledPickup> {
    let pickup = storage.update_pickup(pickup_id, |p| {
        if p.account_id != account_id {
            return Err(Error::not_found("pickup", pickup_id));
        }
        if p.status == PickupStatus::Cancelled {
            return Err(Error::Conflict("Pickup has already been cancelled".to_string()));
        }
        p.status = status;
        Ok(())
    })?;
    info!(pickup = %pickup_id, status = ?status, "pickup updated");
    Ok(pickup)
}

pub fn cancel(storage: &Storage, account_id: &str, pickup_id: &str) -> Result<ScheduledPickup> {
    owned_update(storage, account_id, pickup_id, PickupStatus::Cancelled)
}

/// Puts the pickup back to pending confirmation.
pub fn request_reschedule(storage: &Storage, account_id: &str, pickup_id: &str) -> Result<ScheduledPickup> {
    owned_update(storage, account_id, pickup_id, PickupStatus::Pending)
}
