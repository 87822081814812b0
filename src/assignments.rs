//! Picker assignments: the pickup tasks on a picker's daily route and the
//! workflow that moves them from pending to completed.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{Assignment, AssignmentStatus, Coordinates, Priority, Role};
use crate::storage::{Sequence, Storage};
use crate::validation::ValidationErrors;

/// One day, in minutes
const MAX_DURATION_MINUTES: u32 = 24 * 60;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewAssignment {
    pub picker_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub customer_name: String,
    pub address: String,
    pub coordinates: Coordinates,
    pub scheduled_time: String,
    pub estimated_duration: u32,
    #[serde(default)]
    pub estimated_weight: Option<f64>,
    pub priority: Priority,
    #[serde(default)]
    pub special_instructions: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub waste_types: Vec<String>,
    pub earnings: f64,
    pub distance: f64,
}

impl NewAssignment {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.customer_name.trim().is_empty() {
            errors.add("customerName", "Customer name is required");
        }
        if self.address.trim().is_empty() {
            errors.add("address", "Address is required");
        }
        if self.scheduled_time.trim().is_empty() {
            errors.add("scheduledTime", "Scheduled time is required");
        }
        if Coordinates::new(self.coordinates.lat, self.coordinates.lng).is_none() {
            errors.add("coordinates", "Coordinates are out of range");
        }
        if !(self.earnings.is_finite() && self.earnings >= 0.0) {
            errors.add("earnings", "Earnings must be a non-negative amount");
        }
        if !(self.distance.is_finite() && self.distance >= 0.0) {
            errors.add("distance", "Distance must be a non-negative number");
        }
        if self.estimated_duration > MAX_DURATION_MINUTES {
            errors.add("estimatedDuration", "Estimated duration must be at most 24 hours");
        }
        if matches!(self.estimated_weight, Some(w) if !(w.is_finite() && w >= 0.0)) {
            errors.add("estimatedWeight", "Weight must be a non-negative number");
        }
        errors.into_result()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub total_assignments: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub pending: usize,
    pub delayed: usize,
    /// Earnings of completed assignments
    pub total_earnings: f64,
    pub total_distance: f64,
    /// Mean estimated duration in minutes
    pub avg_completion_time: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteSummary {
    pub remaining_stops: usize,
    pub total_distance: f64,
    pub estimated_minutes: u64,
    /// `Xh Ym`
    pub estimated_time: String,
}

pub fn format_minutes(minutes: u64) -> String {
    format!("{}h {}m", minutes / 60, minutes % 60)
}

pub fn list_for_picker(
    storage: &Storage,
    picker_id: &str,
    status: Option<AssignmentStatus>,
) -> Result<Vec<Assignment>> {
    let assignments: Vec<Assignment> = storage
        .assignments()?
        .into_iter()
        .filter(|a| a.picker_id == picker_id)
        .filter(|a| status.map_or(true, |s| a.status == s))
        .collect();
    debug!(picker = %picker_id, count = assignments.len(), "listed assignments");
    Ok(assignments)
}

pub fn get(storage: &Storage, id: &str) -> Result<Assignment> {
    storage
        .get_assignment(id)?
        .ok_or_else(|| Error::not_found("assignment", id))
}

pub fn create(storage: &Storage, draft: NewAssignment) -> Result<Assignment> {
    draft.validate()?;
    storage
        .get_account(&draft.picker_id)?
        .filter(|a| a.role == Role::Picker)
        .ok_or_else(|| Error::not_found("picker", draft.picker_id.clone()))?;

    let assignment = Assignment {
        id: storage.next_id(Sequence::Assignment)?,
        picker_id: draft.picker_id,
        kind: draft.kind,
        customer_name: draft.customer_name.trim().to_string(),
        address: draft.address.trim().to_string(),
        coordinates: draft.coordinates,
        scheduled_time: draft.scheduled_time,
        estimated_duration: draft.estimated_duration,
        estimated_weight: draft.estimated_weight,
        priority: draft.priority,
        status: AssignmentStatus::Pending,
        special_instructions: draft.special_instructions,
        customer_phone: draft.customer_phone,
        waste_types: draft.waste_types,
        earnings: draft.earnings,
        distance: draft.distance,
    };
    storage.put_assignment(&assignment)?;
    info!(assignment = %assignment.id, picker = %assignment.picker_id, "assignment created");
    Ok(assignment)
}

/// Moves an assignment owned by `picker_id` to `next`, rejecting moves the
/// workflow does not allow.
fn transition(
    storage: &Storage,
    id: &str,
    picker_id: &str,
    next: AssignmentStatus,
) -> Result<Assignment> {
    let assignment = storage.update_assignment(id, |a| {
        if a.picker_id != picker_id {
            return Err(Error::Forbidden);
        }
        if !a.status.can_move_to(next) {
            return Err(Error::transition(a.status, next));
        }
        a.status = next;
        Ok(())
    });
    match &assignment {
        Ok(_) => info!(assignment = %id, status = %next, "assignment status changed"),
        Err(e) => warn!(assignment = %id, status = %next, error = %e, "assignment transition rejected"),
    }
    assignment
}

pub fn start(storage: &Storage, id: &str, picker_id: &str) -> Result<Assignment> {
    transition(storage, id, picker_id, AssignmentStatus::InProgress)
}

pub fn mark_delayed(storage: &Storage, id: &str, picker_id: &str) -> Result<Assignment> {
    transition(storage, id, picker_id, AssignmentStatus::Delayed)
}

/// Completes the assignment and credits its earnings to the picker. The
/// status swap succeeds at most once, so the credit happens at most once.
pub fn complete(storage: &Storage, id: &str, picker_id: &str) -> Result<Assignment> {
    let assignment = transition(storage, id, picker_id, AssignmentStatus::Completed)?;
    storage.update_account(picker_id, |picker| {
        picker.earnings = Some(picker.earnings.unwrap_or(0.0) + assignment.earnings);
        picker.collections = Some(picker.collections.unwrap_or(0) + 1);
        Ok(())
    })?;
    info!(assignment = %id, picker = %picker_id, earnings = assignment.earnings, "picker credited");
    Ok(assignment)
}

pub fn daily_stats(storage: &Storage, picker_id: &str) -> Result<DailyStats> {
    let assignments = list_for_picker(storage, picker_id, None)?;
    let count = |status: AssignmentStatus| assignments.iter().filter(|a| a.status == status).count();

    let avg_completion_time = if assignments.is_empty() {
        0.0
    } else {
        assignments
            .iter()
            .map(|a| f64::from(a.estimated_duration))
            .sum::<f64>()
            / assignments.len() as f64
    };

    Ok(DailyStats {
        total_assignments: assignments.len(),
        completed: count(AssignmentStatus::Completed),
        in_progress: count(AssignmentStatus::InProgress),
        pending: count(AssignmentStatus::Pending),
        delayed: count(AssignmentStatus::Delayed),
        total_earnings: assignments
            .iter()
            .filter(|a| a.status == AssignmentStatus::Completed)
            .map(|a| a.earnings)
            .sum(),
        total_distance: assignments.iter().map(|a| a.distance).sum(),
        avg_completion_time,
    })
}

/// Remaining work on the picker's route.
pub fn route_summary(storage: &Storage, picker_id: &str) -> Result<RouteSummary> {
    let remaining: Vec<Assignment> = list_for_picker(storage, picker_id, None)?
        .into_iter()
        .filter(|a| a.status != AssignmentStatus::Completed)
        .collect();
    let estimated_minutes = remaining.iter().map(|a| u64::from(a.estimated_duration)).sum();

    Ok(RouteSummary {
        remaining_stops: remaining.len(),
        total_distance: remaining.iter().map(|a| a.distance).sum(),
        estimated_minutes,
        estimated_time: format_minutes(estimated_minutes),
    })
}
