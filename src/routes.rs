//! Collection routes managed from the admin dashboard.

use rand::Rng;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::models::{Role, Route, RouteStatus};
use crate::storage::{format_id, Sequence, Storage};

pub const UNASSIGNED: &str = "Unassigned";

pub fn list(storage: &Storage) -> Result<Vec<Route>> {
    storage.routes()
}

pub fn get(storage: &Storage, id: &str) -> Result<Route> {
    storage
        .get_route(id)?
        .ok_or_else(|| Error::not_found("route", id))
}

/// New paused route with no picker and a random number of stops.
pub fn create(storage: &Storage) -> Result<Route> {
    let n = storage.next_sequence(Sequence::Route)?;
    let route = Route {
        id: format_id(Sequence::Route.prefix(), n),
        name: format!("New Route {n}"),
        area: UNASSIGNED.to_string(),
        picker_id: String::new(),
        picker_name: UNASSIGNED.to_string(),
        stops: rand::thread_rng().gen_range(10..=34),
        status: RouteStatus::Paused,
        efficiency: 0,
        estimated_time: "TBD".to_string(),
    };
    storage.put_route(&route)?;
    info!(route = %route.id, stops = route.stops, "route created");
    Ok(route)
}

pub fn assign_picker(storage: &Storage, route_id: &str, picker_id: &str) -> Result<Route> {
    let picker = storage
        .get_account(picker_id)?
        .filter(|a| a.role == Role::Picker)
        .ok_or_else(|| Error::not_found("picker", picker_id))?;

    let route = storage.update_route(route_id, |r| {
        r.picker_id = picker.id.clone();
        r.picker_name = picker.name.clone();
        Ok(())
    })?;
    info!(route = %route_id, picker = %picker_id, "picker assigned to route");
    Ok(route)
}

/// Clears the picker of a route whose picker account is gone.
pub fn unassign(storage: &Storage, route_id: &str) -> Result<Route> {
    let route = storage.update_route(route_id, |r| {
        r.picker_id.clear();
        r.picker_name = UNASSIGNED.to_string();
        Ok(())
    })?;
    info!(route = %route_id, "route unassigned");
    Ok(route)
}

pub fn set_status(storage: &Storage, route_id: &str, status: RouteStatus) -> Result<Route> {
    let route = storage.update_route(route_id, |r| {
        r.status = status;
        Ok(())
    })?;
    info!(route = %route_id, status = ?status, "route status changed");
    Ok(route)
}

/// Raises efficiency by a random 1..=10 points, capped at 100.
pub fn optimize(storage: &Storage, route_id: &str) -> Result<Route> {
    let bump: u8 = rand::thread_rng().gen_range(1..=10);
    let route = storage.update_route(route_id, |r| {
        r.efficiency = r.efficiency.saturating_add(bump).min(100);
        Ok(())
    })?;
    info!(route = %route_id, efficiency = route.efficiency, "route optimized");
    Ok(route)
}

pub fn delete(storage: &Storage, route_id: &str) -> Result<()> {
    if !storage.delete_route(route_id)? {
        warn!(route = %route_id, "delete of unknown route");
        return Err(Error::not_found("route", route_id));
    }
    info!(route = %route_id, "route deleted");
    Ok(())
}
