//! Administrator-side account management and the system overview numbers
//! shown on the admin dashboard.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::{self, AuthSettings};
use crate::error::{Error, Result};
use crate::models::{today, Account, AccountStatus, AlertCategory, AssignmentStatus, Role, RouteStatus, Severity};
use crate::routes;
use crate::storage::{AdminRule, Sequence, Storage};
use crate::validation::{is_valid_email, ValidationErrors};

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewAccount {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleCounts {
    pub users: usize,
    pub pickers: usize,
    pub admins: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub total_accounts: usize,
    pub by_role: RoleCounts,
    pub active_pickers: usize,
    pub active_routes: usize,
    /// Mean route efficiency, 0 when there are no routes
    pub avg_efficiency: f64,
    pub unresolved_alerts: usize,
    pub critical_alerts: usize,
    pub emergency_alerts: usize,
    pub completed_assignments: usize,
    pub picker_earnings: f64,
}

/// Accounts of one role whose name or email contains `search`.
pub fn list(storage: &Storage, role: Role, search: Option<&str>) -> Result<Vec<Account>> {
    let term = search.map(str::trim).unwrap_or("");
    let accounts: Vec<Account> = storage
        .accounts()?
        .into_iter()
        .filter(|a| a.role == role && a.matches(term))
        .collect();
    debug!(role = %role, search = term, count = accounts.len(), "listed accounts");
    Ok(accounts)
}

pub fn get(storage: &Storage, id: &str) -> Result<Account> {
    storage
        .get_account(id)?
        .ok_or_else(|| Error::not_found("account", id))
}

/// Creates an active account. It has no usable password until an
/// administrator sets one.
pub fn create(storage: &Storage, settings: &AuthSettings, role: Role, draft: &NewAccount) -> Result<Account> {
    let name = draft.name.trim();
    let email = draft.email.trim();

    if name.is_empty() || email.is_empty() {
        return Err(ValidationErrors::single("form", "Please fill in all required fields").into());
    }
    if !is_valid_email(email) {
        return Err(ValidationErrors::single("email", "Please enter a valid email address").into());
    }

    let id = storage.next_id(Sequence::Account(role))?;
    let account = Account::new(id, name.to_string(), email.to_string(), role, today());
    let credentials = auth::locked_credentials(&account.id, settings)?;
    storage.insert_account(&account, &credentials, AdminRule::Any)?;

    info!(account = %account.id, role = %role, "account created");
    Ok(account)
}

pub fn update(storage: &Storage, id: &str, changes: &AccountUpdate) -> Result<Account> {
    let name = changes.name.as_deref().map(str::trim);
    let email = changes.email.as_deref().map(str::trim);

    if name == Some("") || email == Some("") {
        return Err(ValidationErrors::single("form", "Please fill in all required fields").into());
    }
    if matches!(email, Some(email) if !is_valid_email(email)) {
        return Err(ValidationErrors::single("email", "Please enter a valid email address").into());
    }

    let account = storage.update_account(id, |a| {
        if let Some(name) = name {
            a.name = name.to_string();
        }
        if let Some(email) = email {
            a.email = email.to_string();
        }
        Ok(())
    })?;
    info!(account = %id, "account updated");
    Ok(account)
}

fn log_refusal(id: &str, result: &Result<Account>) {
    if let Err(Error::Conflict(reason)) = result {
        warn!(account = %id, reason = %reason, "account change refused");
    }
}

/// Deletes an account. Pickers with unfinished assignments are kept; their
/// routes go back to unassigned once they are gone.
pub fn delete(storage: &Storage, id: &str) -> Result<()> {
    let account = get(storage, id)?;
    if account.role == Role::Picker {
        let open = storage
            .assignments()?
            .iter()
            .filter(|a| a.picker_id == id && a.status != AssignmentStatus::Completed)
            .count();
        if open > 0 {
            warn!(account = %id, open, "refused to delete picker with open assignments");
            return Err(Error::Conflict(format!(
                "Cannot delete a picker with {open} open assignment(s)"
            )));
        }
    }

    if let Err(e) = storage.delete_account(id) {
        warn!(account = %id, error = %e, "account deletion refused");
        return Err(e);
    }

    if account.role == Role::Picker {
        for route in storage.routes()?.into_iter().filter(|r| r.picker_id == id) {
            routes::unassign(storage, &route.id)?;
        }
    }
    info!(account = %id, "account deleted");
    Ok(())
}

/// active → inactive, anything else → active
pub fn toggle_status(storage: &Storage, id: &str) -> Result<Account> {
    let result = storage.update_account(id, |a| {
        a.status = match a.status {
            AccountStatus::Active => AccountStatus::Inactive,
            AccountStatus::Inactive | AccountStatus::Suspended => AccountStatus::Active,
        };
        Ok(())
    });
    log_refusal(id, &result);
    let account = result?;
    info!(account = %id, status = ?account.status, "account status changed");
    Ok(account)
}

pub fn suspend(storage: &Storage, id: &str) -> Result<Account> {
    let result = storage.update_account(id, |a| {
        a.status = AccountStatus::Suspended;
        Ok(())
    });
    log_refusal(id, &result);
    let account = result?;
    info!(account = %id, "account suspended");
    Ok(account)
}

pub fn system_stats(storage: &Storage) -> Result<SystemStats> {
    let accounts = storage.accounts()?;
    let routes = storage.routes()?;
    let alerts = storage.alerts()?;
    let assignments = storage.assignments()?;

    let count_role = |role: Role| accounts.iter().filter(|a| a.role == role).count();
    let avg_efficiency = if routes.is_empty() {
        0.0
    } else {
        routes.iter().map(|r| f64::from(r.efficiency)).sum::<f64>() / routes.len() as f64
    };
    let unresolved: Vec<_> = alerts.iter().filter(|a| !a.resolved).collect();

    Ok(SystemStats {
        total_accounts: accounts.len(),
        by_role: RoleCounts {
            users: count_role(Role::User),
            pickers: count_role(Role::Picker),
            admins: count_role(Role::Admin),
        },
        active_pickers: accounts
            .iter()
            .filter(|a| a.role == Role::Picker && a.is_active())
            .count(),
        active_routes: routes.iter().filter(|r| r.status == RouteStatus::Active).count(),
        avg_efficiency,
        unresolved_alerts: unresolved.len(),
        critical_alerts: unresolved.iter().filter(|a| a.severity == Severity::Critical).count(),
        emergency_alerts: unresolved
            .iter()
            .filter(|a| a.category == AlertCategory::Emergency)
            .count(),
        completed_assignments: assignments
            .iter()
            .filter(|a| a.status == AssignmentStatus::Completed)
            .count(),
        picker_earnings: accounts.iter().filter_map(|a| a.earnings).sum(),
    })
}
