//! Demo records used by `load_data` and `ecocollect --seed`.
//!
//! Loading is idempotent: records whose id already exists are skipped, and
//! the id sequences are moved past the seeded ids so new records never
//! collide with them.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::auth::{hash_password, AuthSettings};
use crate::error::{Error, Result};
use crate::models::{
    today, Account, AccountStatus, Alert, AlertCategory, Assignment, AssignmentStatus, Coordinates,
    Credentials, PickupStatus, Priority, Role, Route, RouteStatus, ScheduledPickup, Severity,
};
use crate::storage::{id_number, AdminRule, Sequence, Storage};

/// Password given to every seeded account
pub const DEMO_PASSWORD: &str = "EcoCollect1!";

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SeedSummary {
    pub accounts: usize,
    pub routes: usize,
    pub alerts: usize,
    pub assignments: usize,
    pub pickups: usize,
}

fn date(y: i32, m: u32, d: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| Error::Config(format!("invalid seed date {y}-{m}-{d}")))
}

fn at(day: NaiveDate, h: u32, min: u32) -> Result<DateTime<Utc>> {
    day.and_hms_opt(h, min, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| Error::Config(format!("invalid seed time {h}:{min}")))
}

struct SeedAccount {
    id: &'static str,
    name: &'static str,
    email: &'static str,
    username: &'static str,
    role: Role,
    status: AccountStatus,
    joined: (i32, u32, u32),
    last_active: (i32, u32, u32),
    collections: Option<u32>,
    earnings: Option<f64>,
}

const ACCOUNTS: &[SeedAccount] = &[
    SeedAccount { id: "U001", name: "John Smith", email: "john@example.com", username: "john", role: Role::User, status: AccountStatus::Active, joined: (2024, 1, 15), last_active: (2024, 3, 24), collections: Some(15), earnings: None },
    SeedAccount { id: "U002", name: "Sarah Johnson", email: "sarah@example.com", username: "sarah", role: Role::User, status: AccountStatus::Active, joined: (2024, 2, 10), last_active: (2024, 3, 23), collections: Some(8), earnings: None },
    SeedAccount { id: "U003", name: "Mike Chen", email: "mike@example.com", username: "mike", role: Role::User, status: AccountStatus::Inactive, joined: (2024, 1, 20), last_active: (2024, 3, 20), collections: Some(22), earnings: None },
    SeedAccount { id: "WP001", name: "Maria Garcia", email: "maria@example.com", username: "maria", role: Role::Picker, status: AccountStatus::Active, joined: (2024, 2, 1), last_active: (2024, 3, 24), collections: Some(142), earnings: Some(2840.0) },
    SeedAccount { id: "WP002", name: "James Wilson", email: "james@example.com", username: "james", role: Role::Picker, status: AccountStatus::Active, joined: (2024, 1, 15), last_active: (2024, 3, 24), collections: Some(95), earnings: Some(1920.0) },
    SeedAccount { id: "WP003", name: "Lisa Rodriguez", email: "lisa@example.com", username: "lisa", role: Role::Picker, status: AccountStatus::Active, joined: (2024, 3, 1), last_active: (2024, 3, 23), collections: Some(67), earnings: Some(1340.0) },
    SeedAccount { id: "A001", name: "Admin User", email: "admin@example.com", username: "admin", role: Role::Admin, status: AccountStatus::Active, joined: (2024, 1, 1), last_active: (2024, 3, 24), collections: None, earnings: None },
    SeedAccount { id: "A002", name: "System Manager", email: "manager@example.com", username: "manager", role: Role::Admin, status: AccountStatus::Active, joined: (2024, 1, 1), last_active: (2024, 3, 23), collections: None, earnings: None },
];

fn accounts() -> Result<Vec<Account>> {
    ACCOUNTS
        .iter()
        .map(|s| {
            Ok(Account {
                id: s.id.to_string(),
                name: s.name.to_string(),
                email: s.email.to_string(),
                username: Some(s.username.to_string()),
                role: s.role,
                status: s.status,
                join_date: date(s.joined.0, s.joined.1, s.joined.2)?,
                last_active: date(s.last_active.0, s.last_active.1, s.last_active.2)?,
                collections: s.collections,
                earnings: s.earnings,
                newsletter: true,
            })
        })
        .collect()
}

fn routes() -> Vec<Route> {
    vec![
        Route {
            id: "R001".to_string(),
            name: "Downtown Circuit".to_string(),
            area: "Downtown".to_string(),
            picker_id: "WP001".to_string(),
            picker_name: "Maria Garcia".to_string(),
            stops: 24,
            status: RouteStatus::Active,
            efficiency: 94,
            estimated_time: "4h 30m".to_string(),
        },
        Route {
            id: "R002".to_string(),
            name: "Residential North".to_string(),
            area: "North District".to_string(),
            picker_id: "WP002".to_string(),
            picker_name: "James Wilson".to_string(),
            stops: 18,
            status: RouteStatus::Completed,
            efficiency: 87,
            estimated_time: "3h 15m".to_string(),
        },
    ]
}

fn alerts() -> Result<Vec<Alert>> {
    let day = date(2024, 3, 24)?;
    Ok(vec![
        Alert {
            id: "AL001".to_string(),
            category: AlertCategory::Emergency,
            title: "Hazardous Waste Spill".to_string(),
            message: "Chemical spill reported at Industrial Zone - immediate response required".to_string(),
            timestamp: at(day, 14, 30)?,
            severity: Severity::Critical,
            resolved: false,
        },
        Alert {
            id: "AL002".to_string(),
            category: AlertCategory::Maintenance,
            title: "Vehicle Maintenance Due".to_string(),
            message: "Truck TRK-005 is due for scheduled maintenance".to_string(),
            timestamp: at(day, 12, 15)?,
            severity: Severity::Medium,
            resolved: false,
        },
    ])
}

#[allow(clippy::too_many_arguments)]
fn assignment(
    id: &str,
    kind: &str,
    customer: &str,
    address: &str,
    (lat, lng): (f64, f64),
    time: &str,
    duration: u32,
    weight: Option<f64>,
    priority: Priority,
    instructions: &str,
    phone: &str,
    waste_types: &[&str],
    earnings: f64,
    distance: f64,
) -> Assignment {
    Assignment {
        id: id.to_string(),
        picker_id: "WP001".to_string(),
        kind: kind.to_string(),
        customer_name: customer.to_string(),
        address: address.to_string(),
        coordinates: Coordinates { lat, lng },
        scheduled_time: time.to_string(),
        estimated_duration: duration,
        estimated_weight: weight,
        priority,
        status: AssignmentStatus::Pending,
        special_instructions: Some(instructions.to_string()),
        customer_phone: Some(phone.to_string()),
        waste_types: waste_types.iter().map(|w| w.to_string()).collect(),
        earnings,
        distance,
    }
}

fn assignments() -> Vec<Assignment> {
    vec![
        assignment("AS001", "General Waste", "Johnson Family", "123 Main Street, Downtown", (40.7589, -73.9851), "10:00 AM", 25, Some(45.0), Priority::High, "Gate access code: 1234. Large bins behind house.", "+1-555-0101", &["General Waste", "Cardboard"], 15.50, 2.3),
        assignment("AS002", "Recyclables", "Green Tech Office", "456 Park Avenue, Business District", (40.7505, -73.9934), "11:30 AM", 20, Some(32.0), Priority::Urgent, "Loading dock on side entrance. Contact security first.", "+1-555-0102", &["Recyclables", "Electronic Waste"], 22.00, 4.1),
        assignment("AS003", "Organic Waste", "Riverside Restaurant", "789 Oak Drive, Riverside", (40.7282, -74.0776), "1:00 PM", 15, Some(28.0), Priority::Medium, "Weekly pickup. Bins are marked with restaurant logo.", "+1-555-0103", &["Organic Waste"], 12.75, 1.8),
        assignment("AS004", "General Waste", "City Mall Complex", "321 Shopping Center Dr", (40.7614, -73.9776), "2:30 PM", 40, None, Priority::High, "Use service entrance B. Large volume pickup.", "+1-555-0104", &["General Waste", "Recyclables", "Cardboard"], 35.00, 3.2),
    ]
}

/// Upcoming pickups for John Smith, dated relative to `from`.
fn pickups(from: NaiveDate) -> Result<Vec<ScheduledPickup>> {
    let plan = [
        ("P001", "General Waste", 1, "8:00 AM", PickupStatus::Scheduled),
        ("P002", "Recyclables", 3, "9:00 AM", PickupStatus::Scheduled),
        ("P003", "Organic Waste", 5, "7:00 AM", PickupStatus::Pending),
    ];
    plan.into_iter()
        .map(|(id, waste, offset, slot, status)| {
            let date = from
                .checked_add_days(Days::new(offset))
                .ok_or_else(|| Error::Config("seed date out of range".to_string()))?;
            Ok(ScheduledPickup {
                id: id.to_string(),
                account_id: "U001".to_string(),
                waste_type: waste.to_string(),
                date,
                time_slot: slot.to_string(),
                status,
            })
        })
        .collect()
}

/// Inserts the demo data set. Every account gets `password`.
pub fn load_demo_data(storage: &Storage, settings: &AuthSettings, password: &str) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    // one hash shared by all demo accounts
    let password_hash = hash_password(password, settings.bcrypt_cost)?;
    for account in accounts()? {
        storage.bump_sequence_to(Sequence::Account(account.role), id_number(&account.id))?;
        if storage.get_account(&account.id)?.is_some() {
            debug!(account = %account.id, "already present");
            continue;
        }
        let credentials = Credentials {
            account_id: account.id.clone(),
            password_hash: password_hash.clone(),
            must_reset: false,
        };
        storage.insert_account(&account, &credentials, AdminRule::Any)?;
        summary.accounts += 1;
    }

    for route in routes() {
        storage.bump_sequence_to(Sequence::Route, id_number(&route.id))?;
        if storage.get_route(&route.id)?.is_none() {
            storage.put_route(&route)?;
            summary.routes += 1;
        }
    }

    let existing_alerts: Vec<String> = storage.alerts()?.into_iter().map(|a| a.id).collect();
    for alert in alerts()? {
        storage.bump_sequence_to(Sequence::Alert, id_number(&alert.id))?;
        if !existing_alerts.contains(&alert.id) {
            storage.put_alert(&alert)?;
            summary.alerts += 1;
        }
    }

    for assignment in assignments() {
        storage.bump_sequence_to(Sequence::Assignment, id_number(&assignment.id))?;
        if storage.get_assignment(&assignment.id)?.is_none() {
            storage.put_assignment(&assignment)?;
            summary.assignments += 1;
        }
    }

    let existing_pickups: Vec<String> = storage.pickups()?.into_iter().map(|p| p.id).collect();
    for pickup in pickups(today())? {
        storage.bump_sequence_to(Sequence::Pickup, id_number(&pickup.id))?;
        if !existing_pickups.contains(&pickup.id) {
            storage.put_pickup(&pickup)?;
            summary.pickups += 1;
        }
    }

    info!(?summary, "demo data loaded");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts;
    use crate::auth::{self, tests::settings};
    use crate::validation::LoginForm;

    #[test]
    fn loads_once_and_keeps_sequences_ahead() {
        let storage = Storage::temporary().unwrap();
        let first = load_demo_data(&storage, &settings(), DEMO_PASSWORD).unwrap();
        assert_eq!(
            first,
            SeedSummary { accounts: 8, routes: 2, alerts: 2, assignments: 4, pickups: 3 }
        );

        let second = load_demo_data(&storage, &settings(), DEMO_PASSWORD).unwrap();
        assert_eq!(second, SeedSummary::default());

        assert_eq!(storage.next_id(Sequence::Account(Role::Picker)).unwrap(), "WP004");
        assert_eq!(storage.next_id(Sequence::Route).unwrap(), "R003");
        assert_eq!(storage.next_id(Sequence::Alert).unwrap(), "AL003");
    }

    #[test]
    fn seeded_accounts_can_log_in_except_inactive() {
        let storage = Storage::temporary().unwrap();
        load_demo_data(&storage, &settings(), DEMO_PASSWORD).unwrap();

        let session = auth::login(
            &storage,
            &settings(),
            &LoginForm { email_or_username: "maria@example.com".to_string(), password: DEMO_PASSWORD.to_string() },
        )
        .unwrap();
        assert_eq!(session.account_id, "WP001");

        let inactive = auth::login(
            &storage,
            &settings(),
            &LoginForm { email_or_username: "mike".to_string(), password: DEMO_PASSWORD.to_string() },
        );
        assert!(matches!(inactive, Err(Error::AccountInactive)));
    }

    #[test]
    fn seeded_stats() {
        let storage = Storage::temporary().unwrap();
        load_demo_data(&storage, &settings(), DEMO_PASSWORD).unwrap();
        let stats = accounts::system_stats(&storage).unwrap();
        assert_eq!(stats.total_accounts, 8);
        assert_eq!(stats.active_pickers, 3);
        assert_eq!(stats.active_routes, 1);
        assert_eq!(stats.avg_efficiency, 90.5);
        assert_eq!(stats.critical_alerts, 1);
        assert_eq!(stats.picker_earnings, 6100.0);
    }
}
