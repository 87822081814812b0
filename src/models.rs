use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Current UTC date, the granularity of join/last-active dates
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Resident / waste producer
    User,
    Picker,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Picker, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Picker => "picker",
            Role::Admin => "admin",
        }
    }

    /// Account id prefix: `U001`, `WP001`, `A001`
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Role::User => "U",
            Role::Picker => "WP",
            Role::Admin => "A",
        }
    }

    /// Dashboard entry point for the role
    pub fn dashboard_path(&self) -> &'static str {
        match self {
            Role::User => "/dashboard",
            Role::Picker => "/picker-dashboard",
            Role::Admin => "/dashboard/admin",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Picker => "Waste Picker",
            Role::Admin => "Administrator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "picker" => Ok(Role::Picker),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub role: Role,
    pub status: AccountStatus,
    pub join_date: NaiveDate,
    pub last_active: NaiveDate,
    /// Residents and pickers only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collections: Option<u32>,
    /// Pickers only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earnings: Option<f64>,
    #[serde(default)]
    pub newsletter: bool,
}

impl Account {
    /// Fresh active account; counters are set according to the role.
    pub fn new(id: String, name: String, email: String, role: Role, today: NaiveDate) -> Self {
        Self {
            id,
            name,
            email,
            username: None,
            role,
            status: AccountStatus::Active,
            join_date: today,
            last_active: today,
            collections: (role != Role::Admin).then_some(0),
            earnings: (role == Role::Picker).then_some(0.0),
            newsletter: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Case-insensitive substring match on name or email
    pub fn matches(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.name.to_lowercase().contains(&term) || self.email.to_lowercase().contains(&term)
    }
}

/// Password hash kept apart from the account document
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Credentials {
    pub account_id: String,
    pub password_hash: String,
    /// Admin-created accounts cannot log in until a password is set
    #[serde(default)]
    pub must_reset: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Active,
    Paused,
    Completed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    pub name: String,
    pub area: String,
    pub picker_id: String,
    pub picker_name: String,
    pub stops: u32,
    pub status: RouteStatus,
    /// Percentage, 0..=100
    pub efficiency: u8,
    pub estimated_time: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Emergency,
    Maintenance,
    System,
    Performance,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub category: AlertCategory,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub resolved: bool,
}

impl Alert {
    pub fn is_open_critical(&self) -> bool {
        !self.resolved && self.severity == Severity::Critical
    }
}

/// Validated lat/lng pair
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return None;
        }
        Some(Self { lat, lng })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    InProgress,
    Completed,
    Delayed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::InProgress => "in_progress",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Delayed => "delayed",
        }
    }

    /// Allowed moves of the picker workflow
    pub fn can_move_to(&self, next: AssignmentStatus) -> bool {
        use AssignmentStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Delayed, InProgress)
                | (InProgress, Completed)
                | (Pending, Delayed)
                | (InProgress, Delayed)
        )
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub picker_id: String,
    /// Primary waste stream, e.g. "General Waste"
    #[serde(rename = "type")]
    pub kind: String,
    pub customer_name: String,
    pub address: String,
    pub coordinates: Coordinates,
    pub scheduled_time: String,
    /// Minutes
    pub estimated_duration: u32,
    /// Kilograms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_weight: Option<f64>,
    pub priority: Priority,
    pub status: AssignmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    pub waste_types: Vec<String>,
    pub earnings: f64,
    /// Kilometres
    pub distance: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhotoCategory {
    Before,
    After,
    Waste,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PhotoSet {
    pub before: Vec<String>,
    pub after: Vec<String>,
    pub waste: Vec<String>,
}

impl PhotoSet {
    pub fn category_mut(&mut self, category: PhotoCategory) -> &mut Vec<String> {
        match category {
            PhotoCategory::Before => &mut self.before,
            PhotoCategory::After => &mut self.after,
            PhotoCategory::Waste => &mut self.waste,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRecord {
    pub id: Uuid,
    pub assignment_id: String,
    pub customer_name: String,
    pub address: String,
    pub waste_types: Vec<String>,
    pub photos: PhotoSet,
    /// Kilograms
    pub weight: f64,
    /// Data URL, empty until the customer signs
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    pub notes: String,
    pub customer_rating: u8,
    pub issues: Vec<String>,
    pub verification_status: VerificationStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PickupStatus {
    Scheduled,
    Pending,
    Cancelled,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledPickup {
    pub id: String,
    pub account_id: String,
    pub waste_type: String,
    pub date: NaiveDate,
    pub time_slot: String,
    pub status: PickupStatus,
}

/// JWT claims
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthPayload {
    pub sub: String, // account id
    pub role: Role,
    pub exp: usize,
    pub jti: String,
}
